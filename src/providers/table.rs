use serde::Serialize;
use serde_json::json;

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, ResourceHandle};
use crate::providers::{Dependency, Described, ResourceProvider};
use crate::resource::{Naming, Reference, ResourceDeclaration};

#[derive(Debug, Clone, Serialize)]
pub struct TableInputs {
    pub naming: Naming,
    pub table_name: String,
    pub partition_key: String,
}

#[derive(Debug, Clone)]
pub struct TableHandle {
    pub table_name: Reference,
    pub table_arn: Reference,
    description: ResourceHandle,
}

impl Described for TableHandle {
    fn description(&self) -> &ResourceHandle {
        &self.description
    }
}

/// On-demand DynamoDB table keyed by a single string partition key. The
/// table survives stack deletion.
pub struct KeyValueTableProvider;

impl ResourceProvider for KeyValueTableProvider {
    const NODE: NodeId = NodeId::KeyValueTable;
    const DEPENDENCIES: &'static [Dependency] = &[];

    type Inputs = TableInputs;
    type Handle = TableHandle;

    fn build(&self, inputs: &TableInputs) -> Result<TableHandle> {
        if inputs.table_name.trim().is_empty() {
            return Err(ProvisionError::build(Self::NODE, "table name must not be empty"));
        }
        if inputs.partition_key.trim().is_empty() {
            return Err(ProvisionError::build(Self::NODE, "partition key must not be empty"));
        }

        let table = ResourceDeclaration::new(
            inputs.naming.logical("KeyValueTable"),
            "AWS::DynamoDB::Table",
        )
        .property("TableName", inputs.table_name.clone())
        .property("BillingMode", "PAY_PER_REQUEST")
        .property(
            "AttributeDefinitions",
            json!([{ "AttributeName": inputs.partition_key, "AttributeType": "S" }]),
        )
        .property(
            "KeySchema",
            json!([{ "AttributeName": inputs.partition_key, "KeyType": "HASH" }]),
        )
        .retain();
        let table_name = table.id_ref();
        let table_arn = table.attr("Arn");

        let description = ResourceHandle::new(Self::NODE)
            .identifier("tableName", &table_name)
            .identifier("tableArn", &table_arn)
            .attribute("partitionKey", inputs.partition_key.clone())
            .attribute("physicalName", inputs.table_name.clone())
            .resources([table])
            .output("KeyValueTableName", table_name.clone());

        Ok(TableHandle {
            table_name,
            table_arn,
            description,
        })
    }
}
