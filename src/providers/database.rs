use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, ResourceHandle};
use crate::providers::{
    Dependency, Described, ResourceProvider, SecurityGroupRef, ensure_same_network, ensure_subnets,
};
use crate::resource::{Naming, Reference, ResourceDeclaration, reference_list};

const ENGINE: &str = "aurora-postgresql";
const PARAMETER_FAMILY: &str = "aurora-postgresql11";
const MASTER_USERNAME: &str = "dbadmin";
const PASSWORD_LENGTH: u32 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInputs {
    pub naming: Naming,
    pub vpc_id: Reference,
    pub isolated_subnet_ids: Vec<Reference>,
    pub security_group: SecurityGroupRef,
    pub database_name: String,
    pub port: u16,
    pub instances: u32,
    pub instance_class: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    pub cluster_id: Reference,
    pub endpoint_address: Reference,
    pub secret_arn: Reference,
    description: ResourceHandle,
}

impl Described for DatabaseHandle {
    fn description(&self) -> &ResourceHandle {
        &self.description
    }
}

/// Aurora PostgreSQL cluster in the isolated subnets. The master password is
/// generated by the secrets service from the declared constraints.
pub struct RelationalDatabaseProvider;

impl ResourceProvider for RelationalDatabaseProvider {
    const NODE: NodeId = NodeId::RelationalDatabase;
    const DEPENDENCIES: &'static [Dependency] = &[
        Dependency::Required(NodeId::Network),
        Dependency::Required(NodeId::SecurityGroups),
    ];

    type Inputs = DatabaseInputs;
    type Handle = DatabaseHandle;

    fn build(&self, inputs: &DatabaseInputs) -> Result<DatabaseHandle> {
        ensure_same_network(Self::NODE, "database", &inputs.security_group, &inputs.vpc_id)?;
        ensure_subnets(Self::NODE, "isolated", &inputs.isolated_subnet_ids)?;
        if inputs.instances == 0 {
            return Err(ProvisionError::build(
                Self::NODE,
                "a cluster needs at least one instance",
            ));
        }
        if inputs.port == 0 {
            return Err(ProvisionError::build(Self::NODE, "port 0 is not a valid database port"));
        }
        let naming = &inputs.naming;

        let secret = ResourceDeclaration::new(
            naming.logical("DatabasePassword"),
            "AWS::SecretsManager::Secret",
        )
        .property("Description", "Generated master password for the database cluster")
        .property(
            "GenerateSecretString",
            json!({
                "SecretStringTemplate": json!({ "username": MASTER_USERNAME }).to_string(),
                "GenerateStringKey": "password",
                "PasswordLength": PASSWORD_LENGTH,
                "ExcludePunctuation": true
            }),
        );
        let secret_arn = secret.id_ref();

        let subnet_group = ResourceDeclaration::new(
            naming.logical("DatabaseSubnetGroup"),
            "AWS::RDS::DBSubnetGroup",
        )
        .property(
            "DBSubnetGroupDescription",
            format!("{} isolated database subnets", naming.physical("")),
        )
        .property("SubnetIds", reference_list(&inputs.isolated_subnet_ids));

        let parameter_group = ResourceDeclaration::new(
            naming.logical("RdsParameterGroup"),
            "AWS::RDS::DBClusterParameterGroup",
        )
        .property("Family", PARAMETER_FAMILY)
        .property(
            "Description",
            format!("{} PostgreSQL 11 parameter group", naming.physical("")),
        )
        .property("Parameters", json!({ "client_encoding": "utf8" }));

        let cluster = ResourceDeclaration::new(
            naming.logical("DatabaseCluster"),
            "AWS::RDS::DBCluster",
        )
        .property(
            "DBClusterIdentifier",
            naming.physical("DatabaseCluster").to_ascii_lowercase(),
        )
        .property("Engine", ENGINE)
        .property("DatabaseName", inputs.database_name.clone())
        .property("Port", inputs.port)
        .property("MasterUsername", resolve_secret(&secret_arn, "username"))
        .property("MasterUserPassword", resolve_secret(&secret_arn, "password"))
        .reference("DBSubnetGroupName", &subnet_group.id_ref())
        .reference("DBClusterParameterGroupName", &parameter_group.id_ref())
        .property(
            "VpcSecurityGroupIds",
            json!([inputs.security_group.group_id.to_template()]),
        );
        let cluster_id = cluster.id_ref();
        let endpoint_address = cluster.attr("Endpoint.Address");

        let instances: Vec<ResourceDeclaration> = (1..=inputs.instances)
            .map(|ordinal| {
                ResourceDeclaration::new(
                    naming.logical(&format!("DatabaseInstance{ordinal}")),
                    "AWS::RDS::DBInstance",
                )
                .property("Engine", ENGINE)
                .reference("DBClusterIdentifier", &cluster_id)
                .property("DBInstanceClass", inputs.instance_class.clone())
                .reference("DBSubnetGroupName", &subnet_group.id_ref())
                .property("PubliclyAccessible", false)
            })
            .collect();

        let description = ResourceHandle::new(Self::NODE)
            .identifier("clusterId", &cluster_id)
            .identifier("endpointAddress", &endpoint_address)
            .identifier("secretArn", &secret_arn)
            .attribute("engine", ENGINE)
            .attribute("instanceClass", inputs.instance_class.clone())
            .attribute("instanceCount", inputs.instances)
            .attribute("port", inputs.port)
            .resources([secret, subnet_group, parameter_group, cluster])
            .resources(instances)
            .output("DatabaseClusterEndpoint", endpoint_address.clone())
            .output("DatabaseSecretArn", secret_arn.clone());

        Ok(DatabaseHandle {
            cluster_id,
            endpoint_address,
            secret_arn,
            description,
        })
    }
}

/// Dynamic reference resolving one key of the generated secret at deploy time.
fn resolve_secret(secret: &Reference, key: &str) -> Value {
    Reference::join(
        "",
        vec![
            Reference::literal("{{resolve:secretsmanager:"),
            secret.clone(),
            Reference::literal(format!(":SecretString:{key}}}}}")),
        ],
    )
    .to_template()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fixtures;

    fn inputs() -> DatabaseInputs {
        DatabaseInputs {
            naming: Naming::new("Dev-"),
            vpc_id: fixtures::vpc(),
            isolated_subnet_ids: fixtures::subnets("DevDatabaseSubnet", 2),
            security_group: fixtures::group("DevSecurityGroup"),
            database_name: "app".into(),
            port: 5432,
            instances: 2,
            instance_class: "db.t3.medium".into(),
        }
    }

    #[test]
    fn declares_cluster_with_one_instance_per_count() {
        let handle = RelationalDatabaseProvider.build(&inputs()).expect("builds");
        let instances = handle
            .description()
            .resources
            .iter()
            .filter(|r| r.resource_type == "AWS::RDS::DBInstance")
            .count();
        assert_eq!(instances, 2);
        assert_eq!(
            handle.endpoint_address,
            Reference::attr("DevDatabaseCluster", "Endpoint.Address")
        );
        let cluster = handle
            .description()
            .resources
            .iter()
            .find(|r| r.resource_type == "AWS::RDS::DBCluster")
            .unwrap();
        assert_eq!(
            cluster.properties["DBClusterIdentifier"],
            json!("dev-databasecluster")
        );
    }

    #[test]
    fn password_is_a_generation_request_not_a_value() {
        let handle = RelationalDatabaseProvider.build(&inputs()).unwrap();
        let secret = &handle.description().resources[0];
        assert_eq!(
            secret.properties["GenerateSecretString"]["PasswordLength"],
            json!(20)
        );
        assert_eq!(
            secret.properties["GenerateSecretString"]["ExcludePunctuation"],
            json!(true)
        );
    }

    #[test]
    fn rejects_security_group_from_another_network() {
        let mut bad = inputs();
        bad.security_group = fixtures::foreign_group("Foreign");
        let err = RelationalDatabaseProvider.build(&bad).unwrap_err();
        assert!(err.to_string().contains("RelationalDatabase"));
    }

    #[test]
    fn rejects_missing_isolated_subnets() {
        let mut bad = inputs();
        bad.isolated_subnet_ids.clear();
        assert!(RelationalDatabaseProvider.build(&bad).is_err());
    }
}
