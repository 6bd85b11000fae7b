use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, ResourceHandle};
use crate::providers::{
    Dependency, Described, ResourceProvider, SecurityGroupRef, assume_role_policy,
    ensure_same_network, ensure_subnets, managed_policy,
};
use crate::resource::{Naming, Reference, ResourceDeclaration, reference_list};
use crate::settings::SourceBundle;

const STAGE_NAME: &str = "api";
pub(crate) const API_ENDPOINT_OUTPUT: &str = "ApiEndpointUrl";

#[derive(Debug, Clone, Serialize)]
pub struct ApiInputs {
    pub naming: Naming,
    pub vpc_id: Reference,
    pub subnet_ids: Vec<Reference>,
    pub security_group: SecurityGroupRef,
    pub runtime: String,
    pub handler: String,
    pub code: SourceBundle,
    pub timeout: Duration,
    pub table_name: Reference,
}

#[derive(Debug, Clone)]
pub struct ApiHandle {
    pub rest_api_id: Reference,
    /// ARN pattern covering every method of the deployed stage.
    pub execute_api_arn: Reference,
    pub endpoint_url: Reference,
    description: ResourceHandle,
}

impl Described for ApiHandle {
    fn description(&self) -> &ResourceHandle {
        &self.description
    }
}

/// IAM-authorized REST API proxying every path to one Lambda function.
pub struct ApiFrontDoorProvider;

impl ResourceProvider for ApiFrontDoorProvider {
    const NODE: NodeId = NodeId::ApiFrontDoor;
    const DEPENDENCIES: &'static [Dependency] = &[
        Dependency::Required(NodeId::Network),
        Dependency::Required(NodeId::SecurityGroups),
        Dependency::Required(NodeId::KeyValueTable),
    ];

    type Inputs = ApiInputs;
    type Handle = ApiHandle;

    fn build(&self, inputs: &ApiInputs) -> Result<ApiHandle> {
        ensure_same_network(Self::NODE, "function", &inputs.security_group, &inputs.vpc_id)?;
        ensure_subnets(Self::NODE, "function", &inputs.subnet_ids)?;
        let timeout = inputs.timeout.as_secs();
        if timeout == 0 {
            return Err(ProvisionError::build(
                Self::NODE,
                "function timeout must be at least one second",
            ));
        }
        if inputs.code.bucket.is_empty() || inputs.code.key.is_empty() {
            return Err(ProvisionError::build(
                Self::NODE,
                "function code needs both bucket and key",
            ));
        }
        let naming = &inputs.naming;

        let role = ResourceDeclaration::new(naming.logical("ApiFunctionRole"), "AWS::IAM::Role")
            .property("AssumeRolePolicyDocument", assume_role_policy("lambda.amazonaws.com"))
            .property(
                "ManagedPolicyArns",
                json!([managed_policy("service-role/AWSLambdaVPCAccessExecutionRole")]),
            );

        let function = ResourceDeclaration::new(
            naming.logical("ApiRequestHandler"),
            "AWS::Lambda::Function",
        )
        .property("Runtime", inputs.runtime.clone())
        .property("Handler", inputs.handler.clone())
        .property("Timeout", timeout)
        .reference("Role", &role.attr("Arn"))
        .property(
            "Code",
            json!({ "S3Bucket": inputs.code.bucket, "S3Key": inputs.code.key }),
        )
        .property(
            "VpcConfig",
            json!({
                "SubnetIds": reference_list(&inputs.subnet_ids),
                "SecurityGroupIds": [inputs.security_group.group_id.to_template()]
            }),
        )
        .property(
            "Environment",
            json!({ "Variables": { "TABLE_NAME": inputs.table_name.to_template() } }),
        );

        let api = ResourceDeclaration::new(naming.logical("RestApi"), "AWS::ApiGateway::RestApi")
            .property("Name", naming.physical("RestApi"))
            .property("Description", "IAM-authorized proxy to the request handler");
        let rest_api_id = api.id_ref();

        let integration_uri = Reference::join(
            "",
            vec![
                Reference::literal("arn:aws:apigateway:"),
                Reference::region(),
                Reference::literal(":lambda:path/2015-03-31/functions/"),
                function.attr("Arn"),
                Reference::literal("/invocations"),
            ],
        );
        let integration = json!({
            "Type": "AWS_PROXY",
            "IntegrationHttpMethod": "POST",
            "Uri": integration_uri.to_template()
        });

        let root_method = ResourceDeclaration::new(
            naming.logical("RestApiRootMethod"),
            "AWS::ApiGateway::Method",
        )
        .reference("RestApiId", &rest_api_id)
        .reference("ResourceId", &api.attr("RootResourceId"))
        .property("HttpMethod", "ANY")
        .property("AuthorizationType", "AWS_IAM")
        .property("Integration", integration.clone());
        let proxy = ResourceDeclaration::new(
            naming.logical("RestApiProxyResource"),
            "AWS::ApiGateway::Resource",
        )
        .reference("RestApiId", &rest_api_id)
        .reference("ParentId", &api.attr("RootResourceId"))
        .property("PathPart", "{proxy+}");
        let proxy_method = ResourceDeclaration::new(
            naming.logical("RestApiProxyMethod"),
            "AWS::ApiGateway::Method",
        )
        .reference("RestApiId", &rest_api_id)
        .reference("ResourceId", &proxy.id_ref())
        .property("HttpMethod", "ANY")
        .property("AuthorizationType", "AWS_IAM")
        .property("Integration", integration);

        let execute_api_arn = Reference::join(
            "",
            vec![
                Reference::literal("arn:aws:execute-api:"),
                Reference::region(),
                Reference::literal(":"),
                Reference::account_id(),
                Reference::literal(":"),
                rest_api_id.clone(),
                Reference::literal("/*"),
            ],
        );
        let permission = ResourceDeclaration::new(
            naming.logical("ApiInvokePermission"),
            "AWS::Lambda::Permission",
        )
        .property("Action", "lambda:InvokeFunction")
        .reference("FunctionName", &function.attr("Arn"))
        .property("Principal", "apigateway.amazonaws.com")
        .reference("SourceArn", &execute_api_arn);

        let deployment = ResourceDeclaration::new(
            naming.logical("RestApiDeployment"),
            "AWS::ApiGateway::Deployment",
        )
        .reference("RestApiId", &rest_api_id)
        .property("StageName", STAGE_NAME)
        .depends_on(root_method.logical_id.clone())
        .depends_on(proxy_method.logical_id.clone());

        let endpoint_url = Reference::join(
            "",
            vec![
                Reference::literal("https://"),
                rest_api_id.clone(),
                Reference::literal(".execute-api."),
                Reference::region(),
                Reference::literal(format!(".amazonaws.com/{STAGE_NAME}/")),
            ],
        );

        let description = ResourceHandle::new(Self::NODE)
            .identifier("restApiId", &rest_api_id)
            .identifier("functionArn", &function.attr("Arn"))
            .identifier("executeApiArn", &execute_api_arn)
            .attribute("authorization", "AWS_IAM")
            .attribute("runtime", inputs.runtime.clone())
            .attribute("stageName", STAGE_NAME)
            .attribute("timeoutSeconds", timeout)
            .resources([
                role,
                function,
                api,
                root_method,
                proxy,
                proxy_method,
                permission,
                deployment,
            ])
            .output(API_ENDPOINT_OUTPUT, endpoint_url.clone());

        Ok(ApiHandle {
            rest_api_id,
            execute_api_arn,
            endpoint_url,
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fixtures;

    fn inputs() -> ApiInputs {
        ApiInputs {
            naming: Naming::new("Dev-"),
            vpc_id: fixtures::vpc(),
            subnet_ids: fixtures::subnets("DevIngressSubnet", 1),
            security_group: fixtures::group("DevSecurityGroup"),
            runtime: "nodejs18.x".into(),
            handler: "request.handler".into(),
            code: SourceBundle {
                bucket: "dev-artifacts".into(),
                key: "lambda/request.zip".into(),
            },
            timeout: Duration::from_secs(10),
            table_name: Reference::to("DevKeyValueTable"),
        }
    }

    #[test]
    fn every_method_requires_iam_auth() {
        let handle = ApiFrontDoorProvider.build(&inputs()).expect("builds");
        let methods: Vec<_> = handle
            .description()
            .resources
            .iter()
            .filter(|r| r.resource_type == "AWS::ApiGateway::Method")
            .collect();
        assert_eq!(methods.len(), 2);
        for method in methods {
            assert_eq!(method.properties["AuthorizationType"], json!("AWS_IAM"));
            assert_eq!(method.properties["HttpMethod"], json!("ANY"));
        }
        assert_eq!(handle.rest_api_id, Reference::to("DevRestApi"));
    }

    #[test]
    fn execute_arn_is_scoped_to_this_api() {
        let handle = ApiFrontDoorProvider.build(&inputs()).unwrap();
        let rendered = handle.execute_api_arn.to_string();
        assert!(rendered.contains("${DevRestApi}"), "{rendered}");
        assert!(rendered.ends_with("/*"));
    }

    #[test]
    fn rejects_foreign_group_and_zero_timeout() {
        let mut bad = inputs();
        bad.security_group = fixtures::foreign_group("Other");
        assert!(ApiFrontDoorProvider.build(&bad).is_err());

        let mut bad = inputs();
        bad.timeout = Duration::from_millis(500);
        assert!(ApiFrontDoorProvider.build(&bad).is_err());
    }
}
