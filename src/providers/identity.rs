use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::plan::{NodeId, NodeSlot, ResourceHandle};
use crate::providers::{Dependency, Described, ResourceProvider, allow_statement, managed_policy};
use crate::resource::{Naming, Reference, ResourceDeclaration};

/// Resource used for the invoke role when no API front door exists.
const ANY_EXECUTE_API: &str = "arn:aws:execute-api:*:*:*";

#[derive(Debug, Clone, Serialize)]
pub struct IdentityInputs {
    pub naming: Naming,
    pub execute_api_arn: NodeSlot<Reference>,
}

#[derive(Debug, Clone)]
pub struct IdentityHandle {
    description: ResourceHandle,
}

impl Described for IdentityHandle {
    fn description(&self) -> &ResourceHandle {
        &self.description
    }
}

/// Trusted and untrusted API callers plus the role the untrusted caller
/// assumes to invoke the API.
pub struct IdentityProvider;

impl ResourceProvider for IdentityProvider {
    const NODE: NodeId = NodeId::Identity;
    const DEPENDENCIES: &'static [Dependency] = &[Dependency::Optional(NodeId::ApiFrontDoor)];

    type Inputs = IdentityInputs;
    type Handle = IdentityHandle;

    fn build(&self, inputs: &IdentityInputs) -> Result<IdentityHandle> {
        let naming = &inputs.naming;

        let trusted = ResourceDeclaration::new(naming.logical("TrustedUser"), "AWS::IAM::User")
            .property("UserName", naming.physical("trusted-user"))
            .property(
                "ManagedPolicyArns",
                json!([managed_policy("AmazonAPIGatewayInvokeFullAccess")]),
            );
        let trusted_key = ResourceDeclaration::new(
            naming.logical("TrustedUserAccessKey"),
            "AWS::IAM::AccessKey",
        )
        .reference("UserName", &trusted.id_ref());

        let untrusted = ResourceDeclaration::new(naming.logical("UntrustedUser"), "AWS::IAM::User")
            .property("UserName", naming.physical("untrusted-user"));
        let untrusted_key = ResourceDeclaration::new(
            naming.logical("UntrustedUserAccessKey"),
            "AWS::IAM::AccessKey",
        )
        .reference("UserName", &untrusted.id_ref());

        let (scope, scoped) = match &inputs.execute_api_arn {
            NodeSlot::Present(arn) => (arn.clone(), true),
            NodeSlot::Absent => (Reference::literal(ANY_EXECUTE_API), false),
        };
        let role = ResourceDeclaration::new(naming.logical("ApiGatewayInvokeRole"), "AWS::IAM::Role")
            .property("RoleName", naming.physical("ApiGatewayInvoke"))
            .property(
                "AssumeRolePolicyDocument",
                json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": { "AWS": untrusted.attr("Arn").to_template() },
                        "Action": "sts:AssumeRole"
                    }]
                }),
            )
            .property(
                "Policies",
                json!([{
                    "PolicyName": naming.physical("ApiGatewayInvoke"),
                    "PolicyDocument": allow_statement(
                        &["execute-api:Invoke", "execute-api:ManageConnections"],
                        json!([scope.to_template()]),
                    )
                }]),
            );
        let description = ResourceHandle::new(Self::NODE)
            .identifier("trustedUser", &trusted.id_ref())
            .identifier("untrustedUser", &untrusted.id_ref())
            .identifier("invokeRoleArn", &role.attr("Arn"))
            .identifier("invokeScope", &scope)
            .attribute("scopedToApi", scoped)
            .output("TrustedUserAccessKeyId", trusted_key.id_ref())
            .output("TrustedUserSecretAccessKey", trusted_key.attr("SecretAccessKey"))
            .output("UntrustedUserAccessKeyId", untrusted_key.id_ref())
            .output(
                "UntrustedUserSecretAccessKey",
                untrusted_key.attr("SecretAccessKey"),
            );
        let description =
            description.resources([trusted, trusted_key, untrusted, untrusted_key, role]);

        Ok(IdentityHandle { description })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(arn: NodeSlot<Reference>) -> IdentityHandle {
        IdentityProvider
            .build(&IdentityInputs {
                naming: Naming::new("Dev-"),
                execute_api_arn: arn,
            })
            .expect("builds")
    }

    #[test]
    fn scopes_invoke_role_to_present_api() {
        let arn = Reference::join("", vec![Reference::to("DevRestApi"), Reference::literal("/*")]);
        let handle = build(NodeSlot::Present(arn));
        assert_eq!(handle.description().attributes["scopedToApi"], json!(true));
        assert_eq!(
            handle.description().identifiers["invokeScope"],
            json!("${DevRestApi}/*")
        );
    }

    #[test]
    fn falls_back_to_wildcard_scope_without_api() {
        let handle = build(NodeSlot::Absent);
        assert_eq!(
            handle.description().identifiers["invokeScope"],
            json!(ANY_EXECUTE_API)
        );
    }

    #[test]
    fn exposes_both_key_pairs() {
        let handle = build(NodeSlot::Absent);
        let names: Vec<_> = handle
            .description()
            .outputs
            .iter()
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "TrustedUserAccessKeyId",
                "TrustedUserSecretAccessKey",
                "UntrustedUserAccessKeyId",
                "UntrustedUserSecretAccessKey"
            ]
        );
        assert_eq!(
            handle.description().outputs[1].reference,
            Reference::attr("DevTrustedUserAccessKey", "SecretAccessKey")
        );
    }
}
