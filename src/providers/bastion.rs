use ipnet::Ipv4Net;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, ResourceHandle};
use crate::providers::{
    Dependency, Described, ResourceProvider, SecurityGroupRef, allow_statement,
    assume_role_policy, ensure_same_network, ensure_subnets, managed_policy, name_tag, tcp_rule,
};
use crate::resource::{Naming, Reference, ResourceDeclaration};

const SSH_PORT: u16 = 22;
const BASTION_INSTANCE_TYPE: &str = "t3.nano";

#[derive(Debug, Clone, Serialize)]
pub struct BastionInputs {
    pub naming: Naming,
    pub vpc_id: Reference,
    pub public_subnet_ids: Vec<Reference>,
    pub vpc_security_group: SecurityGroupRef,
    pub ami: String,
    pub ssh_whitelist: Vec<Ipv4Net>,
}

#[derive(Debug, Clone)]
pub struct BastionHandle {
    pub instance_id: Reference,
    pub security_group: SecurityGroupRef,
    description: ResourceHandle,
}

impl Described for BastionHandle {
    fn description(&self) -> &ResourceHandle {
        &self.description
    }
}

/// SSM-managed jump host in the first public subnet.
pub struct BastionProvider;

impl ResourceProvider for BastionProvider {
    const NODE: NodeId = NodeId::Bastion;
    const DEPENDENCIES: &'static [Dependency] = &[
        Dependency::Required(NodeId::Network),
        Dependency::Required(NodeId::SecurityGroups),
    ];

    type Inputs = BastionInputs;
    type Handle = BastionHandle;

    fn build(&self, inputs: &BastionInputs) -> Result<BastionHandle> {
        ensure_same_network(Self::NODE, "VPC", &inputs.vpc_security_group, &inputs.vpc_id)?;
        ensure_subnets(Self::NODE, "public", &inputs.public_subnet_ids)?;
        if inputs.ssh_whitelist.is_empty() {
            return Err(ProvisionError::build(
                Self::NODE,
                "ssh whitelist must list at least one range",
            ));
        }
        let naming = &inputs.naming;

        let role = ResourceDeclaration::new(naming.logical("BastionRole"), "AWS::IAM::Role")
            .property("AssumeRolePolicyDocument", assume_role_policy("ec2.amazonaws.com"))
            .property(
                "ManagedPolicyArns",
                json!([managed_policy("service-role/AmazonEC2RoleforSSM")]),
            );
        let policy = ResourceDeclaration::new(naming.logical("BastionPolicy"), "AWS::IAM::Policy")
            .property("PolicyName", naming.physical("BastionPolicy"))
            .property(
                "PolicyDocument",
                allow_statement(&["ssm:CreateOpsItem"], json!("*")),
            )
            .property("Roles", json!([role.id_ref().to_template()]));
        let profile = ResourceDeclaration::new(
            naming.logical("BastionProfile"),
            "AWS::IAM::InstanceProfile",
        )
        .property("Roles", json!([role.id_ref().to_template()]));

        let ssh_rules: Vec<Value> = inputs
            .ssh_whitelist
            .iter()
            .map(|range| tcp_rule(SSH_PORT, range))
            .collect();
        let ssh_sg = ResourceDeclaration::new(
            naming.logical("BastionSecurityGroup"),
            "AWS::EC2::SecurityGroup",
        )
        .property(
            "GroupDescription",
            format!("{} bastion SSH access", naming.physical("")),
        )
        .reference("VpcId", &inputs.vpc_id)
        .property("SecurityGroupIngress", Value::Array(ssh_rules));
        let security_group = SecurityGroupRef {
            group_id: ssh_sg.attr("GroupId"),
            vpc_id: inputs.vpc_id.clone(),
        };

        let host = ResourceDeclaration::new(naming.logical("BastionHost"), "AWS::EC2::Instance")
            .property("ImageId", inputs.ami.clone())
            .property("InstanceType", BASTION_INSTANCE_TYPE)
            .reference("SubnetId", &inputs.public_subnet_ids[0])
            .reference("IamInstanceProfile", &profile.id_ref())
            .property(
                "SecurityGroupIds",
                json!([
                    security_group.group_id.to_template(),
                    inputs.vpc_security_group.group_id.to_template()
                ]),
            )
            .property("Tags", name_tag(&naming.physical("BastionHost")));
        let instance_id = host.id_ref();

        let description = ResourceHandle::new(Self::NODE)
            .identifier("instanceId", &instance_id)
            .identifier("securityGroupId", &security_group.group_id)
            .identifier("roleName", &role.id_ref())
            .attribute("instanceType", BASTION_INSTANCE_TYPE)
            .attribute("sshRanges", inputs.ssh_whitelist.len())
            .resources([role, policy, profile, ssh_sg, host])
            .output("BastionInstanceId", instance_id.clone());

        Ok(BastionHandle {
            instance_id,
            security_group,
            description,
        })
    }
}
