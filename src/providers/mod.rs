use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, ResourceHandle};
use crate::resource::Reference;

pub mod api;
pub mod bastion;
pub mod certificate;
pub mod database;
pub mod identity;
pub mod network;
pub mod runtime;
pub mod security;
pub mod table;

pub use api::{ApiFrontDoorProvider, ApiHandle, ApiInputs};
pub use bastion::{BastionHandle, BastionInputs, BastionProvider};
pub use certificate::{CertificateHandle, CertificateInputs, CertificateProvider};
pub use database::{DatabaseHandle, DatabaseInputs, RelationalDatabaseProvider};
pub use identity::{IdentityHandle, IdentityInputs, IdentityProvider};
pub use network::{NetworkHandle, NetworkInputs, NetworkProvider};
pub use runtime::{ApplicationRuntimeProvider, RuntimeHandle, RuntimeInputs};
pub use security::{SecurityGroupsProvider, SecurityHandle, SecurityInputs};
pub use table::{KeyValueTableProvider, TableHandle, TableInputs};

/// Declared upstream edge of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dependency {
    /// Upstream node must have been built.
    Required(NodeId),
    /// Upstream node must have been built or explicitly skipped.
    Optional(NodeId),
}

impl Dependency {
    pub fn node(&self) -> NodeId {
        match self {
            Dependency::Required(node) | Dependency::Optional(node) => *node,
        }
    }
}

/// Typed handles expose the provider-agnostic description they carry.
pub trait Described {
    fn description(&self) -> &ResourceHandle;
}

/// Contract every resource kind implements.
///
/// `build` must be a pure function of `inputs`: building twice with equal
/// inputs describes the same logical resource. Providers never reach into
/// other providers; every upstream identifier arrives through `Inputs`.
pub trait ResourceProvider {
    const NODE: NodeId;
    const DEPENDENCIES: &'static [Dependency];

    type Inputs: Serialize;
    type Handle: Described;

    fn build(&self, inputs: &Self::Inputs) -> Result<Self::Handle>;

    fn node(&self) -> NodeId {
        Self::NODE
    }

    /// Owned copy of the provider-agnostic view of `handle`.
    fn describe(handle: &Self::Handle) -> ResourceHandle {
        handle.description().clone()
    }
}

/// Security group identifier together with the network it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRef {
    pub group_id: Reference,
    pub vpc_id: Reference,
}

/// Rejects security groups that belong to a different network.
pub(crate) fn ensure_same_network(
    node: NodeId,
    label: &str,
    group: &SecurityGroupRef,
    vpc_id: &Reference,
) -> Result<()> {
    if &group.vpc_id != vpc_id {
        return Err(ProvisionError::build(
            node,
            format!(
                "{label} security group {} belongs to network {}, not {}",
                group.group_id, group.vpc_id, vpc_id
            ),
        ));
    }
    Ok(())
}

pub(crate) fn ensure_network_ref(node: NodeId, vpc_id: &Reference) -> Result<()> {
    if vpc_id.target().is_none() {
        return Err(ProvisionError::build(
            node,
            format!("network id {vpc_id} does not reference a network resource"),
        ));
    }
    Ok(())
}

pub(crate) fn ensure_subnets(node: NodeId, kind: &str, subnets: &[Reference]) -> Result<()> {
    if subnets.is_empty() {
        return Err(ProvisionError::build(
            node,
            format!("no {kind} subnets available in the target network"),
        ));
    }
    Ok(())
}

/// Trust policy letting `service` assume a role.
pub(crate) fn assume_role_policy(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole"
        }]
    })
}

pub(crate) fn allow_statement(actions: &[&str], resources: Value) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": actions,
            "Resource": resources
        }]
    })
}

pub(crate) fn managed_policy(name: &str) -> String {
    format!("arn:aws:iam::aws:policy/{name}")
}

pub(crate) fn name_tag(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

pub(crate) fn tcp_rule(port: u16, cidr: &ipnet::Ipv4Net) -> Value {
    json!({
        "IpProtocol": "tcp",
        "FromPort": port,
        "ToPort": port,
        "CidrIp": cidr.to_string()
    })
}
