use ipnet::Ipv4Net;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, ResourceHandle};
use crate::providers::{
    Dependency, Described, ResourceProvider, SecurityGroupRef, ensure_network_ref, tcp_rule,
};
use crate::resource::{Naming, Reference, ResourceDeclaration};

#[derive(Debug, Clone, Serialize)]
pub struct SecurityInputs {
    pub naming: Naming,
    pub vpc_id: Reference,
    pub ingress_whitelist: Vec<Ipv4Net>,
    pub egress_whitelist: Vec<Ipv4Net>,
    /// Ports opened for every whitelisted range on the instance group.
    pub service_ports: Vec<u16>,
    /// Ports the load balancer listens on.
    pub listener_ports: Vec<u16>,
    /// Port instances serve the application on behind the load balancer.
    pub instance_port: u16,
}

#[derive(Debug, Clone)]
pub struct SecurityHandle {
    pub instance_group: SecurityGroupRef,
    pub load_balancer_group: SecurityGroupRef,
    description: ResourceHandle,
}

impl Described for SecurityHandle {
    fn description(&self) -> &ResourceHandle {
        &self.description
    }
}

pub struct SecurityGroupsProvider;

impl ResourceProvider for SecurityGroupsProvider {
    const NODE: NodeId = NodeId::SecurityGroups;
    const DEPENDENCIES: &'static [Dependency] = &[Dependency::Required(NodeId::Network)];

    type Inputs = SecurityInputs;
    type Handle = SecurityHandle;

    fn build(&self, inputs: &SecurityInputs) -> Result<SecurityHandle> {
        ensure_network_ref(Self::NODE, &inputs.vpc_id)?;
        if inputs.ingress_whitelist.is_empty() || inputs.egress_whitelist.is_empty() {
            return Err(ProvisionError::build(
                Self::NODE,
                "ingress and egress whitelists must each list at least one range",
            ));
        }
        let ports = inputs
            .service_ports
            .iter()
            .chain(&inputs.listener_ports)
            .chain(std::iter::once(&inputs.instance_port));
        for port in ports {
            if *port == 0 {
                return Err(ProvisionError::build(Self::NODE, "port 0 cannot be opened"));
            }
        }
        let naming = &inputs.naming;

        let instance_sg = ResourceDeclaration::new(
            naming.logical("SecurityGroup"),
            "AWS::EC2::SecurityGroup",
        )
        .property("GroupName", naming.physical("SecurityGroup"))
        .property(
            "GroupDescription",
            format!("{} Define rules for securing VPC", naming.physical("")),
        )
        .reference("VpcId", &inputs.vpc_id)
        .property(
            "SecurityGroupIngress",
            rules(&inputs.ingress_whitelist, &inputs.service_ports),
        )
        .property(
            "SecurityGroupEgress",
            rules(&inputs.egress_whitelist, &inputs.service_ports),
        );

        let lb_sg = ResourceDeclaration::new(
            naming.logical("LoadBalancerSecurityGroup"),
            "AWS::EC2::SecurityGroup",
        )
        .property("GroupName", naming.physical("LoadBalancerSecurityGroup"))
        .property(
            "GroupDescription",
            format!("{} load balancer listeners", naming.physical("")),
        )
        .reference("VpcId", &inputs.vpc_id)
        .property(
            "SecurityGroupIngress",
            rules(&inputs.ingress_whitelist, &inputs.listener_ports),
        );

        let instance_group = SecurityGroupRef {
            group_id: instance_sg.attr("GroupId"),
            vpc_id: inputs.vpc_id.clone(),
        };
        let load_balancer_group = SecurityGroupRef {
            group_id: lb_sg.attr("GroupId"),
            vpc_id: inputs.vpc_id.clone(),
        };

        let lb_to_instances = ResourceDeclaration::new(
            naming.logical("LoadBalancerToInstanceIngress"),
            "AWS::EC2::SecurityGroupIngress",
        )
        .reference("GroupId", &instance_group.group_id)
        .reference("SourceSecurityGroupId", &load_balancer_group.group_id)
        .property("IpProtocol", "tcp")
        .property("FromPort", inputs.instance_port)
        .property("ToPort", inputs.instance_port);

        let description = ResourceHandle::new(Self::NODE)
            .identifier("securityGroupId", &instance_group.group_id)
            .identifier("loadBalancerSecurityGroupId", &load_balancer_group.group_id)
            .identifier("vpcId", &inputs.vpc_id)
            .attribute("servicePorts", json!(inputs.service_ports))
            .attribute("listenerPorts", json!(inputs.listener_ports))
            .resources([instance_sg, lb_sg, lb_to_instances])
            .output("VpcSecurityGroupId", instance_group.group_id.clone());

        Ok(SecurityHandle {
            instance_group,
            load_balancer_group,
            description,
        })
    }
}

fn rules(ranges: &[Ipv4Net], ports: &[u16]) -> Value {
    Value::Array(
        ranges
            .iter()
            .flat_map(|range| ports.iter().map(move |port| tcp_rule(*port, range)))
            .collect(),
    )
}
