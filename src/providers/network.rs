use ipnet::Ipv4Net;
use serde::Serialize;
use serde_json::json;

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, ResourceHandle};
use crate::providers::{Dependency, Described, ResourceProvider, name_tag};
use crate::resource::{Naming, Reference, ResourceDeclaration};

const PUBLIC_SUBNET_PREFIX: u8 = 24;
const ISOLATED_SUBNET_PREFIX: u8 = 28;

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInputs {
    pub naming: Naming,
    pub cidr: Ipv4Net,
    pub max_availability_zones: u8,
}

#[derive(Debug, Clone)]
pub struct NetworkHandle {
    pub vpc_id: Reference,
    pub public_subnet_ids: Vec<Reference>,
    pub isolated_subnet_ids: Vec<Reference>,
    description: ResourceHandle,
}

impl Described for NetworkHandle {
    fn description(&self) -> &ResourceHandle {
        &self.description
    }
}

/// VPC with one public ingress subnet and one isolated database subnet per
/// availability zone, no NAT gateways. DynamoDB is reached through a gateway
/// endpoint on the ingress route table.
pub struct NetworkProvider;

impl ResourceProvider for NetworkProvider {
    const NODE: NodeId = NodeId::Network;
    const DEPENDENCIES: &'static [Dependency] = &[];

    type Inputs = NetworkInputs;
    type Handle = NetworkHandle;

    fn build(&self, inputs: &NetworkInputs) -> Result<NetworkHandle> {
        let azs = usize::from(inputs.max_availability_zones);
        if azs == 0 {
            return Err(ProvisionError::build(
                Self::NODE,
                "at least one availability zone is required",
            ));
        }
        let (public_blocks, isolated_blocks) = carve_subnets(&inputs.cidr, azs)?;
        let naming = &inputs.naming;

        let vpc = ResourceDeclaration::new(naming.logical("Vpc"), "AWS::EC2::VPC")
            .property("CidrBlock", inputs.cidr.to_string())
            .property("EnableDnsSupport", true)
            .property("EnableDnsHostnames", true)
            .property("Tags", name_tag(&naming.physical("Vpc")));
        let vpc_id = vpc.id_ref();

        let gateway =
            ResourceDeclaration::new(naming.logical("InternetGateway"), "AWS::EC2::InternetGateway");
        let attachment = ResourceDeclaration::new(
            naming.logical("GatewayAttachment"),
            "AWS::EC2::VPCGatewayAttachment",
        )
        .reference("VpcId", &vpc_id)
        .reference("InternetGatewayId", &gateway.id_ref());
        let route_table =
            ResourceDeclaration::new(naming.logical("IngressRouteTable"), "AWS::EC2::RouteTable")
                .reference("VpcId", &vpc_id);
        let default_route =
            ResourceDeclaration::new(naming.logical("IngressDefaultRoute"), "AWS::EC2::Route")
                .reference("RouteTableId", &route_table.id_ref())
                .property("DestinationCidrBlock", "0.0.0.0/0")
                .reference("GatewayId", &gateway.id_ref())
                .depends_on(attachment.logical_id.clone());
        let table_endpoint =
            ResourceDeclaration::new(naming.logical("DynamoEndpoint"), "AWS::EC2::VPCEndpoint")
                .reference("VpcId", &vpc_id)
                .property("VpcEndpointType", "Gateway")
                .reference(
                    "ServiceName",
                    &Reference::join(
                        "",
                        vec![
                            Reference::literal("com.amazonaws."),
                            Reference::region(),
                            Reference::literal(".dynamodb"),
                        ],
                    ),
                )
                .property("RouteTableIds", json!([route_table.id_ref().to_template()]));

        let mut subnets = Vec::new();
        let mut public_subnet_ids = Vec::new();
        let mut isolated_subnet_ids = Vec::new();
        for (idx, (public, isolated)) in public_blocks.iter().zip(&isolated_blocks).enumerate() {
            let az = json!({ "Fn::Select": [idx, { "Fn::GetAZs": "" }] });
            let ordinal = idx + 1;

            let ingress = ResourceDeclaration::new(
                naming.logical(&format!("IngressSubnet{ordinal}")),
                "AWS::EC2::Subnet",
            )
            .reference("VpcId", &vpc_id)
            .property("CidrBlock", public.to_string())
            .property("AvailabilityZone", az.clone())
            .property("MapPublicIpOnLaunch", true)
            .property("Tags", name_tag(&naming.physical(&format!("Ingress{ordinal}"))));
            let association = ResourceDeclaration::new(
                naming.logical(&format!("IngressSubnet{ordinal}RouteTableAssociation")),
                "AWS::EC2::SubnetRouteTableAssociation",
            )
            .reference("SubnetId", &ingress.id_ref())
            .reference("RouteTableId", &route_table.id_ref());

            let database = ResourceDeclaration::new(
                naming.logical(&format!("DatabaseSubnet{ordinal}")),
                "AWS::EC2::Subnet",
            )
            .reference("VpcId", &vpc_id)
            .property("CidrBlock", isolated.to_string())
            .property("AvailabilityZone", az)
            .property("MapPublicIpOnLaunch", false)
            .property("Tags", name_tag(&naming.physical(&format!("Database{ordinal}"))));

            public_subnet_ids.push(ingress.id_ref());
            isolated_subnet_ids.push(database.id_ref());
            subnets.extend([ingress, association, database]);
        }

        let description = ResourceHandle::new(Self::NODE)
            .identifier("vpcId", &vpc_id)
            .identifier_list("publicSubnetIds", &public_subnet_ids)
            .identifier_list("isolatedSubnetIds", &isolated_subnet_ids)
            .attribute("cidr", inputs.cidr.to_string())
            .attribute("availabilityZones", azs)
            .resources([vpc, gateway, attachment, route_table, default_route, table_endpoint])
            .resources(subnets);

        Ok(NetworkHandle {
            vpc_id,
            public_subnet_ids,
            isolated_subnet_ids,
            description,
        })
    }
}

/// Splits the VPC range into `azs` public /24 blocks followed by one /24
/// carved into isolated /28 blocks.
fn carve_subnets(cidr: &Ipv4Net, azs: usize) -> Result<(Vec<Ipv4Net>, Vec<Ipv4Net>)> {
    let too_small = || {
        ProvisionError::build(
            NodeId::Network,
            format!(
                "CIDR {cidr} cannot hold {azs} /{PUBLIC_SUBNET_PREFIX} ingress subnets plus a database block"
            ),
        )
    };
    let mut blocks: Vec<Ipv4Net> = cidr
        .subnets(PUBLIC_SUBNET_PREFIX)
        .map_err(|_| too_small())?
        .take(azs + 1)
        .collect();
    if blocks.len() < azs + 1 {
        return Err(too_small());
    }
    let database_block = blocks.pop().ok_or_else(too_small)?;
    let isolated: Vec<Ipv4Net> = database_block
        .subnets(ISOLATED_SUBNET_PREFIX)
        .map_err(|_| too_small())?
        .take(azs)
        .collect();
    Ok((blocks, isolated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(cidr: &str, azs: u8) -> NetworkInputs {
        NetworkInputs {
            naming: Naming::new("Dev-"),
            cidr: cidr.parse().unwrap(),
            max_availability_zones: azs,
        }
    }

    #[test]
    fn carves_one_subnet_pair_per_zone() {
        let handle = NetworkProvider.build(&inputs("10.0.0.0/16", 2)).expect("builds");
        assert_eq!(handle.public_subnet_ids.len(), 2);
        assert_eq!(handle.isolated_subnet_ids.len(), 2);
        assert_eq!(handle.vpc_id, Reference::to("DevVpc"));

        let cidrs: Vec<String> = handle
            .description()
            .resources
            .iter()
            .filter(|r| r.resource_type == "AWS::EC2::Subnet")
            .map(|r| r.properties["CidrBlock"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            cidrs,
            vec!["10.0.0.0/24", "10.0.2.0/28", "10.0.1.0/24", "10.0.2.16/28"]
        );
    }

    #[test]
    fn rejects_ranges_that_are_too_small() {
        let err = NetworkProvider.build(&inputs("10.0.0.0/24", 1)).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::ResourceBuild {
                resource: NodeId::Network,
                ..
            }
        ));
        assert!(NetworkProvider.build(&inputs("10.0.0.0/23", 2)).is_err());
        assert!(NetworkProvider.build(&inputs("10.0.0.0/22", 2)).is_ok());
    }

    #[test]
    fn identical_inputs_describe_identical_networks() {
        let first = NetworkProvider.build(&inputs("10.1.0.0/16", 1)).unwrap();
        let second = NetworkProvider.build(&inputs("10.1.0.0/16", 1)).unwrap();
        assert_eq!(first.description(), second.description());
    }
}
