use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, NodeSlot, Plan, PlanNode, SkippedNode};
use crate::providers::{
    ApiFrontDoorProvider, ApiInputs, ApplicationRuntimeProvider, BastionInputs, BastionProvider,
    CertificateInputs, CertificateProvider, DatabaseInputs, Dependency, IdentityInputs,
    IdentityProvider, KeyValueTableProvider, NetworkInputs, NetworkProvider,
    RelationalDatabaseProvider, ResourceProvider, RuntimeInputs, SecurityGroupsProvider,
    SecurityInputs, TableInputs,
};
use crate::resource::Naming;
use crate::settings::{Config, Stage};

/// Ports every whitelisted range may reach besides the database port.
const WEB_PORTS: [u16; 2] = [80, 443];
/// Port the application instances serve on behind the load balancer.
const INSTANCE_PORT: u16 = 80;

/// Sequences provider invocations and enforces the edge invariants of the
/// topology before each one runs.
#[derive(Debug)]
pub struct Composer {
    stage: Stage,
    nodes: Vec<PlanNode>,
    skipped: Vec<SkippedNode>,
}

impl Composer {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            nodes: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn is_built(&self, node: NodeId) -> bool {
        self.nodes.iter().any(|built| built.id == node)
    }

    pub fn is_skipped(&self, node: NodeId) -> bool {
        self.skipped.iter().any(|skipped| skipped.id == node)
    }

    /// Validates every edge of `P`, invokes it and records the plan node.
    /// Provider failures surface unchanged.
    pub fn build<P: ResourceProvider>(&mut self, provider: &P, inputs: P::Inputs) -> Result<P::Handle> {
        let node = provider.node();
        self.ensure_unsettled(node)?;
        let depends_on = self.check_dependencies(node, P::DEPENDENCIES)?;

        let resolved = serde_json::to_value(&inputs)?;
        debug!(node = %node, inputs = %resolved, "resolved inputs");

        let handle = provider.build(&inputs)?;
        let description = P::describe(&handle);
        info!(
            node = %node,
            resources = description.resources.len(),
            outputs = description.outputs.len(),
            "built node"
        );
        self.nodes.push(PlanNode {
            id: node,
            depends_on,
            inputs: resolved,
            handle: description,
        });
        Ok(handle)
    }

    /// Builds `P` when `enabled`, otherwise records it as skipped with
    /// `reason`. Inputs are only resolved for enabled nodes.
    pub fn build_optional<P: ResourceProvider>(
        &mut self,
        provider: &P,
        enabled: bool,
        reason: &str,
        inputs: impl FnOnce() -> P::Inputs,
    ) -> Result<NodeSlot<P::Handle>> {
        if !enabled {
            self.skip(provider.node(), reason)?;
            return Ok(NodeSlot::Absent);
        }
        self.build(provider, inputs()).map(NodeSlot::Present)
    }

    pub fn skip(&mut self, node: NodeId, reason: &str) -> Result<()> {
        self.ensure_unsettled(node)?;
        warn!(node = %node, reason, "skipping optional node");
        self.skipped.push(SkippedNode {
            id: node,
            reason: reason.to_string(),
        });
        Ok(())
    }

    pub fn finish(self) -> Plan {
        Plan {
            stage: self.stage,
            nodes: self.nodes,
            skipped: self.skipped,
        }
    }

    /// A node is settled once built or skipped. Nodes settle at most once and
    /// in build order.
    fn ensure_unsettled(&self, node: NodeId) -> Result<()> {
        if self.is_built(node) || self.is_skipped(node) {
            return Err(violation(node, node, "node was already built or skipped"));
        }
        let latest = self
            .nodes
            .iter()
            .map(|built| built.id)
            .chain(self.skipped.iter().map(|skipped| skipped.id))
            .max_by_key(NodeId::rank);
        if let Some(latest) = latest
            && latest.rank() > node.rank()
        {
            return Err(violation(
                node,
                latest,
                "node settled after a node later in the build order",
            ));
        }
        Ok(())
    }

    /// Returns the dependencies that were actually built, in declaration order.
    fn check_dependencies(&self, node: NodeId, dependencies: &[Dependency]) -> Result<Vec<NodeId>> {
        let mut built = Vec::new();
        for dependency in dependencies {
            let upstream = dependency.node();
            if upstream.rank() >= node.rank() {
                return Err(violation(
                    node,
                    upstream,
                    "dependency does not precede the node in the build order",
                ));
            }
            match dependency {
                Dependency::Required(_) if !self.is_built(upstream) => {
                    return Err(violation(node, upstream, "required dependency has not been built"));
                }
                Dependency::Optional(_) if !self.is_built(upstream) && !self.is_skipped(upstream) => {
                    return Err(violation(
                        node,
                        upstream,
                        "optional dependency was neither built nor skipped",
                    ));
                }
                _ => {}
            }
            if self.is_built(upstream) {
                built.push(upstream);
            }
        }
        Ok(built)
    }
}

fn violation(node: NodeId, dependency: NodeId, reason: &str) -> ProvisionError {
    ProvisionError::DependencyOrderViolation {
        node,
        dependency,
        reason: reason.to_string(),
    }
}

/// Wires the fixed environment topology for `config`, threading identifiers
/// from upstream handles into downstream inputs.
pub fn compose(config: &Config) -> Result<Plan> {
    let naming = Naming::new(&config.prefix);
    let mut composer = Composer::new(config.stage);

    let network = composer.build(
        &NetworkProvider,
        NetworkInputs {
            naming: naming.clone(),
            cidr: config.vpc_cidr,
            max_availability_zones: config.vpc_max_availability_zones,
        },
    )?;

    let mut service_ports = WEB_PORTS.to_vec();
    if !service_ports.contains(&config.rds_database_port) {
        service_ports.push(config.rds_database_port);
    }
    let security = composer.build(
        &SecurityGroupsProvider,
        SecurityInputs {
            naming: naming.clone(),
            vpc_id: network.vpc_id.clone(),
            ingress_whitelist: config.sg_ingress_whitelist.clone(),
            egress_whitelist: config.sg_egress_whitelist.clone(),
            service_ports,
            listener_ports: vec![config.eb_load_balancer_listen_port],
            instance_port: INSTANCE_PORT,
        },
    )?;

    let bastion = composer.build_optional(
        &BastionProvider,
        config.bastion_enabled,
        "bastion_enabled is false",
        || BastionInputs {
            naming: naming.clone(),
            vpc_id: network.vpc_id.clone(),
            public_subnet_ids: network.public_subnet_ids.clone(),
            vpc_security_group: security.instance_group.clone(),
            ami: config.ami.clone(),
            ssh_whitelist: config.ssh_whitelist.clone(),
        },
    )?;

    let certificate = composer.build_optional(
        &CertificateProvider,
        config.ssl,
        "ssl is disabled",
        || CertificateInputs {
            naming: naming.clone(),
            domain_name: config.domain_name.clone(),
            hosted_zone: config.hosted_zone.clone(),
            existing_arn: config.ssl_certificate_arn.clone(),
        },
    )?;

    let database = composer.build(
        &RelationalDatabaseProvider,
        DatabaseInputs {
            naming: naming.clone(),
            vpc_id: network.vpc_id.clone(),
            isolated_subnet_ids: network.isolated_subnet_ids.clone(),
            security_group: security.instance_group.clone(),
            database_name: config.rds_database_name.clone(),
            port: config.rds_database_port,
            instances: config.rds_instances,
            instance_class: config.rds_instance_type.db_class(),
        },
    )?;

    let table = composer.build(
        &KeyValueTableProvider,
        TableInputs {
            naming: naming.clone(),
            table_name: config.dynamo_table_name.clone(),
            partition_key: config.dynamo_partition_key.clone(),
        },
    )?;

    composer.build(
        &ApplicationRuntimeProvider,
        RuntimeInputs {
            naming: naming.clone(),
            vpc_id: network.vpc_id.clone(),
            public_subnet_ids: network.public_subnet_ids.clone(),
            instance_group: security.instance_group.clone(),
            load_balancer_group: security.load_balancer_group.clone(),
            bastion_group: bastion.as_ref().map(|host| host.security_group.clone()),
            certificate_arn: certificate.as_ref().map(|cert| cert.arn.clone()),
            ssl: config.ssl,
            listen_port: config.eb_load_balancer_listen_port,
            ami: config.ami.clone(),
            application_name: config.eb_application_name.clone(),
            environment_name: config.eb_environment_name.clone(),
            solution_stack_name: config.eb_solution_stack_name.clone(),
            instance_type: config.eb_instance_type.to_string(),
            min_instances: config.eb_auto_scale_min_instance_count,
            max_instances: config.eb_auto_scale_max_instance_count,
            cpu_upper_threshold: config.eb_auto_scale_cpu_upper_threshold,
            cpu_lower_threshold: config.eb_auto_scale_cpu_lower_threshold,
            rolling_update: config.eb_rolling_update,
            jvm_options: config.eb_tomcat_jvm_options.clone(),
            min_heap_size: config.eb_tomcat_min_heap_size.clone(),
            max_heap_size: config.eb_tomcat_max_heap_size.clone(),
            perm_size: config.eb_tomcat_perm_size.clone(),
            source_bundle: config.eb_source_bundle.clone(),
            database_endpoint: database.endpoint_address.clone(),
            database_secret_arn: database.secret_arn.clone(),
            table_name: table.table_name.clone(),
            table_arn: table.table_arn.clone(),
        },
    )?;

    let api = composer.build_optional(
        &ApiFrontDoorProvider,
        config.api_gateway_enabled,
        "api_gateway_enabled is false",
        || ApiInputs {
            naming: naming.clone(),
            vpc_id: network.vpc_id.clone(),
            subnet_ids: network.public_subnet_ids.clone(),
            security_group: security.instance_group.clone(),
            runtime: config.lambda_runtime.clone(),
            handler: config.lambda_handler.clone(),
            code: config.lambda_code.clone(),
            timeout: config.lambda_timeout,
            table_name: table.table_name.clone(),
        },
    )?;

    composer.build(
        &IdentityProvider,
        IdentityInputs {
            naming,
            execute_api_arn: api.as_ref().map(|front| front.execute_api_arn.clone()),
        },
    )?;

    let plan = composer.finish();
    debug!(
        fingerprint = %plan.fingerprint(),
        skipped = plan.skipped.len(),
        "composed plan"
    );
    Ok(plan)
}
