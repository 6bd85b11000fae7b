use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, NodeSlot, ResourceHandle};
use crate::providers::{
    Dependency, Described, ResourceProvider, SecurityGroupRef, assume_role_policy,
    ensure_same_network, ensure_subnets, managed_policy,
};
use crate::resource::{Naming, Reference, ResourceDeclaration};
use crate::settings::SourceBundle;

const DEFAULT_LISTENER_PORT: u16 = 80;
pub(crate) const MAX_ENVIRONMENT_NAME: usize = 40;
pub(crate) const ENDPOINT_OUTPUT_SUFFIX: &str = "EndpointUrl";
/// Loopback-only restriction used when no bastion can reach the instances.
const SSH_LOCKED: &str = "tcp, 22, 22, 127.0.0.1/32";

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInputs {
    pub naming: Naming,
    pub vpc_id: Reference,
    pub public_subnet_ids: Vec<Reference>,
    pub instance_group: SecurityGroupRef,
    pub load_balancer_group: SecurityGroupRef,
    pub bastion_group: NodeSlot<SecurityGroupRef>,
    pub certificate_arn: NodeSlot<Reference>,
    /// Listener mode. Driven by configuration, not by certificate presence.
    pub ssl: bool,
    pub listen_port: u16,
    pub ami: String,
    pub application_name: String,
    pub environment_name: String,
    pub solution_stack_name: String,
    pub instance_type: String,
    pub min_instances: u32,
    pub max_instances: u32,
    pub cpu_upper_threshold: u8,
    pub cpu_lower_threshold: u8,
    pub rolling_update: bool,
    pub jvm_options: String,
    pub min_heap_size: String,
    pub max_heap_size: String,
    pub perm_size: String,
    pub source_bundle: Option<SourceBundle>,
    pub database_endpoint: Reference,
    pub database_secret_arn: Reference,
    pub table_name: Reference,
    pub table_arn: Reference,
}

#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    description: ResourceHandle,
}

impl Described for RuntimeHandle {
    fn description(&self) -> &ResourceHandle {
        &self.description
    }
}

/// Load-balanced Elastic Beanstalk Tomcat environment.
pub struct ApplicationRuntimeProvider;

impl ResourceProvider for ApplicationRuntimeProvider {
    const NODE: NodeId = NodeId::ApplicationRuntime;
    const DEPENDENCIES: &'static [Dependency] = &[
        Dependency::Required(NodeId::Network),
        Dependency::Required(NodeId::SecurityGroups),
        Dependency::Optional(NodeId::Bastion),
        Dependency::Optional(NodeId::Certificate),
        Dependency::Required(NodeId::RelationalDatabase),
        Dependency::Required(NodeId::KeyValueTable),
    ];

    type Inputs = RuntimeInputs;
    type Handle = RuntimeHandle;

    fn build(&self, inputs: &RuntimeInputs) -> Result<RuntimeHandle> {
        ensure_same_network(Self::NODE, "instance", &inputs.instance_group, &inputs.vpc_id)?;
        ensure_same_network(
            Self::NODE,
            "load balancer",
            &inputs.load_balancer_group,
            &inputs.vpc_id,
        )?;
        if let NodeSlot::Present(bastion) = &inputs.bastion_group {
            ensure_same_network(Self::NODE, "bastion", bastion, &inputs.vpc_id)?;
        }
        ensure_subnets(Self::NODE, "public", &inputs.public_subnet_ids)?;
        if inputs.min_instances > inputs.max_instances {
            return Err(ProvisionError::build(
                Self::NODE,
                format!(
                    "autoscaling minimum {} exceeds maximum {}",
                    inputs.min_instances, inputs.max_instances
                ),
            ));
        }
        let certificate = match (&inputs.certificate_arn, inputs.ssl) {
            (NodeSlot::Present(arn), true) => Some(arn),
            (NodeSlot::Absent, true) => {
                return Err(ProvisionError::build(
                    Self::NODE,
                    "an encrypted listener requires a certificate",
                ));
            }
            (_, false) => None,
        };

        let naming = &inputs.naming;
        let environment_name = naming.physical(&format!(
            "{}-{}",
            inputs.application_name, inputs.environment_name
        ));
        if environment_name.len() > MAX_ENVIRONMENT_NAME
            || !environment_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ProvisionError::build(
                Self::NODE,
                format!(
                    "environment name '{environment_name}' must be at most {MAX_ENVIRONMENT_NAME} letters, digits or '-'"
                ),
            ));
        }

        let service_role = ResourceDeclaration::new(
            naming.logical("ElasticBeanstalkRole"),
            "AWS::IAM::Role",
        )
        .property(
            "AssumeRolePolicyDocument",
            assume_role_policy("elasticbeanstalk.amazonaws.com"),
        )
        .property(
            "ManagedPolicyArns",
            json!([
                managed_policy("service-role/AWSElasticBeanstalkEnhancedHealth"),
                managed_policy("service-role/AWSElasticBeanstalkService")
            ]),
        );
        let instance_role = ResourceDeclaration::new(
            naming.logical("ElasticBeanstalkInstanceRole"),
            "AWS::IAM::Role",
        )
        .property("AssumeRolePolicyDocument", assume_role_policy("ec2.amazonaws.com"))
        .property(
            "ManagedPolicyArns",
            json!([managed_policy("AWSElasticBeanstalkWebTier")]),
        );
        let policy = ResourceDeclaration::new(
            naming.logical("ElasticBeanstalkPolicy"),
            "AWS::IAM::Policy",
        )
        .property("PolicyName", naming.physical("ElasticBeanstalkPolicy"))
        .property(
            "PolicyDocument",
            json!({
                "Version": "2012-10-17",
                "Statement": [
                    {
                        "Effect": "Allow",
                        "Action": ["secretsmanager:GetSecretValue"],
                        "Resource": inputs.database_secret_arn.to_template()
                    },
                    {
                        "Effect": "Allow",
                        "Action": [
                            "dynamodb:GetItem",
                            "dynamodb:PutItem",
                            "dynamodb:UpdateItem",
                            "dynamodb:DeleteItem",
                            "dynamodb:Query"
                        ],
                        "Resource": inputs.table_arn.to_template()
                    }
                ]
            }),
        )
        .property("Roles", json!([instance_role.id_ref().to_template()]));
        let profile = ResourceDeclaration::new(
            naming.logical("ElasticBeanstalkProfile"),
            "AWS::IAM::InstanceProfile",
        )
        .property("Roles", json!([instance_role.id_ref().to_template()]));

        let application = ResourceDeclaration::new(
            naming.logical("Application"),
            "AWS::ElasticBeanstalk::Application",
        )
        .property("ApplicationName", inputs.application_name.clone());

        let version = inputs.source_bundle.as_ref().map(|bundle| {
            ResourceDeclaration::new(
                naming.logical("ApplicationVersion"),
                "AWS::ElasticBeanstalk::ApplicationVersion",
            )
            .reference("ApplicationName", &application.id_ref())
            .property(
                "SourceBundle",
                json!({ "S3Bucket": bundle.bucket, "S3Key": bundle.key }),
            )
        });

        let ssh_restriction = match &inputs.bastion_group {
            NodeSlot::Present(bastion) => Reference::join(
                "",
                vec![Reference::literal("tcp, 22, 22, "), bastion.group_id.clone()],
            ),
            NodeSlot::Absent => Reference::literal(SSH_LOCKED),
        };
        let subnets = Reference::join(",", inputs.public_subnet_ids.clone());

        let mut settings = vec![
            option("aws:elasticbeanstalk:environment", "EnvironmentType", "LoadBalanced"),
            option("aws:elasticbeanstalk:environment", "LoadBalancerType", "application"),
            option(
                "aws:elasticbeanstalk:environment",
                "ServiceRole",
                service_role.id_ref().to_template(),
            ),
            option("aws:autoscaling:asg", "MinSize", inputs.min_instances.to_string()),
            option("aws:autoscaling:asg", "MaxSize", inputs.max_instances.to_string()),
            option("aws:autoscaling:launchconfiguration", "ImageId", inputs.ami.clone()),
            option(
                "aws:autoscaling:launchconfiguration",
                "SecurityGroups",
                inputs.instance_group.group_id.to_template(),
            ),
            option(
                "aws:autoscaling:launchconfiguration",
                "SSHSourceRestriction",
                ssh_restriction.to_template(),
            ),
            option(
                "aws:autoscaling:launchconfiguration",
                "InstanceType",
                inputs.instance_type.clone(),
            ),
            option(
                "aws:autoscaling:launchconfiguration",
                "IamInstanceProfile",
                profile.id_ref().to_template(),
            ),
            option(
                "aws:autoscaling:updatepolicy:rollingupdate",
                "RollingUpdateEnabled",
                inputs.rolling_update.to_string(),
            ),
            option("aws:autoscaling:updatepolicy:rollingupdate", "RollingUpdateType", "Health"),
            option("aws:autoscaling:trigger", "MeasureName", "CPUUtilization"),
            option("aws:autoscaling:trigger", "Unit", "Percent"),
            option(
                "aws:autoscaling:trigger",
                "UpperThreshold",
                inputs.cpu_upper_threshold.to_string(),
            ),
            option(
                "aws:autoscaling:trigger",
                "LowerThreshold",
                inputs.cpu_lower_threshold.to_string(),
            ),
            option("aws:ec2:vpc", "VPCId", inputs.vpc_id.to_template()),
            option("aws:ec2:vpc", "Subnets", subnets.to_template()),
            option("aws:ec2:vpc", "ELBSubnets", subnets.to_template()),
            option("aws:ec2:vpc", "ELBScheme", "public"),
            option("aws:ec2:vpc", "AssociatePublicIpAddress", "true"),
            option(
                "aws:elbv2:loadbalancer",
                "SecurityGroups",
                inputs.load_balancer_group.group_id.to_template(),
            ),
            option(
                "aws:elbv2:loadbalancer",
                "ManagedSecurityGroup",
                inputs.load_balancer_group.group_id.to_template(),
            ),
        ];

        let protocol = if certificate.is_some() { "HTTPS" } else { "HTTP" };
        let port = inputs.listen_port;
        let default_listener = certificate.is_none() && port == DEFAULT_LISTENER_PORT;
        settings.push(option(
            "aws:elbv2:listener:default",
            "ListenerEnabled",
            default_listener.to_string(),
        ));
        if !default_listener {
            let namespace = format!("aws:elbv2:listener:{port}");
            settings.push(option(&namespace, "ListenerEnabled", "true"));
            settings.push(option(&namespace, "Protocol", protocol));
            settings.push(option(&namespace, "Rules", "default"));
            if let Some(arn) = certificate {
                settings.push(option(&namespace, "SSLCertificateArns", arn.to_template()));
            }
            settings.push(option("aws:elbv2:listenerrule:default", "PathPatterns", "/*"));
        }

        settings.extend([
            option("aws:elasticbeanstalk:cloudwatch:logs", "StreamLogs", "true"),
            option("aws:elasticbeanstalk:cloudwatch:logs", "DeleteOnTerminate", "true"),
            option("aws:elasticbeanstalk:hostmanager", "LogPublicationControl", "true"),
            option(
                "aws:elasticbeanstalk:container:tomcat:jvmoptions",
                "JVM Options",
                inputs.jvm_options.clone(),
            ),
            option(
                "aws:elasticbeanstalk:container:tomcat:jvmoptions",
                "XX:MaxPermSize",
                inputs.perm_size.clone(),
            ),
            option(
                "aws:elasticbeanstalk:container:tomcat:jvmoptions",
                "Xms",
                inputs.min_heap_size.clone(),
            ),
            option(
                "aws:elasticbeanstalk:container:tomcat:jvmoptions",
                "Xmx",
                inputs.max_heap_size.clone(),
            ),
            option(
                "aws:elasticbeanstalk:application:environment",
                "DB_HOST",
                inputs.database_endpoint.to_template(),
            ),
            option(
                "aws:elasticbeanstalk:application:environment",
                "DB_SECRET_ARN",
                inputs.database_secret_arn.to_template(),
            ),
            option(
                "aws:elasticbeanstalk:application:environment",
                "TABLE_NAME",
                inputs.table_name.to_template(),
            ),
        ]);

        let template = ResourceDeclaration::new(
            naming.logical("ElasticBeanstalkConfigurationTemplate"),
            "AWS::ElasticBeanstalk::ConfigurationTemplate",
        )
        .reference("ApplicationName", &application.id_ref())
        .property("SolutionStackName", inputs.solution_stack_name.clone())
        .property("OptionSettings", Value::Array(settings));

        let mut environment = ResourceDeclaration::new(
            naming.logical("Environment"),
            "AWS::ElasticBeanstalk::Environment",
        )
        .property("EnvironmentName", environment_name.clone())
        .reference("ApplicationName", &application.id_ref())
        .reference("TemplateName", &template.id_ref());
        if let Some(version) = &version {
            environment = environment.reference("VersionLabel", &version.id_ref());
        }
        let endpoint_url = environment.attr("EndpointURL");

        let mut description = ResourceHandle::new(Self::NODE)
            .identifier("environmentId", &environment.id_ref())
            .identifier("endpointUrl", &endpoint_url)
            .identifier("instanceRole", &instance_role.id_ref())
            .identifier("serviceRole", &service_role.id_ref())
            .attribute("environmentName", environment_name)
            .attribute("instanceType", inputs.instance_type.clone())
            .attribute("minInstances", inputs.min_instances)
            .attribute("maxInstances", inputs.max_instances)
            .attribute("listenerProtocol", protocol)
            .attribute("encryptedListener", certificate.is_some())
            .attribute("listenPort", port)
            .attribute("bastionAccess", inputs.bastion_group.is_present())
            .resources([service_role, instance_role, policy, profile, application]);
        if let Some(version) = version {
            description = description
                .attribute("sourceBundle", true)
                .resources([version]);
        }
        let description = description
            .resources([template, environment])
            .output(naming.logical(ENDPOINT_OUTPUT_SUFFIX), endpoint_url);

        Ok(RuntimeHandle { description })
    }
}

fn option(namespace: &str, name: &str, value: impl Into<Value>) -> Value {
    json!({
        "Namespace": namespace,
        "OptionName": name,
        "Value": value.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fixtures;

    fn inputs() -> RuntimeInputs {
        RuntimeInputs {
            naming: Naming::new("Dev-"),
            vpc_id: fixtures::vpc(),
            public_subnet_ids: fixtures::subnets("DevIngressSubnet", 2),
            instance_group: fixtures::group("DevSecurityGroup"),
            load_balancer_group: fixtures::group("DevLoadBalancerSecurityGroup"),
            bastion_group: NodeSlot::Present(fixtures::group("DevBastionSecurityGroup")),
            certificate_arn: NodeSlot::Absent,
            ssl: false,
            listen_port: 80,
            ami: "ami-123".into(),
            application_name: "webapp".into(),
            environment_name: "dev".into(),
            solution_stack_name: "Tomcat".into(),
            instance_type: "t2.micro".into(),
            min_instances: 1,
            max_instances: 2,
            cpu_upper_threshold: 80,
            cpu_lower_threshold: 40,
            rolling_update: true,
            jvm_options: "-server".into(),
            min_heap_size: "1024m".into(),
            max_heap_size: "1024m".into(),
            perm_size: "128m".into(),
            source_bundle: None,
            database_endpoint: Reference::attr("DevDatabaseCluster", "Endpoint.Address"),
            database_secret_arn: Reference::to("DevDatabasePassword"),
            table_name: Reference::to("DevKeyValueTable"),
            table_arn: Reference::attr("DevKeyValueTable", "Arn"),
        }
    }

    fn settings(handle: &RuntimeHandle) -> Vec<Value> {
        handle
            .description()
            .resources
            .iter()
            .find(|r| r.resource_type == "AWS::ElasticBeanstalk::ConfigurationTemplate")
            .and_then(|r| r.properties["OptionSettings"].as_array().cloned())
            .unwrap()
    }

    fn setting<'a>(settings: &'a [Value], namespace: &str, name: &str) -> Option<&'a Value> {
        settings
            .iter()
            .find(|s| s["Namespace"] == json!(namespace) && s["OptionName"] == json!(name))
            .map(|s| &s["Value"])
    }

    #[test]
    fn plain_listener_without_ssl() {
        let handle = ApplicationRuntimeProvider.build(&inputs()).expect("builds");
        let attrs = &handle.description().attributes;
        assert_eq!(attrs["encryptedListener"], json!(false));
        assert_eq!(attrs["listenerProtocol"], json!("HTTP"));
        let settings = settings(&handle);
        assert_eq!(
            setting(&settings, "aws:elbv2:listener:default", "ListenerEnabled"),
            Some(&json!("true"))
        );
        assert_eq!(handle.description().outputs[0].name, "DevEndpointUrl");
    }

    #[test]
    fn encrypted_listener_uses_certificate() {
        let mut ssl = inputs();
        ssl.ssl = true;
        ssl.listen_port = 443;
        ssl.certificate_arn = NodeSlot::Present(Reference::to("DevSiteCertificate"));
        let handle = ApplicationRuntimeProvider.build(&ssl).expect("builds");
        let settings = settings(&handle);
        assert_eq!(
            setting(&settings, "aws:elbv2:listener:443", "SSLCertificateArns"),
            Some(&json!({"Ref": "DevSiteCertificate"}))
        );
        assert_eq!(
            setting(&settings, "aws:elbv2:listener:default", "ListenerEnabled"),
            Some(&json!("false"))
        );
        assert_eq!(
            handle.description().attributes["listenerProtocol"],
            json!("HTTPS")
        );
    }

    #[test]
    fn ssl_without_certificate_fails() {
        let mut ssl = inputs();
        ssl.ssl = true;
        let err = ApplicationRuntimeProvider.build(&ssl).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::ResourceBuild {
                resource: NodeId::ApplicationRuntime,
                ..
            }
        ));
    }

    #[test]
    fn ssh_restriction_follows_bastion_presence() {
        let handle = ApplicationRuntimeProvider.build(&inputs()).unwrap();
        let restriction = setting(
            &settings(&handle),
            "aws:autoscaling:launchconfiguration",
            "SSHSourceRestriction",
        )
        .cloned()
        .unwrap();
        assert!(restriction.get("Fn::Join").is_some());

        let mut closed = inputs();
        closed.bastion_group = NodeSlot::Absent;
        let handle = ApplicationRuntimeProvider.build(&closed).unwrap();
        assert_eq!(
            setting(
                &settings(&handle),
                "aws:autoscaling:launchconfiguration",
                "SSHSourceRestriction"
            ),
            Some(&json!(SSH_LOCKED))
        );
    }

    #[test]
    fn source_bundle_pins_a_version() {
        let mut pinned = inputs();
        pinned.source_bundle = Some(SourceBundle {
            bucket: "artifacts".into(),
            key: "app.war".into(),
        });
        let handle = ApplicationRuntimeProvider.build(&pinned).unwrap();
        let environment = handle
            .description()
            .resources
            .iter()
            .find(|r| r.resource_type == "AWS::ElasticBeanstalk::Environment")
            .unwrap();
        assert_eq!(
            environment.properties["VersionLabel"],
            json!({"Ref": "DevApplicationVersion"})
        );
    }

    #[test]
    fn rejects_overlong_environment_name() {
        let mut long = inputs();
        long.environment_name = "x".repeat(40);
        assert!(ApplicationRuntimeProvider.build(&long).is_err());
    }

    #[test]
    fn rejects_groups_from_another_network() {
        let mut foreign = inputs();
        foreign.load_balancer_group = fixtures::foreign_group("DevLoadBalancerSecurityGroup");
        let err = ApplicationRuntimeProvider.build(&foreign).unwrap_err();
        assert!(err.to_string().contains("load balancer"), "{err}");

        let mut foreign = inputs();
        foreign.bastion_group = NodeSlot::Present(fixtures::foreign_group("DevBastionSecurityGroup"));
        let err = ApplicationRuntimeProvider.build(&foreign).unwrap_err();
        assert!(
            matches!(
                err,
                ProvisionError::ResourceBuild {
                    resource: NodeId::ApplicationRuntime,
                    ..
                }
            ),
            "{err}"
        );
        assert!(err.to_string().contains("bastion"), "{err}");

        let mut closed = inputs();
        closed.bastion_group = NodeSlot::Absent;
        closed.instance_group = fixtures::foreign_group("DevSecurityGroup");
        assert!(ApplicationRuntimeProvider.build(&closed).is_err());
    }
}
