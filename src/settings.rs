use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::providers::api::API_ENDPOINT_OUTPUT;
use crate::providers::runtime::{ENDPOINT_OUTPUT_SUFFIX, MAX_ENVIRONMENT_NAME};
use crate::resource::Naming;

/// Target environment variants.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Dev,
    Int,
    Prod,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Dev => "Dev",
            Stage::Int => "Int",
            Stage::Prod => "Prod",
        }
    }

    pub fn from_env(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Some(Stage::Dev),
            "int" | "integration" => Some(Stage::Int),
            "prod" | "production" => Some(Stage::Prod),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// EC2/RDS instance type such as `t2.micro`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceType {
    class: String,
    size: String,
}

impl InstanceType {
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn size(&self) -> &str {
        &self.size
    }

    /// RDS flavour of the type (`db.t3.medium`).
    pub fn db_class(&self) -> String {
        format!("db.{self}")
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.size)
    }
}

impl FromStr for InstanceType {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let (class, size) = value
            .trim()
            .split_once('.')
            .ok_or_else(|| format!("'{value}' is not of the form <class>.<size>"))?;
        let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(class) || !valid(size) {
            return Err(format!("'{value}' is not a valid instance type"));
        }
        Ok(Self {
            class: class.to_ascii_lowercase(),
            size: size.to_ascii_lowercase(),
        })
    }
}

impl TryFrom<String> for InstanceType {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InstanceType> for String {
    fn from(value: InstanceType) -> Self {
        value.to_string()
    }
}

/// Route53 hosted zone used for DNS validated certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    pub zone_id: String,
    pub zone_name: String,
}

/// S3 location of a deployable archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBundle {
    pub bucket: String,
    pub key: String,
}

/// Fully resolved parameters for one environment. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub stage: Stage,
    pub prefix: String,
    pub ami: String,
    pub domain_name: String,
    pub ssl: bool,
    pub ssl_certificate_arn: Option<String>,
    pub hosted_zone: Option<HostedZone>,
    pub vpc_cidr: Ipv4Net,
    pub vpc_max_availability_zones: u8,
    pub sg_ingress_whitelist: Vec<Ipv4Net>,
    pub sg_egress_whitelist: Vec<Ipv4Net>,
    pub ssh_whitelist: Vec<Ipv4Net>,
    pub bastion_enabled: bool,
    pub eb_application_name: String,
    pub eb_environment_name: String,
    pub eb_solution_stack_name: String,
    pub eb_auto_scale_min_instance_count: u32,
    pub eb_auto_scale_max_instance_count: u32,
    pub eb_auto_scale_cpu_upper_threshold: u8,
    pub eb_auto_scale_cpu_lower_threshold: u8,
    pub eb_load_balancer_listen_port: u16,
    pub eb_tomcat_jvm_options: String,
    pub eb_tomcat_min_heap_size: String,
    pub eb_tomcat_max_heap_size: String,
    pub eb_tomcat_perm_size: String,
    pub eb_instance_type: InstanceType,
    pub eb_rolling_update: bool,
    pub eb_source_bundle: Option<SourceBundle>,
    pub dynamo_partition_key: String,
    pub dynamo_table_name: String,
    pub api_gateway_enabled: bool,
    pub lambda_runtime: String,
    pub lambda_handler: String,
    pub lambda_code: SourceBundle,
    pub lambda_timeout: Duration,
    pub rds_database_name: String,
    pub rds_database_port: u16,
    pub rds_instances: u32,
    pub rds_instance_type: InstanceType,
}

/// Optional per-field overrides layered on top of the stage defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub prefix: Option<String>,
    pub ami: Option<String>,
    pub domain_name: Option<String>,
    pub ssl: Option<bool>,
    pub ssl_certificate_arn: Option<String>,
    pub hosted_zone: Option<HostedZone>,
    pub vpc_cidr: Option<String>,
    pub vpc_max_availability_zones: Option<u8>,
    pub sg_ingress_whitelist: Option<Vec<String>>,
    pub sg_egress_whitelist: Option<Vec<String>>,
    pub ssh_whitelist: Option<Vec<String>>,
    pub bastion_enabled: Option<bool>,
    pub eb_application_name: Option<String>,
    pub eb_environment_name: Option<String>,
    pub eb_solution_stack_name: Option<String>,
    pub eb_auto_scale_min_instance_count: Option<u32>,
    pub eb_auto_scale_max_instance_count: Option<u32>,
    pub eb_auto_scale_cpu_upper_threshold: Option<u8>,
    pub eb_auto_scale_cpu_lower_threshold: Option<u8>,
    pub eb_load_balancer_listen_port: Option<u16>,
    pub eb_tomcat_jvm_options: Option<String>,
    pub eb_tomcat_min_heap_size: Option<String>,
    pub eb_tomcat_max_heap_size: Option<String>,
    pub eb_tomcat_perm_size: Option<String>,
    pub eb_instance_type: Option<String>,
    pub eb_rolling_update: Option<bool>,
    pub eb_source_bundle: Option<SourceBundle>,
    pub dynamo_partition_key: Option<String>,
    pub dynamo_table_name: Option<String>,
    pub api_gateway_enabled: Option<bool>,
    pub lambda_runtime: Option<String>,
    pub lambda_handler: Option<String>,
    pub lambda_code: Option<SourceBundle>,
    pub lambda_timeout_seconds: Option<u64>,
    pub rds_database_name: Option<String>,
    pub rds_database_port: Option<u16>,
    pub rds_instances: Option<u32>,
    pub rds_instance_type: Option<String>,
}

impl ConfigOverrides {
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Sizing knobs that vary by stage. Everything else is shared.
struct StageSizing {
    eb_instance_type: &'static str,
    eb_min: u32,
    eb_max: u32,
    rds_instance_type: &'static str,
    rds_instances: u32,
    availability_zones: u8,
}

impl StageSizing {
    fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Dev => StageSizing {
                eb_instance_type: "t2.micro",
                eb_min: 1,
                eb_max: 2,
                rds_instance_type: "t3.medium",
                rds_instances: 1,
                availability_zones: 1,
            },
            Stage::Int => StageSizing {
                eb_instance_type: "t3.small",
                eb_min: 1,
                eb_max: 3,
                rds_instance_type: "t3.medium",
                rds_instances: 1,
                availability_zones: 2,
            },
            Stage::Prod => StageSizing {
                eb_instance_type: "m5.large",
                eb_min: 2,
                eb_max: 6,
                rds_instance_type: "r5.large",
                rds_instances: 2,
                availability_zones: 2,
            },
        }
    }
}

const DEFAULT_AMI: &str = "ami-03caa3f860895f82e";
const DEFAULT_DOMAIN: &str = "example.com";
const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
const DEFAULT_INGRESS: &[&str] = &["216.9.28.196/32", "10.0.0.0/16"];
const DEFAULT_EGRESS: &[&str] = &["216.9.28.196/32"];
const DEFAULT_SSH: &[&str] = &["216.9.28.196/32"];
const DEFAULT_SOLUTION_STACK: &str = "64bit Amazon Linux 2 v4.2.0 running Tomcat 8.5 Corretto 11";
const DEFAULT_JVM_OPTIONS: &[&str] = &[
    "-server",
    "-XX:+UseG1GC",
    "-Djava.net.preferIPv4Stack=true",
    "-Dcom.sun.management.jmxremote",
    "-Dcom.sun.management.jmxremote.port=9999",
    "-Dcom.sun.management.jmxremote.rmi.port=9998",
    "-Dcom.sun.management.jmxremote.ssl=false",
    "-Dcom.sun.management.jmxremote.authenticate=false",
];
const MAX_LAMBDA_TIMEOUT_SECS: u64 = 900;
const MAX_RDS_INSTANCES: u32 = 16;

impl Config {
    /// Resolves the stage defaults, layers `overrides` on top and validates
    /// the result. Never returns a partially checked config.
    pub fn resolve(stage: Stage, overrides: &ConfigOverrides) -> Result<Self> {
        let sizing = StageSizing::for_stage(stage);
        let o = overrides;

        let config = Config {
            stage,
            prefix: pick(&o.prefix, || format!("{stage}-")),
            ami: pick(&o.ami, || DEFAULT_AMI.to_string()),
            domain_name: pick(&o.domain_name, || DEFAULT_DOMAIN.to_string()),
            ssl: o.ssl.unwrap_or(false),
            ssl_certificate_arn: o.ssl_certificate_arn.clone().filter(|arn| !arn.is_empty()),
            hosted_zone: o.hosted_zone.clone(),
            vpc_cidr: parse_cidr(
                "vpc_cidr",
                o.vpc_cidr.as_deref().unwrap_or(DEFAULT_VPC_CIDR),
            )?,
            vpc_max_availability_zones: o
                .vpc_max_availability_zones
                .unwrap_or(sizing.availability_zones),
            sg_ingress_whitelist: parse_cidr_list(
                "sg_ingress_whitelist",
                o.sg_ingress_whitelist.as_deref(),
                DEFAULT_INGRESS,
            )?,
            sg_egress_whitelist: parse_cidr_list(
                "sg_egress_whitelist",
                o.sg_egress_whitelist.as_deref(),
                DEFAULT_EGRESS,
            )?,
            ssh_whitelist: parse_cidr_list("ssh_whitelist", o.ssh_whitelist.as_deref(), DEFAULT_SSH)?,
            bastion_enabled: o.bastion_enabled.unwrap_or(true),
            eb_application_name: pick(&o.eb_application_name, || "webapp".to_string()),
            eb_environment_name: pick(&o.eb_environment_name, || stage.as_str().to_ascii_lowercase()),
            eb_solution_stack_name: pick(&o.eb_solution_stack_name, || {
                DEFAULT_SOLUTION_STACK.to_string()
            }),
            eb_auto_scale_min_instance_count: o
                .eb_auto_scale_min_instance_count
                .unwrap_or(sizing.eb_min),
            eb_auto_scale_max_instance_count: o
                .eb_auto_scale_max_instance_count
                .unwrap_or(sizing.eb_max),
            eb_auto_scale_cpu_upper_threshold: o.eb_auto_scale_cpu_upper_threshold.unwrap_or(80),
            eb_auto_scale_cpu_lower_threshold: o.eb_auto_scale_cpu_lower_threshold.unwrap_or(40),
            eb_load_balancer_listen_port: o.eb_load_balancer_listen_port.unwrap_or(80),
            eb_tomcat_jvm_options: pick(&o.eb_tomcat_jvm_options, || DEFAULT_JVM_OPTIONS.join(" ")),
            eb_tomcat_min_heap_size: pick(&o.eb_tomcat_min_heap_size, || "1024m".to_string()),
            eb_tomcat_max_heap_size: pick(&o.eb_tomcat_max_heap_size, || "1024m".to_string()),
            eb_tomcat_perm_size: pick(&o.eb_tomcat_perm_size, || "128m".to_string()),
            eb_instance_type: parse_instance_type(
                "eb_instance_type",
                o.eb_instance_type.as_deref().unwrap_or(sizing.eb_instance_type),
            )?,
            eb_rolling_update: o.eb_rolling_update.unwrap_or(true),
            eb_source_bundle: o.eb_source_bundle.clone(),
            dynamo_partition_key: pick(&o.dynamo_partition_key, || "id".to_string()),
            dynamo_table_name: pick(&o.dynamo_table_name, || format!("{stage}-records")),
            api_gateway_enabled: o.api_gateway_enabled.unwrap_or(true),
            lambda_runtime: pick(&o.lambda_runtime, || "nodejs18.x".to_string()),
            lambda_handler: pick(&o.lambda_handler, || "request.handler".to_string()),
            lambda_code: o.lambda_code.clone().unwrap_or_else(|| SourceBundle {
                bucket: format!("{}-artifacts", stage.as_str().to_ascii_lowercase()),
                key: "lambda/request.zip".to_string(),
            }),
            lambda_timeout: Duration::from_secs(o.lambda_timeout_seconds.unwrap_or(10)),
            rds_database_name: pick(&o.rds_database_name, || "app".to_string()),
            rds_database_port: o.rds_database_port.unwrap_or(5432),
            rds_instances: o.rds_instances.unwrap_or(sizing.rds_instances),
            rds_instance_type: parse_instance_type(
                "rds_instance_type",
                o.rds_instance_type.as_deref().unwrap_or(sizing.rds_instance_type),
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks every cross-field and range constraint. Fails on the first
    /// violation, naming the field.
    pub fn validate(&self) -> Result<()> {
        if !self
            .prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ProvisionError::config(
                "prefix",
                "may only contain ASCII letters, digits and '-'",
            ));
        }
        let endpoint_output = Naming::new(&self.prefix).logical(ENDPOINT_OUTPUT_SUFFIX);
        if endpoint_output == API_ENDPOINT_OUTPUT {
            return Err(ProvisionError::config(
                "prefix",
                format!(
                    "'{}' would name the environment endpoint {API_ENDPOINT_OUTPUT}, which the API front door also declares",
                    self.prefix
                ),
            ));
        }
        if !self.ami.starts_with("ami-") {
            return Err(ProvisionError::config("ami", "must start with 'ami-'"));
        }
        require_non_empty("domain_name", &self.domain_name)?;
        if self.domain_name.starts_with('.') || self.domain_name.starts_with('*') {
            return Err(ProvisionError::config(
                "domain_name",
                "must be a bare domain without wildcard",
            ));
        }
        if let Some(arn) = &self.ssl_certificate_arn
            && !arn.starts_with("arn:")
        {
            return Err(ProvisionError::config("ssl_certificate_arn", "must be an ARN"));
        }
        if let Some(zone) = &self.hosted_zone {
            require_non_empty("hosted_zone.zone_id", &zone.zone_id)?;
            require_non_empty("hosted_zone.zone_name", &zone.zone_name)?;
        }
        if !(1..=6).contains(&self.vpc_max_availability_zones) {
            return Err(ProvisionError::config(
                "vpc_max_availability_zones",
                "must be between 1 and 6",
            ));
        }
        require_list("sg_ingress_whitelist", &self.sg_ingress_whitelist)?;
        require_list("sg_egress_whitelist", &self.sg_egress_whitelist)?;
        require_list("ssh_whitelist", &self.ssh_whitelist)?;

        require_non_empty("eb_application_name", &self.eb_application_name)?;
        require_non_empty("eb_environment_name", &self.eb_environment_name)?;
        require_non_empty("eb_solution_stack_name", &self.eb_solution_stack_name)?;
        let environment_name = self.environment_name();
        if environment_name.len() > MAX_ENVIRONMENT_NAME
            || !environment_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ProvisionError::config(
                "eb_environment_name",
                format!(
                    "environment name '{environment_name}' must be at most {MAX_ENVIRONMENT_NAME} letters, digits or '-'"
                ),
            ));
        }
        require_positive(
            "eb_auto_scale_min_instance_count",
            self.eb_auto_scale_min_instance_count,
        )?;
        require_positive(
            "eb_auto_scale_max_instance_count",
            self.eb_auto_scale_max_instance_count,
        )?;
        if self.eb_auto_scale_min_instance_count > self.eb_auto_scale_max_instance_count {
            return Err(ProvisionError::config(
                "eb_auto_scale_min_instance_count",
                format!(
                    "min ({}) exceeds eb_auto_scale_max_instance_count ({})",
                    self.eb_auto_scale_min_instance_count, self.eb_auto_scale_max_instance_count
                ),
            ));
        }
        if self.eb_auto_scale_cpu_upper_threshold > 100 {
            return Err(ProvisionError::config(
                "eb_auto_scale_cpu_upper_threshold",
                "must be a percentage (0-100)",
            ));
        }
        if self.eb_auto_scale_cpu_lower_threshold >= self.eb_auto_scale_cpu_upper_threshold {
            return Err(ProvisionError::config(
                "eb_auto_scale_cpu_lower_threshold",
                "must be below eb_auto_scale_cpu_upper_threshold",
            ));
        }
        if self.eb_load_balancer_listen_port == 0 {
            return Err(ProvisionError::config(
                "eb_load_balancer_listen_port",
                "must be a non-zero port",
            ));
        }
        require_heap_size("eb_tomcat_min_heap_size", &self.eb_tomcat_min_heap_size)?;
        require_heap_size("eb_tomcat_max_heap_size", &self.eb_tomcat_max_heap_size)?;
        require_heap_size("eb_tomcat_perm_size", &self.eb_tomcat_perm_size)?;
        if let Some(bundle) = &self.eb_source_bundle {
            require_bundle("eb_source_bundle", bundle)?;
        }

        require_non_empty("dynamo_partition_key", &self.dynamo_partition_key)?;
        require_non_empty("dynamo_table_name", &self.dynamo_table_name)?;

        require_non_empty("lambda_runtime", &self.lambda_runtime)?;
        require_non_empty("lambda_handler", &self.lambda_handler)?;
        require_bundle("lambda_code", &self.lambda_code)?;
        let timeout = self.lambda_timeout.as_secs();
        if timeout == 0 || timeout > MAX_LAMBDA_TIMEOUT_SECS {
            return Err(ProvisionError::config(
                "lambda_timeout",
                format!("must be between 1 and {MAX_LAMBDA_TIMEOUT_SECS} seconds"),
            ));
        }

        let db_name_ok = self
            .rds_database_name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && self
                .rds_database_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !db_name_ok {
            return Err(ProvisionError::config(
                "rds_database_name",
                "must start with a letter and contain only letters, digits or '_'",
            ));
        }
        if self.rds_database_port == 0 {
            return Err(ProvisionError::config(
                "rds_database_port",
                "must be a non-zero port",
            ));
        }
        require_positive("rds_instances", self.rds_instances)?;
        if self.rds_instances > MAX_RDS_INSTANCES {
            return Err(ProvisionError::config(
                "rds_instances",
                format!("at most {MAX_RDS_INSTANCES} instances per cluster"),
            ));
        }
        Ok(())
    }

    /// Physical Beanstalk environment name: `{prefix}{application}-{environment}`.
    pub fn environment_name(&self) -> String {
        format!(
            "{}{}-{}",
            self.prefix, self.eb_application_name, self.eb_environment_name
        )
    }
}

fn pick(value: &Option<String>, default: impl FnOnce() -> String) -> String {
    value.clone().unwrap_or_else(default)
}

fn parse_cidr(field: &str, raw: &str) -> Result<Ipv4Net> {
    raw.trim()
        .parse::<Ipv4Net>()
        .map_err(|err| ProvisionError::config(field, format!("'{raw}' is not an IPv4 CIDR: {err}")))
}

fn parse_cidr_list(
    field: &str,
    overrides: Option<&[String]>,
    defaults: &[&str],
) -> Result<Vec<Ipv4Net>> {
    match overrides {
        Some(values) => values.iter().map(|raw| parse_cidr(field, raw)).collect(),
        None => defaults.iter().map(|raw| parse_cidr(field, raw)).collect(),
    }
}

fn parse_instance_type(field: &str, raw: &str) -> Result<InstanceType> {
    raw.parse()
        .map_err(|reason: String| ProvisionError::config(field, reason))
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ProvisionError::config(field, "must not be empty"));
    }
    Ok(())
}

fn require_list<T>(field: &str, values: &[T]) -> Result<()> {
    if values.is_empty() {
        return Err(ProvisionError::config(field, "must list at least one CIDR"));
    }
    Ok(())
}

fn require_positive(field: &str, value: u32) -> Result<()> {
    if value == 0 {
        return Err(ProvisionError::config(field, "must be positive"));
    }
    Ok(())
}

fn require_heap_size(field: &str, value: &str) -> Result<()> {
    let unit = value.chars().last().unwrap_or_default();
    let digits = &value[..value.len() - unit.len_utf8().min(value.len())];
    let unit_ok = matches!(unit, 'k' | 'm' | 'g' | 'K' | 'M' | 'G');
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) || !unit_ok {
        return Err(ProvisionError::config(
            field,
            format!("'{value}' is not a JVM size such as 512m"),
        ));
    }
    Ok(())
}

fn require_bundle(field: &str, bundle: &SourceBundle) -> Result<()> {
    require_non_empty(&format!("{field}.bucket"), &bundle.bucket)?;
    require_non_empty(&format!("{field}.key"), &bundle.key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ProvisionError) -> String {
        match err {
            ProvisionError::Configuration { field, .. } => field,
            other => panic!("expected configuration error, got {other}"),
        }
    }

    #[test]
    fn resolves_dev_defaults() {
        let config = Config::resolve(Stage::Dev, &ConfigOverrides::default()).expect("resolves");
        assert_eq!(config.prefix, "Dev-");
        assert_eq!(config.environment_name(), "Dev-webapp-dev");
        assert_eq!(config.eb_instance_type.to_string(), "t2.micro");
        assert!(!config.ssl);
        assert_eq!(config.vpc_cidr.to_string(), "10.0.0.0/16");
        assert_eq!(config.sg_ingress_whitelist.len(), 2);
    }

    #[test]
    fn stages_differ_only_in_sizing() {
        let dev = Config::resolve(Stage::Dev, &ConfigOverrides::default()).unwrap();
        let prod = Config::resolve(Stage::Prod, &ConfigOverrides::default()).unwrap();
        assert_ne!(dev.eb_instance_type, prod.eb_instance_type);
        assert_ne!(dev.rds_instance_type, prod.rds_instance_type);
        assert_eq!(dev.ssl, prod.ssl);
        assert_eq!(dev.bastion_enabled, prod.bastion_enabled);
        assert_eq!(dev.api_gateway_enabled, prod.api_gateway_enabled);
    }

    #[test]
    fn overrides_replace_defaults() {
        let overrides = ConfigOverrides {
            sg_ingress_whitelist: Some(vec!["10.0.0.0/16".into()]),
            eb_instance_type: Some("t3.large".into()),
            lambda_timeout_seconds: Some(30),
            ..Default::default()
        };
        let config = Config::resolve(Stage::Int, &overrides).unwrap();
        assert_eq!(config.sg_ingress_whitelist.len(), 1);
        assert_eq!(config.eb_instance_type.class(), "t3");
        assert_eq!(config.eb_instance_type.size(), "large");
        assert_eq!(config.lambda_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_min_above_max() {
        let overrides = ConfigOverrides {
            eb_auto_scale_min_instance_count: Some(5),
            eb_auto_scale_max_instance_count: Some(2),
            ..Default::default()
        };
        let err = Config::resolve(Stage::Dev, &overrides).unwrap_err();
        assert_eq!(field_of(err), "eb_auto_scale_min_instance_count");
    }

    #[test]
    fn rejects_malformed_cidr() {
        let overrides = ConfigOverrides {
            ssh_whitelist: Some(vec!["10.0.0.300/32".into()]),
            ..Default::default()
        };
        let err = Config::resolve(Stage::Dev, &overrides).unwrap_err();
        assert_eq!(field_of(err), "ssh_whitelist");
    }

    #[test]
    fn rejects_empty_whitelist() {
        let overrides = ConfigOverrides {
            sg_egress_whitelist: Some(Vec::new()),
            ..Default::default()
        };
        let err = Config::resolve(Stage::Prod, &overrides).unwrap_err();
        assert_eq!(field_of(err), "sg_egress_whitelist");
    }

    #[test]
    fn rejects_inverted_cpu_thresholds() {
        let overrides = ConfigOverrides {
            eb_auto_scale_cpu_lower_threshold: Some(90),
            ..Default::default()
        };
        let err = Config::resolve(Stage::Dev, &overrides).unwrap_err();
        assert_eq!(field_of(err), "eb_auto_scale_cpu_lower_threshold");
    }

    #[test]
    fn rejects_bad_instance_type_and_heap() {
        let overrides = ConfigOverrides {
            rds_instance_type: Some("large".into()),
            ..Default::default()
        };
        let err = Config::resolve(Stage::Dev, &overrides).unwrap_err();
        assert_eq!(field_of(err), "rds_instance_type");

        let overrides = ConfigOverrides {
            eb_tomcat_max_heap_size: Some("lots".into()),
            ..Default::default()
        };
        let err = Config::resolve(Stage::Dev, &overrides).unwrap_err();
        assert_eq!(field_of(err), "eb_tomcat_max_heap_size");
    }

    #[test]
    fn validate_catches_hand_built_configs() {
        let mut config = Config::resolve(Stage::Dev, &ConfigOverrides::default()).unwrap();
        config.rds_instances = 0;
        assert_eq!(field_of(config.validate().unwrap_err()), "rds_instances");
    }

    #[test]
    fn parses_overrides_from_toml() {
        let overrides = ConfigOverrides::from_toml(
            r#"
ssl = true
sg_ingress_whitelist = ["10.0.0.0/16"]

[hosted_zone]
zone_id = "Z123"
zone_name = "example.com"
"#,
        )
        .expect("parses");
        assert_eq!(overrides.ssl, Some(true));
        assert_eq!(
            overrides.hosted_zone.map(|zone| zone.zone_id),
            Some("Z123".to_string())
        );
    }

    #[test]
    fn unknown_override_keys_are_rejected() {
        assert!(ConfigOverrides::from_toml("not_a_field = 1").is_err());
    }

    #[test]
    fn stage_from_env_accepts_aliases() {
        assert_eq!(Stage::from_env("PROD"), Some(Stage::Prod));
        assert_eq!(Stage::from_env(" integration "), Some(Stage::Int));
        assert_eq!(Stage::from_env("qa"), None);
    }

    #[test]
    fn rejects_prefix_that_shadows_the_api_endpoint() {
        for prefix in ["Api-", "A-pi", "Api"] {
            let overrides = ConfigOverrides {
                prefix: Some(prefix.into()),
                ..Default::default()
            };
            let err = Config::resolve(Stage::Dev, &overrides).unwrap_err();
            assert_eq!(field_of(err), "prefix", "{prefix}");
        }

        let overrides = ConfigOverrides {
            prefix: Some("API-".into()),
            ..Default::default()
        };
        assert!(Config::resolve(Stage::Dev, &overrides).is_ok());
    }

    #[test]
    fn rejects_environment_name_beanstalk_cannot_use() {
        let overrides = ConfigOverrides {
            eb_environment_name: Some("x".repeat(40)),
            ..Default::default()
        };
        let err = Config::resolve(Stage::Dev, &overrides).unwrap_err();
        assert_eq!(field_of(err), "eb_environment_name");

        let overrides = ConfigOverrides {
            eb_application_name: Some("web_app".into()),
            ..Default::default()
        };
        let err = Config::resolve(Stage::Dev, &overrides).unwrap_err();
        assert_eq!(field_of(err), "eb_environment_name");
    }

    #[test]
    fn caps_database_instances() {
        let overrides = ConfigOverrides {
            rds_instances: Some(MAX_RDS_INSTANCES),
            ..Default::default()
        };
        assert!(Config::resolve(Stage::Prod, &overrides).is_ok());

        let overrides = ConfigOverrides {
            rds_instances: Some(100_000),
            ..Default::default()
        };
        let err = Config::resolve(Stage::Prod, &overrides).unwrap_err();
        assert_eq!(field_of(err), "rds_instances");
    }
}
