use std::io;

use thiserror::Error;

use crate::plan::NodeId;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("configuration error: field '{field}' {reason}")]
    Configuration { field: String, reason: String },

    #[error("resource build error: {resource} rejected its inputs: {reason}")]
    ResourceBuild { resource: NodeId, reason: String },

    #[error("duplicate output name '{name}' declared by {first} and {second}")]
    DuplicateOutputName {
        name: String,
        first: NodeId,
        second: NodeId,
    },

    #[error("dependency order violation: {node} -> {dependency}: {reason}")]
    DependencyOrderViolation {
        node: NodeId,
        dependency: NodeId,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("overrides file parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("telemetry initialization error: {0}")]
    Telemetry(String),
}

impl ProvisionError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ProvisionError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn build(resource: NodeId, reason: impl Into<String>) -> Self {
        ProvisionError::ResourceBuild {
            resource,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
