use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::assembler::Assembly;
use crate::error::{ProvisionError, Result};
use crate::settings::Stage;

const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Serialization of the rendered description.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TemplateFormat {
    #[default]
    Json,
    Yaml,
}

impl TemplateFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateFormat::Json => "json",
            TemplateFormat::Yaml => "yaml",
        }
    }

    pub fn file_name(&self) -> String {
        format!("template.{}", self.as_str())
    }
}

/// CloudFormation-shaped document. Resource and output order follows the
/// plan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    pub description: String,
    pub resources: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, Value>,
}

impl Template {
    pub fn from_assembly(assembly: &Assembly) -> Result<Self> {
        let mut resources = IndexMap::new();
        for node in &assembly.plan.nodes {
            for resource in &node.handle.resources {
                let previous = resources.insert(resource.logical_id.clone(), resource.to_template());
                if previous.is_some() {
                    return Err(ProvisionError::build(
                        node.id,
                        format!("logical id {} is declared twice", resource.logical_id),
                    ));
                }
            }
        }

        let outputs = assembly
            .outputs
            .iter()
            .map(|entry| {
                (
                    entry.name.clone(),
                    json!({ "Value": entry.reference.to_template() }),
                )
            })
            .collect();

        Ok(Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: format!(
                "{} environment ({} resources)",
                assembly.plan.stage,
                resources.len()
            ),
            resources,
            outputs,
        })
    }
}

pub fn render_template(assembly: &Assembly, format: TemplateFormat) -> Result<String> {
    let template = Template::from_assembly(assembly)?;
    match format {
        TemplateFormat::Json => Ok(serde_json::to_string_pretty(&template)?),
        TemplateFormat::Yaml => Ok(serde_yaml_bw::to_string(&template)?),
    }
}

/// Contract for a generated artifact file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub relative_path: PathBuf,
    pub contents: String,
}

/// Files synthesized for one stage.
#[derive(Debug, Clone)]
pub struct SynthArtifacts {
    pub stage: Stage,
    pub files: Vec<GeneratedFile>,
}

impl SynthArtifacts {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.files.push(GeneratedFile {
            relative_path: path.into(),
            contents: contents.into(),
        });
        self
    }
}

/// Renders the template, the plan and the output map.
pub fn synthesize(assembly: &Assembly, format: TemplateFormat) -> Result<SynthArtifacts> {
    let template = render_template(assembly, format)?;
    let plan_json = serde_json::to_string_pretty(&assembly.plan)?;
    let outputs: IndexMap<&str, &str> = assembly
        .outputs
        .iter()
        .map(|entry| (entry.name.as_str(), entry.value.as_str()))
        .collect();
    let outputs_json = serde_json::to_string_pretty(&outputs)?;

    Ok(SynthArtifacts::new(assembly.plan.stage)
        .with_file(format.file_name(), template)
        .with_file("plan.json", plan_json)
        .with_file("outputs.json", outputs_json))
}

/// Directory artifacts for `stage` land in.
pub fn stage_dir(out_dir: &Path, stage: Stage) -> PathBuf {
    out_dir.join(stage.as_str().to_ascii_lowercase())
}

/// Writes every artifact under `<out_dir>/<stage>/` and returns that directory.
pub fn write_artifacts(out_dir: &Path, artifacts: &SynthArtifacts) -> Result<PathBuf> {
    let base = stage_dir(out_dir, artifacts.stage);
    fs::create_dir_all(&base)?;

    for file in &artifacts.files {
        let target = base.join(&file.relative_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &file.contents)?;
    }
    info!(
        dir = %base.display(),
        files = artifacts.files.len(),
        "wrote artifacts"
    );
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble;
    use crate::settings::ConfigOverrides;

    fn dev() -> Assembly {
        assemble(Stage::Dev, &ConfigOverrides::default()).expect("assembles")
    }

    #[test]
    fn template_lists_every_resource_and_output() {
        let assembly = dev();
        let template = Template::from_assembly(&assembly).unwrap();
        assert_eq!(template.resources.len(), assembly.plan.resources().count());
        assert_eq!(template.outputs.len(), assembly.outputs.len());
        assert_eq!(
            template.outputs["VpcSecurityGroupId"]["Value"],
            json!({"Fn::GetAtt": ["DevSecurityGroup", "GroupId"]})
        );
        let first = template.resources.keys().next().unwrap();
        assert_eq!(first, "DevVpc");
    }

    #[test]
    fn renders_json_and_yaml() {
        let assembly = dev();
        let rendered = render_template(&assembly, TemplateFormat::Json).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["AWSTemplateFormatVersion"], json!("2010-09-09"));

        let yaml = render_template(&assembly, TemplateFormat::Yaml).unwrap();
        assert!(yaml.contains("AWSTemplateFormatVersion"));
        assert!(yaml.contains("DevVpc"));
    }

    #[test]
    fn synthesize_names_files_by_format() {
        let artifacts = synthesize(&dev(), TemplateFormat::Yaml).unwrap();
        let names: Vec<_> = artifacts
            .files
            .iter()
            .map(|file| file.relative_path.display().to_string())
            .collect();
        assert_eq!(names, vec!["template.yaml", "plan.json", "outputs.json"]);
    }
}
