use std::io::{self, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, info_span};

use crate::assembler::{Assembly, assemble};
use crate::config::{Action, OutputFormat, RunConfig};
use crate::error::Result;
use crate::outputs::OutputEntry;
use crate::plan::SkippedNode;
use crate::synth::{synthesize, write_artifacts};
use crate::telemetry;

pub fn run(config: RunConfig) -> Result<()> {
    telemetry::init(&config)?;
    let stdout = io::stdout();
    execute(&config, &mut stdout.lock())
}

/// Runs the configured action, writing command results to `out`.
pub fn execute(config: &RunConfig, out: &mut dyn Write) -> Result<()> {
    let assembly = {
        let span = info_span!(
            "command",
            action = config.action.as_str(),
            stage = %config.stage
        );
        let _enter = span.enter();
        assemble(config.stage, &config.overrides)?
    };
    info!("assembled environment: {}", assembly.summary());

    match config.action {
        Action::Plan => {
            let artifacts = synthesize(&assembly, config.template_format)?;
            let dir = write_artifacts(&config.out_dir, &artifacts)?;
            print_plan(out, &assembly, &dir, config.output)
        }
        Action::Outputs => print_outputs(out, &assembly.outputs, config.output),
    }
}

#[derive(Serialize)]
struct PlanReport<'a> {
    stage: String,
    summary: String,
    fingerprint: String,
    artifacts: String,
    nodes: Vec<&'static str>,
    skipped: &'a [SkippedNode],
}

fn print_plan(out: &mut dyn Write, assembly: &Assembly, dir: &Path, format: OutputFormat) -> Result<()> {
    let plan = &assembly.plan;
    match format {
        OutputFormat::Text => {
            writeln!(out, "{}", plan.summary())?;
            for skipped in &plan.skipped {
                writeln!(out, "  skipped {}: {}", skipped.id, skipped.reason)?;
            }
            writeln!(out, "Fingerprint: {}", plan.fingerprint())?;
            writeln!(out, "Artifacts stored under {}", dir.display())?;
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            let report = PlanReport {
                stage: plan.stage.to_string(),
                summary: plan.summary(),
                fingerprint: plan.fingerprint(),
                artifacts: dir.display().to_string(),
                nodes: plan.node_ids().iter().map(|id| id.as_str()).collect(),
                skipped: &plan.skipped,
            };
            write_structured(out, &report, format)?;
        }
    }
    Ok(())
}

fn print_outputs(out: &mut dyn Write, outputs: &[OutputEntry], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for entry in outputs {
                writeln!(out, "{} = {}", entry.name, entry.value)?;
            }
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            let map: IndexMap<&str, &str> = outputs
                .iter()
                .map(|entry| (entry.name.as_str(), entry.value.as_str()))
                .collect();
            write_structured(out, &map, format)?;
        }
    }
    Ok(())
}

fn write_structured<T: Serialize>(out: &mut dyn Write, value: &T, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Yaml => serde_yaml_bw::to_string(value)?,
        OutputFormat::Json | OutputFormat::Text => serde_json::to_string_pretty(value)?,
    };
    writeln!(out, "{}", rendered.trim_end())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use crate::settings::{ConfigOverrides, Stage};
    use crate::synth::TemplateFormat;

    fn run_config(action: Action, out_dir: &Path, output: OutputFormat) -> RunConfig {
        RunConfig {
            action,
            stage: Stage::Dev,
            overrides: ConfigOverrides::default(),
            overrides_path: None,
            out_dir: out_dir.to_path_buf(),
            template_format: TemplateFormat::Json,
            output,
            log_format: LogFormat::Text,
        }
    }

    #[test]
    fn outputs_command_prints_name_value_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = Vec::new();
        execute(
            &run_config(Action::Outputs, dir.path(), OutputFormat::Text),
            &mut buffer,
        )
        .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.lines().next().unwrap().starts_with("VpcSecurityGroupId = "));
        assert!(text.contains("DevEndpointUrl = ${DevEnvironment.EndpointURL}"));
        assert!(!dir.path().join("dev").exists());
    }

    #[test]
    fn plan_command_writes_artifacts_and_reports_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = Vec::new();
        execute(
            &run_config(Action::Plan, dir.path(), OutputFormat::Json),
            &mut buffer,
        )
        .unwrap();
        let report: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(report["stage"], "Dev");
        assert!(report["fingerprint"].as_str().unwrap().starts_with("sha256:"));
        assert!(dir.path().join("dev").join("template.json").is_file());
    }
}
