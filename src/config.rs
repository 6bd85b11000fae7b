use std::env;
use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::settings::{ConfigOverrides, Stage};
use crate::synth::TemplateFormat;

pub const STAGE_ENV: &str = "TIERSTACK_STAGE";

/// Available CLI actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Plan,
    Outputs,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Plan => "plan",
            Action::Outputs => "outputs",
        }
    }
}

/// Output format for CLI commands.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// Log line format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Per-command configuration helpers.
#[derive(Debug, Args)]
pub struct ActionArgs {
    /// Target stage (dev|int|prod). Defaults to $TIERSTACK_STAGE or "dev".
    #[arg(long, value_enum)]
    pub stage: Option<Stage>,

    /// TOML file with config overrides layered over the stage defaults.
    #[arg(long)]
    pub overrides: Option<PathBuf>,

    /// Directory artifacts are written under (as <out-dir>/<stage>/).
    #[arg(long, default_value = "deploy")]
    pub out_dir: PathBuf,

    /// Template serialization (json|yaml).
    #[arg(long, value_enum, default_value = "json")]
    pub template_format: TemplateFormat,

    /// Output format for command results (text|json|yaml).
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Log line format (text|json).
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// Top-level CLI structure.
#[derive(Debug, Parser)]
#[command(
    name = "tierstack",
    version,
    about = "Composes dependency-ordered AWS environment plans for Dev, Int and Prod.",
    long_about = "Resolves the stage configuration, builds the resource graph and writes template, plan and outputs under <out-dir>/<stage>. Set TIERSTACK_LOG to adjust log filtering."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Assemble the environment and write its artifacts.
    Plan(ActionArgs),
    /// Assemble the environment and print its outputs.
    Outputs(ActionArgs),
}

/// Complete configuration for one CLI run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub action: Action,
    pub stage: Stage,
    pub overrides: ConfigOverrides,
    pub overrides_path: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub template_format: TemplateFormat,
    pub output: OutputFormat,
    pub log_format: LogFormat,
}

impl RunConfig {
    pub fn from_env_and_args(cli: CliArgs) -> Result<Self> {
        let (action, args) = match cli.command {
            Command::Plan(args) => (Action::Plan, args),
            Command::Outputs(args) => (Action::Outputs, args),
        };

        let stage = match args.stage {
            Some(stage) => stage,
            None => resolve_stage(env::var(STAGE_ENV).ok())?,
        };

        let overrides = match &args.overrides {
            Some(path) => {
                if !path.is_file() {
                    return Err(ProvisionError::config(
                        "overrides",
                        format!("file {} does not exist", path.display()),
                    ));
                }
                ConfigOverrides::from_toml(&fs::read_to_string(path)?)?
            }
            None => ConfigOverrides::default(),
        };

        Ok(Self {
            action,
            stage,
            overrides,
            overrides_path: args.overrides,
            out_dir: args.out_dir,
            template_format: args.template_format,
            output: args.output,
            log_format: args.log_format,
        })
    }
}

fn resolve_stage(raw: Option<String>) -> Result<Stage> {
    match raw {
        None => Ok(Stage::Dev),
        Some(value) => Stage::from_env(&value).ok_or_else(|| {
            ProvisionError::config(STAGE_ENV, format!("unknown stage '{value}'"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_args() -> Vec<&'static str> {
        vec!["tierstack", "plan"]
    }

    #[test]
    fn defaults_to_dev_stage_when_missing() {
        if env::var(STAGE_ENV).is_ok() {
            eprintln!("{STAGE_ENV} set; skipping default stage test");
            return;
        }

        let cli = CliArgs::parse_from(base_args());
        let config = RunConfig::from_env_and_args(cli).expect("config builds");
        assert_eq!(config.stage, Stage::Dev);
        assert_eq!(config.action, Action::Plan);
        assert_eq!(config.out_dir, PathBuf::from("deploy"));
        assert_eq!(config.template_format, TemplateFormat::Json);
    }

    #[test]
    fn accepts_explicit_stage_flag() {
        let mut args = vec!["tierstack", "outputs"];
        args.push("--stage");
        args.push("prod");
        let cli = CliArgs::parse_from(args);
        let config = RunConfig::from_env_and_args(cli).expect("config builds");
        assert_eq!(config.stage, Stage::Prod);
        assert_eq!(config.action, Action::Outputs);
    }

    #[test]
    fn stage_env_values_are_parsed() {
        assert_eq!(resolve_stage(None).unwrap(), Stage::Dev);
        assert_eq!(resolve_stage(Some("Production".into())).unwrap(), Stage::Prod);
        let err = resolve_stage(Some("staging".into())).unwrap_err();
        assert!(
            format!("{err}").contains(STAGE_ENV),
            "expected env var in error, got {err}"
        );
    }

    #[test]
    fn rejects_missing_overrides_file() {
        let mut args = base_args();
        args.push("--overrides");
        args.push("does/not/exist.toml");
        let cli = CliArgs::parse_from(args);
        let err = RunConfig::from_env_and_args(cli).unwrap_err();
        assert!(
            format!("{err}").contains("overrides"),
            "expected overrides error, got {err}"
        );
    }

    #[test]
    fn loads_overrides_from_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "prefix = \"Blue-\"\nbastion_enabled = false").unwrap();
        let path = file.path().to_string_lossy().to_string();
        let cli = CliArgs::parse_from(["tierstack", "plan", "--stage", "int", "--overrides", path.as_str()]);
        let config = RunConfig::from_env_and_args(cli).expect("config builds");
        assert_eq!(config.overrides.prefix.as_deref(), Some("Blue-"));
        assert_eq!(config.overrides.bastion_enabled, Some(false));
        assert_eq!(config.stage, Stage::Int);
    }
}
