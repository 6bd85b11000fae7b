use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::composer::compose;
use crate::error::Result;
use crate::outputs::{OutputCollector, OutputEntry};
use crate::plan::Plan;
use crate::settings::{Config, ConfigOverrides, Stage};

/// Fully assembled environment: the plan and its collected outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assembly {
    pub plan: Plan,
    pub outputs: Vec<OutputEntry>,
}

impl Assembly {
    pub fn output(&self, name: &str) -> Option<&OutputEntry> {
        self.outputs.iter().find(|entry| entry.name == name)
    }

    pub fn summary(&self) -> String {
        format!("{}, {} outputs", self.plan.summary(), self.outputs.len())
    }
}

/// Resolves the stage variant with `overrides` and assembles it.
pub fn assemble(stage: Stage, overrides: &ConfigOverrides) -> Result<Assembly> {
    let config = Config::resolve(stage, overrides)?;
    assemble_config(&config)
}

/// Validates `config`, composes the topology and collects outputs. Either
/// the whole assembly succeeds or the first error is returned.
pub fn assemble_config(config: &Config) -> Result<Assembly> {
    let span = info_span!("assembly", stage = %config.stage, prefix = %config.prefix);
    let _enter = span.enter();

    config.validate()?;
    let plan = compose(config)?;
    let outputs = OutputCollector::new().collect(&plan.nodes)?;
    info!(
        nodes = plan.nodes.len(),
        skipped = plan.skipped.len(),
        outputs = outputs.len(),
        fingerprint = %plan.fingerprint(),
        "assembled environment"
    );
    Ok(Assembly { plan, outputs })
}
