#![forbid(unsafe_code)]

pub mod assembler;
pub mod composer;
pub mod config;
pub mod error;
pub mod outputs;
pub mod plan;
pub mod providers;
pub mod resource;
pub mod run;
pub mod settings;
pub mod synth;
pub mod telemetry;

pub use assembler::{Assembly, assemble, assemble_config};
pub use composer::{Composer, compose};
pub use config::{Action, CliArgs, Command, RunConfig};
pub use error::{ProvisionError, Result};
pub use outputs::{OutputCollector, OutputEntry};
pub use plan::{BUILD_ORDER, NodeId, NodeSlot, Plan, PlanNode, ResourceHandle, SkippedNode};
pub use providers::{Dependency, ResourceProvider};
pub use resource::{Naming, Reference, ResourceDeclaration};
pub use settings::{Config, ConfigOverrides, Stage};
pub use synth::{TemplateFormat, render_template, write_artifacts};
