use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, RunConfig};
use crate::error::{ProvisionError, Result};

pub const LOG_ENV: &str = "TIERSTACK_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the global subscriber. Logs go to stderr so command results on
/// stdout stay machine readable.
pub fn init(config: &RunConfig) -> Result<()> {
    let filter = filter_from(std::env::var(LOG_ENV).ok().as_deref());
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|err| ProvisionError::Telemetry(err.to_string()))
}

fn filter_from(directive: Option<&str>) -> EnvFilter {
    directive
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}
