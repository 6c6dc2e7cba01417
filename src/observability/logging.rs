//! # Logging
//!
//! `tracing` subscriber setup. The filter comes from `RUST_LOG` and falls back to
//! `pvc_reclaimer=info`; the output format is chosen by `--log-format`.

use crate::config::LogFormat;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "pvc_reclaimer=info,kube_runtime=warn";

/// Build the env filter, honouring `RUST_LOG` when it parses
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Install the global subscriber
///
/// # Errors
///
/// Returns an error if a global subscriber was already installed.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    match format {
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}")),
        LogFormat::Text => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}")),
    }
}
