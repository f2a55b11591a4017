//! Tracing setup for the binary.
//!
//! Logs go to stderr so stdout only carries the run summary. `RUST_LOG`
//! overrides the level passed in; otherwise HTTP plumbing crates are held at
//! `warn`.

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls", "tokio_util"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn build_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directives = NOISY_MODULES
        .iter()
        .fold(level.to_string(), |acc, module| format!("{acc},{module}=warn"));
    EnvFilter::new(directives)
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init_logging(level: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(build_filter(level));

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true);
            let _ = registry.with(layer).try_init();
        }
        LogFormat::Pretty => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false);
            let _ = registry.with(layer).try_init();
        }
    }
}
