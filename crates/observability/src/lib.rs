//! Logging setup shared by nanocas-view binaries.
//!
//! One call to [`init`] installs a global `tracing` subscriber: an
//! `EnvFilter` (overridable with `RUST_LOG`) feeding either a compact human
//! formatter or a JSON formatter, written through a non-blocking stderr
//! writer. Keep the returned guard alive for the life of the process or
//! buffered lines are lost on exit.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Env var selecting the output format (`json` or anything else for text).
pub const LOG_FORMAT_ENV: &str = "NANOCAS_VIEW_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub default_directive: String,
    pub format: LogFormat,
}

impl ObservabilityConfig {
    /// Warn for dependencies, info for our crates.
    pub fn for_service(crate_prefix: &str) -> Self {
        Self {
            default_directive: format!("warn,{crate_prefix}=info"),
            format: LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref()),
        }
    }
}

/// Keeps the background log writer flushing.
pub struct ObservabilityGuard {
    _writer: WorkerGuard,
}

pub fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let json = config.format == LogFormat::Json;
    let text_layer = (!json).then(|| fmt::layer().compact().with_writer(writer.clone()));
    let json_layer = json.then(|| fmt::layer().json().with_writer(writer));

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .try_init()?;

    Ok(ObservabilityGuard { _writer: guard })
}
