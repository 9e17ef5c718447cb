//! Structured logging setup shared by Stratum services.
#![deny(missing_docs)]

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

/// Handle that swaps the active level filter at runtime.
pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Initialize structured JSON logging with hourly rolling files and runtime log-level reload.
/// `dir` – log directory, `level` – initial log level.
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init(dir: &str, level: Level) -> Result<FilterHandle> {
    let file_appender = RollingFileAppender::new(Rotation::HOURLY, dir, "stratum.log");
    let (filter, handle) = reload::Layer::new(base_filter(level));
    let fmt_layer = fmt::layer()
        .with_writer(file_appender)
        .json()
        .with_current_span(false)
        .with_span_list(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("install file subscriber")?;
    Ok(handle)
}

/// Initialize human-readable logging on stdout, used by the CLI paths.
pub fn init_stdout(level: Level) -> Result<FilterHandle> {
    let (filter, handle) = reload::Layer::new(base_filter(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .context("install stdout subscriber")?;
    Ok(handle)
}

/// Replace the active filter with one at `level`.
pub fn set_level(handle: &FilterHandle, level: Level) -> Result<()> {
    handle
        .reload(EnvFilter::default().add_directive(level.into()))
        .context("reload log filter")
}

/// Parse a textual level ("info", "DEBUG", ...).
pub fn parse_level(raw: &str) -> Result<Level> {
    raw.trim()
        .parse::<Level>()
        .with_context(|| format!("invalid log level {raw:?}"))
}

fn base_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()))
}
