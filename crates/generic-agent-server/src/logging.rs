use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use etcetera::{choose_app_strategy, AppStrategy};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::configuration::APP_STRATEGY;

/// Logs live under the platform state dir (data dir where there is none),
/// e.g. `~/.local/state/generic-agent/logs/server`.
fn get_log_directory() -> Result<PathBuf> {
    let strategy =
        choose_app_strategy(APP_STRATEGY.clone()).context("HOME environment variable not set")?;
    let base_log_dir = strategy
        .in_state_dir("logs")
        .unwrap_or_else(|| strategy.in_data_dir("logs"));

    let server_dir = base_log_dir.join("server");
    fs::create_dir_all(&server_dir).context("Failed to create log directory")?;
    Ok(server_dir)
}

fn default_filter() -> EnvFilter {
    EnvFilter::new("warn,generic_agent=info,generic_agent_server=info,tower_http=info")
}

/// JSON lines to a daily file plus human-readable output on stderr.
/// `RUST_LOG` overrides the default filter for both.
pub fn setup_logging(name: Option<&str>) -> Result<()> {
    let log_dir = get_log_directory()?;
    let prefix = format!("{}.log", name.unwrap_or("server"));
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, prefix);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_writer(file_appender)
        .with_ansi(false)
        .with_file(true)
        .json();

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(true)
        .with_line_number(true);

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    Registry::default()
        .with(file_layer.with_filter(file_filter))
        .with(console_layer.with_filter(console_filter))
        .try_init()
        .context("Failed to set global subscriber")?;

    Ok(())
}
