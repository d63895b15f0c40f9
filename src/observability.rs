//! Shared logging configuration and initialization.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::alerts::Alert;
use crate::controller::{ControllerEvent, SnapshotUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("ODDSWATCH_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Ok(format) = env::var("ODDSWATCH_LOG_FORMAT") {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var("ODDSWATCH_LOG_TARGET") {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "odds_server",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "odds_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        route = "/odds/state"
    );
}

pub fn log_source_selected(source: &str, refresh_interval_ms: u64, latency_ms: u64) {
    info!(
        component = "odds_server",
        event = "source.selected",
        source,
        refresh_interval_ms,
        latency_ms
    );
}

/// Listener body for the server: one `odds.update` per commit, one
/// `odds.alert` per derived alert and `odds.source.error` on fetch failure.
pub fn log_controller_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::Updated(update) => log_update(update),
        ControllerEvent::Error(err) => warn!(
            component = "odds_server",
            event = "odds.source.error",
            error = %err
        ),
    }
}

fn log_update(update: &SnapshotUpdate) {
    info!(
        component = "odds_server",
        event = "odds.update",
        captured_at = %update.snapshot.captured_at,
        games = update.snapshot.len(),
        new_alerts = update.alerts.len()
    );
    for alert in &update.alerts {
        log_alert(alert);
    }
}

fn log_alert(alert: &Alert) {
    info!(
        component = "odds_server",
        event = "odds.alert",
        game_id = %alert.game_id,
        field = %alert.field,
        before = alert.before,
        after = alert.after,
        direction = ?alert.direction,
        severity = %alert.severity
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
