//! Live odds refresh core.
//!
//! - snapshot model for per-game odds fields
//! - snapshot sources (in-memory and a drifting demo feed)
//! - line-movement alert derivation with bounded history
//! - polling refresh controller with listener fan-out
//! - JSON dashboard routes over the controller

mod alerts;
mod config;
mod controller;
mod dashboard;
mod observability;
mod snapshot;
mod source;

pub use alerts::{
    derive_alerts, filter_alerts, Alert, AlertConfig, AlertHistory, Direction, Severity,
    SeverityRule,
};
pub use config::{
    default_severity_rules, ConfigError, ServerConfig, DEFAULT_ADDR, DEFAULT_ALERT_HISTORY,
    DEFAULT_MOCK_LATENCY_MS, DEFAULT_REFRESH_INTERVAL_MS, MAX_ALERT_HISTORY,
};
pub use controller::{
    ControllerConfig, ControllerError, ControllerEvent, ControllerState, PollOptions,
    RefreshController, SessionHandle, SnapshotUpdate, Subscription,
};
pub use dashboard::{
    dashboard_router, AlertsQuery, AlertsResponse, PollingRequest, PollingResponse,
    RefreshResponse,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_controller_event, log_source_selected,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use snapshot::{Record, Snapshot};
pub use source::{
    demo_snapshot, DriftingOddsSource, InMemorySnapshotSource, LineMove, SnapshotSource,
    SourceUnavailable,
};
