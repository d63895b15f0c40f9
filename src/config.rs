//! Environment-driven settings for the odds server.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;

use crate::alerts::{AlertConfig, SeverityRule};
use crate::controller::{ControllerConfig, PollOptions};
use crate::observability::parse_bool;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_ALERT_HISTORY: usize = 50;
pub const MAX_ALERT_HISTORY: usize = 10_000;
pub const DEFAULT_MOCK_LATENCY_MS: u64 = 1_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub poll: PollOptions,
    pub controller: ControllerConfig,
    pub mock_latency_ms: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let addr = parse_var("ODDSWATCH_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080)))?;
        let interval_ms = parse_var("ODDSWATCH_REFRESH_INTERVAL_MS", DEFAULT_REFRESH_INTERVAL_MS)?;
        let history_limit = parse_var("ODDSWATCH_ALERT_HISTORY", DEFAULT_ALERT_HISTORY)?;
        let epsilon: f64 = parse_var("ODDSWATCH_ALERT_EPSILON", 0.0)?;
        let mock_latency_ms = parse_var("ODDSWATCH_MOCK_LATENCY_MS", DEFAULT_MOCK_LATENCY_MS)?;

        let immediate = match env::var("ODDSWATCH_IMMEDIATE") {
            Ok(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid {
                key: "ODDSWATCH_IMMEDIATE",
                value: raw,
            })?,
            Err(_) => true,
        };

        if history_limit > MAX_ALERT_HISTORY {
            return Err(ConfigError::Invalid {
                key: "ODDSWATCH_ALERT_HISTORY",
                value: history_limit.to_string(),
            });
        }

        if epsilon.is_nan() || epsilon < 0.0 {
            return Err(ConfigError::Invalid {
                key: "ODDSWATCH_ALERT_EPSILON",
                value: epsilon.to_string(),
            });
        }

        Ok(Self {
            addr,
            poll: PollOptions {
                interval_ms,
                immediate,
            },
            controller: ControllerConfig {
                alerts: AlertConfig {
                    epsilon,
                    rules: default_severity_rules(),
                    tracked_fields: None,
                },
                history_limit,
            },
            mock_latency_ms,
        })
    }
}

/// Line moves of a point or more on spreads, a point and a half on totals or
/// twenty cents on moneylines are high severity.
pub fn default_severity_rules() -> Vec<SeverityRule> {
    vec![
        SeverityRule::new("spread_line", 0.5, 1.0),
        SeverityRule::new("total_line", 0.5, 1.5),
        SeverityRule::new("moneyline_home", 10.0, 20.0),
        SeverityRule::new("moneyline_away", 10.0, 20.0),
    ]
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}
