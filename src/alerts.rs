//! Line-movement alerts derived from two consecutive snapshots.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub game_id: String,
    pub field: String,
    pub before: f64,
    pub after: f64,
    pub severity: Severity,
    pub direction: Direction,
    /// Capture time of the snapshot that revealed the movement.
    pub detected_at: DateTime<Utc>,
}

impl Alert {
    pub fn delta(&self) -> f64 {
        self.after - self.before
    }
}

/// Severity thresholds for one field.
///
/// `field` matches a field name exactly or as its final `.`-separated
/// segment, so `spread_line` covers `draftkings.spread_line` and
/// `fanduel.spread_line` alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityRule {
    pub field: String,
    pub medium_at: f64,
    pub high_at: f64,
}

impl SeverityRule {
    pub fn new(field: impl Into<String>, medium_at: f64, high_at: f64) -> Self {
        Self {
            field: field.into(),
            medium_at,
            high_at,
        }
    }

    fn matches(&self, field: &str) -> bool {
        field == self.field
            || field
                .rsplit_once('.')
                .map(|(_, last)| last == self.field)
                .unwrap_or(false)
    }

    fn classify(&self, magnitude: f64) -> Severity {
        if magnitude >= self.high_at {
            Severity::High
        } else if magnitude >= self.medium_at {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    /// A field changes only when `|after - before| > epsilon`.
    pub epsilon: f64,
    /// First matching rule wins. Unmatched fields are `Severity::Low`.
    pub rules: Vec<SeverityRule>,
    /// Restrict comparison to these field names; `None` compares every field.
    pub tracked_fields: Option<BTreeSet<String>>,
}

impl AlertConfig {
    pub fn severity_for(&self, field: &str, magnitude: f64) -> Severity {
        self.rules
            .iter()
            .find(|rule| rule.matches(field))
            .map(|rule| rule.classify(magnitude))
            .unwrap_or(Severity::Low)
    }

    fn is_tracked(&self, field: &str) -> bool {
        self.tracked_fields
            .as_ref()
            .map(|tracked| tracked.contains(field))
            .unwrap_or(true)
    }
}

/// Compare `current` against `previous` and emit one alert per moved field.
///
/// Only games and fields present in both snapshots are compared. Output is
/// ordered by game id, then field name.
pub fn derive_alerts(
    previous: Option<&Snapshot>,
    current: &Snapshot,
    config: &AlertConfig,
) -> Vec<Alert> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let before_index = previous.by_key();
    let mut alerts = Vec::new();

    for (game_id, after_record) in current.by_key() {
        let Some(before_record) = before_index.get(game_id) else {
            continue;
        };

        for (field, &after) in &after_record.fields {
            if !config.is_tracked(field) {
                continue;
            }
            let Some(before) = before_record.field(field) else {
                continue;
            };

            let magnitude = (after - before).abs();
            if magnitude.is_nan() || magnitude <= config.epsilon {
                continue;
            }

            alerts.push(Alert {
                game_id: game_id.to_string(),
                field: field.clone(),
                before,
                after,
                severity: config.severity_for(field, magnitude),
                direction: if after > before {
                    Direction::Up
                } else {
                    Direction::Down
                },
                detected_at: current.captured_at,
            });
        }
    }

    alerts
}

/// Bounded alert log, newest first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlertHistory {
    limit: usize,
    entries: VecDeque<Alert>,
}

impl AlertHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: VecDeque::new(),
        }
    }

    /// Put a freshly derived batch in front, keeping its internal order, and
    /// drop the oldest entries beyond the limit.
    pub fn record_batch(&mut self, batch: &[Alert]) {
        for alert in batch.iter().rev() {
            self.entries.push_front(alert.clone());
        }
        self.entries.truncate(self.limit);
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Alert> {
        self.entries.iter().cloned().collect()
    }
}

/// Alerts at or above `min_severity`, newest first, at most `limit` of them.
pub fn filter_alerts(alerts: &[Alert], min_severity: Option<Severity>, limit: Option<usize>) -> Vec<Alert> {
    alerts
        .iter()
        .filter(|alert| min_severity.map(|min| alert.severity >= min).unwrap_or(true))
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}
