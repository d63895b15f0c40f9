//! Point-in-time odds snapshots keyed by game.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One game's numeric odds fields at capture time.
///
/// Field names are free-form; the demo feed uses `<book>.<market>`, e.g.
/// `draftkings.spread_line` or `fanduel.moneyline_home`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub game_id: String,
    pub label: String,
    pub fields: BTreeMap<String, f64>,
}

impl Record {
    pub fn new(game_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            label: label.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    pub records: Vec<Record>,
}

impl Snapshot {
    pub fn new(captured_at: DateTime<Utc>, records: Vec<Record>) -> Self {
        Self {
            captured_at,
            records,
        }
    }

    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self::new(captured_at, Vec::new())
    }

    pub fn record(&self, game_id: &str) -> Option<&Record> {
        self.records.iter().find(|record| record.game_id == game_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records indexed by game id. A duplicated id keeps its last record.
    pub fn by_key(&self) -> BTreeMap<&str, &Record> {
        self.records
            .iter()
            .map(|record| (record.game_id.as_str(), record))
            .collect()
    }

    /// Same records, recaptured at `captured_at`.
    pub fn recaptured(&self, captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            records: self.records.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_builder_collects_fields() {
        let record = Record::new("1", "Bulls vs Lakers")
            .with_field("draftkings.spread_line", -2.5)
            .with_field("draftkings.total_line", 225.5);

        assert_eq!(record.field("draftkings.spread_line"), Some(-2.5));
        assert_eq!(record.field("draftkings.total_line"), Some(225.5));
        assert_eq!(record.field("missing"), None);
    }

    #[test]
    fn by_key_is_sorted_and_last_duplicate_wins() {
        let snapshot = Snapshot::new(
            Utc::now(),
            vec![
                Record::new("b", "first b").with_field("x", 1.0),
                Record::new("a", "a"),
                Record::new("b", "second b").with_field("x", 2.0),
            ],
        );

        let index = snapshot.by_key();
        let keys: Vec<&str> = index.keys().copied().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(index["b"].label, "second b");
    }

    #[test]
    fn recaptured_keeps_records_and_moves_timestamp() {
        let original = Snapshot::new(Utc::now(), vec![Record::new("1", "g")]);
        let later = original.captured_at + chrono::Duration::seconds(30);
        let copy = original.recaptured(later);

        assert_eq!(copy.records, original.records);
        assert_eq!(copy.captured_at, later);
    }
}
