//! Snapshot sources: the boundary the refresh controller polls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::snapshot::{Record, Snapshot};

/// A fetch failed. Transport details are opaque to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("snapshot source unavailable: {0}")]
pub struct SourceUnavailable(pub String);

#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn fetch_snapshot(&self) -> Result<Snapshot, SourceUnavailable>;
}

#[derive(Debug)]
struct InMemoryState {
    snapshot: Snapshot,
    outage: Option<String>,
}

/// Serves a replaceable snapshot, optionally after a simulated delay.
#[derive(Clone)]
pub struct InMemorySnapshotSource {
    inner: Arc<RwLock<InMemoryState>>,
    latency: Duration,
}

impl InMemorySnapshotSource {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(InMemoryState {
                snapshot,
                outage: None,
            })),
            latency: Duration::ZERO,
        }
    }

    pub fn demo() -> Self {
        Self::new(demo_snapshot())
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn replace_snapshot(&self, snapshot: Snapshot) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.snapshot = snapshot;
    }

    /// While an outage is set every fetch fails with its message.
    pub fn set_outage(&self, outage: Option<String>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.outage = outage;
    }
}

#[async_trait]
impl SnapshotSource for InMemorySnapshotSource {
    async fn fetch_snapshot(&self) -> Result<Snapshot, SourceUnavailable> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        match &guard.outage {
            Some(reason) => Err(SourceUnavailable(reason.clone())),
            None => Ok(guard.snapshot.recaptured(Utc::now())),
        }
    }
}

/// One scripted line change applied by [`DriftingOddsSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct LineMove {
    pub game_id: String,
    pub field: String,
    pub to: f64,
}

impl LineMove {
    pub fn new(game_id: impl Into<String>, field: impl Into<String>, to: f64) -> Self {
        Self {
            game_id: game_id.into(),
            field: field.into(),
            to,
        }
    }
}

/// Demo feed that replays line moves over a base snapshot.
///
/// Fetch `n` (zero-based) returns the base with the first `n % (moves + 1)`
/// moves applied, so the feed cycles back to its opening lines after the last
/// move.
pub struct DriftingOddsSource {
    base: Snapshot,
    moves: Vec<LineMove>,
    fetches: AtomicUsize,
    latency: Duration,
}

impl DriftingOddsSource {
    pub fn new(base: Snapshot, moves: Vec<LineMove>) -> Self {
        Self {
            base,
            moves,
            fetches: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Opening lines of the two demo games and their recorded movements.
    pub fn demo() -> Self {
        let mut base = demo_snapshot();
        for record in &mut base.records {
            match record.game_id.as_str() {
                "1" => {
                    record.fields.insert("draftkings.spread_line".to_string(), -1.5);
                    record.fields.insert("draftkings.total_line".to_string(), 224.5);
                }
                "2" => {
                    record.fields.insert("draftkings.spread_line".to_string(), -5.0);
                }
                _ => {}
            }
        }

        Self::new(
            base,
            vec![
                LineMove::new("2", "draftkings.spread_line", -5.5),
                LineMove::new("1", "draftkings.spread_line", -2.5),
                LineMove::new("1", "draftkings.total_line", 225.5),
            ],
        )
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn snapshot_for_step(&self, step: usize) -> Snapshot {
        let applied = step % (self.moves.len() + 1);
        let mut snapshot = self.base.recaptured(Utc::now());

        for line_move in &self.moves[..applied] {
            if let Some(record) = snapshot
                .records
                .iter_mut()
                .find(|record| record.game_id == line_move.game_id)
            {
                record.fields.insert(line_move.field.clone(), line_move.to);
            }
        }

        snapshot
    }
}

#[async_trait]
impl SnapshotSource for DriftingOddsSource {
    async fn fetch_snapshot(&self) -> Result<Snapshot, SourceUnavailable> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let step = self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot_for_step(step))
    }
}

struct BookLine {
    book: &'static str,
    moneyline: (f64, f64),
    spread: (f64, f64, f64),
    total: (f64, f64, f64),
}

fn with_book(record: Record, line: BookLine) -> Record {
    let book = line.book;
    record
        .with_field(format!("{book}.moneyline_home"), line.moneyline.0)
        .with_field(format!("{book}.moneyline_away"), line.moneyline.1)
        .with_field(format!("{book}.spread_line"), line.spread.0)
        .with_field(format!("{book}.spread_home"), line.spread.1)
        .with_field(format!("{book}.spread_away"), line.spread.2)
        .with_field(format!("{book}.total_line"), line.total.0)
        .with_field(format!("{book}.total_over"), line.total.1)
        .with_field(format!("{book}.total_under"), line.total.2)
}

/// Two NBA games priced by three books.
pub fn demo_snapshot() -> Snapshot {
    let bulls_lakers = [
        BookLine {
            book: "draftkings",
            moneyline: (-120.0, 100.0),
            spread: (-2.5, -110.0, -110.0),
            total: (225.5, -110.0, -110.0),
        },
        BookLine {
            book: "betmgm",
            moneyline: (-115.0, -105.0),
            spread: (-2.5, -105.0, -115.0),
            total: (225.0, -115.0, -105.0),
        },
        BookLine {
            book: "fanduel",
            moneyline: (-118.0, -102.0),
            spread: (-3.0, -110.0, -110.0),
            total: (226.0, -108.0, -112.0),
        },
    ]
    .into_iter()
    .fold(Record::new("1", "Chicago Bulls vs Los Angeles Lakers"), with_book);

    let celtics_heat = [
        BookLine {
            book: "draftkings",
            moneyline: (-240.0, 200.0),
            spread: (-5.5, -110.0, -110.0),
            total: (218.5, -110.0, -110.0),
        },
        BookLine {
            book: "betmgm",
            moneyline: (-245.0, 195.0),
            spread: (-5.5, -115.0, -105.0),
            total: (218.0, -105.0, -115.0),
        },
        BookLine {
            book: "fanduel",
            moneyline: (-235.0, 205.0),
            spread: (-6.0, -110.0, -110.0),
            total: (219.0, -112.0, -108.0),
        },
    ]
    .into_iter()
    .fold(Record::new("2", "Boston Celtics vs Miami Heat"), with_book);

    Snapshot::new(Utc::now(), vec![bulls_lakers, celtics_heat])
}
