//! Polling refresh controller: fetches snapshots on a schedule, derives
//! alerts against the last committed snapshot and fans updates out to
//! listeners.
//!
//! Each `start` opens a session. `stop` retires it synchronously; ticks and
//! fetch results that belong to a retired session are ignored, so a slow
//! response can never revive a stopped controller. At most one fetch is in
//! flight per controller; ticks that land while one is pending are skipped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alerts::{derive_alerts, Alert, AlertConfig, AlertHistory};
use crate::snapshot::Snapshot;
use crate::source::{SnapshotSource, SourceUnavailable};

const COMPONENT: &str = "refresh_controller";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("invalid refresh configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    SourceUnavailable(#[from] SourceUnavailable),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOptions {
    pub interval_ms: u64,
    /// Fetch once right away instead of waiting a full interval.
    pub immediate: bool,
}

impl PollOptions {
    pub fn every_ms(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            immediate: true,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.interval_ms == 0 {
            return Err(ControllerError::InvalidConfiguration(
                "interval_ms must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::every_ms(30_000)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub alerts: AlertConfig,
    pub history_limit: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            alerts: AlertConfig::default(),
            history_limit: 50,
        }
    }
}

/// Identifies one polling session, from `start` until `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionHandle {
    pub id: u64,
    pub interval_ms: u64,
}

/// Copy of the committed controller state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerState {
    pub snapshot: Option<Arc<Snapshot>>,
    pub polling: bool,
    /// Newest first.
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotUpdate {
    pub snapshot: Arc<Snapshot>,
    /// Alerts derived by this commit only.
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Updated(SnapshotUpdate),
    Error(ControllerError),
}

type Listener = Arc<dyn Fn(&ControllerEvent) + Send + Sync>;

struct Session {
    handle: SessionHandle,
    timer: JoinHandle<()>,
    runtime: Handle,
}

struct Inner {
    snapshot: Option<Arc<Snapshot>>,
    history: AlertHistory,
    session: Option<Session>,
    next_session_id: u64,
    fetch_in_flight: bool,
    /// Session that started with `immediate` while an older fetch held the
    /// in-flight slot; it gets its first fetch as soon as the slot frees up.
    owed_fetch: Option<u64>,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

impl Inner {
    fn active_session(&self, session_id: u64) -> bool {
        self.session
            .as_ref()
            .map(|session| session.handle.id == session_id)
            .unwrap_or(false)
    }
}

struct Shared {
    source: Arc<dyn SnapshotSource>,
    config: ControllerConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchIssue {
    Issued,
    Busy,
    Retired,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_issue_fetch(self: &Arc<Self>, session_id: u64) -> FetchIssue {
        let mut inner = self.lock();
        let runtime = match inner.session.as_ref() {
            Some(session) if session.handle.id == session_id => session.runtime.clone(),
            _ => return FetchIssue::Retired,
        };
        if inner.fetch_in_flight {
            return FetchIssue::Busy;
        }
        inner.fetch_in_flight = true;
        drop(inner);

        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let in_flight = InFlightGuard(Arc::clone(&shared));
            let result = shared.source.fetch_snapshot().await;
            shared.complete_fetch(session_id, result);
            drop(in_flight);
        });

        FetchIssue::Issued
    }

    fn complete_fetch(&self, session_id: u64, result: Result<Snapshot, SourceUnavailable>) {
        let (listeners, event) = {
            let mut inner = self.lock();
            if !inner.active_session(session_id) {
                debug!(
                    component = COMPONENT,
                    event = "refresh.discarded",
                    session_id,
                    succeeded = result.is_ok()
                );
                return;
            }

            let event = match result {
                Err(err) => {
                    warn!(
                        component = COMPONENT,
                        event = "refresh.fetch.error",
                        session_id,
                        error = %err
                    );
                    ControllerEvent::Error(err.into())
                }
                Ok(snapshot) => {
                    let alerts =
                        derive_alerts(inner.snapshot.as_deref(), &snapshot, &self.config.alerts);
                    inner.history.record_batch(&alerts);
                    let snapshot = Arc::new(snapshot);
                    inner.snapshot = Some(Arc::clone(&snapshot));

                    info!(
                        component = COMPONENT,
                        event = "refresh.commit",
                        session_id,
                        records = snapshot.len(),
                        new_alerts = alerts.len(),
                        history_len = inner.history.len()
                    );
                    ControllerEvent::Updated(SnapshotUpdate { snapshot, alerts })
                }
            };

            let listeners: Vec<Listener> = inner
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (listeners, event)
        };

        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(
                    component = COMPONENT,
                    event = "refresh.listener.panicked",
                    session_id,
                    listener_index = index
                );
            }
        }
    }

    fn release_in_flight(self: &Arc<Self>) {
        let owed = {
            let mut inner = self.lock();
            inner.fetch_in_flight = false;
            inner
                .owed_fetch
                .take()
                .filter(|session_id| inner.active_session(*session_id))
        };

        if let Some(session_id) = owed {
            let issued = self.try_issue_fetch(session_id) == FetchIssue::Issued;
            debug!(
                component = COMPONENT,
                event = "refresh.immediate.issued",
                session_id,
                issued
            );
        }
    }
}

/// Frees the in-flight slot once the fetch task is done, even if the source
/// panicked, and hands it to a session still waiting on its immediate fetch.
struct InFlightGuard(Arc<Shared>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.release_in_flight();
    }
}

async fn run_timer(shared: Arc<Shared>, session_id: u64, options: PollOptions) {
    let period = options.interval();
    let first_tick = if options.immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match shared.try_issue_fetch(session_id) {
            FetchIssue::Issued => {}
            FetchIssue::Busy => debug!(
                component = COMPONENT,
                event = "refresh.tick.skipped",
                session_id
            ),
            FetchIssue::Retired => break,
        }
    }
}

/// Handle returned by [`RefreshController::on_update`].
///
/// Dropping it keeps the listener registered; call `unsubscribe` to remove it.
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Returns false if the listener was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut inner = shared.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(id, _)| *id != self.id);
        let removed = inner.listeners.len() < before;
        if removed {
            debug!(
                component = COMPONENT,
                event = "refresh.listener.removed",
                listener_id = self.id
            );
        }
        removed
    }
}

pub struct RefreshController {
    shared: Arc<Shared>,
}

impl RefreshController {
    pub fn new(source: Arc<dyn SnapshotSource>, config: ControllerConfig) -> Self {
        let history = AlertHistory::new(config.history_limit);
        Self {
            shared: Arc::new(Shared {
                source,
                config,
                inner: Mutex::new(Inner {
                    snapshot: None,
                    history,
                    session: None,
                    next_session_id: 0,
                    fetch_in_flight: false,
                    owed_fetch: None,
                    listeners: Vec::new(),
                    next_listener_id: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    /// Begin polling. While a session is already running this returns its
    /// handle and ignores `options`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, options: PollOptions) -> Result<SessionHandle, ControllerError> {
        options.validate()?;

        let mut inner = self.shared.lock();
        if let Some(session) = inner.session.as_ref() {
            debug!(
                component = COMPONENT,
                event = "refresh.start.noop",
                session_id = session.handle.id
            );
            return Ok(session.handle);
        }

        let runtime = Handle::try_current().map_err(|_| {
            ControllerError::InvalidConfiguration(
                "start requires a running tokio runtime".to_string(),
            )
        })?;

        inner.next_session_id += 1;
        let handle = SessionHandle {
            id: inner.next_session_id,
            interval_ms: options.interval_ms,
        };
        if options.immediate && inner.fetch_in_flight {
            // a retired session's fetch is still out; its first tick would be skipped
            inner.owed_fetch = Some(handle.id);
            debug!(
                component = COMPONENT,
                event = "refresh.immediate.deferred",
                session_id = handle.id
            );
        }
        let timer = runtime.spawn(run_timer(Arc::clone(&self.shared), handle.id, options));
        inner.session = Some(Session {
            handle,
            timer,
            runtime,
        });

        info!(
            component = COMPONENT,
            event = "refresh.start",
            session_id = handle.id,
            interval_ms = options.interval_ms,
            immediate = options.immediate
        );
        Ok(handle)
    }

    /// Stop polling. A fetch still in flight completes but its result is
    /// dropped.
    pub fn stop(&self) {
        let session = self.shared.lock().session.take();
        match session {
            Some(session) => {
                session.timer.abort();
                info!(
                    component = COMPONENT,
                    event = "refresh.stop",
                    session_id = session.handle.id
                );
            }
            None => debug!(component = COMPONENT, event = "refresh.stop.noop"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().session.is_some()
    }

    /// Fetch now, outside the schedule. Returns whether a fetch was issued:
    /// false when stopped or when a fetch is already pending.
    pub fn refresh_now(&self) -> bool {
        let session_id = match self.shared.lock().session.as_ref() {
            Some(session) => session.handle.id,
            None => return false,
        };

        let issued = self.shared.try_issue_fetch(session_id) == FetchIssue::Issued;
        debug!(
            component = COMPONENT,
            event = "refresh.manual",
            session_id,
            issued
        );
        issued
    }

    /// Register a listener. Listeners run synchronously, in registration
    /// order, on the task that completed the fetch. A panicking listener is
    /// logged and skipped; the rest still see the event.
    pub fn on_update<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ControllerEvent) + Send + Sync + 'static,
    {
        let mut inner = self.shared.lock();
        inner.next_listener_id += 1;
        let id = inner.next_listener_id;
        inner.listeners.push((id, Arc::new(listener)));
        debug!(
            component = COMPONENT,
            event = "refresh.listener.added",
            listener_id = id,
            listener_count = inner.listeners.len()
        );

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn get_state(&self) -> ControllerState {
        let inner = self.shared.lock();
        ControllerState {
            snapshot: inner.snapshot.clone(),
            polling: inner.session.is_some(),
            alerts: inner.history.to_vec(),
        }
    }
}

impl Drop for RefreshController {
    fn drop(&mut self) {
        if let Some(session) = self.shared.lock().session.take() {
            session.timer.abort();
        }
    }
}
