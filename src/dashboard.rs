//! JSON routes a dashboard front end polls: committed odds state, the alert
//! feed, the auto-refresh toggle and a manual refresh.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alerts::{filter_alerts, Alert, Severity};
use crate::controller::{ControllerError, PollOptions, RefreshController, SessionHandle};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertsQuery {
    pub min_severity: Option<Severity>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    /// History size before filtering.
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PollingRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollingResponse {
    pub polling: bool,
    pub session: Option<SessionHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshResponse {
    pub issued: bool,
}

#[derive(Clone)]
struct DashboardAppState {
    controller: Arc<RefreshController>,
    poll: PollOptions,
}

/// `poll` is what `POST /odds/polling {"enabled": true}` starts with.
pub fn dashboard_router(controller: Arc<RefreshController>, poll: PollOptions) -> Router {
    Router::new()
        .route("/odds/state", get(get_state))
        .route("/odds/alerts", get(get_alerts))
        .route("/odds/polling", post(set_polling))
        .route("/odds/refresh", post(refresh_now))
        .with_state(DashboardAppState { controller, poll })
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControllerError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
            ControllerError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn get_state(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let snapshot = state.controller.get_state();
    info!(
        component = "dashboard",
        event = "http.state.request",
        polling = snapshot.polling,
        has_snapshot = snapshot.snapshot.is_some()
    );
    Json(snapshot)
}

async fn get_alerts(
    State(state): State<DashboardAppState>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    let history = state.controller.get_state().alerts;
    let alerts = filter_alerts(&history, query.min_severity, query.limit);
    info!(
        component = "dashboard",
        event = "http.alerts.request",
        min_severity = ?query.min_severity,
        limit = ?query.limit,
        returned = alerts.len()
    );
    Json(AlertsResponse {
        alerts,
        total: history.len(),
    })
}

async fn set_polling(
    State(state): State<DashboardAppState>,
    Json(request): Json<PollingRequest>,
) -> Result<Json<PollingResponse>, ControllerError> {
    info!(
        component = "dashboard",
        event = "http.polling.request",
        enabled = request.enabled
    );

    let session = if request.enabled {
        Some(state.controller.start(state.poll)?)
    } else {
        state.controller.stop();
        None
    };

    Ok(Json(PollingResponse {
        polling: state.controller.is_running(),
        session,
    }))
}

async fn refresh_now(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let issued = state.controller.refresh_now();
    info!(
        component = "dashboard",
        event = "http.refresh.request",
        issued
    );
    Json(RefreshResponse { issued })
}
