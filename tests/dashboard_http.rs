use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use oddswatch::{
    dashboard_router, default_severity_rules, AlertConfig, ControllerConfig,
    InMemorySnapshotSource, PollOptions, Record, RefreshController, Snapshot,
};
use tower::util::ServiceExt;

fn book(spread_line: f64, total_line: f64) -> Snapshot {
    Snapshot::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap(),
        vec![Record::new("1", "Chicago Bulls vs Los Angeles Lakers")
            .with_field("draftkings.spread_line", spread_line)
            .with_field("draftkings.total_line", total_line)],
    )
}

fn graded_controller(source: &InMemorySnapshotSource) -> Arc<RefreshController> {
    let config = ControllerConfig {
        alerts: AlertConfig {
            rules: default_severity_rules(),
            ..AlertConfig::default()
        },
        ..ControllerConfig::default()
    };
    Arc::new(RefreshController::new(Arc::new(source.clone()), config))
}

fn hourly() -> PollOptions {
    PollOptions::every_ms(3_600_000)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

#[tokio::test(start_paused = true)]
async fn state_route_reports_committed_snapshot_and_polling_flag() {
    let source = InMemorySnapshotSource::new(book(-1.5, 224.5));
    let controller = graded_controller(&source);
    let app = dashboard_router(Arc::clone(&controller), hourly());

    let (status, json) = send(&app, Method::GET, "/odds/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["polling"], false);
    assert!(json["snapshot"].is_null());

    controller.start(hourly()).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let (status, json) = send(&app, Method::GET, "/odds/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["polling"], true);
    let records = json["snapshot"]["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["game_id"], "1");
    assert_eq!(records[0]["fields"]["draftkings.spread_line"], -1.5);
    assert_eq!(json["alerts"].as_array().unwrap().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn alerts_route_filters_by_minimum_severity() {
    let source = InMemorySnapshotSource::new(book(-1.5, 224.5));
    let controller = graded_controller(&source);
    let app = dashboard_router(Arc::clone(&controller), hourly());

    controller.start(hourly()).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // spread moves a full point (high), total half a point (medium)
    source.replace_snapshot(book(-2.5, 225.0));
    assert!(controller.refresh_now());
    tokio::time::sleep(Duration::from_millis(1)).await;

    let (status, json) = send(&app, Method::GET, "/odds/alerts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["alerts"].as_array().unwrap().len(), 2);

    let (status, json) = send(&app, Method::GET, "/odds/alerts?min_severity=high", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    let alerts = json["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["field"], "draftkings.spread_line");
    assert_eq!(alerts[0]["severity"], "high");
    assert_eq!(alerts[0]["direction"], "down");
    assert_eq!(alerts[0]["before"], -1.5);
    assert_eq!(alerts[0]["after"], -2.5);

    let (_, json) = send(&app, Method::GET, "/odds/alerts?limit=1", None).await;
    assert_eq!(json["alerts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn alerts_route_rejects_unknown_severity() {
    let source = InMemorySnapshotSource::new(book(-1.5, 224.5));
    let app = dashboard_router(graded_controller(&source), hourly());

    let (status, _) = send(&app, Method::GET, "/odds/alerts?min_severity=urgent", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn polling_route_starts_and_stops_the_controller() {
    let source = InMemorySnapshotSource::new(book(-1.5, 224.5));
    let controller = graded_controller(&source);
    let app = dashboard_router(Arc::clone(&controller), hourly());

    let (status, json) = send(&app, Method::POST, "/odds/polling", Some(r#"{"enabled":true}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["polling"], true);
    assert_eq!(json["session"]["interval_ms"], 3_600_000);
    let session_id = json["session"]["id"].as_u64().unwrap();
    assert!(controller.is_running());

    // a second enable keeps the running session
    let (_, json) = send(&app, Method::POST, "/odds/polling", Some(r#"{"enabled":true}"#)).await;
    assert_eq!(json["session"]["id"].as_u64(), Some(session_id));

    let (status, json) = send(&app, Method::POST, "/odds/polling", Some(r#"{"enabled":false}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["polling"], false);
    assert!(json["session"].is_null());
    assert!(!controller.is_running());
}

#[tokio::test]
async fn polling_route_maps_invalid_interval_to_bad_request() {
    let source = InMemorySnapshotSource::new(book(-1.5, 224.5));
    let controller = graded_controller(&source);
    let broken = PollOptions {
        interval_ms: 0,
        immediate: true,
    };
    let app = dashboard_router(Arc::clone(&controller), broken);

    let (status, json) = send(&app, Method::POST, "/odds/polling", Some(r#"{"enabled":true}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("interval_ms"));
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn refresh_route_issues_fetch_only_while_polling() {
    let source = InMemorySnapshotSource::new(book(-1.5, 224.5));
    let controller = graded_controller(&source);
    let app = dashboard_router(Arc::clone(&controller), hourly());

    let (status, json) = send(&app, Method::POST, "/odds/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["issued"], false);

    controller
        .start(PollOptions {
            interval_ms: 3_600_000,
            immediate: false,
        })
        .unwrap();
    let (_, json) = send(&app, Method::POST, "/odds/refresh", None).await;
    assert_eq!(json["issued"], true);

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(controller.get_state().snapshot.is_some());
}
