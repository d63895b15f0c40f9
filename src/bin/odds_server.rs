use std::{sync::Arc, time::Duration};

use oddswatch::{
    dashboard_router, init_logging, log_app_bind, log_app_start, log_controller_event,
    log_source_selected, logging_config_from_env, DriftingOddsSource, RefreshController,
    ServerConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let cfg = ServerConfig::from_env()?;

    let source = DriftingOddsSource::demo().with_latency(Duration::from_millis(cfg.mock_latency_ms));
    log_source_selected("drifting_demo", cfg.poll.interval_ms, cfg.mock_latency_ms);

    let controller = Arc::new(RefreshController::new(Arc::new(source), cfg.controller.clone()));
    let _updates = controller.on_update(log_controller_event);
    controller.start(cfg.poll)?;

    let app = dashboard_router(Arc::clone(&controller), cfg.poll);
    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    controller.stop();
    Ok(())
}
