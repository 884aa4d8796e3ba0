use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness plus a couple of cheap queue depths.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sla_depth = state
        .queue
        .pending_count(slabot_engine::QUEUE_SLA_TIMERS)
        .unwrap_or(-1);
    let alert_depth = state
        .queue
        .pending_count(slabot_engine::QUEUE_ALERTS)
        .unwrap_or(-1);

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "queues": {
            "sla-timers": sla_depth,
            "alerts": alert_depth,
        },
    }))
}
