//! `analytics.*` procedures.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::Tier;
use crate::rpc::{guard, input, ok, parse_timestamp, RpcResult};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WindowInput {
    from: String,
    to: String,
}

pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let _: Value = body;
    ok(state.store.dashboard()?)
}

pub async fn get_accountant_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let _: Value = body;
    ok(state.store.accountant_stats()?)
}

pub async fn get_sla_compliance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let req: WindowInput = input(body)?;
    let from = parse_timestamp(&req.from)?;
    let to = parse_timestamp(&req.to)?;
    ok(state.store.sla_compliance(from, to)?)
}

pub async fn get_response_time(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let req: WindowInput = input(body)?;
    let from = parse_timestamp(&req.from)?;
    let to = parse_timestamp(&req.to)?;
    ok(state.store.response_time(from, to)?)
}

pub async fn export_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let req: WindowInput = input(body)?;
    let from = parse_timestamp(&req.from)?;
    let to = parse_timestamp(&req.to)?;
    let csv = state.store.export_report(from, to)?;
    ok(json!({"format": "csv", "content": csv}))
}
