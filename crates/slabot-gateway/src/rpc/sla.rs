//! `sla.*` procedures.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use slabot_classifier::ClassifierSettings;
use slabot_core::types::{Category, RequestStatus};
use slabot_engine::{StopOutcome, StopParams};
use slabot_store::types::{id_str, id_str_opt};

use crate::app::AppState;
use crate::auth::Tier;
use crate::rpc::{guard, input, ok, parse_timestamp, RpcResult};

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateRequestInput {
    #[serde(with = "id_str")]
    chat_id: i64,
    #[serde(with = "id_str")]
    message_id: i64,
    received_at: Option<String>,
    category: Category,
    confidence: f64,
    #[serde(default)]
    classifier_model: Option<String>,
}

pub async fn create_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let req: CreateRequestInput = input(body)?;
    let received_at = match req.received_at.as_deref() {
        Some(s) => parse_timestamp(s)?,
        None => Utc::now(),
    };
    let created = state.store.create_request(
        req.chat_id,
        req.message_id,
        received_at,
        req.category,
        req.confidence,
        req.classifier_model.as_deref().unwrap_or("manual"),
    )?;
    ok(created)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassifyInput {
    text: String,
}

pub async fn classify_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let req: ClassifyInput = input(body)?;
    let settings = state.store.get_settings()?;
    let verdict = state
        .classifier
        .classify(
            &req.text,
            &ClassifierSettings {
                ai_confidence_threshold: settings.ai_confidence_threshold,
                keyword_confidence_threshold: settings.keyword_confidence_threshold,
                cache_ttl_minutes: settings.cache_ttl_minutes,
            },
        )
        .await;
    ok(verdict)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct StartTimerInput {
    request_id: i64,
    #[serde(with = "id_str")]
    chat_id: i64,
    #[serde(default)]
    threshold_minutes: Option<i64>,
}

pub async fn start_timer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let req: StartTimerInput = input(body)?;
    state
        .timers
        .start_timer(req.request_id, req.chat_id, req.threshold_minutes)?;
    ok(json!({"started": true}))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct StopTimerInput {
    request_id: i64,
    #[serde(default, with = "id_str_opt")]
    responded_by: Option<i64>,
    #[serde(default, with = "id_str_opt")]
    response_message_id: Option<i64>,
    #[serde(default)]
    response_at: Option<String>,
}

pub async fn stop_timer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let req: StopTimerInput = input(body)?;
    let response_at = match req.response_at.as_deref() {
        Some(s) => parse_timestamp(s)?,
        None => Utc::now(),
    };
    let outcome = state.timers.stop_timer(
        req.request_id,
        StopParams {
            responded_by: req.responded_by,
            response_message_id: req.response_message_id,
            response_at,
        },
    )?;
    match outcome {
        StopOutcome::Stopped {
            elapsed_minutes,
            breached,
        } => ok(json!({
            "stopped": true,
            "elapsedMinutes": elapsed_minutes,
            "breached": breached,
        })),
        StopOutcome::AlreadyStopped => ok(json!({"stopped": false, "reason": "already_stopped"})),
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct GetRequestsInput {
    #[serde(with = "id_str_opt")]
    chat_id: Option<i64>,
    status: Option<RequestStatus>,
    limit: Option<usize>,
}

pub async fn get_requests(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let req: GetRequestsInput = input(body)?;
    let rows = state
        .store
        .list_requests(req.chat_id, req.status, req.limit.unwrap_or(100).min(1_000))?;
    ok(rows)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RequestIdInput {
    request_id: i64,
}

pub async fn get_request_by_id(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let req: RequestIdInput = input(body)?;
    ok(state.store.get_request(req.request_id)?)
}

pub async fn get_active_timers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let _: Value = body; // no parameters
    let rows = state.store.active_timers()?;
    let statuses: Vec<_> = rows
        .iter()
        .filter_map(|r| state.timers.sla_status(r.id).ok())
        .collect();
    ok(statuses)
}
