//! `alert.*` procedures.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use slabot_core::types::{AlertType, DeliveryStatus, ResolvedAction};
use slabot_engine::ResolveOutcome;
use slabot_store::types::{id_str, id_str_opt};

use crate::app::AppState;
use crate::auth::Tier;
use crate::rpc::{guard, input, ok, parse_timestamp, RpcError, RpcResult};

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CreateAlertInput {
    request_id: i64,
    alert_type: AlertType,
    escalation_level: i64,
    minutes_elapsed: i64,
    #[serde(with = "id_str")]
    manager_telegram_id: i64,
}

pub async fn create_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let req: CreateAlertInput = input(body)?;
    let alert = state.store.create_alert(
        req.request_id,
        req.alert_type,
        req.escalation_level,
        req.minutes_elapsed,
        req.manager_telegram_id,
    )?;
    ok(alert)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ResolveAlertInput {
    alert_id: i64,
    action: ResolvedAction,
    #[serde(default, with = "id_str_opt")]
    user_id: Option<i64>,
    #[serde(default)]
    notes: Option<String>,
}

pub async fn resolve_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let req: ResolveAlertInput = input(body)?;
    match state
        .alerts
        .resolve_alert(req.alert_id, req.action, req.user_id, req.notes.as_deref())?
    {
        ResolveOutcome::Resolved => ok(json!({"resolved": true})),
        ResolveOutcome::AlreadyResolved => Err(RpcError::conflict(format!(
            "alert {} is already resolved",
            req.alert_id
        ))),
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct AlertIdInput {
    alert_id: i64,
}

pub async fn notify_accountant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let req: AlertIdInput = input(body)?;

    let alert = state.store.get_alert(req.alert_id)?;
    let request = state.store.get_request(alert.request_id)?;
    let chat = state
        .store
        .get_chat(request.chat_id)?
        .ok_or_else(|| RpcError::not_found(format!("chat {}", request.chat_id)))?;
    let preview = state
        .store
        .latest_message(request.chat_id, request.message_id)?
        .map(|m| m.text)
        .unwrap_or_default();

    slabot_telegram::send::notify_accountant(&state.bot, &chat, request.id, &preview).await?;
    ok(json!({"notified": true}))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct UpdateDeliveryInput {
    alert_id: i64,
    status: DeliveryStatus,
    #[serde(default, with = "id_str_opt")]
    telegram_message_id: Option<i64>,
    #[serde(default)]
    sent_at: Option<String>,
}

pub async fn update_delivery_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let req: UpdateDeliveryInput = input(body)?;
    let sent_at = req.sent_at.as_deref().map(parse_timestamp).transpose()?;
    state
        .store
        .set_delivery_status(req.alert_id, req.status, req.telegram_message_id, sent_at)?;
    ok(json!({"updated": true}))
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct GetAlertsInput {
    request_id: Option<i64>,
}

pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let req: GetAlertsInput = input(body)?;
    match req.request_id {
        Some(id) => ok(state.store.alerts_for_request(id)?),
        None => ok(state.store.active_alerts()?),
    }
}

pub async fn get_alert_by_id(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let req: AlertIdInput = input(body)?;
    ok(state.store.get_alert(req.alert_id)?)
}

pub async fn get_active_alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let _: Value = body;
    ok(state.store.active_alerts()?)
}

pub async fn get_alert_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let _: Value = body;
    ok(state.store.alert_stats()?)
}
