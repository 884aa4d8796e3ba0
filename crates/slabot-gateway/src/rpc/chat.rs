//! `chat.*` procedures.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use slabot_core::types::ChatKind;
use slabot_store::types::{id_str, id_str_opt, ChatPatch, ScheduleRow};

use crate::app::AppState;
use crate::auth::Tier;
use crate::rpc::{guard, input, ok, parse_date, validate_holiday_year, RpcResult};

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RegisterChatInput {
    #[serde(with = "id_str")]
    chat_id: i64,
    kind: ChatKind,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    patch: ChatPatch,
}

pub async fn register_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Admin)?;
    let req: RegisterChatInput = input(body)?;
    let chat = state
        .store
        .register_chat(req.chat_id, req.kind, req.title.as_deref(), req.patch)?;
    ok(chat)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct UpdateChatInput {
    #[serde(with = "id_str")]
    chat_id: i64,
    patch: ChatPatch,
}

pub async fn update_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Admin)?;
    let req: UpdateChatInput = input(body)?;
    ok(state.store.update_chat(req.chat_id, req.patch)?)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct UpdateScheduleInput {
    /// Omit for the global default schedule.
    #[serde(default, with = "id_str_opt")]
    chat_id: Option<i64>,
    rows: Vec<ScheduleRow>,
}

pub async fn update_working_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Admin)?;
    let req: UpdateScheduleInput = input(body)?;
    state.store.set_working_schedule(req.chat_id, &req.rows)?;
    ok(json!({"updated": req.rows.len()}))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct HolidayInput {
    #[serde(with = "id_str")]
    chat_id: i64,
    date: String,
    #[serde(default)]
    name: Option<String>,
}

pub async fn add_holiday(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Admin)?;
    let req: HolidayInput = input(body)?;
    let date = parse_date(&req.date)?;
    validate_holiday_year(date)?;
    ok(state
        .store
        .add_holiday(Some(req.chat_id), date, req.name.as_deref())?)
}

pub async fn remove_holiday(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Admin)?;
    let req: HolidayInput = input(body)?;
    let date = parse_date(&req.date)?;
    let removed = state.store.remove_holiday(Some(req.chat_id), date)?;
    ok(json!({"removed": removed}))
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct GetChatsInput {
    include_deleted: bool,
}

pub async fn get_chats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let req: GetChatsInput = input(body)?;
    ok(state.store.list_chats(req.include_deleted)?)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ChatIdInput {
    #[serde(with = "id_str")]
    chat_id: i64,
}

pub async fn get_chat_by_id(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let req: ChatIdInput = input(body)?;
    match state.store.get_chat(req.chat_id)? {
        Some(chat) => ok(chat),
        None => Err(crate::rpc::RpcError::not_found(format!(
            "chat {}",
            req.chat_id
        ))),
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
struct ScheduleScopeInput {
    #[serde(with = "id_str_opt")]
    chat_id: Option<i64>,
}

pub async fn get_working_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let req: ScheduleScopeInput = input(body)?;
    ok(state.store.get_working_schedule(req.chat_id)?)
}

pub async fn get_holidays(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let req: ScheduleScopeInput = input(body)?;
    ok(state.store.list_holidays(req.chat_id)?)
}
