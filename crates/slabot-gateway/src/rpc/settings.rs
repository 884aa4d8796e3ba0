//! `settings.*` procedures.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use slabot_store::types::SettingsPatch;

use crate::app::AppState;
use crate::auth::Tier;
use crate::rpc::{guard, input, ok, parse_date, validate_holiday_year, RpcError, RpcResult};

pub async fn get_global_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Manager)?;
    let _: Value = body;
    ok(state.store.get_settings()?)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateSettingsInput {
    patch: SettingsPatch,
}

pub async fn update_global_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Admin)?;
    let req: UpdateSettingsInput = input(body)?;
    ok(state.store.update_settings(req.patch)?)
}

pub async fn get_global_holidays(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Authed)?;
    let _: Value = body;
    ok(state.store.list_holidays(None)?)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GlobalHolidayInput {
    date: String,
    #[serde(default)]
    name: Option<String>,
}

pub async fn add_global_holiday(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Admin)?;
    let req: GlobalHolidayInput = input(body)?;
    let date = parse_date(&req.date)?;
    validate_holiday_year(date)?;
    ok(state.store.add_holiday(None, date, req.name.as_deref())?)
}

pub async fn remove_global_holiday(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Admin)?;
    let req: GlobalHolidayInput = input(body)?;
    let date = parse_date(&req.date)?;
    let removed = state.store.remove_holiday(None, date)?;
    ok(json!({"removed": removed}))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BulkHolidaysInput {
    dates: Vec<String>,
    #[serde(default)]
    name: Option<String>,
}

pub async fn bulk_add_holidays(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Admin)?;
    let req: BulkHolidaysInput = input(body)?;

    // Validate the whole batch before writing anything.
    let mut dates = Vec::with_capacity(req.dates.len());
    for raw in &req.dates {
        let date = parse_date(raw)?;
        validate_holiday_year(date)?;
        dates.push(date);
    }

    let mut added = 0usize;
    let mut skipped = 0usize;
    for date in dates {
        match state.store.add_holiday(None, date, req.name.as_deref()) {
            Ok(_) => added += 1,
            Err(slabot_store::StoreError::Conflict(_)) => skipped += 1,
            Err(e) => return Err(e.into()),
        }
    }
    ok(json!({"added": added, "skipped": skipped}))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedInput {
    year: i32,
}

pub async fn seed_russian_holidays(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> RpcResult {
    guard(&state, &headers, Tier::Admin)?;
    let req: SeedInput = input(body)?;
    if !(2024..=2030).contains(&req.year) {
        return Err(RpcError::bad_request(format!(
            "year {} out of the supported 2024–2030 range",
            req.year
        )));
    }
    let inserted = state.store.seed_russian_holidays(req.year)?;
    ok(json!({"inserted": inserted}))
}
