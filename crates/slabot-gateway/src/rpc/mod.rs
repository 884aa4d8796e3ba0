//! Admin RPC surface: typed procedures grouped into routers, exposed as
//! `POST /rpc/{router}.{procedure}` with JSON bodies.
//!
//! Inputs are strict (`deny_unknown_fields`), errors use a stable
//! `{error, code}` envelope, and procedures never leak internals.

use std::sync::Arc;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};

use slabot_engine::EngineError;
use slabot_store::StoreError;

use crate::app::AppState;
use crate::auth::{authorize, Tier};

pub mod alert;
pub mod analytics;
pub mod chat;
pub mod settings;
pub mod sla;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // sla
        .route("/rpc/sla.createRequest", post(sla::create_request))
        .route("/rpc/sla.classifyMessage", post(sla::classify_message))
        .route("/rpc/sla.startTimer", post(sla::start_timer))
        .route("/rpc/sla.stopTimer", post(sla::stop_timer))
        .route("/rpc/sla.getRequests", post(sla::get_requests))
        .route("/rpc/sla.getRequestById", post(sla::get_request_by_id))
        .route("/rpc/sla.getActiveTimers", post(sla::get_active_timers))
        // chat
        .route("/rpc/chat.registerChat", post(chat::register_chat))
        .route("/rpc/chat.updateChat", post(chat::update_chat))
        .route(
            "/rpc/chat.updateWorkingSchedule",
            post(chat::update_working_schedule),
        )
        .route("/rpc/chat.addHoliday", post(chat::add_holiday))
        .route("/rpc/chat.removeHoliday", post(chat::remove_holiday))
        .route("/rpc/chat.getChats", post(chat::get_chats))
        .route("/rpc/chat.getChatById", post(chat::get_chat_by_id))
        .route(
            "/rpc/chat.getWorkingSchedule",
            post(chat::get_working_schedule),
        )
        .route("/rpc/chat.getHolidays", post(chat::get_holidays))
        // alert
        .route("/rpc/alert.createAlert", post(alert::create_alert))
        .route("/rpc/alert.resolveAlert", post(alert::resolve_alert))
        .route("/rpc/alert.notifyAccountant", post(alert::notify_accountant))
        .route(
            "/rpc/alert.updateDeliveryStatus",
            post(alert::update_delivery_status),
        )
        .route("/rpc/alert.getAlerts", post(alert::get_alerts))
        .route("/rpc/alert.getAlertById", post(alert::get_alert_by_id))
        .route("/rpc/alert.getActiveAlerts", post(alert::get_active_alerts))
        .route("/rpc/alert.getAlertStats", post(alert::get_alert_stats))
        // analytics
        .route("/rpc/analytics.getDashboard", post(analytics::get_dashboard))
        .route(
            "/rpc/analytics.getAccountantStats",
            post(analytics::get_accountant_stats),
        )
        .route(
            "/rpc/analytics.getSlaCompliance",
            post(analytics::get_sla_compliance),
        )
        .route(
            "/rpc/analytics.getResponseTime",
            post(analytics::get_response_time),
        )
        .route("/rpc/analytics.exportReport", post(analytics::export_report))
        // settings
        .route(
            "/rpc/settings.getGlobalSettings",
            post(settings::get_global_settings),
        )
        .route(
            "/rpc/settings.updateGlobalSettings",
            post(settings::update_global_settings),
        )
        .route(
            "/rpc/settings.getGlobalHolidays",
            post(settings::get_global_holidays),
        )
        .route(
            "/rpc/settings.addGlobalHoliday",
            post(settings::add_global_holiday),
        )
        .route(
            "/rpc/settings.removeGlobalHoliday",
            post(settings::remove_global_holiday),
        )
        .route(
            "/rpc/settings.bulkAddHolidays",
            post(settings::bulk_add_holidays),
        )
        .route(
            "/rpc/settings.seedRussianHolidays",
            post(settings::seed_russian_holidays),
        )
}

// ── Error envelope ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RpcError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl RpcError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED",
            message: "missing or invalid bearer token".to_string(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "CONFLICT",
            message: message.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR",
            message: "internal error".to_string(),
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"error": self.message, "code": self.code})),
        )
            .into_response()
    }
}

impl From<StoreError> for RpcError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { what } => RpcError::not_found(what),
            StoreError::Conflict(msg) => RpcError::conflict(msg),
            StoreError::Invalid(msg) => RpcError::bad_request(msg),
            // Stack traces and SQL never leak to clients.
            other => {
                tracing::error!(error = %other, "rpc store failure");
                RpcError::internal()
            }
        }
    }
}

impl From<EngineError> for RpcError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Store(inner) => inner.into(),
            EngineError::InvalidState(msg) => RpcError::bad_request(msg),
            EngineError::AlreadyResolved { alert_id } => {
                RpcError::conflict(format!("alert {alert_id} is already resolved"))
            }
            other => {
                tracing::error!(error = %other, "rpc engine failure");
                RpcError::internal()
            }
        }
    }
}

impl From<slabot_telegram::TelegramError> for RpcError {
    fn from(e: slabot_telegram::TelegramError) -> Self {
        match e {
            slabot_telegram::TelegramError::Store(inner) => inner.into(),
            slabot_telegram::TelegramError::Engine(inner) => inner.into(),
            other => {
                tracing::error!(error = %other, "rpc transport failure");
                RpcError::internal()
            }
        }
    }
}

pub type RpcResult = Result<Json<Value>, RpcError>;

// ── Shared helpers ───────────────────────────────────────────────────────────

/// Authorize or reject before any side effect.
pub fn guard(state: &AppState, headers: &HeaderMap, tier: Tier) -> Result<(), RpcError> {
    if authorize(&state.config.gateway.auth, headers, tier) {
        Ok(())
    } else {
        Err(RpcError::unauthorized())
    }
}

/// Strict input decoding: unknown fields and bad shapes are BAD_REQUEST.
pub fn input<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::bad_request(e.to_string()))
}

pub fn ok<T: serde::Serialize>(value: T) -> RpcResult {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| RpcError::bad_request(e.to_string()))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, RpcError> {
    s.parse()
        .map_err(|_| RpcError::bad_request(format!("invalid date {s:?}, expected YYYY-MM-DD")))
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, RpcError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RpcError::bad_request(format!("invalid timestamp {s:?}, expected RFC 3339")))
}

/// Holiday inputs accept years 2024–2030.
pub fn validate_holiday_year(date: NaiveDate) -> Result<(), RpcError> {
    use chrono::Datelike;
    if !(2024..=2030).contains(&date.year()) {
        return Err(RpcError::bad_request(format!(
            "holiday year {} out of the supported 2024–2030 range",
            date.year()
        )));
    }
    Ok(())
}
