//! Webhook ingress — POST /webhook/telegram.
//!
//! Telegram echoes the configured shared secret back in the
//! `X-Telegram-Bot-Api-Secret-Token` header; a missing or mismatched
//! value is rejected with 401 before the body is even parsed. Comparison
//! is constant-time.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use slabot_core::config::TelegramMode;
use slabot_core::metrics::WEBHOOK_AUTH_FAILURES;

use crate::app::AppState;
use crate::auth::constant_time_eq;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub async fn telegram_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if state.config.telegram.mode != TelegramMode::Webhook {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "webhook mode is disabled"})),
        ));
    }

    if let Some(expected) = state.config.telegram.webhook_secret.as_deref() {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(expected, provided) {
            WEBHOOK_AUTH_FAILURES.inc();
            warn!("webhook rejected: bad or missing secret header");
            return Err(unauthorized());
        }
    }

    let update: teloxide::types::Update = serde_json::from_str(&body).map_err(|e| {
        warn!(error = %e, "webhook body is not a valid update");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid update JSON"})),
        )
    })?;

    debug!(update_id = update.id.0, "webhook update accepted");

    // Handle off the request path; Telegram only needs the 200.
    let bot = state.bot.clone();
    let ctx = Arc::clone(&state.bot_ctx);
    tokio::spawn(async move {
        slabot_telegram::dispatch_update(bot, ctx, update).await;
    });

    Ok(Json(json!({"ok": true})))
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "Unauthorized",
            "code": "INVALID_WEBHOOK_SIGNATURE",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
