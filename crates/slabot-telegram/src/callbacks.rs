//! Inline-keyboard callback handlers: `resolve:{alertId}` and
//! `notify:{alertId}`.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};

use slabot_core::types::ResolvedAction;
use slabot_engine::ResolveOutcome;

use crate::context::BotContext;
use crate::error::TelegramError;
use crate::send::notify_accountant;

pub async fn handle_callback(
    bot: Bot,
    query: CallbackQuery,
    ctx: Arc<BotContext>,
) -> ResponseResult<()> {
    let answer = match dispatch(&bot, &query, &ctx).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "callback handling failed");
            "Не удалось обработать действие".to_string()
        }
    };
    if let Err(e) = bot
        .answer_callback_query(query.id.clone())
        .text(answer)
        .await
    {
        warn!(error = %e, "answer_callback_query failed");
    }
    Ok(())
}

async fn dispatch(bot: &Bot, query: &CallbackQuery, ctx: &BotContext) -> crate::Result<String> {
    let data = query
        .data
        .as_deref()
        .ok_or_else(|| TelegramError::BadCallback("empty payload".to_string()))?;
    let user_id = query.from.id.0 as i64;

    if let Some(alert_id) = parse_action(data, "resolve:") {
        return match ctx.alerts.resolve_alert(
            alert_id,
            ResolvedAction::MarkResolved,
            Some(user_id),
            None,
        )? {
            ResolveOutcome::Resolved => {
                info!(alert_id, user_id, "alert marked resolved via keyboard");
                Ok("✅ Заявка закрыта".to_string())
            }
            ResolveOutcome::AlreadyResolved => Ok("Уже закрыта".to_string()),
        };
    }

    if let Some(alert_id) = parse_action(data, "notify:") {
        let alert = ctx.store.get_alert(alert_id)?;
        let request = ctx.store.get_request(alert.request_id)?;
        let chat = ctx
            .store
            .get_chat(request.chat_id)?
            .ok_or(slabot_store::StoreError::NotFound {
                what: format!("chat {}", request.chat_id),
            })?;
        let preview = ctx
            .store
            .latest_message(request.chat_id, request.message_id)?
            .map(|m| m.text)
            .unwrap_or_default();

        notify_accountant(bot, &chat, request.id, &preview).await?;
        info!(alert_id, request_id = request.id, "accountant notified via keyboard");
        return Ok("📣 Бухгалтер уведомлён".to_string());
    }

    Err(TelegramError::BadCallback(data.to_string()))
}

fn parse_action(data: &str, prefix: &str) -> Option<i64> {
    data.strip_prefix(prefix)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_actions() {
        assert_eq!(parse_action("resolve:42", "resolve:"), Some(42));
        assert_eq!(parse_action("notify:7", "notify:"), Some(7));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(parse_action("resolve:", "resolve:"), None);
        assert_eq!(parse_action("resolve:abc", "resolve:"), None);
        assert_eq!(parse_action("other:42", "resolve:"), None);
    }
}
