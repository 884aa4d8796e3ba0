//! Alert message rendering: HTML body + inline action keyboard.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use slabot_core::types::AlertType;
use slabot_store::types::{Chat, ClientRequest, SlaAlert};

/// Escape text interpolated into HTML-mode messages.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Truncate on a char boundary, appending an ellipsis when clipped.
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{clipped}…")
}

/// Render the alert body sent to a manager.
pub fn render_alert(
    chat: &Chat,
    request: &ClientRequest,
    alert: &SlaAlert,
    preview: &str,
    preview_length: usize,
    threshold_minutes: i64,
) -> String {
    let title = chat
        .title
        .as_deref()
        .map(escape_html)
        .unwrap_or_else(|| format!("чат {}", chat.chat_id));

    let header = match alert.alert_type {
        AlertType::Warning => "⚠️ <b>SLA под угрозой</b>",
        AlertType::Breach => "🔴 <b>SLA нарушен</b>",
    };
    let escalation = if alert.escalation_level > 0 {
        format!("\nЭскалация: уровень {}", alert.escalation_level)
    } else {
        String::new()
    };

    format!(
        "{header}\n\
         Чат: <b>{title}</b>{escalation}\n\
         Прошло: <b>{elapsed} мин</b> (порог {threshold} мин)\n\
         Заявка #{request_id}\n\n\
         <i>{preview}</i>",
        elapsed = alert.minutes_elapsed,
        threshold = threshold_minutes,
        request_id = request.id,
        preview = escape_html(&clip(preview, preview_length)),
    )
}

/// Inline keyboard: notify the accountant, mark resolved, open the chat.
pub fn alert_keyboard(alert: &SlaAlert, chat: &Chat, message_id: i64) -> InlineKeyboardMarkup {
    let mut rows = vec![vec![
        InlineKeyboardButton::callback("📣 Напомнить бухгалтеру", format!("notify:{}", alert.id)),
        InlineKeyboardButton::callback("✅ Решено", format!("resolve:{}", alert.id)),
    ]];
    if let Some(url) = deep_link(chat.chat_id, message_id) {
        rows.push(vec![InlineKeyboardButton::url("Открыть чат", url)]);
    }
    InlineKeyboardMarkup::new(rows)
}

/// t.me deep link to a supergroup message. Supergroup ids are
/// `-100{internal}`; other chat kinds have no stable public link.
fn deep_link(chat_id: i64, message_id: i64) -> Option<reqwest::Url> {
    let internal = chat_id.checked_neg()?.checked_sub(1_000_000_000_000)?;
    if internal <= 0 {
        return None;
    }
    reqwest::Url::parse(&format!("https://t.me/c/{internal}/{message_id}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use slabot_core::types::{ChatKind, DeliveryStatus, RequestStatus};

    fn chat() -> Chat {
        Chat {
            chat_id: -1001234567890,
            kind: ChatKind::Supergroup,
            title: Some("ООО «Ромашка» <бухгалтерия>".to_string()),
            accountant_user_id: Some(77),
            accountant_usernames: vec![],
            sla_threshold_minutes: 60,
            monitoring_enabled: true,
            is_24x7: false,
            manager_ids: vec![1001],
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn request() -> ClientRequest {
        ClientRequest {
            id: 17,
            chat_id: -1001234567890,
            message_id: 42,
            status: RequestStatus::Escalated,
            received_at: Utc::now(),
            category: None,
            confidence: None,
            classifier_model: None,
            sla_timer_started_at: None,
            sla_timer_paused_at: None,
            sla_breached: true,
            response_at: None,
            response_time_minutes: None,
            response_message_id: None,
            responded_by: None,
            sla_working_minutes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn alert() -> SlaAlert {
        SlaAlert {
            id: 5,
            request_id: 17,
            alert_type: AlertType::Breach,
            escalation_level: 0,
            minutes_elapsed: 75,
            manager_telegram_id: 1001,
            alert_sent_at: None,
            delivery_status: DeliveryStatus::Pending,
            telegram_message_id: None,
            resolved_action: None,
            acknowledged_by: None,
            acknowledged_at: None,
            resolution_notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn body_contains_the_key_facts_escaped() {
        let body = render_alert(&chat(), &request(), &alert(), "Где мой счет? <срочно>", 200, 60);
        assert!(body.contains("SLA нарушен"));
        assert!(body.contains("75 мин"));
        assert!(body.contains("порог 60 мин"));
        assert!(body.contains("Заявка #17"));
        // HTML in titles and previews is escaped.
        assert!(body.contains("&lt;бухгалтерия&gt;"));
        assert!(body.contains("&lt;срочно&gt;"));
    }

    #[test]
    fn preview_is_clipped_to_settings_length() {
        let long = "а".repeat(500);
        let body = render_alert(&chat(), &request(), &alert(), &long, 200, 60);
        assert!(body.contains('…'));
        assert!(!body.contains(&long));
    }

    #[test]
    fn escalation_level_is_shown_past_level_zero() {
        let mut a = alert();
        a.escalation_level = 2;
        let body = render_alert(&chat(), &request(), &a, "текст", 200, 60);
        assert!(body.contains("уровень 2"));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("привет", 10), "привет");
        assert_eq!(clip("привет", 3), "при…");
    }

    #[test]
    fn keyboard_has_action_buttons_and_deep_link() {
        let kb = alert_keyboard(&alert(), &chat(), 42);
        assert_eq!(kb.inline_keyboard.len(), 2);
        assert_eq!(kb.inline_keyboard[0].len(), 2);
    }

    #[test]
    fn deep_link_only_for_supergroups() {
        assert!(deep_link(-1001234567890, 42).is_some());
        assert!(deep_link(-987654, 42).is_none());
    }
}
