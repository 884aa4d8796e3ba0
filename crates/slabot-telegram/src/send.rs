//! Sending helpers for alerts and accountant notifications.
//!
//! Telegram's message limit is 4096 characters; alert bodies are clipped
//! to 4090 for safety. HTML parse mode is tried first with a plain-text
//! fallback when Telegram rejects the markup.

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, ParseMode};
use tracing::warn;

use slabot_store::types::Chat;

use crate::render::{clip, escape_html};

const MESSAGE_MAX: usize = 4090;

/// Send an HTML message, optionally with an inline keyboard. Falls back
/// to plain text when the HTML is rejected (bad entity nesting in user
/// content survives escaping bugs this way).
pub async fn send_html(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) -> crate::Result<Message> {
    let body = clip(text, MESSAGE_MAX);

    let mut request = bot.send_message(chat_id, &body).parse_mode(ParseMode::Html);
    if let Some(kb) = keyboard.clone() {
        request = request.reply_markup(kb);
    }

    match request.await {
        Ok(sent) => Ok(sent),
        Err(e) => {
            warn!(chat_id = chat_id.0, error = %e, "HTML send rejected; retrying plain");
            let mut plain = bot.send_message(chat_id, &body);
            if let Some(kb) = keyboard {
                plain = plain.reply_markup(kb);
            }
            Ok(plain.await?)
        }
    }
}

/// Notify the assigned accountant about an open request: direct message
/// preferred, group mention as the fallback when the DM fails (the
/// accountant may never have started the bot).
pub async fn notify_accountant(
    bot: &Bot,
    chat: &Chat,
    request_id: i64,
    preview: &str,
) -> crate::Result<()> {
    let text = format!(
        "📨 Заявка #{request_id} в чате <b>{}</b> ждёт ответа.\n<i>{}</i>",
        chat.title
            .as_deref()
            .map(escape_html)
            .unwrap_or_else(|| chat.chat_id.to_string()),
        escape_html(&clip(preview, 200)),
    );

    if let Some(accountant_id) = chat.accountant_user_id {
        match send_html(bot, ChatId(accountant_id), &text, None).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                warn!(
                    accountant_id,
                    chat_id = chat.chat_id,
                    error = %e,
                    "accountant DM failed; falling back to group mention"
                );
            }
        }
    }

    let mention = match (chat.accountant_usernames.first(), chat.accountant_user_id) {
        (Some(username), _) => format!("@{}", username.trim_start_matches('@')),
        (None, Some(id)) => format!("<a href=\"tg://user?id={id}\">бухгалтер</a>"),
        (None, None) => "бухгалтер".to_string(),
    };
    send_html(
        bot,
        ChatId(chat.chat_id),
        &format!("{mention}, {text}"),
        None,
    )
    .await?;
    Ok(())
}
