//! Ingest path: every group message lands in the append-only log; client
//! messages are classified and may become SLA-tracked requests, accountant
//! messages resolve the oldest open request.

use std::sync::Arc;
use std::time::Instant;

use teloxide::prelude::*;
use tracing::{info, warn};

use slabot_core::metrics::{MESSAGES_RECEIVED, MESSAGE_PROCESSING_SECONDS};
use slabot_core::types::{Category, ChatKind};
use slabot_store::types::{Chat, NewMessage};

use crate::context::BotContext;

/// Main message handler registered in the teloxide Dispatcher.
///
/// Runs for every incoming `Message`. Performs:
/// 1. Bot-message filter
/// 2. Group-chat filter (private chats are the alert/DM surface)
/// 3. Chat auto-registration + append-only logging
/// 4. Accountant-vs-client split
/// 5. Rate-limit guard, classification, request creation / resolution
pub async fn handle_message(
    _bot: Bot,
    msg: Message,
    ctx: Arc<BotContext>,
) -> ResponseResult<()> {
    if let Err(e) = ingest(&ctx, &msg, false).await {
        warn!(chat_id = msg.chat.id.0, error = %e, "ingest failed");
    }
    Ok(())
}

/// Edited messages append a new log version and never create or duplicate
/// requests.
pub async fn handle_edited(
    _bot: Bot,
    msg: Message,
    ctx: Arc<BotContext>,
) -> ResponseResult<()> {
    if let Err(e) = ingest(&ctx, &msg, true).await {
        warn!(chat_id = msg.chat.id.0, error = %e, "edit ingest failed");
    }
    Ok(())
}

async fn ingest(ctx: &BotContext, msg: &Message, is_edit: bool) -> crate::Result<()> {
    // 1. Ignore messages from other bots.
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    // 2. Only group conversations are monitored.
    let kind = match chat_kind(msg) {
        Some(k) if k != ChatKind::Private => k,
        _ => return Ok(()),
    };

    let Some(text) = msg.text().or(msg.caption()) else {
        return Ok(());
    };

    let started = Instant::now();
    let chat_id = msg.chat.id.0;
    let sender_id = from.id.0 as i64;
    let username = from.username.as_deref();

    // 3. Auto-register and log.
    let chat = ctx
        .store
        .ensure_chat(chat_id, kind, msg.chat.title())?;
    let is_accountant = chat.is_accountant(sender_id, username);

    let row = NewMessage {
        chat_id,
        message_id: msg.id.0 as i64,
        sender_id,
        sender_username: username.map(String::from),
        text: text.to_string(),
        is_accountant,
        reply_to_message_id: msg.reply_to_message().map(|m| m.id.0 as i64),
        message_type: message_type(msg).to_string(),
        sent_at: msg.date,
    };
    if is_edit {
        ctx.store.append_edit(&row)?;
    } else {
        ctx.store.append_message(&row)?;
    }

    MESSAGES_RECEIVED
        .with_label_values(&[
            kind.to_string().as_str(),
            if is_accountant { "accountant" } else { "client" },
        ])
        .inc();

    if chat.monitoring_enabled && !is_edit {
        if is_accountant {
            resolve_for_accountant(ctx, &chat, &row).await?;
        } else {
            track_client_message(ctx, &chat, &row).await?;
        }
    }

    MESSAGE_PROCESSING_SECONDS
        .with_label_values(&[&kind.to_string()])
        .observe(started.elapsed().as_secs_f64());
    Ok(())
}

/// An accountant message resolves the oldest open request, preferring an
/// explicit reply-to match over FIFO.
async fn resolve_for_accountant(
    ctx: &BotContext,
    chat: &Chat,
    row: &NewMessage,
) -> crate::Result<()> {
    let Some(request) = ctx
        .store
        .oldest_open_request(chat.chat_id, row.reply_to_message_id)?
    else {
        return Ok(());
    };

    ctx.alerts.on_accountant_response(
        request.id,
        row.sender_id,
        row.message_id,
        row.sent_at,
    )?;
    info!(
        request_id = request.id,
        chat_id = chat.chat_id,
        responded_by = row.sender_id,
        "request resolved by accountant response"
    );
    Ok(())
}

/// Classify a client message and open a request when it is a true REQUEST.
async fn track_client_message(
    ctx: &BotContext,
    chat: &Chat,
    row: &NewMessage,
) -> crate::Result<()> {
    if !ctx.rate_limiter.allow(row.sender_id) {
        return Ok(());
    }

    let settings = ctx.store.get_settings()?;
    let classifier_settings = slabot_classifier::ClassifierSettings {
        ai_confidence_threshold: settings.ai_confidence_threshold,
        keyword_confidence_threshold: settings.keyword_confidence_threshold,
        cache_ttl_minutes: settings.cache_ttl_minutes,
    };
    let verdict = ctx.classifier.classify(&row.text, &classifier_settings).await;

    if verdict.category != Category::Request {
        return Ok(());
    }
    // An edit or a redelivered update must not spawn a second request.
    if ctx
        .store
        .find_request_by_message(chat.chat_id, row.message_id)?
        .is_some()
    {
        return Ok(());
    }

    let request = ctx.store.create_request(
        chat.chat_id,
        row.message_id,
        row.sent_at,
        verdict.category,
        verdict.confidence,
        &verdict.model,
    )?;
    ctx.timers.start_timer(request.id, chat.chat_id, None)?;
    info!(
        request_id = request.id,
        chat_id = chat.chat_id,
        model = %verdict.model,
        confidence = verdict.confidence,
        "client request created"
    );
    Ok(())
}

fn chat_kind(msg: &Message) -> Option<ChatKind> {
    if msg.chat.is_private() {
        Some(ChatKind::Private)
    } else if msg.chat.is_group() {
        Some(ChatKind::Group)
    } else if msg.chat.is_supergroup() {
        Some(ChatKind::Supergroup)
    } else {
        None
    }
}

fn message_type(msg: &Message) -> &'static str {
    if msg.text().is_some() {
        "text"
    } else if msg.photo().is_some() {
        "photo"
    } else if msg.document().is_some() {
        "document"
    } else if msg.voice().is_some() {
        "voice"
    } else {
        "other"
    }
}
