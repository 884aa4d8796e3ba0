//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling
//! event loop. In webhook mode the gateway feeds parsed updates through
//! [`dispatch_update`] instead; both paths share the same handlers.

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::UpdateKind;
use tracing::info;

use crate::callbacks::handle_callback;
use crate::context::BotContext;
use crate::ingest::{handle_edited, handle_message};

pub struct TelegramAdapter {
    bot: Bot,
    ctx: Arc<BotContext>,
}

impl TelegramAdapter {
    pub fn new(bot: Bot, ctx: Arc<BotContext>) -> Self {
        Self { bot, ctx }
    }

    /// Connect to Telegram and drive the long-polling loop.
    ///
    /// Runs until the dispatcher is stopped by the process shutting down.
    /// Also spawns the periodic rate-limit sweep.
    pub async fn run(self) {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                ctx.rate_limiter.sweep();
            }
        });

        info!("Telegram: starting long-polling dispatcher");

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(handle_message))
            .branch(Update::filter_edited_message().endpoint(handle_edited))
            .branch(Update::filter_callback_query().endpoint(handle_callback));

        Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.ctx])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}

/// Route one already-parsed update to the shared handlers. Used by the
/// gateway's webhook ingress.
pub async fn dispatch_update(bot: Bot, ctx: Arc<BotContext>, update: Update) {
    match update.kind {
        UpdateKind::Message(msg) => {
            let _ = handle_message(bot, msg, ctx).await;
        }
        UpdateKind::EditedMessage(msg) => {
            let _ = handle_edited(bot, msg, ctx).await;
        }
        UpdateKind::CallbackQuery(query) => {
            let _ = handle_callback(bot, query, ctx).await;
        }
        _ => {}
    }
}
