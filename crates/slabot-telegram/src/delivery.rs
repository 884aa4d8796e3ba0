//! Alert delivery worker — the `alerts` queue consumer.
//!
//! `send-alert` jobs render and deliver one alert row; `escalation` jobs
//! create the next level's rows (which fan out into further `send-alert`
//! jobs). Send errors re-raise so the queue retries them under the
//! default backoff policy; the final failed attempt marks the alert row
//! `failed`.

use async_trait::async_trait;
use chrono::Utc;
use teloxide::prelude::*;
use tracing::{debug, info, warn};

use slabot_core::metrics::ALERT_DELIVERIES;
use slabot_core::types::{AlertType, DeliveryStatus};
use slabot_engine::{AlertJob, AlertService};
use slabot_queue::{Job, JobHandler};
use slabot_store::Store;

use crate::render::{alert_keyboard, render_alert};
use crate::send::send_html;

pub struct AlertDeliveryHandler {
    bot: Bot,
    store: Store,
    alerts: AlertService,
}

impl AlertDeliveryHandler {
    pub fn new(bot: Bot, store: Store, alerts: AlertService) -> Self {
        Self { bot, store, alerts }
    }

    async fn deliver(&self, alert_id: i64, final_attempt: bool) -> anyhow::Result<()> {
        let alert = match self.store.get_alert(alert_id) {
            Ok(a) => a,
            Err(slabot_store::StoreError::NotFound { .. }) => {
                warn!(alert_id, "delivery for a missing alert; dropping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if alert.resolved_action.is_some() {
            debug!(alert_id, "alert resolved before delivery; skipping");
            return Ok(());
        }

        let request = self.store.get_request(alert.request_id)?;
        let chat = self
            .store
            .get_chat(request.chat_id)?
            .ok_or_else(|| anyhow::anyhow!("chat {} not found", request.chat_id))?;
        let settings = self.store.get_settings()?;

        let preview = self
            .store
            .latest_message(request.chat_id, request.message_id)?
            .map(|m| m.text)
            .unwrap_or_default();
        let body = render_alert(
            &chat,
            &request,
            &alert,
            &preview,
            settings.preview_length,
            chat.sla_threshold_minutes,
        );
        let keyboard = alert_keyboard(&alert, &chat, request.message_id);

        match send_html(
            &self.bot,
            ChatId(alert.manager_telegram_id),
            &body,
            Some(keyboard),
        )
        .await
        {
            Ok(sent) => {
                self.store.set_delivery_status(
                    alert.id,
                    DeliveryStatus::Delivered,
                    Some(sent.id.0 as i64),
                    Some(Utc::now()),
                )?;
                ALERT_DELIVERIES.with_label_values(&["delivered"]).inc();
                info!(
                    alert_id,
                    request_id = alert.request_id,
                    manager = alert.manager_telegram_id,
                    "alert delivered"
                );

                // Breach chains continue; warnings do not escalate. The
                // stable escalation job id coalesces the per-recipient
                // calls into one scheduled job.
                if alert.alert_type == AlertType::Breach {
                    self.alerts
                        .schedule_next_escalation(alert.request_id, alert.escalation_level)?;
                }
                Ok(())
            }
            Err(e) => {
                ALERT_DELIVERIES.with_label_values(&["failed"]).inc();
                if final_attempt {
                    self.store.set_delivery_status(
                        alert.id,
                        DeliveryStatus::Failed,
                        None,
                        None,
                    )?;
                    warn!(alert_id, error = %e, "alert delivery failed terminally");
                }
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl JobHandler for AlertDeliveryHandler {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        let final_attempt = job.attempt >= job.max_attempts;
        match job.parse_payload::<AlertJob>()? {
            AlertJob::SendAlert { alert_id } => self.deliver(alert_id, final_attempt).await,
            AlertJob::Escalation { request_id, level } => {
                let outcome = self.alerts.on_escalation(request_id, level)?;
                info!(request_id, level, ?outcome, "escalation handled");
                Ok(())
            }
        }
    }
}
