//! Alert service and the escalation state machine.
//!
//! Per request, the chain is: breach-check fires → level-0 alerts → after
//! each delivered level the next escalation job is scheduled → until the
//! accountant responds, a manager resolves, or `max_escalations` is
//! reached. Any terminal transition cancels outstanding jobs and closes
//! open alerts with the chosen action.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use slabot_core::types::{AlertType, ResolvedAction};
use slabot_hours::{delay_until_breach, working_minutes};
use slabot_queue::{EnqueueOptions, QueueHandle};
use slabot_store::{Store, StoreError};

use crate::error::{EngineError, Result};
use crate::jobs::{
    breach_job_id, escalation_job_id, send_alert_job_id, warning_job_id, AlertJob, SlaJob,
    QUEUE_ALERTS, QUEUE_SLA_TIMERS,
};
use crate::timer::{StopParams, TimerManager};

#[derive(Clone)]
pub struct AlertService {
    store: Store,
    queue: QueueHandle,
    timers: TimerManager,
}

/// What a breach/warning check actually did, surfaced in handler logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreachOutcome {
    /// Alerts created and queued for delivery.
    Escalated { alerts: usize },
    /// The request was already answered or closed; nothing to do.
    AlreadyResolved,
    /// The working-hours fence slid (schedule edits); check re-queued.
    Rescheduled,
    /// No recipients configured anywhere; a critical log was emitted.
    NoRecipients,
    /// The request row is gone; nothing to retry.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved,
    /// Precondition failed: the alert already carries a terminal action.
    AlreadyResolved,
}

impl AlertService {
    pub fn new(store: Store, queue: QueueHandle, timers: TimerManager) -> Self {
        Self {
            store,
            queue,
            timers,
        }
    }

    /// Handler for `breach-check` jobs on the `sla-timers` queue.
    pub fn on_breach_check(&self, request_id: i64) -> Result<BreachOutcome> {
        let request = match self.store.get_request(request_id) {
            Ok(r) => r,
            Err(StoreError::NotFound { .. }) => {
                warn!(request_id, "breach check for a missing request");
                return Ok(BreachOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };
        if !request.status.is_open() {
            debug!(request_id, "breach check: already resolved");
            return Ok(BreachOutcome::AlreadyResolved);
        }

        let now = Utc::now();
        let schedule = self.store.resolve_schedule(request.chat_id)?;
        let threshold = self.timers.threshold_for(request.chat_id)?;
        let elapsed = working_minutes(request.received_at, now, &schedule);

        if elapsed < threshold {
            // Schedule edits moved the fence; re-queue at the new deadline.
            let delay = delay_until_breach(request.received_at, threshold, now, &schedule)
                .map(|d| d.num_milliseconds().max(1_000) as u64)
                .unwrap_or(60_000);
            self.queue.enqueue(
                QUEUE_SLA_TIMERS,
                SlaJob::BreachCheck { request_id }.kind(),
                &SlaJob::BreachCheck { request_id },
                EnqueueOptions::delayed(delay)
                    .with_job_id(breach_job_id(request_id))
                    .single_attempt(),
            )?;
            info!(request_id, elapsed, threshold, "breach re-queued after fence slide");
            return Ok(BreachOutcome::Rescheduled);
        }

        self.store.mark_escalated(request_id)?;
        self.create_level_alerts(request_id, request.chat_id, AlertType::Breach, 0, elapsed)
    }

    /// Handler for `warning-check` jobs on the `sla-timers` queue.
    pub fn on_warning_check(&self, request_id: i64) -> Result<BreachOutcome> {
        let request = match self.store.get_request(request_id) {
            Ok(r) => r,
            Err(StoreError::NotFound { .. }) => return Ok(BreachOutcome::Missing),
            Err(e) => return Err(e.into()),
        };
        if !request.status.is_open() {
            return Ok(BreachOutcome::AlreadyResolved);
        }

        let now = Utc::now();
        let schedule = self.store.resolve_schedule(request.chat_id)?;
        let threshold = self.timers.threshold_for(request.chat_id)?;
        let settings = self.store.get_settings()?;
        let warning_threshold = threshold * settings.warning_percent / 100;
        let elapsed = working_minutes(request.received_at, now, &schedule);

        if elapsed < warning_threshold {
            let delay = delay_until_breach(request.received_at, warning_threshold, now, &schedule)
                .map(|d| d.num_milliseconds().max(1_000) as u64)
                .unwrap_or(60_000);
            self.queue.enqueue(
                QUEUE_SLA_TIMERS,
                SlaJob::WarningCheck { request_id }.kind(),
                &SlaJob::WarningCheck { request_id },
                EnqueueOptions::delayed(delay)
                    .with_job_id(warning_job_id(request_id))
                    .single_attempt(),
            )?;
            return Ok(BreachOutcome::Rescheduled);
        }

        self.create_level_alerts(request_id, request.chat_id, AlertType::Warning, 0, elapsed)
    }

    /// Handler for `escalation` jobs on the `alerts` queue: create the
    /// next level's alert rows and queue their delivery.
    pub fn on_escalation(&self, request_id: i64, level: i64) -> Result<BreachOutcome> {
        let request = match self.store.get_request(request_id) {
            Ok(r) => r,
            Err(StoreError::NotFound { .. }) => return Ok(BreachOutcome::Missing),
            Err(e) => return Err(e.into()),
        };
        if !request.status.is_open() {
            debug!(request_id, level, "escalation: request already resolved");
            return Ok(BreachOutcome::AlreadyResolved);
        }
        let settings = self.store.get_settings()?;
        if level > settings.max_escalations {
            return Ok(BreachOutcome::AlreadyResolved);
        }

        let schedule = self.store.resolve_schedule(request.chat_id)?;
        let elapsed = working_minutes(request.received_at, Utc::now(), &schedule);
        self.create_level_alerts(request_id, request.chat_id, AlertType::Breach, level, elapsed)
    }

    /// Called by the delivery worker after a level was sent. Schedules the
    /// next escalation while the chain has levels left and the request is
    /// still unresolved.
    pub fn schedule_next_escalation(&self, request_id: i64, current_level: i64) -> Result<bool> {
        let settings = self.store.get_settings()?;
        let next = current_level + 1;
        if next > settings.max_escalations {
            debug!(request_id, "escalation chain exhausted");
            return Ok(false);
        }
        let request = self.store.get_request(request_id)?;
        if !request.status.is_open() {
            return Ok(false);
        }

        let delay_ms = (settings.escalation_interval_minutes.max(1) as u64) * 60_000;
        self.queue.enqueue(
            QUEUE_ALERTS,
            AlertJob::Escalation {
                request_id,
                level: next,
            }
            .kind(),
            &AlertJob::Escalation {
                request_id,
                level: next,
            },
            EnqueueOptions::delayed(delay_ms).with_job_id(escalation_job_id(request_id, next)),
        )?;
        info!(request_id, level = next, delay_ms, "next escalation scheduled");
        Ok(true)
    }

    /// Manager action on an alert (inline keyboard or RPC).
    ///
    /// Freezes the alert, cancels outstanding jobs for the request, closes
    /// sibling alerts with the same action, and stops the SLA timer for
    /// resolving actions.
    pub fn resolve_alert(
        &self,
        alert_id: i64,
        action: ResolvedAction,
        user_id: Option<i64>,
        notes: Option<&str>,
    ) -> Result<ResolveOutcome> {
        let alert = self.store.get_alert(alert_id)?;
        let now = Utc::now();

        if !self
            .store
            .resolve_alert_row(alert_id, action, user_id, notes, now)?
        {
            return Ok(ResolveOutcome::AlreadyResolved);
        }

        self.timers.cancel_jobs(alert.request_id)?;

        if matches!(
            action,
            ResolvedAction::MarkResolved | ResolvedAction::AccountantResponded
        ) {
            match self.timers.stop_timer(
                alert.request_id,
                StopParams {
                    responded_by: user_id,
                    response_message_id: None,
                    response_at: now,
                },
            ) {
                Ok(_) => {}
                Err(EngineError::Store(StoreError::NotFound { .. })) => {
                    warn!(alert_id, request_id = alert.request_id, "resolve: request gone");
                }
                Err(e) => return Err(e),
            }
        }

        self.store
            .resolve_open_alerts(alert.request_id, action, None, now)?;

        info!(
            alert_id,
            request_id = alert.request_id,
            action = %action,
            "alert resolved"
        );
        Ok(ResolveOutcome::Resolved)
    }

    /// Invoked by the ingest path when an accountant message resolves a
    /// request: stop the timer, cancel all delayed work, close open alerts.
    pub fn on_accountant_response(
        &self,
        request_id: i64,
        responded_by: i64,
        response_message_id: i64,
        response_at: DateTime<Utc>,
    ) -> Result<()> {
        self.timers.stop_timer(
            request_id,
            StopParams {
                responded_by: Some(responded_by),
                response_message_id: Some(response_message_id),
                response_at,
            },
        )?;
        self.store.resolve_open_alerts(
            request_id,
            ResolvedAction::AccountantResponded,
            Some(responded_by),
            Utc::now(),
        )?;
        Ok(())
    }

    /// Create one alert per recipient at the given level and queue a
    /// delivery job per alert. Conflicts mean a concurrent or replayed
    /// handler already created the row; skipped, not fatal.
    fn create_level_alerts(
        &self,
        request_id: i64,
        chat_id: i64,
        alert_type: AlertType,
        level: i64,
        elapsed: i64,
    ) -> Result<BreachOutcome> {
        let recipients = self.recipients_for(chat_id)?;
        if recipients.is_empty() {
            error!(
                request_id,
                chat_id,
                service = "alerts",
                "CRITICAL: no manager recipients configured; alert dropped"
            );
            return Ok(BreachOutcome::NoRecipients);
        }

        let mut created = 0usize;
        for manager_id in recipients {
            let alert =
                match self
                    .store
                    .create_alert(request_id, alert_type, level, elapsed, manager_id)
                {
                    Ok(a) => a,
                    Err(StoreError::Conflict(_)) => {
                        debug!(request_id, level, manager_id, "alert row already exists");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
            created += 1;
            self.queue.enqueue(
                QUEUE_ALERTS,
                AlertJob::SendAlert { alert_id: alert.id }.kind(),
                &AlertJob::SendAlert { alert_id: alert.id },
                EnqueueOptions::default().with_job_id(send_alert_job_id(alert.id)),
            )?;
        }

        info!(
            request_id,
            level,
            alert_type = %alert_type,
            created,
            "alerts created and queued"
        );
        Ok(BreachOutcome::Escalated { alerts: created })
    }

    /// Recipient fallback chain: chat managers, else global managers.
    fn recipients_for(&self, chat_id: i64) -> Result<Vec<i64>> {
        if let Some(chat) = self.store.get_chat(chat_id)? {
            if !chat.manager_ids.is_empty() {
                return Ok(chat.manager_ids);
            }
        }
        Ok(self.store.get_settings()?.global_manager_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use slabot_core::types::{Category, ChatKind, RequestStatus};
    use slabot_store::types::{ChatPatch, SettingsPatch};

    struct Fixture {
        store: Store,
        queue: QueueHandle,
        alerts: AlertService,
    }

    fn fixture() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let queue = QueueHandle::open_in_memory().unwrap();
        store
            .register_chat(
                -1,
                ChatKind::Group,
                None,
                ChatPatch {
                    manager_ids: Some(vec![1001, 1002]),
                    ..Default::default()
                },
            )
            .unwrap();
        let timers = TimerManager::new(store.clone(), queue.clone());
        let alerts = AlertService::new(store.clone(), queue.clone(), timers);
        Fixture {
            store,
            queue,
            alerts,
        }
    }

    /// A request received long enough ago that any threshold is breached.
    fn overdue_request(store: &Store) -> i64 {
        let received = Utc::now() - Duration::days(7);
        store
            .create_request(-1, 42, received, Category::Request, 0.9, "ai")
            .unwrap()
            .id
    }

    fn fresh_request(store: &Store) -> i64 {
        // Received "now": zero working minutes elapsed.
        store
            .create_request(-1, 42, Utc::now(), Category::Request, 0.9, "ai")
            .unwrap()
            .id
    }

    #[test]
    fn breach_creates_one_alert_per_manager() {
        // The handler fires past the deadline.
        let f = fixture();
        let id = overdue_request(&f.store);
        let outcome = f.alerts.on_breach_check(id).unwrap();
        assert_eq!(outcome, BreachOutcome::Escalated { alerts: 2 });

        let request = f.store.get_request(id).unwrap();
        assert!(request.sla_breached);
        assert_eq!(request.status, RequestStatus::Escalated);

        let rows = f.store.alerts_for_request(id).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|a| a.escalation_level == 0));
        // One delivery job per alert.
        assert_eq!(f.queue.pending_count(QUEUE_ALERTS).unwrap(), 2);
    }

    #[test]
    fn breach_check_is_idempotent_on_replay() {
        let f = fixture();
        let id = overdue_request(&f.store);
        f.alerts.on_breach_check(id).unwrap();
        // Replay (stalled-job redelivery): no duplicate rows.
        let outcome = f.alerts.on_breach_check(id).unwrap();
        assert_eq!(outcome, BreachOutcome::Escalated { alerts: 0 });
        assert_eq!(f.store.alerts_for_request(id).unwrap().len(), 2);
    }

    #[test]
    fn breach_check_skips_answered_requests() {
        let f = fixture();
        let id = overdue_request(&f.store);
        f.store
            .answer_request(
                id,
                &slabot_store::types::Resolution {
                    responded_by: None,
                    response_message_id: None,
                    response_at: Utc::now(),
                    elapsed_minutes: 5,
                    breached: false,
                },
            )
            .unwrap();
        assert_eq!(
            f.alerts.on_breach_check(id).unwrap(),
            BreachOutcome::AlreadyResolved
        );
        assert!(f.store.alerts_for_request(id).unwrap().is_empty());
    }

    #[test]
    fn premature_breach_check_is_rescheduled() {
        let f = fixture();
        let id = fresh_request(&f.store);
        assert_eq!(
            f.alerts.on_breach_check(id).unwrap(),
            BreachOutcome::Rescheduled
        );
        assert!(f
            .queue
            .get(QUEUE_SLA_TIMERS, &format!("sla-{id}"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn missing_request_is_not_an_error() {
        let f = fixture();
        assert_eq!(f.alerts.on_breach_check(9999).unwrap(), BreachOutcome::Missing);
    }

    #[test]
    fn no_recipients_drops_the_alert() {
        let f = fixture();
        f.store
            .update_chat(
                -1,
                ChatPatch {
                    manager_ids: Some(vec![]),
                    ..Default::default()
                },
            )
            .unwrap();
        let id = overdue_request(&f.store);
        assert_eq!(
            f.alerts.on_breach_check(id).unwrap(),
            BreachOutcome::NoRecipients
        );
    }

    #[test]
    fn global_managers_are_the_fallback() {
        let f = fixture();
        f.store
            .update_chat(
                -1,
                ChatPatch {
                    manager_ids: Some(vec![]),
                    ..Default::default()
                },
            )
            .unwrap();
        f.store
            .update_settings(SettingsPatch {
                global_manager_ids: Some(vec![5005]),
                ..Default::default()
            })
            .unwrap();
        let id = overdue_request(&f.store);
        assert_eq!(
            f.alerts.on_breach_check(id).unwrap(),
            BreachOutcome::Escalated { alerts: 1 }
        );
        let rows = f.store.alerts_for_request(id).unwrap();
        assert_eq!(rows[0].manager_telegram_id, 5005);
    }

    #[test]
    fn escalation_chain_is_bounded() {
        // Levels never exceed max_escalations + 1 distinct values.
        let f = fixture();
        let id = overdue_request(&f.store);
        f.alerts.on_breach_check(id).unwrap();

        let max = f.store.get_settings().unwrap().max_escalations;
        let mut level = 0;
        while f.alerts.schedule_next_escalation(id, level).unwrap() {
            level += 1;
            f.alerts.on_escalation(id, level).unwrap();
        }
        assert_eq!(level, max);
        assert!(!f.alerts.schedule_next_escalation(id, level).unwrap());

        let levels = f.store.escalation_levels(id).unwrap();
        assert_eq!(levels.len() as i64, max + 1);
    }

    #[test]
    fn resolve_alert_answers_the_request_and_clears_jobs() {
        // A manager taps "mark resolved" on a delivered alert.
        let f = fixture();
        let id = overdue_request(&f.store);
        f.alerts.on_breach_check(id).unwrap();
        f.alerts.schedule_next_escalation(id, 0).unwrap();

        let alert = &f.store.alerts_for_request(id).unwrap()[0];
        let outcome = f
            .alerts
            .resolve_alert(alert.id, ResolvedAction::MarkResolved, Some(1001), None)
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::Resolved);

        let request = f.store.get_request(id).unwrap();
        assert_eq!(request.status, RequestStatus::Answered);
        assert!(request.response_at.is_some());

        // Breach, warning and escalation jobs are all gone.
        assert!(f.queue.get(QUEUE_SLA_TIMERS, &format!("sla-{id}")).unwrap().is_none());
        assert!(f
            .queue
            .get(QUEUE_ALERTS, &format!("escalation-{id}-1"))
            .unwrap()
            .is_none());
        // Sibling alert closed with the same action.
        assert!(f.store.active_alerts().unwrap().is_empty());
    }

    #[test]
    fn resolve_is_rejected_on_a_frozen_alert() {
        let f = fixture();
        let id = overdue_request(&f.store);
        f.alerts.on_breach_check(id).unwrap();
        let alert = &f.store.alerts_for_request(id).unwrap()[0];
        f.alerts
            .resolve_alert(alert.id, ResolvedAction::MarkResolved, Some(1001), None)
            .unwrap();
        assert_eq!(
            f.alerts
                .resolve_alert(alert.id, ResolvedAction::AutoExpired, None, None)
                .unwrap(),
            ResolveOutcome::AlreadyResolved
        );
    }

    #[test]
    fn accountant_response_terminates_the_chain() {
        let f = fixture();
        let id = overdue_request(&f.store);
        f.alerts.on_breach_check(id).unwrap();
        f.alerts.schedule_next_escalation(id, 0).unwrap();

        f.alerts
            .on_accountant_response(id, 77, 43, Utc::now())
            .unwrap();

        let request = f.store.get_request(id).unwrap();
        assert_eq!(request.status, RequestStatus::Answered);
        assert!(f
            .queue
            .get(QUEUE_ALERTS, &format!("escalation-{id}-1"))
            .unwrap()
            .is_none());
        let rows = f.store.alerts_for_request(id).unwrap();
        assert!(rows
            .iter()
            .all(|a| a.resolved_action == Some(ResolvedAction::AccountantResponded)));
    }

    #[test]
    fn escalation_handler_exits_quietly_after_resolution() {
        let f = fixture();
        let id = overdue_request(&f.store);
        f.alerts.on_breach_check(id).unwrap();
        f.alerts.on_accountant_response(id, 77, 43, Utc::now()).unwrap();
        // The escalation job raced the cancellation and still fires.
        assert_eq!(
            f.alerts.on_escalation(id, 1).unwrap(),
            BreachOutcome::AlreadyResolved
        );
    }

    #[test]
    fn warning_check_creates_warning_alerts() {
        let f = fixture();
        let id = overdue_request(&f.store);
        let outcome = f.alerts.on_warning_check(id).unwrap();
        assert_eq!(outcome, BreachOutcome::Escalated { alerts: 2 });
        let rows = f.store.alerts_for_request(id).unwrap();
        assert!(rows.iter().all(|a| a.alert_type == AlertType::Warning));
        // A warning does not mark the request breached.
        assert!(!f.store.get_request(id).unwrap().sla_breached);
    }
}
