//! SLA timer manager: start, stop, pause, resume, status.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use slabot_core::types::RequestStatus;
use slabot_hours::{delay_until_breach, working_minutes};
use slabot_queue::{EnqueueOptions, QueueHandle};
use slabot_store::types::Resolution;
use slabot_store::Store;

use crate::error::{EngineError, Result};
use crate::jobs::{
    breach_job_id, escalation_job_id, warning_job_id, SlaJob, QUEUE_ALERTS, QUEUE_SLA_TIMERS,
};

#[derive(Clone)]
pub struct TimerManager {
    store: Store,
    queue: QueueHandle,
}

/// Inputs to [`TimerManager::stop_timer`].
#[derive(Debug, Clone)]
pub struct StopParams {
    pub responded_by: Option<i64>,
    pub response_message_id: Option<i64>,
    pub response_at: DateTime<Utc>,
}

/// Outcome of a stop. Stopping twice reports `AlreadyStopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { elapsed_minutes: i64, breached: bool },
    AlreadyStopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlaStatus {
    pub request_id: i64,
    pub elapsed_working_minutes: i64,
    pub remaining_minutes: i64,
    pub threshold_minutes: i64,
    pub breached: bool,
    pub timer_started_at: Option<DateTime<Utc>>,
}

impl TimerManager {
    pub fn new(store: Store, queue: QueueHandle) -> Self {
        Self { store, queue }
    }

    /// Start the SLA timer for a pending request: snapshot the start
    /// instant and schedule the breach check (and, when configured, the
    /// warning check) through the durable queue.
    ///
    /// `threshold_minutes` overrides the chat's configured threshold.
    pub fn start_timer(
        &self,
        request_id: i64,
        chat_id: i64,
        threshold_minutes: Option<i64>,
    ) -> Result<()> {
        let request = self.store.get_request(request_id)?;
        if request.status != RequestStatus::Pending {
            return Err(EngineError::InvalidState(format!(
                "request {request_id} is {}, expected pending",
                request.status
            )));
        }

        let now = Utc::now();
        let threshold = match threshold_minutes {
            Some(t) => t,
            None => self.threshold_for(chat_id)?,
        };
        let schedule = self.store.resolve_schedule(chat_id)?;

        self.store.set_timer_started(request_id, now)?;

        let delay = delay_until_breach(request.received_at, threshold, now, &schedule)
            .unwrap_or_else(|| {
                warn!(
                    request_id,
                    chat_id, "schedule has no reachable working time; using wall-clock delay"
                );
                (request.received_at + Duration::minutes(threshold) - now).max(Duration::zero())
            });

        // Single attempt: a missed check is re-scheduled by the handler,
        // never retried blindly.
        self.queue.enqueue(
            QUEUE_SLA_TIMERS,
            SlaJob::BreachCheck { request_id }.kind(),
            &SlaJob::BreachCheck { request_id },
            EnqueueOptions::delayed(delay.num_milliseconds().max(0) as u64)
                .with_job_id(breach_job_id(request_id))
                .single_attempt(),
        )?;

        let settings = self.store.get_settings()?;
        if (1..100).contains(&settings.warning_percent) {
            let warning_threshold = threshold * settings.warning_percent / 100;
            if warning_threshold > 0 {
                let warn_delay =
                    delay_until_breach(request.received_at, warning_threshold, now, &schedule)
                        .unwrap_or_else(|| {
                            (request.received_at + Duration::minutes(warning_threshold) - now)
                                .max(Duration::zero())
                        });
                self.queue.enqueue(
                    QUEUE_SLA_TIMERS,
                    SlaJob::WarningCheck { request_id }.kind(),
                    &SlaJob::WarningCheck { request_id },
                    EnqueueOptions::delayed(warn_delay.num_milliseconds().max(0) as u64)
                        .with_job_id(warning_job_id(request_id))
                        .single_attempt(),
                )?;
            }
        }

        info!(
            request_id,
            chat_id,
            threshold,
            delay_ms = delay.num_milliseconds(),
            "sla timer started"
        );
        Ok(())
    }

    /// Stop the timer and resolve the request. Cancels the breach, warning
    /// and any escalation jobs; all cancellations are best-effort.
    pub fn stop_timer(&self, request_id: i64, params: StopParams) -> Result<StopOutcome> {
        self.cancel_jobs(request_id)?;

        let request = self.store.get_request(request_id)?;
        if !request.status.is_open() {
            debug!(request_id, "stop for an already-stopped timer");
            return Ok(StopOutcome::AlreadyStopped);
        }

        let schedule = self.store.resolve_schedule(request.chat_id)?;
        let threshold = self.threshold_for(request.chat_id)?;
        let elapsed = working_minutes(request.received_at, params.response_at, &schedule);
        let breached = elapsed >= threshold;

        let updated = self.store.answer_request(
            request_id,
            &Resolution {
                responded_by: params.responded_by,
                response_message_id: params.response_message_id,
                response_at: params.response_at,
                elapsed_minutes: elapsed,
                breached,
            },
        )?;
        if !updated {
            return Ok(StopOutcome::AlreadyStopped);
        }

        info!(request_id, elapsed, breached, "sla timer stopped");
        Ok(StopOutcome::Stopped {
            elapsed_minutes: elapsed,
            breached,
        })
    }

    /// Record a pause and cancel the scheduled checks. Reserved for the
    /// explicit "waiting on client" transition.
    pub fn pause_timer(&self, request_id: i64) -> Result<bool> {
        let paused = self.store.pause_timer_row(request_id, Utc::now())?;
        if paused {
            self.queue.cancel(QUEUE_SLA_TIMERS, &breach_job_id(request_id))?;
            self.queue.cancel(QUEUE_SLA_TIMERS, &warning_job_id(request_id))?;
            info!(request_id, "sla timer paused");
        }
        Ok(paused)
    }

    /// Clear the pause and re-schedule the breach check as a cancel-then-
    /// schedule pair; a stale job under the same id is replaced or
    /// coalesced either way.
    pub fn resume_timer(&self, request_id: i64) -> Result<bool> {
        let resumed = self.store.resume_timer_row(request_id)?;
        if !resumed {
            return Ok(false);
        }
        let request = self.store.get_request(request_id)?;
        self.queue.cancel(QUEUE_SLA_TIMERS, &breach_job_id(request_id))?;
        let threshold = self.threshold_for(request.chat_id)?;
        let schedule = self.store.resolve_schedule(request.chat_id)?;
        let now = Utc::now();
        let delay = delay_until_breach(request.received_at, threshold, now, &schedule)
            .unwrap_or_else(Duration::zero);
        self.queue.enqueue(
            QUEUE_SLA_TIMERS,
            SlaJob::BreachCheck { request_id }.kind(),
            &SlaJob::BreachCheck { request_id },
            EnqueueOptions::delayed(delay.num_milliseconds().max(0) as u64)
                .with_job_id(breach_job_id(request_id))
                .single_attempt(),
        )?;
        info!(request_id, "sla timer resumed");
        Ok(true)
    }

    pub fn sla_status(&self, request_id: i64) -> Result<SlaStatus> {
        let request = self.store.get_request(request_id)?;
        let threshold = self.threshold_for(request.chat_id)?;
        let schedule = self.store.resolve_schedule(request.chat_id)?;

        let elapsed = match request.response_at {
            Some(answered_at) => working_minutes(request.received_at, answered_at, &schedule),
            None => working_minutes(request.received_at, Utc::now(), &schedule),
        };
        Ok(SlaStatus {
            request_id,
            elapsed_working_minutes: elapsed,
            remaining_minutes: (threshold - elapsed).max(0),
            threshold_minutes: threshold,
            breached: request.sla_breached || elapsed >= threshold,
            timer_started_at: request.sla_timer_started_at,
        })
    }

    /// Cancel the breach/warning checks and every possible escalation job
    /// for a request. False returns are expected and ignored.
    pub fn cancel_jobs(&self, request_id: i64) -> Result<()> {
        self.queue.cancel(QUEUE_SLA_TIMERS, &breach_job_id(request_id))?;
        self.queue.cancel(QUEUE_SLA_TIMERS, &warning_job_id(request_id))?;
        let max = self.store.get_settings()?.max_escalations;
        for level in 1..=max {
            self.queue
                .cancel(QUEUE_ALERTS, &escalation_job_id(request_id, level))?;
        }
        Ok(())
    }

    /// Effective threshold: the chat's setting, else the global default.
    pub fn threshold_for(&self, chat_id: i64) -> Result<i64> {
        match self.store.get_chat(chat_id)? {
            Some(chat) => Ok(chat.sla_threshold_minutes),
            None => Ok(self.store.get_settings()?.sla_threshold_minutes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use slabot_core::types::{Category, ChatKind};
    use slabot_queue::JobStatus;

    fn setup() -> (Store, QueueHandle, TimerManager) {
        let store = Store::open_in_memory().unwrap();
        let queue = QueueHandle::open_in_memory().unwrap();
        store.ensure_chat(-1, ChatKind::Group, None).unwrap();
        let timers = TimerManager::new(store.clone(), queue.clone());
        (store, queue, timers)
    }

    fn received() -> DateTime<Utc> {
        // Tuesday 10:00 Moscow time.
        chrono_tz::Europe::Moscow
            .with_ymd_and_hms(2025, 3, 4, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn make_request(store: &Store) -> i64 {
        store
            .create_request(-1, 42, received(), Category::Request, 0.9, "ai")
            .unwrap()
            .id
    }

    #[test]
    fn start_schedules_breach_and_warning() {
        let (store, queue, timers) = setup();
        let id = make_request(&store);
        timers.start_timer(id, -1, Some(60)).unwrap();

        let breach = queue.get(QUEUE_SLA_TIMERS, &format!("sla-{id}")).unwrap();
        let warning = queue.get(QUEUE_SLA_TIMERS, &format!("sla-warn-{id}")).unwrap();
        assert!(breach.is_some());
        assert!(warning.is_some());
        assert_eq!(breach.unwrap().max_attempts, 1);

        let request = store.get_request(id).unwrap();
        assert!(request.sla_timer_started_at.is_some());
    }

    #[test]
    fn start_requires_pending_state() {
        let (store, _queue, timers) = setup();
        let id = make_request(&store);
        store
            .answer_request(
                id,
                &Resolution {
                    responded_by: None,
                    response_message_id: None,
                    response_at: received(),
                    elapsed_minutes: 0,
                    breached: false,
                },
            )
            .unwrap();
        assert!(matches!(
            timers.start_timer(id, -1, Some(60)),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn repeated_start_coalesces_on_the_job_id() {
        let (store, queue, timers) = setup();
        let id = make_request(&store);
        timers.start_timer(id, -1, Some(60)).unwrap();
        // The request stays pending, so a second start finds the live job
        // under the same id and keeps it.
        timers.start_timer(id, -1, Some(60)).unwrap();
        assert_eq!(queue.pending_count(QUEUE_SLA_TIMERS).unwrap(), 2);
    }

    #[test]
    fn stop_resolves_and_cancels() {
        // Response after 45 working minutes: answered, no breach.
        let (store, queue, timers) = setup();
        let id = make_request(&store);
        timers.start_timer(id, -1, Some(60)).unwrap();

        let outcome = timers
            .stop_timer(
                id,
                StopParams {
                    responded_by: Some(77),
                    response_message_id: Some(43),
                    response_at: received() + Duration::minutes(45),
                },
            )
            .unwrap();
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                elapsed_minutes: 45,
                breached: false
            }
        );

        // No pending timer jobs remain after a resolution.
        assert!(queue.get(QUEUE_SLA_TIMERS, &format!("sla-{id}")).unwrap().is_none());
        assert!(queue
            .get(QUEUE_SLA_TIMERS, &format!("sla-warn-{id}"))
            .unwrap()
            .is_none());

        let request = store.get_request(id).unwrap();
        assert_eq!(request.status, RequestStatus::Answered);
        assert_eq!(request.response_time_minutes, Some(45));
        assert!(!request.sla_breached);
    }

    #[test]
    fn second_stop_reports_already_stopped() {
        let (store, _queue, timers) = setup();
        let id = make_request(&store);
        timers.start_timer(id, -1, Some(60)).unwrap();

        let params = StopParams {
            responded_by: Some(77),
            response_message_id: None,
            response_at: received() + Duration::minutes(30),
        };
        assert!(matches!(
            timers.stop_timer(id, params.clone()).unwrap(),
            StopOutcome::Stopped { .. }
        ));
        assert_eq!(
            timers.stop_timer(id, params).unwrap(),
            StopOutcome::AlreadyStopped
        );
        assert_eq!(
            store.get_request(id).unwrap().response_time_minutes,
            Some(30)
        );
    }

    #[test]
    fn late_stop_marks_breached() {
        let (store, _queue, timers) = setup();
        let id = make_request(&store);
        timers.start_timer(id, -1, Some(60)).unwrap();
        let outcome = timers
            .stop_timer(
                id,
                StopParams {
                    responded_by: None,
                    response_message_id: None,
                    response_at: received() + Duration::minutes(90),
                },
            )
            .unwrap();
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                elapsed_minutes: 90,
                breached: true
            }
        );
        assert!(store.get_request(id).unwrap().sla_breached);
    }

    #[test]
    fn pause_cancels_and_resume_reschedules() {
        let (store, queue, timers) = setup();
        let id = make_request(&store);
        timers.start_timer(id, -1, Some(60)).unwrap();

        assert!(timers.pause_timer(id).unwrap());
        assert!(queue.get(QUEUE_SLA_TIMERS, &format!("sla-{id}")).unwrap().is_none());
        assert_eq!(
            store.get_request(id).unwrap().status,
            RequestStatus::WaitingClient
        );

        assert!(timers.resume_timer(id).unwrap());
        let job = queue
            .get(QUEUE_SLA_TIMERS, &format!("sla-{id}"))
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn status_reports_remaining_budget() {
        let (store, _queue, timers) = setup();
        let id = make_request(&store);
        timers.start_timer(id, -1, Some(60)).unwrap();
        let status = timers.sla_status(id).unwrap();
        assert_eq!(status.threshold_minutes, 60);
        assert!(status.timer_started_at.is_some());
    }
}
