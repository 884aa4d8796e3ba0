//! Startup recovery: reconcile persisted requests with queue state.
//!
//! Runs once after the queue is reachable. A request whose breach-check
//! job survived the restart is left alone; one whose job is gone gets its
//! deadline recomputed: already overdue requests escalate immediately,
//! the rest are re-scheduled at the remaining delay.

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use slabot_hours::{delay_until_breach, working_minutes};
use slabot_queue::{EnqueueOptions, QueueHandle};
use slabot_store::Store;

use crate::error::Result;
use crate::jobs::{breach_job_id, SlaJob, QUEUE_SLA_TIMERS};
use crate::timer::TimerManager;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub total_pending: usize,
    pub rescheduled: usize,
    pub breached: usize,
    pub already_active: usize,
    pub failed: usize,
}

pub fn run_recovery(
    store: &Store,
    queue: &QueueHandle,
    timers: &TimerManager,
) -> Result<RecoveryReport> {
    let pending = store.pending_with_timer()?;
    let mut report = RecoveryReport {
        total_pending: pending.len(),
        ..Default::default()
    };

    for request in pending {
        match recover_one(store, queue, timers, &request) {
            Ok(Outcome::AlreadyActive) => report.already_active += 1,
            Ok(Outcome::Rescheduled) => report.rescheduled += 1,
            Ok(Outcome::Breached) => report.breached += 1,
            Err(e) => {
                error!(request_id = request.id, "recovery failed: {e}");
                report.failed += 1;
            }
        }
    }

    info!(
        total = report.total_pending,
        rescheduled = report.rescheduled,
        breached = report.breached,
        already_active = report.already_active,
        failed = report.failed,
        "recovery complete"
    );
    Ok(report)
}

enum Outcome {
    AlreadyActive,
    Rescheduled,
    Breached,
}

fn recover_one(
    store: &Store,
    queue: &QueueHandle,
    timers: &TimerManager,
    request: &slabot_store::types::ClientRequest,
) -> Result<Outcome> {
    let job_id = breach_job_id(request.id);
    if queue.get(QUEUE_SLA_TIMERS, &job_id)?.is_some() {
        return Ok(Outcome::AlreadyActive);
    }

    let now = Utc::now();
    let schedule = store.resolve_schedule(request.chat_id)?;
    let threshold = timers.threshold_for(request.chat_id)?;
    let elapsed = working_minutes(request.received_at, now, &schedule);

    if elapsed >= threshold {
        // Deadline expired while the process was down: escalate now. The
        // breach handler re-verifies and creates the level-0 alerts.
        store.mark_escalated(request.id)?;
        queue.enqueue(
            QUEUE_SLA_TIMERS,
            SlaJob::BreachCheck {
                request_id: request.id,
            }
            .kind(),
            &SlaJob::BreachCheck {
                request_id: request.id,
            },
            EnqueueOptions::default().with_job_id(job_id).single_attempt(),
        )?;
        warn!(
            request_id = request.id,
            elapsed, threshold, "deadline expired during downtime"
        );
        return Ok(Outcome::Breached);
    }

    let delay_ms = delay_until_breach(request.received_at, threshold, now, &schedule)
        .map(|d| d.num_milliseconds().max(1_000) as u64)
        .unwrap_or(60_000);
    queue.enqueue(
        QUEUE_SLA_TIMERS,
        SlaJob::BreachCheck {
            request_id: request.id,
        }
        .kind(),
        &SlaJob::BreachCheck {
            request_id: request.id,
        },
        EnqueueOptions::delayed(delay_ms)
            .with_job_id(job_id)
            .single_attempt(),
    )?;
    Ok(Outcome::Rescheduled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use slabot_core::types::{Category, ChatKind, RequestStatus};

    fn fixture() -> (Store, QueueHandle, TimerManager) {
        let store = Store::open_in_memory().unwrap();
        let queue = QueueHandle::open_in_memory().unwrap();
        store.ensure_chat(-1, ChatKind::Group, None).unwrap();
        let timers = TimerManager::new(store.clone(), queue.clone());
        (store, queue, timers)
    }

    fn request_with_timer(store: &Store, message_id: i64, age: Duration) -> i64 {
        let received = Utc::now() - age;
        let r = store
            .create_request(-1, message_id, received, Category::Request, 0.9, "ai")
            .unwrap();
        store.set_timer_started(r.id, received).unwrap();
        r.id
    }

    #[test]
    fn expired_deadline_escalates_immediately() {
        // Elapsed working minutes exceed the threshold and the queue lost
        // the job during the crash.
        let (store, queue, timers) = fixture();
        let id = request_with_timer(&store, 1, Duration::days(7));

        let report = run_recovery(&store, &queue, &timers).unwrap();
        assert_eq!(report.total_pending, 1);
        assert_eq!(report.breached, 1);

        let request = store.get_request(id).unwrap();
        assert!(request.sla_breached);
        assert_eq!(request.status, RequestStatus::Escalated);
        // An immediate breach-check was queued.
        assert!(queue
            .get(QUEUE_SLA_TIMERS, &format!("sla-{id}"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn fresh_request_is_rescheduled() {
        let (store, queue, timers) = fixture();
        let id = request_with_timer(&store, 1, Duration::minutes(1));

        let report = run_recovery(&store, &queue, &timers).unwrap();
        assert_eq!(report.rescheduled, 1);
        assert!(queue
            .get(QUEUE_SLA_TIMERS, &format!("sla-{id}"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn surviving_jobs_are_left_alone() {
        let (store, queue, timers) = fixture();
        let id = request_with_timer(&store, 1, Duration::minutes(1));
        timers.start_timer(id, -1, None).unwrap();

        let report = run_recovery(&store, &queue, &timers).unwrap();
        assert_eq!(report.already_active, 1);
        assert_eq!(report.rescheduled, 0);
    }

    #[test]
    fn requests_without_timers_are_out_of_scope() {
        let (store, queue, timers) = fixture();
        store
            .create_request(-1, 1, Utc::now(), Category::Request, 0.9, "ai")
            .unwrap();
        let report = run_recovery(&store, &queue, &timers).unwrap();
        assert_eq!(report.total_pending, 0);
    }
}
