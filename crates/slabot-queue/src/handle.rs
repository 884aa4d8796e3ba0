use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{QueueError, Result};
use crate::types::{EnqueueOptions, EnqueueOutcome, Job, JobStatus};

/// Shared handle for job management while workers run.
///
/// Clones share one `Connection`; producers (timer manager, alert service,
/// RPC handlers) and the polling workers all go through the same handle.
#[derive(Clone)]
pub struct QueueHandle {
    conn: Arc<Mutex<Connection>>,
}

impl QueueHandle {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a job. A duplicate `job_id` keeps the existing job while it is
    /// still live (`pending`/`running`); terminal rows are replaced so a
    /// stable id can be re-used after completion.
    pub fn enqueue<P: serde::Serialize>(
        &self,
        queue: &str,
        kind: &str,
        payload: &P,
        opts: EnqueueOptions,
    ) -> Result<EnqueueOutcome> {
        let id = opts
            .job_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let run_at = (now + Duration::milliseconds(opts.delay_ms as i64)).to_rfc3339();
        let payload_json = serde_json::to_string(payload)?;

        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO queue_jobs
             (queue, id, kind, payload, status, run_at, attempt, max_attempts,
              backoff_base_ms, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 0, ?6, ?7, NULL, ?8, ?8)",
            params![
                queue,
                id,
                kind,
                payload_json,
                run_at,
                opts.max_attempts,
                opts.backoff_base_ms as i64,
                now_str,
            ],
        )?;

        if inserted == 0 {
            // Replace only if the existing row already reached a terminal
            // state; live jobs coalesce with the duplicate enqueue.
            let replaced = conn.execute(
                "UPDATE queue_jobs
                 SET kind = ?3, payload = ?4, status = 'pending', run_at = ?5,
                     attempt = 0, max_attempts = ?6, backoff_base_ms = ?7,
                     last_error = NULL, updated_at = ?8
                 WHERE queue = ?1 AND id = ?2 AND status IN ('completed','failed')",
                params![
                    queue,
                    id,
                    kind,
                    payload_json,
                    run_at,
                    opts.max_attempts,
                    opts.backoff_base_ms as i64,
                    now_str,
                ],
            )?;
            drop(conn);
            let job = self.get(queue, &id)?.ok_or_else(|| QueueError::JobNotFound {
                queue: queue.to_string(),
                id: id.clone(),
            })?;
            return Ok(if replaced > 0 {
                debug!(queue, job_id = %id, "terminal job replaced");
                EnqueueOutcome::Created(job)
            } else {
                debug!(queue, job_id = %id, "duplicate enqueue coalesced");
                EnqueueOutcome::Existing(job)
            });
        }

        drop(conn);
        info!(queue, job_id = %id, kind, "job enqueued");
        let job = self.get(queue, &id)?.ok_or_else(|| QueueError::JobNotFound {
            queue: queue.to_string(),
            id: id.clone(),
        })?;
        Ok(EnqueueOutcome::Created(job))
    }

    /// Best-effort cancel. Only `pending` jobs can be cancelled; a job that
    /// is running, finished or absent returns `false`.
    pub fn cancel(&self, queue: &str, job_id: &str) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM queue_jobs WHERE queue = ?1 AND id = ?2 AND status = 'pending'",
            params![queue, job_id],
        )?;
        if n > 0 {
            debug!(queue, job_id, "job cancelled");
        }
        Ok(n > 0)
    }

    pub fn get(&self, queue: &str, job_id: &str) -> Result<Option<Job>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT queue, id, kind, payload, status, run_at, attempt, max_attempts,
                    backoff_base_ms, last_error, created_at, updated_at
             FROM queue_jobs WHERE queue = ?1 AND id = ?2",
            params![queue, job_id],
            row_to_job,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    /// Jobs still waiting in one queue, for the depth gauge.
    pub fn pending_count(&self, queue: &str) -> Result<i64> {
        let conn = self.conn();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM queue_jobs WHERE queue = ?1 AND status = 'pending'",
            params![queue],
            |row| row.get(0),
        )?)
    }

    // --- worker-side operations --------------------------------------------

    /// Reset `running` rows (crash leftovers) to `pending`; an interrupted
    /// handler is safe to re-run.
    pub(crate) fn reset_stalled(&self, queue: &str) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE queue_jobs SET status = 'pending', updated_at = ?2
             WHERE queue = ?1 AND status = 'running'",
            params![queue, Utc::now().to_rfc3339()],
        )?;
        Ok(n)
    }

    /// Claim up to `limit` due jobs, marking them `running` and bumping the
    /// attempt counter.
    pub(crate) fn claim_due(&self, queue: &str, limit: usize) -> Result<Vec<Job>> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let due: Vec<Job> = {
            let mut stmt = conn.prepare_cached(
                "SELECT queue, id, kind, payload, status, run_at, attempt, max_attempts,
                        backoff_base_ms, last_error, created_at, updated_at
                 FROM queue_jobs
                 WHERE queue = ?1 AND status = 'pending' AND run_at <= ?2
                 ORDER BY run_at LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![queue, now, limit as i64], row_to_job)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut claimed = Vec::with_capacity(due.len());
        for mut job in due {
            let n = conn.execute(
                "UPDATE queue_jobs SET status = 'running', attempt = attempt + 1, updated_at = ?3
                 WHERE queue = ?1 AND id = ?2 AND status = 'pending'",
                params![queue, job.id, now],
            )?;
            if n > 0 {
                job.status = JobStatus::Running;
                job.attempt += 1;
                claimed.push(job);
            }
        }
        Ok(claimed)
    }

    pub(crate) fn mark_completed(&self, queue: &str, job_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE queue_jobs SET status = 'completed', updated_at = ?3
             WHERE queue = ?1 AND id = ?2",
            params![queue, job_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record a failed attempt: re-schedule with exponential backoff while
    /// attempts remain, otherwise mark the job failed.
    pub(crate) fn mark_failed_attempt(
        &self,
        queue: &str,
        job_id: &str,
        attempt: u32,
        max_attempts: u32,
        backoff_base_ms: u64,
        error: &str,
    ) -> Result<JobStatus> {
        let now = Utc::now();
        let conn = self.conn();
        if attempt >= max_attempts {
            conn.execute(
                "UPDATE queue_jobs SET status = 'failed', last_error = ?3, updated_at = ?4
                 WHERE queue = ?1 AND id = ?2",
                params![queue, job_id, error, now.to_rfc3339()],
            )?;
            return Ok(JobStatus::Failed);
        }
        let backoff_ms = backoff_base_ms.saturating_mul(1_u64 << (attempt.saturating_sub(1)).min(16));
        let run_at = (now + Duration::milliseconds(backoff_ms as i64)).to_rfc3339();
        conn.execute(
            "UPDATE queue_jobs SET status = 'pending', run_at = ?3, last_error = ?4, updated_at = ?5
             WHERE queue = ?1 AND id = ?2",
            params![queue, job_id, run_at, error, now.to_rfc3339()],
        )?;
        Ok(JobStatus::Pending)
    }

    /// Cap retained terminal rows: 100 completed, 1000 failed per queue.
    pub(crate) fn prune_terminal(&self, queue: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM queue_jobs
             WHERE queue = ?1 AND status = 'completed' AND rowid NOT IN (
                 SELECT rowid FROM queue_jobs
                 WHERE queue = ?1 AND status = 'completed'
                 ORDER BY updated_at DESC LIMIT 100)",
            params![queue],
        )?;
        conn.execute(
            "DELETE FROM queue_jobs
             WHERE queue = ?1 AND status = 'failed' AND rowid NOT IN (
                 SELECT rowid FROM queue_jobs
                 WHERE queue = ?1 AND status = 'failed'
                 ORDER BY updated_at DESC LIMIT 1000)",
            params![queue],
        )?;
        Ok(())
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(4)?;
    Ok(Job {
        queue: row.get(0)?,
        id: row.get(1)?,
        kind: row.get(2)?,
        payload: row.get(3)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
        })?,
        run_at: row.get(5)?,
        attempt: row.get(6)?,
        max_attempts: row.get(7)?,
        backoff_base_ms: row.get::<_, i64>(8)? as u64,
        last_error: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle() -> QueueHandle {
        QueueHandle::open_in_memory().unwrap()
    }

    #[test]
    fn enqueue_and_get() {
        let q = handle();
        let out = q
            .enqueue(
                "sla-timers",
                "breach-check",
                &json!({"request_id": 1}),
                EnqueueOptions::delayed(5_000).with_job_id("sla-1"),
            )
            .unwrap();
        assert!(matches!(out, EnqueueOutcome::Created(_)));
        let job = q.get("sla-timers", "sla-1").unwrap().unwrap();
        assert_eq!(job.kind, "breach-check");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_attempts, 3);
    }

    #[test]
    fn duplicate_live_job_coalesces() {
        let q = handle();
        let opts = || EnqueueOptions::delayed(60_000).with_job_id("sla-1");
        q.enqueue("sla-timers", "breach-check", &json!({}), opts())
            .unwrap();
        let second = q
            .enqueue("sla-timers", "breach-check", &json!({}), opts())
            .unwrap();
        assert!(matches!(second, EnqueueOutcome::Existing(_)));
    }

    #[test]
    fn terminal_job_is_replaced() {
        let q = handle();
        q.enqueue("data-retention", "sweep", &json!({}), EnqueueOptions::default().with_job_id("retention-sweep"))
            .unwrap();
        q.mark_completed("data-retention", "retention-sweep").unwrap();
        let again = q
            .enqueue(
                "data-retention",
                "sweep",
                &json!({}),
                EnqueueOptions::delayed(1_000).with_job_id("retention-sweep"),
            )
            .unwrap();
        assert!(matches!(again, EnqueueOutcome::Created(_)));
        assert_eq!(again.job().status, JobStatus::Pending);
        assert_eq!(again.job().attempt, 0);
    }

    #[test]
    fn cancel_is_best_effort() {
        let q = handle();
        q.enqueue("sla-timers", "breach-check", &json!({}), EnqueueOptions::delayed(60_000).with_job_id("sla-9"))
            .unwrap();
        assert!(q.cancel("sla-timers", "sla-9").unwrap());
        // Already gone: false, not an error.
        assert!(!q.cancel("sla-timers", "sla-9").unwrap());
        // Unknown id: false.
        assert!(!q.cancel("sla-timers", "nope").unwrap());
    }

    #[test]
    fn claim_marks_running_and_counts_attempts() {
        let q = handle();
        q.enqueue("alerts", "send-alert", &json!({}), EnqueueOptions::default().with_job_id("a-1"))
            .unwrap();
        let claimed = q.claim_due("alerts", 10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempt, 1);
        assert_eq!(claimed[0].status, JobStatus::Running);
        // Running jobs are not re-claimed.
        assert!(q.claim_due("alerts", 10).unwrap().is_empty());
        // And cannot be cancelled.
        assert!(!q.cancel("alerts", "a-1").unwrap());
    }

    #[test]
    fn delayed_jobs_are_not_due_yet() {
        let q = handle();
        q.enqueue("alerts", "send-alert", &json!({}), EnqueueOptions::delayed(60_000))
            .unwrap();
        assert!(q.claim_due("alerts", 10).unwrap().is_empty());
        assert_eq!(q.pending_count("alerts").unwrap(), 1);
    }

    #[test]
    fn failed_attempt_backs_off_then_fails() {
        let q = handle();
        q.enqueue("alerts", "send-alert", &json!({}), EnqueueOptions::default().with_job_id("a-1"))
            .unwrap();

        let claimed = q.claim_due("alerts", 10).unwrap();
        let job = &claimed[0];
        let status = q
            .mark_failed_attempt("alerts", &job.id, job.attempt, job.max_attempts, job.backoff_base_ms, "boom")
            .unwrap();
        assert_eq!(status, JobStatus::Pending);

        // Exhaust the remaining attempts.
        let status = q
            .mark_failed_attempt("alerts", &job.id, 3, job.max_attempts, job.backoff_base_ms, "boom")
            .unwrap();
        assert_eq!(status, JobStatus::Failed);
        let stored = q.get("alerts", &job.id).unwrap().unwrap();
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn single_attempt_jobs_fail_immediately() {
        let q = handle();
        q.enqueue(
            "sla-timers",
            "breach-check",
            &json!({}),
            EnqueueOptions::default().with_job_id("sla-1").single_attempt(),
        )
        .unwrap();
        let claimed = q.claim_due("sla-timers", 10).unwrap();
        let job = &claimed[0];
        let status = q
            .mark_failed_attempt("sla-timers", &job.id, job.attempt, job.max_attempts, job.backoff_base_ms, "boom")
            .unwrap();
        assert_eq!(status, JobStatus::Failed);
    }

    #[test]
    fn stalled_running_rows_reset() {
        let q = handle();
        q.enqueue("alerts", "send-alert", &json!({}), EnqueueOptions::default().with_job_id("a-1"))
            .unwrap();
        q.claim_due("alerts", 10).unwrap();
        assert_eq!(q.reset_stalled("alerts").unwrap(), 1);
        let job = q.get("alerts", "a-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }
}
