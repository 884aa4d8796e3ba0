use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use slabot_core::metrics::QUEUE_DEPTH;

use crate::error::Result;
use crate::handle::QueueHandle;
use crate::types::{Job, JobStatus};

/// Implemented by each queue's consumer. One handler per queue; it
/// dispatches internally on `job.kind`.
///
/// Handlers must be idempotent and re-verify preconditions on entry:
/// cancellation races execution, and an interrupted job is re-delivered
/// after a restart.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

/// Per-queue worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Maximum handlers in flight at once.
    pub concurrency: usize,
    /// Upper bound on job starts per second (the alerts pool uses ~30 to
    /// match the transport's documented limit).
    pub rate_per_sec: Option<u32>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            rate_per_sec: None,
        }
    }
}

/// Polls one named queue and dispatches due jobs to its handler.
pub struct QueueWorker {
    handle: QueueHandle,
    queue: String,
    handler: Arc<dyn JobHandler>,
    opts: WorkerOptions,
}

impl QueueWorker {
    pub fn new(
        handle: QueueHandle,
        queue: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        opts: WorkerOptions,
    ) -> Self {
        Self {
            handle,
            queue: queue.into(),
            handler,
            opts,
        }
    }

    /// Main loop. Polls every second until `shutdown` broadcasts `true`.
    /// In-flight handlers finish on their own tasks; the bounded grace
    /// period is the composition root's concern.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.handle.reset_stalled(&self.queue) {
            Ok(n) if n > 0 => warn!(queue = %self.queue, count = n, "stalled jobs reset on startup"),
            Err(e) => error!(queue = %self.queue, "stalled-job reset failed: {e}"),
            _ => {}
        }
        info!(queue = %self.queue, concurrency = self.opts.concurrency, "queue worker started");

        let semaphore = Arc::new(Semaphore::new(self.opts.concurrency));
        let min_gap = self
            .opts
            .rate_per_sec
            .map(|r| Duration::from_millis(1_000 / u64::from(r.max(1))));
        let mut last_dispatch = Instant::now() - Duration::from_secs(1);

        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&semaphore, min_gap, &mut last_dispatch).await {
                        error!(queue = %self.queue, "queue tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(queue = %self.queue, "queue worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(
        &self,
        semaphore: &Arc<Semaphore>,
        min_gap: Option<Duration>,
        last_dispatch: &mut Instant,
    ) -> Result<()> {
        if let Ok(depth) = self.handle.pending_count(&self.queue) {
            QUEUE_DEPTH.with_label_values(&[&self.queue]).set(depth);
        }

        let claimed = self.handle.claim_due(&self.queue, 32)?;
        for job in claimed {
            // Pace dispatches when the queue carries a rate limit.
            if let Some(gap) = min_gap {
                let elapsed = last_dispatch.elapsed();
                if elapsed < gap {
                    tokio::time::sleep(gap - elapsed).await;
                }
            }
            *last_dispatch = Instant::now();

            let permit = Arc::clone(semaphore)
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let handle = self.handle.clone();
            let handler = Arc::clone(&self.handler);
            let queue = self.queue.clone();
            tokio::spawn(async move {
                let _permit = permit;
                run_one(handle, queue, handler, job).await;
            });
        }
        Ok(())
    }
}

async fn run_one(handle: QueueHandle, queue: String, handler: Arc<dyn JobHandler>, job: Job) {
    let job_id = job.id.clone();
    let kind = job.kind.clone();
    let attempt = job.attempt;
    let max_attempts = job.max_attempts;
    let backoff_base_ms = job.backoff_base_ms;

    debug!(queue = %queue, job_id = %job_id, kind = %kind, attempt, "executing job");
    match handler.handle(job).await {
        Ok(()) => {
            if let Err(e) = handle.mark_completed(&queue, &job_id) {
                error!(queue = %queue, job_id = %job_id, "completion write failed: {e}");
            }
            if let Err(e) = handle.prune_terminal(&queue) {
                warn!(queue = %queue, "terminal-row pruning failed: {e}");
            }
        }
        Err(e) => {
            warn!(queue = %queue, job_id = %job_id, kind = %kind, attempt, "job failed: {e:#}");
            match handle.mark_failed_attempt(
                &queue,
                &job_id,
                attempt,
                max_attempts,
                backoff_base_ms,
                &format!("{e:#}"),
            ) {
                Ok(JobStatus::Failed) => {
                    error!(queue = %queue, job_id = %job_id, "job exhausted its attempts");
                }
                Ok(_) => {}
                Err(db_err) => {
                    error!(queue = %queue, job_id = %job_id, "failure write failed: {db_err}");
                }
            }
        }
    }
}
