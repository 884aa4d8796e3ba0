//! Data-retention sweep: a self-rescheduling daily job on the
//! `data-retention` queue.
//!
//! Past the configured horizon, message-log rows and terminal requests are
//! deleted, resolved alerts are pruned, and alerts that out-lived the
//! horizon unresolved are expired as `auto_expired`. Expired
//! classification-cache rows go with them.

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use slabot_classifier::ClassificationCache;
use slabot_queue::{EnqueueOptions, QueueHandle};
use slabot_store::Store;

use crate::error::Result;
use crate::jobs::{RetentionJob, QUEUE_RETENTION};

const SWEEP_INTERVAL_MS: u64 = 24 * 60 * 60 * 1_000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub messages_pruned: usize,
    pub requests_pruned: usize,
    pub alerts_pruned: usize,
    pub alerts_expired: usize,
    pub cache_pruned: usize,
}

#[derive(Clone)]
pub struct RetentionSweeper {
    store: Store,
    queue: QueueHandle,
    cache: Option<ClassificationCache>,
}

impl RetentionSweeper {
    pub fn new(store: Store, queue: QueueHandle, cache: Option<ClassificationCache>) -> Self {
        Self {
            store,
            queue,
            cache,
        }
    }

    /// Enqueue the first sweep shortly after startup. The stable job id
    /// coalesces with a pending job left over from the previous run.
    pub fn schedule_initial(&self) -> Result<()> {
        self.queue.enqueue(
            QUEUE_RETENTION,
            RetentionJob::Sweep.kind(),
            &RetentionJob::Sweep,
            EnqueueOptions::delayed(60_000).with_job_id(RetentionJob::JOB_ID),
        )?;
        Ok(())
    }

    /// Run one sweep, then re-schedule tomorrow's.
    pub fn sweep(&self) -> Result<SweepReport> {
        let settings = self.store.get_settings()?;
        let cutoff = Utc::now() - Duration::days(settings.retention_days.max(1));

        let report = SweepReport {
            alerts_expired: self.store.expire_alerts_before(cutoff)?,
            alerts_pruned: self.store.prune_alerts_before(cutoff)?,
            requests_pruned: self.store.prune_requests_before(cutoff)?,
            messages_pruned: self.store.prune_messages_before(cutoff)?,
            cache_pruned: match &self.cache {
                Some(cache) => cache.prune_expired().unwrap_or_else(|e| {
                    warn!("cache prune failed: {e}");
                    0
                }),
                None => 0,
            },
        };

        self.queue.enqueue(
            QUEUE_RETENTION,
            RetentionJob::Sweep.kind(),
            &RetentionJob::Sweep,
            EnqueueOptions::delayed(SWEEP_INTERVAL_MS).with_job_id(RetentionJob::JOB_ID),
        )?;

        info!(
            messages = report.messages_pruned,
            requests = report.requests_pruned,
            alerts = report.alerts_pruned,
            expired = report.alerts_expired,
            cache = report.cache_pruned,
            "retention sweep complete"
        );
        Ok(report)
    }
}
