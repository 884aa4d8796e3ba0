//! Queue handler adapters for the `sla-timers` and `data-retention`
//! queues. The `alerts` queue handler lives with the transport (it needs
//! the bot to render and send); it calls back into [`crate::AlertService`].

use async_trait::async_trait;
use tracing::info;

use slabot_queue::{Job, JobHandler};

use crate::alerts::AlertService;
use crate::jobs::SlaJob;
use crate::retention::RetentionSweeper;

/// Dispatches breach and warning checks.
pub struct SlaTimerHandler {
    alerts: AlertService,
}

impl SlaTimerHandler {
    pub fn new(alerts: AlertService) -> Self {
        Self { alerts }
    }
}

#[async_trait]
impl JobHandler for SlaTimerHandler {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        let payload: SlaJob = job.parse_payload()?;
        match payload {
            SlaJob::BreachCheck { request_id } => {
                let outcome = self.alerts.on_breach_check(request_id)?;
                info!(request_id, job_id = %job.id, ?outcome, "breach check handled");
            }
            SlaJob::WarningCheck { request_id } => {
                let outcome = self.alerts.on_warning_check(request_id)?;
                info!(request_id, job_id = %job.id, ?outcome, "warning check handled");
            }
        }
        Ok(())
    }
}

/// Runs the daily retention sweep.
pub struct RetentionHandler {
    sweeper: RetentionSweeper,
}

impl RetentionHandler {
    pub fn new(sweeper: RetentionSweeper) -> Self {
        Self { sweeper }
    }
}

#[async_trait]
impl JobHandler for RetentionHandler {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        let report = self.sweeper.sweep()?;
        info!(job_id = %job.id, ?report, "retention sweep handled");
        Ok(())
    }
}
