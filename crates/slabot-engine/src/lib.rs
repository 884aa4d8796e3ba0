//! `slabot-engine` — SLA timers, escalation, recovery and retention.
//!
//! The engine sits between the stores and the durable queue: the timer
//! manager schedules breach/warning checks, the alert service turns fired
//! checks into escalation chains, recovery reconciles persisted requests
//! with queue state after a restart, and the retention sweep prunes
//! history past the configured horizon.
//!
//! Every queue handler here is idempotent and re-verifies request status
//! on entry: cancellation is best-effort and races execution.

pub mod alerts;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod recovery;
pub mod retention;
pub mod timer;

pub use alerts::{AlertService, BreachOutcome, ResolveOutcome};
pub use error::{EngineError, Result};
pub use handlers::{RetentionHandler, SlaTimerHandler};
pub use jobs::{AlertJob, RetentionJob, SlaJob, QUEUE_ALERTS, QUEUE_RETENTION, QUEUE_SLA_TIMERS};
pub use recovery::{run_recovery, RecoveryReport};
pub use retention::{RetentionSweeper, SweepReport};
pub use timer::{SlaStatus, StopOutcome, StopParams, TimerManager};
