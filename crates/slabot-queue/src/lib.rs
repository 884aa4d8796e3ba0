//! `slabot-queue` — durable, named, deduplicated delayed jobs over SQLite.
//!
//! # Overview
//!
//! Jobs are persisted to a `queue_jobs` table keyed by `(queue, job_id)`.
//! A [`worker::QueueWorker`] polls its queue every second and dispatches
//! due jobs to a [`worker::JobHandler`] under a concurrency cap and an
//! optional rate limit. Failed jobs retry with exponential backoff until
//! `max_attempts` is exhausted.
//!
//! # Guarantees
//!
//! | Property        | Behaviour                                              |
//! |-----------------|--------------------------------------------------------|
//! | Durability      | Jobs survive restarts; `running` rows are reset to `pending` at worker startup |
//! | Deduplication   | A duplicate `job_id` keeps the existing live job; terminal rows are replaced |
//! | Cancellation    | Best-effort: only `pending` jobs cancel, racing execution loses |
//! | Retry           | Default 3 attempts, exponential backoff base 1 s       |
//! | Retention       | Completed rows capped at 100, failed at 1000 per queue |

pub mod db;
pub mod error;
pub mod handle;
pub mod types;
pub mod worker;

pub use error::{QueueError, Result};
pub use handle::QueueHandle;
pub use types::{EnqueueOptions, EnqueueOutcome, Job, JobStatus};
pub use worker::{JobHandler, QueueWorker, WorkerOptions};
