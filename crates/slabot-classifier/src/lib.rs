//! `slabot-classifier` — the message classification cascade.
//!
//! `classify(text)` never fails; it walks a cascade and the last step is a
//! deterministic keyword fallback:
//!
//! 1. content-addressed cache (SQLite, TTL from settings)
//! 2. AI chat-completions call, guarded by a circuit breaker
//! 3. keyword regex rules (priority REQUEST > SPAM/GRATITUDE > CLARIFICATION)
//! 4. conflict resolution + safety promotion toward REQUEST

pub mod ai;
pub mod breaker;
pub mod cache;
pub mod error;
pub mod keyword;
pub mod service;
pub mod types;

pub use breaker::{BreakerState, CircuitBreaker};
pub use cache::ClassificationCache;
pub use error::{ClassifierError, Result};
pub use service::{ClassifierService, ClassifierSettings};
pub use types::Classification;
