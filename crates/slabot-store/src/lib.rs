//! `slabot-store` — SQLite persistence for the SLA engine.
//!
//! One [`Store`] handle wraps a `Mutex<Connection>`; entity operations are
//! grouped per module (`chats`, `messages`, `requests`, `alerts`,
//! `settings`, `analytics`) as impl blocks on the same handle. Timestamps
//! are RFC-3339 UTC text, times-of-day are `HH:MM` text, and transport ids
//! are 64-bit integers.

pub mod alerts;
pub mod analytics;
pub mod chats;
pub mod db;
pub mod error;
pub mod messages;
pub mod requests;
pub mod settings;
mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::Store;
