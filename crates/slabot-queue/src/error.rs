use thiserror::Error;

/// Errors that can occur within the queue subsystem.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Job payload failed to (de)serialize.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// No job with the given ID exists in the queue.
    #[error("Job not found: {queue}/{id}")]
    JobNotFound { queue: String, id: String },

    /// A stored value failed to parse (bad status string, bad timestamp).
    #[error("Invalid stored value: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
