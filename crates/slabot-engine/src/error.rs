use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] slabot_store::StoreError),

    #[error(transparent)]
    Queue(#[from] slabot_queue::QueueError),

    /// The request is not in a state that permits the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The alert already carries a terminal action.
    #[error("Alert {alert_id} is already resolved")]
    AlreadyResolved { alert_id: i64 },

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
