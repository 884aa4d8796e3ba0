use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlabotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SlabotError {
    /// Short error code string returned in RPC error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            SlabotError::Config(_) => "CONFIG_ERROR",
            SlabotError::Validation(_) => "BAD_REQUEST",
            SlabotError::Unauthorized(_) => "UNAUTHORIZED",
            SlabotError::Forbidden { .. } => "FORBIDDEN",
            SlabotError::NotFound { .. } => "NOT_FOUND",
            SlabotError::Conflict(_) => "CONFLICT",
            SlabotError::Database(_) => "DATABASE_ERROR",
            SlabotError::Queue(_) => "QUEUE_ERROR",
            SlabotError::Classifier(_) => "CLASSIFIER_ERROR",
            SlabotError::Transport(_) => "TRANSPORT_ERROR",
            SlabotError::Serialization(_) => "SERIALIZATION_ERROR",
            SlabotError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SlabotError>;
