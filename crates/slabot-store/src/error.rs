use thiserror::Error;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No row matched the lookup.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A uniqueness constraint rejected the write (duplicate holiday date,
    /// duplicate alert level, …).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored value failed to parse (bad enum string, bad timestamp).
    #[error("Invalid stored value: {0}")]
    Invalid(String),

    /// JSON (de)serialization of a list column failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the database rejected the write on a UNIQUE constraint.
    pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
