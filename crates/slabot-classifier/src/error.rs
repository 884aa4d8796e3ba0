use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The AI call exceeded its request timeout.
    #[error("AI request timeout")]
    Timeout,

    /// The provider returned 429 or an explicit rate-limit message.
    #[error("AI rate limited")]
    RateLimited,

    /// Non-success HTTP status from the provider.
    #[error("AI API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The provider answered but the body was not the expected JSON.
    #[error("AI response parse error: {0}")]
    Parse(String),

    /// Transport-level failure below the HTTP layer.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// Cache storage failure.
    #[error("Cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    /// No AI provider is configured.
    #[error("AI classifier not configured")]
    NotConfigured,
}

impl ClassifierError {
    /// Metric label for an AI failure, per the documented taxonomy:
    /// timeouts, rate limits and parse failures are tracked separately
    /// from generic API errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::Timeout => "timeout",
            ClassifierError::RateLimited => "rate_limit",
            ClassifierError::Parse(_) => "parse_error",
            ClassifierError::Api { status: 429, .. } => "rate_limit",
            ClassifierError::Api { message, .. } => categorize_message(message),
            ClassifierError::Http(e) if e.is_timeout() => "timeout",
            _ => "api_error",
        }
    }
}

fn categorize_message(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timeout") {
        "timeout"
    } else if lower.contains("rate limit") {
        "rate_limit"
    } else if lower.contains("json") || lower.contains("parse") {
        "parse_error"
    } else {
        "api_error"
    }
}

impl From<reqwest::Error> for ClassifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClassifierError::Timeout
        } else {
            ClassifierError::Http(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(ClassifierError::Timeout.kind(), "timeout");
        assert_eq!(ClassifierError::RateLimited.kind(), "rate_limit");
        assert_eq!(ClassifierError::Parse("bad".into()).kind(), "parse_error");
        assert_eq!(
            ClassifierError::Api {
                status: 429,
                message: "too many".into()
            }
            .kind(),
            "rate_limit"
        );
        assert_eq!(
            ClassifierError::Api {
                status: 500,
                message: "upstream timeout".into()
            }
            .kind(),
            "timeout"
        );
        assert_eq!(
            ClassifierError::Api {
                status: 500,
                message: "invalid json in body".into()
            }
            .kind(),
            "parse_error"
        );
        assert_eq!(
            ClassifierError::Api {
                status: 503,
                message: "unavailable".into()
            }
            .kind(),
            "api_error"
        );
    }
}
