use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    /// The transport rejected or failed a request.
    #[error("Telegram API error: {0}")]
    Api(#[from] teloxide::RequestError),

    #[error(transparent)]
    Store(#[from] slabot_store::StoreError),

    #[error(transparent)]
    Engine(#[from] slabot_engine::EngineError),

    /// Callback payload did not match any known action.
    #[error("Malformed callback data: {0}")]
    BadCallback(String),
}

pub type Result<T> = std::result::Result<T, TelegramError>;
