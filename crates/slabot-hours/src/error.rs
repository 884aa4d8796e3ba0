use thiserror::Error;

#[derive(Debug, Error)]
pub enum HoursError {
    /// A time-of-day string is not in `HH:MM` form or out of range.
    #[error("Invalid time of day: {0}")]
    InvalidTime(String),

    /// The timezone name is not a known IANA identifier.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// The weekday number is outside 1..=7 (ISO, Monday = 1).
    #[error("Invalid weekday: {0}")]
    InvalidWeekday(u8),
}

pub type Result<T> = std::result::Result<T, HoursError>;
