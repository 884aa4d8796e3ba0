//! `slabot-hours` — pure working-time arithmetic.
//!
//! Maps wall-clock intervals to *working minutes* under a per-chat schedule
//! (timezone, weekday set, daily window, holidays) and computes the
//! wall-clock delay until a working-minute budget is exhausted.
//!
//! All arithmetic is on UTC instants; local time only appears inside the
//! per-day window intersection, so DST transitions follow the IANA zone
//! rules instead of naive local math.

pub mod calc;
pub mod error;
pub mod schedule;

pub use calc::{delay_until_breach, working_minutes};
pub use error::{HoursError, Result};
pub use schedule::ScheduleSpec;
