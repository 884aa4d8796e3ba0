use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, NaiveTime};
use chrono_tz::Tz;

use crate::error::{HoursError, Result};

/// A fully resolved working schedule for one chat.
///
/// `working_days` is indexed by ISO weekday minus one (0 = Monday).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub timezone: Tz,
    pub working_days: [bool; 7],
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub holidays: HashSet<NaiveDate>,
    pub is_24x7: bool,
}

impl ScheduleSpec {
    /// The hard-coded fallback: Mon–Fri 09:00–18:00 Europe/Moscow.
    pub fn fallback() -> Self {
        Self {
            timezone: chrono_tz::Europe::Moscow,
            working_days: [true, true, true, true, true, false, false],
            start: NaiveTime::from_hms_opt(9, 0, 0).expect("valid literal"),
            end: NaiveTime::from_hms_opt(18, 0, 0).expect("valid literal"),
            holidays: HashSet::new(),
            is_24x7: false,
        }
    }

    /// An always-on schedule where working time equals wall-clock time.
    pub fn always_on() -> Self {
        Self {
            is_24x7: true,
            ..Self::fallback()
        }
    }

    /// Build from storage fields: ISO weekday numbers, `HH:MM` strings,
    /// an IANA zone name and `YYYY-MM-DD` holiday dates.
    pub fn from_parts(
        timezone: &str,
        iso_days: &[u8],
        start: &str,
        end: &str,
        holidays: &[NaiveDate],
        is_24x7: bool,
    ) -> Result<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| HoursError::InvalidTimezone(timezone.to_string()))?;

        let mut days = [false; 7];
        for &d in iso_days {
            if !(1..=7).contains(&d) {
                return Err(HoursError::InvalidWeekday(d));
            }
            days[(d - 1) as usize] = true;
        }

        Ok(Self {
            timezone: tz,
            working_days: days,
            start: parse_hhmm(start)?,
            end: parse_hhmm(end)?,
            holidays: holidays.iter().copied().collect(),
            is_24x7,
        })
    }

    /// True when `date` falls on a configured weekday and is not a holiday.
    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        let idx = date.weekday().num_days_from_monday() as usize;
        self.working_days[idx] && !self.holidays.contains(&date)
    }
}

/// Parse a `HH:MM` time-of-day column value.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| HoursError::InvalidTime(s.to_string()))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| HoursError::InvalidTime(s.to_string()))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| HoursError::InvalidTime(s.to_string()))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| HoursError::InvalidTime(s.to_string()))
}
