use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::schedule::ScheduleSpec;

/// Search horizon for [`delay_until_breach`]. A schedule that produces no
/// working time within this many days is treated as unreachable.
const BREACH_HORIZON_DAYS: i64 = 400;

/// Working minutes contained in `[from, to]` under `schedule`.
///
/// Returns 0 for inverted or empty intervals. For 24×7 schedules this is
/// plain wall-clock minutes; otherwise each calendar day the interval
/// spans contributes the intersection of `[from, to]` with that day's
/// working window, skipping non-working days and holidays.
pub fn working_minutes(from: DateTime<Utc>, to: DateTime<Utc>, schedule: &ScheduleSpec) -> i64 {
    if to <= from {
        return 0;
    }
    if schedule.is_24x7 {
        return (to - from).num_minutes();
    }

    let tz = schedule.timezone;
    let first_day = from.with_timezone(&tz).date_naive();
    let last_day = to.with_timezone(&tz).date_naive();

    let mut total_secs: i64 = 0;
    let mut day = first_day;
    while day <= last_day {
        if schedule.is_working_day(day) {
            if let Some((win_start, win_end)) = day_window_utc(tz, day, schedule) {
                let start = win_start.max(from);
                let end = win_end.min(to);
                if end > start {
                    total_secs += (end - start).num_seconds();
                }
            }
        }
        day = match day.succ_opt() {
            Some(d) => d,
            None => break,
        };
    }
    total_secs / 60
}

/// Earliest wall-clock delay (measured from `now`) after which
/// `working_minutes(received_at, B, schedule) >= threshold_minutes`.
///
/// Returns `None` when the schedule yields no reachable working time within
/// [`BREACH_HORIZON_DAYS`]; callers fall back to wall-clock delays.
/// The result is clamped to zero: a deadline already in the past means
/// "fire immediately".
pub fn delay_until_breach(
    received_at: DateTime<Utc>,
    threshold_minutes: i64,
    now: DateTime<Utc>,
    schedule: &ScheduleSpec,
) -> Option<Duration> {
    if threshold_minutes <= 0 {
        return Some(Duration::zero());
    }
    if schedule.is_24x7 {
        let breach_at = received_at + Duration::minutes(threshold_minutes);
        return Some((breach_at - now).max(Duration::zero()));
    }

    let tz = schedule.timezone;
    let mut remaining_secs = threshold_minutes * 60;
    let mut day = received_at.with_timezone(&tz).date_naive();

    for _ in 0..BREACH_HORIZON_DAYS {
        if schedule.is_working_day(day) {
            if let Some((win_start, win_end)) = day_window_utc(tz, day, schedule) {
                let start = win_start.max(received_at);
                if start < win_end {
                    let avail = (win_end - start).num_seconds();
                    if avail >= remaining_secs {
                        let breach_at = start + Duration::seconds(remaining_secs);
                        return Some((breach_at - now).max(Duration::zero()));
                    }
                    remaining_secs -= avail;
                }
            }
        }
        day = day.succ_opt()?;
    }
    None
}

/// The UTC instants of a day's local working window `[start, end)`.
///
/// Returns `None` for degenerate windows (end ≤ start after zone
/// resolution, e.g. a misconfigured schedule).
fn day_window_utc(
    tz: Tz,
    day: NaiveDate,
    schedule: &ScheduleSpec,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = local_instant(tz, day, schedule.start)?;
    let end = local_instant(tz, day, schedule.end)?;
    if end <= start {
        return None;
    }
    Some((start, end))
}

/// Resolve a local date+time to a UTC instant under IANA rules.
///
/// Ambiguous local times (fall-back transition) take the earlier instant;
/// nonexistent local times (spring-forward gap) slide one hour later.
fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _) => Some(earlier.with_timezone(&Utc)),
        LocalResult::None => match tz.from_local_datetime(&(naive + Duration::hours(1))) {
            LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earlier, _) => Some(earlier.with_timezone(&Utc)),
            LocalResult::None => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    /// 2025-03-04 is a Tuesday. Moscow is UTC+3 year-round.
    fn msk(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        chrono_tz::Europe::Moscow
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn inside_one_working_day() {
        let s = ScheduleSpec::fallback();
        let from = msk(2025, 3, 4, 10, 0);
        let to = msk(2025, 3, 4, 10, 45);
        assert_eq!(working_minutes(from, to, &s), 45);
    }

    #[test]
    fn clips_to_the_working_window() {
        let s = ScheduleSpec::fallback();
        // 08:00–10:00 local: only 09:00–10:00 counts.
        let from = msk(2025, 3, 4, 8, 0);
        let to = msk(2025, 3, 4, 10, 0);
        assert_eq!(working_minutes(from, to, &s), 60);
    }

    #[test]
    fn weekend_contributes_nothing() {
        let s = ScheduleSpec::fallback();
        // Fri 17:50 → Mon 09:50 spans a full weekend.
        let from = msk(2025, 3, 7, 17, 50);
        let to = msk(2025, 3, 10, 9, 50);
        assert_eq!(working_minutes(from, to, &s), 60);
    }

    #[test]
    fn holiday_is_excluded() {
        let mut s = ScheduleSpec::fallback();
        s.holidays
            .insert(NaiveDate::from_ymd_opt(2025, 3, 5).unwrap());
        // Tue 17:00 → Thu 10:00; Wednesday is a holiday.
        let from = msk(2025, 3, 4, 17, 0);
        let to = msk(2025, 3, 6, 10, 0);
        assert_eq!(working_minutes(from, to, &s), 60 + 60);
    }

    #[test]
    fn monotone_additivity() {
        // minutes(a,c) == minutes(a,b) + minutes(b,c) for a <= b <= c.
        let s = ScheduleSpec::fallback();
        let a = msk(2025, 3, 4, 10, 0);
        let b = msk(2025, 3, 6, 15, 30);
        let c = msk(2025, 3, 11, 12, 0);
        assert_eq!(
            working_minutes(a, c, &s),
            working_minutes(a, b, &s) + working_minutes(b, c, &s)
        );
    }

    #[test]
    fn always_on_equals_wall_clock() {
        // 24×7 schedules degrade to plain duration.
        let s = ScheduleSpec::always_on();
        let from = msk(2025, 3, 7, 23, 0);
        let to = msk(2025, 3, 9, 1, 30);
        assert_eq!(working_minutes(from, to, &s), (to - from).num_minutes());
    }

    #[test]
    fn inverted_interval_is_zero() {
        let s = ScheduleSpec::fallback();
        let from = msk(2025, 3, 4, 12, 0);
        let to = msk(2025, 3, 4, 11, 0);
        assert_eq!(working_minutes(from, to, &s), 0);
    }

    #[test]
    fn breach_delay_same_day() {
        let s = ScheduleSpec::fallback();
        let at = msk(2025, 3, 4, 10, 0);
        let delay = delay_until_breach(at, 60, at, &s).unwrap();
        assert_eq!(delay, Duration::minutes(60));
    }

    #[test]
    fn breach_delay_spans_a_weekend() {
        // Fri 17:50, threshold 60: 10 minutes remain on Friday, the other
        // 50 land Monday 09:00–09:50. Wall-clock delay is 64 hours.
        let s = ScheduleSpec::fallback();
        let at = msk(2025, 3, 7, 17, 50);
        let delay = delay_until_breach(at, 60, at, &s).unwrap();
        assert_eq!(delay, Duration::hours(64));
    }

    #[test]
    fn breach_delay_received_after_hours() {
        // 19:00 Tuesday: the whole budget starts Wednesday 09:00.
        let s = ScheduleSpec::fallback();
        let at = msk(2025, 3, 4, 19, 0);
        let delay = delay_until_breach(at, 30, at, &s).unwrap();
        let breach = at + delay;
        assert_eq!(breach, msk(2025, 3, 5, 9, 30));
    }

    #[test]
    fn breach_delay_clamps_to_zero() {
        let s = ScheduleSpec::fallback();
        let received = msk(2025, 3, 4, 9, 0);
        let now = msk(2025, 3, 4, 12, 30);
        let delay = delay_until_breach(received, 60, now, &s).unwrap();
        assert_eq!(delay, Duration::zero());
    }

    #[test]
    fn unreachable_schedule_yields_none() {
        let mut s = ScheduleSpec::fallback();
        s.working_days = [false; 7];
        let at = msk(2025, 3, 4, 10, 0);
        assert!(delay_until_breach(at, 60, at, &s).is_none());
    }

    #[test]
    fn zero_threshold_fires_immediately() {
        let s = ScheduleSpec::fallback();
        let at = msk(2025, 3, 4, 10, 0);
        assert_eq!(delay_until_breach(at, 0, at, &s).unwrap(), Duration::zero());
    }
}
