use chrono::{NaiveDate, Utc};
use rusqlite::params;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::store::{from_json_list, parse_ts, to_json_list, ts, Store};
use crate::types::{GlobalSettings, SettingsPatch};

/// Fixed federal holidays of the Russian Federation (month, day, name).
/// Bridge days transferred by annual government decree are the operator's
/// to add on top.
const RUSSIAN_HOLIDAYS: &[(u32, u32, &str)] = &[
    (1, 1, "Новогодние каникулы"),
    (1, 2, "Новогодние каникулы"),
    (1, 3, "Новогодние каникулы"),
    (1, 4, "Новогодние каникулы"),
    (1, 5, "Новогодние каникулы"),
    (1, 6, "Новогодние каникулы"),
    (1, 7, "Рождество Христово"),
    (1, 8, "Новогодние каникулы"),
    (2, 23, "День защитника Отечества"),
    (3, 8, "Международный женский день"),
    (5, 1, "Праздник Весны и Труда"),
    (5, 9, "День Победы"),
    (6, 12, "День России"),
    (11, 4, "День народного единства"),
];

impl Store {
    /// Fetch the settings singleton, inserting defaults on first access.
    pub fn get_settings(&self) -> Result<GlobalSettings> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO global_settings (id, updated_at) VALUES (1, ?1)",
            params![ts(Utc::now())],
        )?;
        let raw = conn.query_row(
            "SELECT schedule_days, schedule_start, schedule_end, timezone,
                    sla_threshold_minutes, max_escalations, escalation_interval_minutes,
                    warning_percent, ai_confidence_threshold, keyword_confidence_threshold,
                    cache_ttl_minutes, preview_length, global_manager_ids, retention_days,
                    updated_at
             FROM global_settings WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, f64>(8)?,
                    row.get::<_, f64>(9)?,
                    row.get::<_, i64>(10)?,
                    row.get::<_, i64>(11)?,
                    row.get::<_, String>(12)?,
                    row.get::<_, i64>(13)?,
                    row.get::<_, String>(14)?,
                ))
            },
        )?;
        let (
            days,
            start,
            end,
            timezone,
            threshold,
            max_escalations,
            escalation_interval,
            warning_percent,
            ai_conf,
            kw_conf,
            cache_ttl,
            preview_length,
            manager_ids,
            retention_days,
            updated_at,
        ) = raw;
        Ok(GlobalSettings {
            schedule_days: from_json_list(&days)?,
            schedule_start: start,
            schedule_end: end,
            timezone,
            sla_threshold_minutes: threshold,
            max_escalations,
            escalation_interval_minutes: escalation_interval,
            warning_percent,
            ai_confidence_threshold: ai_conf,
            keyword_confidence_threshold: kw_conf,
            cache_ttl_minutes: cache_ttl,
            preview_length: preview_length as usize,
            global_manager_ids: from_json_list(&manager_ids)?,
            retention_days,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    /// Apply a partial update; only provided fields are written.
    pub fn update_settings(&self, patch: SettingsPatch) -> Result<GlobalSettings> {
        // Ensure the singleton exists before the field-wise updates.
        self.get_settings()?;
        if let Some(p) = patch.warning_percent {
            if !(0..=100).contains(&p) {
                return Err(StoreError::Invalid(format!(
                    "warning_percent {p} out of 0..=100"
                )));
            }
        }
        for (name, value) in [
            ("start", patch.schedule_start.as_deref()),
            ("end", patch.schedule_end.as_deref()),
        ] {
            if let Some(v) = value {
                slabot_hours::schedule::parse_hhmm(v)
                    .map_err(|e| StoreError::Invalid(format!("schedule_{name}: {e}")))?;
            }
        }

        let now = ts(Utc::now());
        let conn = self.conn();
        macro_rules! set {
            ($column:literal, $value:expr) => {
                if let Some(v) = $value {
                    conn.execute(
                        concat!(
                            "UPDATE global_settings SET ",
                            $column,
                            " = ?1, updated_at = ?2 WHERE id = 1"
                        ),
                        params![v, now],
                    )?;
                }
            };
        }
        set!("schedule_days", patch.schedule_days.map(|d| to_json_list(&d)).transpose()?);
        set!("schedule_start", patch.schedule_start);
        set!("schedule_end", patch.schedule_end);
        set!("timezone", patch.timezone);
        set!("sla_threshold_minutes", patch.sla_threshold_minutes);
        set!("max_escalations", patch.max_escalations);
        set!("escalation_interval_minutes", patch.escalation_interval_minutes);
        set!("warning_percent", patch.warning_percent);
        set!("ai_confidence_threshold", patch.ai_confidence_threshold);
        set!("keyword_confidence_threshold", patch.keyword_confidence_threshold);
        set!("cache_ttl_minutes", patch.cache_ttl_minutes);
        set!("preview_length", patch.preview_length.map(|v| v as i64));
        set!(
            "global_manager_ids",
            patch.global_manager_ids.map(|ids| to_json_list(&ids)).transpose()?
        );
        set!("retention_days", patch.retention_days);
        drop(conn);

        self.get_settings()
    }

    /// Seed the fixed RF federal holidays for one year into the global
    /// scope. Dates already present are skipped. Returns the insert count.
    pub fn seed_russian_holidays(&self, year: i32) -> Result<usize> {
        let mut inserted = 0;
        for &(month, day, name) in RUSSIAN_HOLIDAYS {
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };
            match self.add_holiday(None, date, Some(name)) {
                Ok(_) => inserted += 1,
                Err(StoreError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!(year, inserted, "russian holidays seeded");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn defaults_materialize_on_first_read() {
        let s = store();
        let settings = s.get_settings().unwrap();
        assert_eq!(settings.sla_threshold_minutes, 60);
        assert_eq!(settings.warning_percent, 80);
        assert_eq!(settings.schedule_days, vec![1, 2, 3, 4, 5]);
        assert_eq!(settings.timezone, "Europe/Moscow");
    }

    #[test]
    fn patch_writes_only_provided_fields() {
        let s = store();
        let before = s.get_settings().unwrap();
        let after = s
            .update_settings(SettingsPatch {
                sla_threshold_minutes: Some(90),
                global_manager_ids: Some(vec![1001, 1002]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(after.sla_threshold_minutes, 90);
        assert_eq!(after.global_manager_ids, vec![1001, 1002]);
        // Untouched fields keep their values.
        assert_eq!(after.warning_percent, before.warning_percent);
        assert_eq!(after.schedule_start, before.schedule_start);
    }

    #[test]
    fn warning_percent_is_range_checked() {
        let s = store();
        let err = s.update_settings(SettingsPatch {
            warning_percent: Some(150),
            ..Default::default()
        });
        assert!(err.is_err());
    }

    #[test]
    fn bad_schedule_time_is_rejected() {
        let s = store();
        let err = s.update_settings(SettingsPatch {
            schedule_start: Some("9am".to_string()),
            ..Default::default()
        });
        assert!(err.is_err());
    }

    #[test]
    fn seeding_is_idempotent() {
        let s = store();
        let first = s.seed_russian_holidays(2025).unwrap();
        assert_eq!(first, RUSSIAN_HOLIDAYS.len());
        let second = s.seed_russian_holidays(2025).unwrap();
        assert_eq!(second, 0);
        assert_eq!(s.list_holidays(None).unwrap().len(), RUSSIAN_HOLIDAYS.len());
    }
}
