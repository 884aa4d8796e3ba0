use chrono::{NaiveDate, Utc};
use rusqlite::params;
use tracing::{debug, info};

use slabot_core::types::ChatKind;
use slabot_hours::ScheduleSpec;

use crate::error::{Result, StoreError};
use crate::store::{from_json_list, parse_enum, parse_opt_ts, parse_ts, to_json_list, ts, Store};
use crate::types::{Chat, ChatPatch, Holiday, ScheduleRow};

impl Store {
    /// Insert a chat row on first contact. Existing rows are left alone
    /// except for a title refresh. New chats start with monitoring off so
    /// an admin can opt them in.
    pub fn ensure_chat(&self, chat_id: i64, kind: ChatKind, title: Option<&str>) -> Result<Chat> {
        let now = ts(Utc::now());
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO chats (chat_id, kind, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![chat_id, kind.to_string(), title, now],
        )?;
        if inserted > 0 {
            info!(chat_id, kind = %kind, "chat auto-registered");
        } else if let Some(t) = title {
            conn.execute(
                "UPDATE chats SET title = ?1, updated_at = ?2
                 WHERE chat_id = ?3 AND (title IS NULL OR title != ?1)",
                params![t, now, chat_id],
            )?;
        }
        drop(conn);
        self.get_chat(chat_id)?.ok_or(StoreError::NotFound {
            what: format!("chat {chat_id}"),
        })
    }

    /// Admin registration: create or re-enable a monitored chat.
    pub fn register_chat(
        &self,
        chat_id: i64,
        kind: ChatKind,
        title: Option<&str>,
        patch: ChatPatch,
    ) -> Result<Chat> {
        self.ensure_chat(chat_id, kind, title)?;
        let mut patch = patch;
        patch.monitoring_enabled = Some(patch.monitoring_enabled.unwrap_or(true));
        self.update_chat(chat_id, patch)
    }

    /// Apply a partial update; only provided fields are written.
    pub fn update_chat(&self, chat_id: i64, patch: ChatPatch) -> Result<Chat> {
        let now = ts(Utc::now());
        {
            let conn = self.conn();
            if let Some(title) = &patch.title {
                conn.execute(
                    "UPDATE chats SET title = ?1, updated_at = ?2 WHERE chat_id = ?3",
                    params![title, now, chat_id],
                )?;
            }
            if let Some(id) = patch.accountant_user_id {
                conn.execute(
                    "UPDATE chats SET accountant_user_id = ?1, updated_at = ?2 WHERE chat_id = ?3",
                    params![id, now, chat_id],
                )?;
            }
            if let Some(names) = &patch.accountant_usernames {
                conn.execute(
                    "UPDATE chats SET accountant_usernames = ?1, updated_at = ?2 WHERE chat_id = ?3",
                    params![to_json_list(names)?, now, chat_id],
                )?;
            }
            if let Some(threshold) = patch.sla_threshold_minutes {
                conn.execute(
                    "UPDATE chats SET sla_threshold_minutes = ?1, updated_at = ?2 WHERE chat_id = ?3",
                    params![threshold, now, chat_id],
                )?;
            }
            if let Some(enabled) = patch.monitoring_enabled {
                conn.execute(
                    "UPDATE chats SET monitoring_enabled = ?1, updated_at = ?2 WHERE chat_id = ?3",
                    params![enabled as i64, now, chat_id],
                )?;
            }
            if let Some(always_on) = patch.is_24x7 {
                conn.execute(
                    "UPDATE chats SET is_24x7 = ?1, updated_at = ?2 WHERE chat_id = ?3",
                    params![always_on as i64, now, chat_id],
                )?;
            }
            if let Some(ids) = &patch.manager_ids {
                conn.execute(
                    "UPDATE chats SET manager_ids = ?1, updated_at = ?2 WHERE chat_id = ?3",
                    params![to_json_list(ids)?, now, chat_id],
                )?;
            }
            if let Some(deleted) = patch.deleted {
                let deleted_at = deleted.then(|| now.clone());
                conn.execute(
                    "UPDATE chats SET deleted_at = ?1, updated_at = ?2 WHERE chat_id = ?3",
                    params![deleted_at, now, chat_id],
                )?;
            }
        }
        self.get_chat(chat_id)?.ok_or(StoreError::NotFound {
            what: format!("chat {chat_id}"),
        })
    }

    pub fn get_chat(&self, chat_id: i64) -> Result<Option<Chat>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT chat_id, kind, title, accountant_user_id, accountant_usernames,
                        sla_threshold_minutes, monitoring_enabled, is_24x7, manager_ids,
                        deleted_at, created_at, updated_at
                 FROM chats WHERE chat_id = ?1",
                params![chat_id],
                row_to_raw_chat,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        row.map(raw_to_chat).transpose()
    }

    /// Tombstoned chats are hidden unless `include_deleted`.
    pub fn list_chats(&self, include_deleted: bool) -> Result<Vec<Chat>> {
        let conn = self.conn();
        let sql = if include_deleted {
            "SELECT chat_id, kind, title, accountant_user_id, accountant_usernames,
                    sla_threshold_minutes, monitoring_enabled, is_24x7, manager_ids,
                    deleted_at, created_at, updated_at
             FROM chats ORDER BY created_at"
        } else {
            "SELECT chat_id, kind, title, accountant_user_id, accountant_usernames,
                    sla_threshold_minutes, monitoring_enabled, is_24x7, manager_ids,
                    deleted_at, created_at, updated_at
             FROM chats WHERE deleted_at IS NULL ORDER BY created_at"
        };
        let mut stmt = conn.prepare(sql)?;
        let raws: Vec<RawChat> = stmt
            .query_map([], row_to_raw_chat)?
            .filter_map(|r| r.ok())
            .collect();
        raws.into_iter().map(raw_to_chat).collect()
    }

    // --- working schedules -------------------------------------------------

    /// Replace all schedule rows for a scope (`None` = global default).
    pub fn set_working_schedule(&self, chat_id: Option<i64>, rows: &[ScheduleRow]) -> Result<()> {
        for row in rows {
            if !(1..=7).contains(&row.weekday) {
                return Err(StoreError::Invalid(format!(
                    "weekday {} out of 1..=7",
                    row.weekday
                )));
            }
            slabot_hours::schedule::parse_hhmm(&row.start_time)
                .and(slabot_hours::schedule::parse_hhmm(&row.end_time))
                .map_err(|e| StoreError::Invalid(e.to_string()))?;
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        match chat_id {
            Some(id) => tx.execute("DELETE FROM working_schedules WHERE chat_id = ?1", [id])?,
            None => tx.execute("DELETE FROM working_schedules WHERE chat_id IS NULL", [])?,
        };
        for row in rows {
            tx.execute(
                "INSERT INTO working_schedules (chat_id, weekday, start_time, end_time, timezone)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![chat_id, row.weekday, row.start_time, row.end_time, row.timezone],
            )?;
        }
        tx.commit()?;
        debug!(?chat_id, rows = rows.len(), "working schedule replaced");
        Ok(())
    }

    pub fn get_working_schedule(&self, chat_id: Option<i64>) -> Result<Vec<ScheduleRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT weekday, start_time, end_time, timezone FROM working_schedules
             WHERE (chat_id = ?1) OR (?1 IS NULL AND chat_id IS NULL)
             ORDER BY weekday",
        )?;
        let rows = stmt
            .query_map(params![chat_id], |row| {
                Ok(ScheduleRow {
                    weekday: row.get::<_, i64>(0)? as u8,
                    start_time: row.get(1)?,
                    end_time: row.get(2)?,
                    timezone: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // --- holidays ----------------------------------------------------------

    /// `chat_id = None` adds a global holiday. Duplicate dates conflict.
    pub fn add_holiday(
        &self,
        chat_id: Option<i64>,
        date: NaiveDate,
        name: Option<&str>,
    ) -> Result<Holiday> {
        let scope = if chat_id.is_some() { "chat" } else { "global" };
        let conn = self.conn();
        conn.execute(
            "INSERT INTO holidays (scope, chat_id, date, name) VALUES (?1, ?2, ?3, ?4)",
            params![scope, chat_id, date.to_string(), name],
        )
        .map_err(|e| {
            if StoreError::is_unique_violation(&e) {
                StoreError::Conflict(format!("holiday {date} already exists for this scope"))
            } else {
                e.into()
            }
        })?;
        Ok(Holiday {
            scope: scope.to_string(),
            chat_id,
            date,
            name: name.map(String::from),
        })
    }

    pub fn remove_holiday(&self, chat_id: Option<i64>, date: NaiveDate) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM holidays
             WHERE date = ?1 AND ((chat_id = ?2) OR (?2 IS NULL AND chat_id IS NULL))",
            params![date.to_string(), chat_id],
        )?;
        Ok(n > 0)
    }

    pub fn list_holidays(&self, chat_id: Option<i64>) -> Result<Vec<Holiday>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT scope, chat_id, date, name FROM holidays
             WHERE (chat_id = ?1) OR (?1 IS NULL AND chat_id IS NULL)
             ORDER BY date",
        )?;
        let rows = stmt
            .query_map(params![chat_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(scope, chat_id, date, name)| {
                Some(Holiday {
                    scope,
                    chat_id,
                    date: date.parse().ok()?,
                    name,
                })
            })
            .collect();
        Ok(rows)
    }

    /// Dates that count as non-working for `chat_id`: its own plus global.
    fn effective_holidays(&self, chat_id: i64) -> Result<Vec<NaiveDate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT date FROM holidays WHERE chat_id = ?1 OR chat_id IS NULL",
        )?;
        let dates = stmt
            .query_map(params![chat_id], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|s| s.parse().ok())
            .collect();
        Ok(dates)
    }

    /// Resolve the effective [`ScheduleSpec`] for a chat: chat-level rows,
    /// else global rows, else the settings defaults, else the hard-coded
    /// fallback. The chat's 24×7 flag short-circuits everything.
    pub fn resolve_schedule(&self, chat_id: i64) -> Result<ScheduleSpec> {
        let chat = self.get_chat(chat_id)?;
        if chat.as_ref().is_some_and(|c| c.is_24x7) {
            return Ok(ScheduleSpec::always_on());
        }

        let holidays = self.effective_holidays(chat_id)?;

        let mut rows = self.get_working_schedule(Some(chat_id))?;
        if rows.is_empty() {
            rows = self.get_working_schedule(None)?;
        }
        if rows.is_empty() {
            let settings = self.get_settings()?;
            return ScheduleSpec::from_parts(
                &settings.timezone,
                &settings.schedule_days,
                &settings.schedule_start,
                &settings.schedule_end,
                &holidays,
                false,
            )
            .map_err(|e| StoreError::Invalid(e.to_string()));
        }

        let days: Vec<u8> = rows.iter().map(|r| r.weekday).collect();
        let first = &rows[0];
        ScheduleSpec::from_parts(
            &first.timezone,
            &days,
            &first.start_time,
            &first.end_time,
            &holidays,
            false,
        )
        .map_err(|e| StoreError::Invalid(e.to_string()))
    }
}

type RawChat = (
    i64,
    String,
    Option<String>,
    Option<i64>,
    String,
    i64,
    i64,
    i64,
    String,
    Option<String>,
    String,
    String,
);

fn row_to_raw_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChat> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn raw_to_chat(raw: RawChat) -> Result<Chat> {
    let (
        chat_id,
        kind,
        title,
        accountant_user_id,
        usernames,
        sla_threshold_minutes,
        monitoring_enabled,
        is_24x7,
        manager_ids,
        deleted_at,
        created_at,
        updated_at,
    ) = raw;
    Ok(Chat {
        chat_id,
        kind: parse_enum(&kind)?,
        title,
        accountant_user_id,
        accountant_usernames: from_json_list(&usernames)?,
        sla_threshold_minutes,
        monitoring_enabled: monitoring_enabled != 0,
        is_24x7: is_24x7 != 0,
        manager_ids: from_json_list(&manager_ids)?,
        deleted_at: parse_opt_ts(deleted_at)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn ensure_chat_is_idempotent() {
        let s = store();
        let a = s.ensure_chat(-100200, ChatKind::Supergroup, Some("Acme")).unwrap();
        let b = s.ensure_chat(-100200, ChatKind::Supergroup, Some("Acme")).unwrap();
        assert_eq!(a.chat_id, b.chat_id);
        assert!(!b.monitoring_enabled);
    }

    #[test]
    fn register_enables_monitoring() {
        let s = store();
        let chat = s
            .register_chat(
                -1,
                ChatKind::Group,
                Some("Clients"),
                ChatPatch {
                    manager_ids: Some(vec![10, 20]),
                    sla_threshold_minutes: Some(45),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(chat.monitoring_enabled);
        assert_eq!(chat.manager_ids, vec![10, 20]);
        assert_eq!(chat.sla_threshold_minutes, 45);
    }

    #[test]
    fn soft_delete_hides_from_listing() {
        let s = store();
        s.ensure_chat(-1, ChatKind::Group, None).unwrap();
        s.update_chat(
            -1,
            ChatPatch {
                deleted: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(s.list_chats(false).unwrap().is_empty());
        assert_eq!(s.list_chats(true).unwrap().len(), 1);
        // History row is still reachable directly.
        assert!(s.get_chat(-1).unwrap().is_some());
    }

    #[test]
    fn accountant_match_by_id_and_username() {
        let s = store();
        let chat = s
            .register_chat(
                -1,
                ChatKind::Group,
                None,
                ChatPatch {
                    accountant_user_id: Some(77),
                    accountant_usernames: Some(vec!["anna_acc".to_string()]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(chat.is_accountant(77, None));
        assert!(chat.is_accountant(5, Some("@Anna_Acc")));
        assert!(!chat.is_accountant(5, Some("client")));
    }

    #[test]
    fn duplicate_holiday_conflicts() {
        let s = store();
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        s.add_holiday(None, date, Some("New Year")).unwrap();
        let err = s.add_holiday(None, date, None).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // Chat scope is independent of global scope.
        s.add_holiday(Some(-1), date, None).unwrap();
    }

    #[test]
    fn schedule_resolution_falls_back() {
        let s = store();
        s.ensure_chat(-1, ChatKind::Group, None).unwrap();

        // No rows anywhere: settings defaults (Mon–Fri 09:00–18:00 MSK).
        let spec = s.resolve_schedule(-1).unwrap();
        assert!(!spec.is_24x7);
        assert!(spec.working_days[0] && !spec.working_days[6]);

        // Global rows take over.
        s.set_working_schedule(
            None,
            &[ScheduleRow {
                weekday: 6,
                start_time: "10:00".to_string(),
                end_time: "14:00".to_string(),
                timezone: "Europe/Moscow".to_string(),
            }],
        )
        .unwrap();
        let spec = s.resolve_schedule(-1).unwrap();
        assert!(spec.working_days[5] && !spec.working_days[0]);

        // Chat rows beat global rows.
        s.set_working_schedule(
            Some(-1),
            &[ScheduleRow {
                weekday: 1,
                start_time: "08:00".to_string(),
                end_time: "20:00".to_string(),
                timezone: "Europe/Moscow".to_string(),
            }],
        )
        .unwrap();
        let spec = s.resolve_schedule(-1).unwrap();
        assert!(spec.working_days[0] && !spec.working_days[5]);
    }

    #[test]
    fn chat_24x7_short_circuits() {
        let s = store();
        s.register_chat(
            -1,
            ChatKind::Group,
            None,
            ChatPatch {
                is_24x7: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(s.resolve_schedule(-1).unwrap().is_24x7);
    }

    #[test]
    fn schedule_rows_validate_times() {
        let s = store();
        let err = s.set_working_schedule(
            Some(-1),
            &[ScheduleRow {
                weekday: 1,
                start_time: "25:99".to_string(),
                end_time: "18:00".to_string(),
                timezone: "Europe/Moscow".to_string(),
            }],
        );
        assert!(err.is_err());
    }
}
