use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::warn;

use crate::error::Result;
use crate::store::{conversion_err, parse_ts, ts, Store};
use crate::types::{ChatMessage, NewMessage};

impl Store {
    /// Append an original message row at `edit_version = 0`.
    ///
    /// Re-delivery of the same (chat, message) is ignored: the log is
    /// append-only and version 0 already exists.
    pub fn append_message(&self, msg: &NewMessage) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO chat_messages
             (chat_id, message_id, edit_version, sender_id, sender_username, text,
              is_accountant, reply_to_message_id, message_type, sent_at, recorded_at)
             VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                msg.chat_id,
                msg.message_id,
                msg.sender_id,
                msg.sender_username,
                msg.text,
                msg.is_accountant as i64,
                msg.reply_to_message_id,
                msg.message_type,
                ts(msg.sent_at),
                ts(Utc::now()),
            ],
        )?;
        Ok(0)
    }

    /// Append an edited message as a new row at `max(edit_version) + 1`.
    ///
    /// Identity fields absent from the edit event are carried forward from
    /// the latest prior version. When no prior row exists (the bot was
    /// offline at original delivery) the edit is stored as version 0.
    pub fn append_edit(&self, msg: &NewMessage) -> Result<i64> {
        let prior = self.latest_message(msg.chat_id, msg.message_id)?;
        let version = match &prior {
            Some(p) => p.edit_version + 1,
            None => {
                warn!(
                    chat_id = msg.chat_id,
                    message_id = msg.message_id,
                    "edit for unknown message; storing as version 0"
                );
                0
            }
        };

        let sender_username = msg
            .sender_username
            .clone()
            .or_else(|| prior.as_ref().and_then(|p| p.sender_username.clone()));
        let reply_to = msg
            .reply_to_message_id
            .or_else(|| prior.as_ref().and_then(|p| p.reply_to_message_id));

        let conn = self.conn();
        conn.execute(
            "INSERT INTO chat_messages
             (chat_id, message_id, edit_version, sender_id, sender_username, text,
              is_accountant, reply_to_message_id, message_type, sent_at, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                msg.chat_id,
                msg.message_id,
                version,
                msg.sender_id,
                sender_username,
                msg.text,
                msg.is_accountant as i64,
                reply_to,
                msg.message_type,
                ts(msg.sent_at),
                ts(Utc::now()),
            ],
        )?;
        Ok(version)
    }

    /// The highest-version row for (chat, message), if any.
    pub fn latest_message(&self, chat_id: i64, message_id: i64) -> Result<Option<ChatMessage>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT chat_id, message_id, edit_version, sender_id, sender_username, text,
                    is_accountant, reply_to_message_id, message_type, sent_at, recorded_at
             FROM chat_messages
             WHERE chat_id = ?1 AND message_id = ?2
             ORDER BY edit_version DESC LIMIT 1",
            params![chat_id, message_id],
            row_to_message,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    /// All stored versions of one message, oldest first.
    pub fn message_versions(&self, chat_id: i64, message_id: i64) -> Result<Vec<ChatMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT chat_id, message_id, edit_version, sender_id, sender_username, text,
                    is_accountant, reply_to_message_id, message_type, sent_at, recorded_at
             FROM chat_messages
             WHERE chat_id = ?1 AND message_id = ?2
             ORDER BY edit_version",
        )?;
        let rows = stmt
            .query_map(params![chat_id, message_id], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Delete message rows sent before `cutoff`. Used by the retention sweep.
    pub fn prune_messages_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM chat_messages WHERE sent_at < ?1",
            params![ts(cutoff)],
        )?;
        Ok(n)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let sent_at: String = row.get(9)?;
    let recorded_at: String = row.get(10)?;
    Ok(ChatMessage {
        chat_id: row.get(0)?,
        message_id: row.get(1)?,
        edit_version: row.get(2)?,
        sender_id: row.get(3)?,
        sender_username: row.get(4)?,
        text: row.get(5)?,
        is_accountant: row.get::<_, i64>(6)? != 0,
        reply_to_message_id: row.get(7)?,
        message_type: row.get(8)?,
        sent_at: parse_ts(&sent_at)
            .map_err(|e| conversion_err(9, e))?,
        recorded_at: parse_ts(&recorded_at)
            .map_err(|e| conversion_err(10, e))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn msg(chat_id: i64, message_id: i64, text: &str) -> NewMessage {
        NewMessage {
            chat_id,
            message_id,
            sender_id: 500,
            sender_username: Some("client".to_string()),
            text: text.to_string(),
            is_accountant: false,
            reply_to_message_id: None,
            message_type: "text".to_string(),
            sent_at: Utc.with_ymd_and_hms(2025, 3, 4, 7, 0, 0).unwrap(),
        }
    }

    #[test]
    fn edits_append_new_versions() {
        let s = store();
        s.append_message(&msg(-1, 42, "нужна справка")).unwrap();

        let mut edit = msg(-1, 42, "нужна справка 2-НДФЛ");
        edit.sender_username = None; // edit events may omit identity
        let v = s.append_edit(&edit).unwrap();
        assert_eq!(v, 1);

        let versions = s.message_versions(-1, 42).unwrap();
        assert_eq!(versions.len(), 2);
        // Original row untouched.
        assert_eq!(versions[0].text, "нужна справка");
        assert_eq!(versions[0].edit_version, 0);
        // Identity carried forward.
        assert_eq!(versions[1].sender_username.as_deref(), Some("client"));
        assert_eq!(versions[1].text, "нужна справка 2-НДФЛ");
    }

    #[test]
    fn edit_versions_strictly_increase() {
        let s = store();
        s.append_message(&msg(-1, 7, "a")).unwrap();
        for i in 1..=3 {
            let v = s.append_edit(&msg(-1, 7, &format!("edit {i}"))).unwrap();
            assert_eq!(v, i);
        }
        let versions: Vec<i64> = s
            .message_versions(-1, 7)
            .unwrap()
            .iter()
            .map(|m| m.edit_version)
            .collect();
        assert_eq!(versions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn edit_without_prior_row_stores_version_zero() {
        let s = store();
        let v = s.append_edit(&msg(-1, 99, "late edit")).unwrap();
        assert_eq!(v, 0);
        assert_eq!(s.latest_message(-1, 99).unwrap().unwrap().text, "late edit");
    }

    #[test]
    fn duplicate_original_is_ignored() {
        let s = store();
        s.append_message(&msg(-1, 1, "first")).unwrap();
        s.append_message(&msg(-1, 1, "redelivered")).unwrap();
        assert_eq!(s.message_versions(-1, 1).unwrap().len(), 1);
        assert_eq!(s.latest_message(-1, 1).unwrap().unwrap().text, "first");
    }

    #[test]
    fn prune_removes_old_rows() {
        let s = store();
        s.append_message(&msg(-1, 1, "old")).unwrap();
        let cutoff = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(s.prune_messages_before(cutoff).unwrap(), 1);
        assert!(s.latest_message(-1, 1).unwrap().is_none());
    }
}
