use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::debug;

use slabot_core::types::{Category, RequestStatus};

use crate::error::{Result, StoreError};
use crate::store::{conversion_err, parse_ts, ts, Store};
use crate::types::{ClientRequest, Resolution};

/// Statuses that still await a resolution, for SQL IN clauses.
const OPEN_STATUSES: &str = "('pending','in_progress','waiting_client','transferred','escalated')";

const REQUEST_COLUMNS: &str = "id, chat_id, message_id, status, received_at, category, confidence,
    classifier_model, sla_timer_started_at, sla_timer_paused_at, sla_breached,
    response_at, response_time_minutes, response_message_id, responded_by,
    sla_working_minutes, created_at, updated_at";

impl Store {
    /// Create a freshly classified request in state `pending`.
    pub fn create_request(
        &self,
        chat_id: i64,
        message_id: i64,
        received_at: DateTime<Utc>,
        category: Category,
        confidence: f64,
        classifier_model: &str,
    ) -> Result<ClientRequest> {
        let now = ts(Utc::now());
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO client_requests
                 (chat_id, message_id, status, received_at, category, confidence,
                  classifier_model, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    chat_id,
                    message_id,
                    ts(received_at),
                    category.to_string(),
                    confidence,
                    classifier_model,
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };
        debug!(request_id = id, chat_id, message_id, "client request created");
        self.get_request(id)
    }

    pub fn get_request(&self, id: i64) -> Result<ClientRequest> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {REQUEST_COLUMNS} FROM client_requests WHERE id = ?1"),
            params![id],
            row_to_request,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                what: format!("request {id}"),
            },
            other => other.into(),
        })
    }

    /// The request created for a specific message, if any. Used by the
    /// ingest path so an edited message never spawns a duplicate.
    pub fn find_request_by_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<ClientRequest>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {REQUEST_COLUMNS} FROM client_requests
                 WHERE chat_id = ?1 AND message_id = ?2
                 ORDER BY id LIMIT 1"
            ),
            params![chat_id, message_id],
            row_to_request,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    /// The request an accountant reply resolves: an explicit reply-to match
    /// wins, otherwise the oldest open request in the chat (FIFO).
    pub fn oldest_open_request(
        &self,
        chat_id: i64,
        reply_to_message_id: Option<i64>,
    ) -> Result<Option<ClientRequest>> {
        if let Some(mid) = reply_to_message_id {
            let conn = self.conn();
            let hit = conn
                .query_row(
                    &format!(
                        "SELECT {REQUEST_COLUMNS} FROM client_requests
                         WHERE chat_id = ?1 AND message_id = ?2 AND status IN {OPEN_STATUSES}
                         ORDER BY received_at LIMIT 1"
                    ),
                    params![chat_id, mid],
                    row_to_request,
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(StoreError::from(other)),
                })?;
            if hit.is_some() {
                return Ok(hit);
            }
        }
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {REQUEST_COLUMNS} FROM client_requests
                 WHERE chat_id = ?1 AND status IN {OPEN_STATUSES}
                 ORDER BY received_at LIMIT 1"
            ),
            params![chat_id],
            row_to_request,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    pub fn set_timer_started(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE client_requests SET sla_timer_started_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![ts(at), ts(Utc::now()), id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("request {id}"),
            });
        }
        Ok(())
    }

    /// Resolve a request. Guarded so a second resolution is a no-op;
    /// returns `false` when the request was already answered or closed.
    pub fn answer_request(&self, id: i64, resolution: &Resolution) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE client_requests
             SET status = 'answered',
                 response_at = ?1,
                 response_time_minutes = ?2,
                 response_message_id = ?3,
                 responded_by = ?4,
                 sla_working_minutes = ?2,
                 sla_breached = CASE WHEN sla_breached = 1 THEN 1 ELSE ?5 END,
                 sla_timer_paused_at = NULL,
                 updated_at = ?6
             WHERE id = ?7 AND status NOT IN ('answered','closed')",
            params![
                ts(resolution.response_at),
                resolution.elapsed_minutes,
                resolution.response_message_id,
                resolution.responded_by,
                resolution.breached as i64,
                ts(Utc::now()),
                id,
            ],
        )?;
        Ok(n > 0)
    }

    /// Mark a request breached and escalated. Idempotent; returns `false`
    /// when the request already reached a terminal state.
    pub fn mark_escalated(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE client_requests
             SET sla_breached = 1, status = 'escalated', updated_at = ?1
             WHERE id = ?2 AND status NOT IN ('answered','closed')",
            params![ts(Utc::now()), id],
        )?;
        Ok(n > 0)
    }

    pub fn set_request_status(&self, id: i64, status: RequestStatus) -> Result<()> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE client_requests SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), ts(Utc::now()), id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("request {id}"),
            });
        }
        Ok(())
    }

    /// Record a pause instant and move to `waiting_client`.
    pub fn pause_timer_row(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE client_requests
             SET sla_timer_paused_at = ?1, status = 'waiting_client', updated_at = ?2
             WHERE id = ?3 AND status IN ('pending','in_progress')",
            params![ts(at), ts(Utc::now()), id],
        )?;
        Ok(n > 0)
    }

    /// Clear the pause instant and return to `pending`.
    pub fn resume_timer_row(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE client_requests
             SET sla_timer_paused_at = NULL, status = 'pending', updated_at = ?1
             WHERE id = ?2 AND status = 'waiting_client'",
            params![ts(Utc::now()), id],
        )?;
        Ok(n > 0)
    }

    pub fn list_requests(
        &self,
        chat_id: Option<i64>,
        status: Option<RequestStatus>,
        limit: usize,
    ) -> Result<Vec<ClientRequest>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM client_requests
             WHERE (?1 IS NULL OR chat_id = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY received_at DESC LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(
                params![chat_id, status.map(|s| s.to_string()), limit as i64],
                row_to_request,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Open requests with a running SLA timer, for the active-timers view.
    pub fn active_timers(&self) -> Result<Vec<ClientRequest>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM client_requests
             WHERE status IN {OPEN_STATUSES} AND sla_timer_started_at IS NOT NULL
             ORDER BY received_at"
        ))?;
        let rows = stmt
            .query_map([], row_to_request)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Requests the recovery pass must reconcile with the queue.
    pub fn pending_with_timer(&self) -> Result<Vec<ClientRequest>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM client_requests
             WHERE status = 'pending' AND sla_timer_started_at IS NOT NULL
             ORDER BY received_at"
        ))?;
        let rows = stmt
            .query_map([], row_to_request)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Delete terminal requests received before `cutoff`.
    pub fn prune_requests_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM client_requests
             WHERE status IN ('answered','closed') AND received_at < ?1",
            params![ts(cutoff)],
        )?;
        Ok(n)
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClientRequest> {
    let status: String = row.get(3)?;
    let received_at: String = row.get(4)?;
    let category: Option<String> = row.get(5)?;
    let started: Option<String> = row.get(8)?;
    let paused: Option<String> = row.get(9)?;
    let response_at: Option<String> = row.get(11)?;
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;

    let parse_opt = |col: usize, v: Option<String>| -> rusqlite::Result<Option<DateTime<Utc>>> {
        v.map(|s| parse_ts(&s).map_err(|e| conversion_err(col, e)))
            .transpose()
    };

    Ok(ClientRequest {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        message_id: row.get(2)?,
        status: status
            .parse()
            .map_err(|e: String| conversion_err(3, StoreError::Invalid(e)))?,
        received_at: parse_ts(&received_at).map_err(|e| conversion_err(4, e))?,
        category: category
            .map(|c| {
                c.parse::<Category>()
                    .map_err(|e| conversion_err(5, StoreError::Invalid(e)))
            })
            .transpose()?,
        confidence: row.get(6)?,
        classifier_model: row.get(7)?,
        sla_timer_started_at: parse_opt(8, started)?,
        sla_timer_paused_at: parse_opt(9, paused)?,
        sla_breached: row.get::<_, i64>(10)? != 0,
        response_at: parse_opt(11, response_at)?,
        response_time_minutes: row.get(12)?,
        response_message_id: row.get(13)?,
        responded_by: row.get(14)?,
        sla_working_minutes: row.get(15)?,
        created_at: parse_ts(&created_at).map_err(|e| conversion_err(16, e))?,
        updated_at: parse_ts(&updated_at).map_err(|e| conversion_err(17, e))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use slabot_core::types::ChatKind;

    fn store() -> Store {
        let s = Store::open_in_memory().unwrap();
        s.ensure_chat(-1, ChatKind::Group, None).unwrap();
        s
    }

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 7, 0, 0).unwrap()
    }

    fn make_request(s: &Store, message_id: i64) -> ClientRequest {
        s.create_request(-1, message_id, received(), Category::Request, 0.9, "ai")
            .unwrap()
    }

    #[test]
    fn create_and_fetch() {
        let s = store();
        let r = make_request(&s, 42);
        assert_eq!(r.status, RequestStatus::Pending);
        assert_eq!(r.category, Some(Category::Request));
        assert!(!r.sla_breached);
        let again = s.get_request(r.id).unwrap();
        assert_eq!(again.received_at, received());
    }

    #[test]
    fn answer_is_idempotent() {
        // A second resolution changes nothing.
        let s = store();
        let r = make_request(&s, 42);
        let resolution = Resolution {
            responded_by: Some(77),
            response_message_id: Some(43),
            response_at: received() + chrono::Duration::minutes(45),
            elapsed_minutes: 45,
            breached: false,
        };
        assert!(s.answer_request(r.id, &resolution).unwrap());
        let late = Resolution {
            elapsed_minutes: 999,
            ..resolution.clone()
        };
        assert!(!s.answer_request(r.id, &late).unwrap());

        let after = s.get_request(r.id).unwrap();
        assert_eq!(after.status, RequestStatus::Answered);
        assert_eq!(after.response_time_minutes, Some(45));
        assert_eq!(after.sla_working_minutes, Some(45));
    }

    #[test]
    fn answered_breached_flag_is_sticky() {
        let s = store();
        let r = make_request(&s, 42);
        assert!(s.mark_escalated(r.id).unwrap());
        let resolution = Resolution {
            responded_by: None,
            response_message_id: None,
            response_at: received() + chrono::Duration::minutes(200),
            elapsed_minutes: 200,
            breached: false, // caller got it wrong; stored flag must survive
        };
        s.answer_request(r.id, &resolution).unwrap();
        assert!(s.get_request(r.id).unwrap().sla_breached);
    }

    #[test]
    fn mark_escalated_skips_terminal_requests() {
        let s = store();
        let r = make_request(&s, 42);
        let resolution = Resolution {
            responded_by: None,
            response_message_id: None,
            response_at: received(),
            elapsed_minutes: 0,
            breached: false,
        };
        s.answer_request(r.id, &resolution).unwrap();
        assert!(!s.mark_escalated(r.id).unwrap());
        assert_eq!(s.get_request(r.id).unwrap().status, RequestStatus::Answered);
    }

    #[test]
    fn reply_to_match_beats_fifo() {
        let s = store();
        let older = make_request(&s, 10);
        let newer = make_request(&s, 20);

        // No reply-to: FIFO picks the older one.
        let fifo = s.oldest_open_request(-1, None).unwrap().unwrap();
        assert_eq!(fifo.id, older.id);

        // Reply-to the newer message wins over FIFO.
        let targeted = s.oldest_open_request(-1, Some(20)).unwrap().unwrap();
        assert_eq!(targeted.id, newer.id);

        // Reply-to an unknown message falls back to FIFO.
        let fallback = s.oldest_open_request(-1, Some(999)).unwrap().unwrap();
        assert_eq!(fallback.id, older.id);
    }

    #[test]
    fn pause_and_resume_transition_status() {
        let s = store();
        let r = make_request(&s, 42);
        assert!(s.pause_timer_row(r.id, Utc::now()).unwrap());
        let paused = s.get_request(r.id).unwrap();
        assert_eq!(paused.status, RequestStatus::WaitingClient);
        assert!(paused.sla_timer_paused_at.is_some());

        assert!(s.resume_timer_row(r.id).unwrap());
        let resumed = s.get_request(r.id).unwrap();
        assert_eq!(resumed.status, RequestStatus::Pending);
        assert!(resumed.sla_timer_paused_at.is_none());

        // Resuming a non-paused request is a no-op.
        assert!(!s.resume_timer_row(r.id).unwrap());
    }

    #[test]
    fn recovery_scope_is_pending_with_timer() {
        let s = store();
        let with_timer = make_request(&s, 1);
        s.set_timer_started(with_timer.id, received()).unwrap();
        make_request(&s, 2); // no timer

        let scope = s.pending_with_timer().unwrap();
        assert_eq!(scope.len(), 1);
        assert_eq!(scope[0].id, with_timer.id);
    }
}
