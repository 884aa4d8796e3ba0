use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use slabot_core::types::{AlertType, DeliveryStatus, ResolvedAction};

use crate::error::{Result, StoreError};
use crate::store::{conversion_err, parse_ts, ts, Store};
use crate::types::SlaAlert;

const ALERT_COLUMNS: &str = "id, request_id, alert_type, escalation_level, minutes_elapsed,
    manager_telegram_id, alert_sent_at, delivery_status, telegram_message_id,
    resolved_action, acknowledged_by, acknowledged_at, resolution_notes, created_at";

/// Aggregate counters for the alert dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct AlertStats {
    pub total: i64,
    pub open: i64,
    pub warnings: i64,
    pub breaches: i64,
    pub failed_deliveries: i64,
}

impl Store {
    /// Insert one alert row for one recipient. The UNIQUE constraint on
    /// (request, level, recipient) turns a duplicate into `Conflict`.
    pub fn create_alert(
        &self,
        request_id: i64,
        alert_type: AlertType,
        escalation_level: i64,
        minutes_elapsed: i64,
        manager_telegram_id: i64,
    ) -> Result<SlaAlert> {
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO sla_alerts
                 (request_id, alert_type, escalation_level, minutes_elapsed,
                  manager_telegram_id, delivery_status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
                params![
                    request_id,
                    alert_type.to_string(),
                    escalation_level,
                    minutes_elapsed,
                    manager_telegram_id,
                    ts(Utc::now()),
                ],
            )
            .map_err(|e| {
                if StoreError::is_unique_violation(&e) {
                    StoreError::Conflict(format!(
                        "alert level {escalation_level} already exists for request {request_id}"
                    ))
                } else {
                    StoreError::from(e)
                }
            })?;
            conn.last_insert_rowid()
        };
        self.get_alert(id)
    }

    pub fn get_alert(&self, id: i64) -> Result<SlaAlert> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ALERT_COLUMNS} FROM sla_alerts WHERE id = ?1"),
            params![id],
            row_to_alert,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                what: format!("alert {id}"),
            },
            other => other.into(),
        })
    }

    pub fn alerts_for_request(&self, request_id: i64) -> Result<Vec<SlaAlert>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM sla_alerts
             WHERE request_id = ?1 ORDER BY escalation_level, id"
        ))?;
        let rows = stmt
            .query_map(params![request_id], row_to_alert)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Alerts at one escalation level that still await delivery.
    pub fn pending_alerts_at_level(&self, request_id: i64, level: i64) -> Result<Vec<SlaAlert>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM sla_alerts
             WHERE request_id = ?1 AND escalation_level = ?2 AND delivery_status = 'pending'
             ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![request_id, level], row_to_alert)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// All unresolved alerts across all requests (the active-alerts view).
    pub fn active_alerts(&self) -> Result<Vec<SlaAlert>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM sla_alerts
             WHERE resolved_action IS NULL ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map([], row_to_alert)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Freeze one alert with its terminal action. Returns `false` when the
    /// alert was already resolved; resolved rows never mutate again.
    pub fn resolve_alert_row(
        &self,
        alert_id: i64,
        action: ResolvedAction,
        acknowledged_by: Option<i64>,
        notes: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE sla_alerts
             SET resolved_action = ?1, acknowledged_by = ?2, acknowledged_at = ?3,
                 resolution_notes = ?4
             WHERE id = ?5 AND resolved_action IS NULL",
            params![action.to_string(), acknowledged_by, ts(at), notes, alert_id],
        )?;
        Ok(n > 0)
    }

    /// Close every open alert of a request with the same terminal action.
    pub fn resolve_open_alerts(
        &self,
        request_id: i64,
        action: ResolvedAction,
        acknowledged_by: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE sla_alerts
             SET resolved_action = ?1, acknowledged_by = ?2, acknowledged_at = ?3
             WHERE request_id = ?4 AND resolved_action IS NULL",
            params![action.to_string(), acknowledged_by, ts(at), request_id],
        )?;
        Ok(n)
    }

    /// Record the transport outcome for one alert.
    pub fn set_delivery_status(
        &self,
        alert_id: i64,
        status: DeliveryStatus,
        telegram_message_id: Option<i64>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE sla_alerts
             SET delivery_status = ?1,
                 telegram_message_id = COALESCE(?2, telegram_message_id),
                 alert_sent_at = COALESCE(?3, alert_sent_at)
             WHERE id = ?4",
            params![status.to_string(), telegram_message_id, sent_at.map(ts), alert_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("alert {alert_id}"),
            });
        }
        Ok(())
    }

    /// Distinct escalation levels recorded for a request, ascending.
    pub fn escalation_levels(&self, request_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT escalation_level FROM sla_alerts
             WHERE request_id = ?1 ORDER BY escalation_level",
        )?;
        let rows = stmt
            .query_map(params![request_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn alert_stats(&self) -> Result<AlertStats> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(resolved_action IS NULL), 0),
                    COALESCE(SUM(alert_type = 'warning'), 0),
                    COALESCE(SUM(alert_type = 'breach'), 0),
                    COALESCE(SUM(delivery_status = 'failed'), 0)
             FROM sla_alerts",
            [],
            |row| {
                Ok(AlertStats {
                    total: row.get(0)?,
                    open: row.get(1)?,
                    warnings: row.get(2)?,
                    breaches: row.get(3)?,
                    failed_deliveries: row.get(4)?,
                })
            },
        )
        .map_err(StoreError::from)
    }

    /// Expire unresolved alerts created before `cutoff` (retention sweep).
    pub fn expire_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE sla_alerts
             SET resolved_action = 'auto_expired', acknowledged_at = ?1
             WHERE resolved_action IS NULL AND created_at < ?2",
            params![ts(Utc::now()), ts(cutoff)],
        )?;
        Ok(n)
    }

    /// Delete resolved alerts created before `cutoff`.
    pub fn prune_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM sla_alerts
             WHERE resolved_action IS NOT NULL AND created_at < ?1",
            params![ts(cutoff)],
        )?;
        Ok(n)
    }
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<SlaAlert> {
    let alert_type: String = row.get(2)?;
    let sent_at: Option<String> = row.get(6)?;
    let delivery: String = row.get(7)?;
    let resolved: Option<String> = row.get(9)?;
    let acked_at: Option<String> = row.get(11)?;
    let created_at: String = row.get(13)?;

    let parse_opt = |col: usize, v: Option<String>| -> rusqlite::Result<Option<DateTime<Utc>>> {
        v.map(|s| parse_ts(&s).map_err(|e| conversion_err(col, e)))
            .transpose()
    };

    Ok(SlaAlert {
        id: row.get(0)?,
        request_id: row.get(1)?,
        alert_type: alert_type
            .parse()
            .map_err(|e: String| conversion_err(2, StoreError::Invalid(e)))?,
        escalation_level: row.get(3)?,
        minutes_elapsed: row.get(4)?,
        manager_telegram_id: row.get(5)?,
        alert_sent_at: parse_opt(6, sent_at)?,
        delivery_status: delivery
            .parse()
            .map_err(|e: String| conversion_err(7, StoreError::Invalid(e)))?,
        telegram_message_id: row.get(8)?,
        resolved_action: resolved
            .map(|s| {
                s.parse::<ResolvedAction>()
                    .map_err(|e| conversion_err(9, StoreError::Invalid(e)))
            })
            .transpose()?,
        acknowledged_by: row.get(10)?,
        acknowledged_at: parse_opt(11, acked_at)?,
        resolution_notes: row.get(12)?,
        created_at: parse_ts(&created_at).map_err(|e| conversion_err(13, e))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use slabot_core::types::{Category, ChatKind};

    fn store_with_request() -> (Store, i64) {
        let s = Store::open_in_memory().unwrap();
        s.ensure_chat(-1, ChatKind::Group, None).unwrap();
        let r = s
            .create_request(
                -1,
                42,
                Utc.with_ymd_and_hms(2025, 3, 4, 7, 0, 0).unwrap(),
                Category::Request,
                0.9,
                "ai",
            )
            .unwrap();
        (s, r.id)
    }

    #[test]
    fn duplicate_level_per_recipient_conflicts() {
        let (s, rid) = store_with_request();
        s.create_alert(rid, AlertType::Breach, 0, 65, 1001).unwrap();
        let err = s.create_alert(rid, AlertType::Breach, 0, 65, 1001).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // Same level, different recipient is fine.
        s.create_alert(rid, AlertType::Breach, 0, 65, 1002).unwrap();
        // A warning at the same level is a different alert type.
        s.create_alert(rid, AlertType::Warning, 0, 48, 1001).unwrap();
    }

    #[test]
    fn resolved_alert_is_frozen() {
        // Once resolved_action is set, no further mutation.
        let (s, rid) = store_with_request();
        let alert = s.create_alert(rid, AlertType::Breach, 0, 65, 1001).unwrap();
        assert!(s
            .resolve_alert_row(alert.id, ResolvedAction::MarkResolved, Some(7), None, Utc::now())
            .unwrap());
        assert!(!s
            .resolve_alert_row(alert.id, ResolvedAction::AutoExpired, None, None, Utc::now())
            .unwrap());
        let frozen = s.get_alert(alert.id).unwrap();
        assert_eq!(frozen.resolved_action, Some(ResolvedAction::MarkResolved));
        assert_eq!(frozen.acknowledged_by, Some(7));
    }

    #[test]
    fn resolve_open_alerts_closes_every_level() {
        let (s, rid) = store_with_request();
        s.create_alert(rid, AlertType::Breach, 0, 65, 1001).unwrap();
        s.create_alert(rid, AlertType::Breach, 1, 95, 1001).unwrap();
        let n = s
            .resolve_open_alerts(rid, ResolvedAction::AccountantResponded, None, Utc::now())
            .unwrap();
        assert_eq!(n, 2);
        assert!(s.active_alerts().unwrap().is_empty());
    }

    #[test]
    fn delivery_status_keeps_first_message_id() {
        let (s, rid) = store_with_request();
        let alert = s.create_alert(rid, AlertType::Breach, 0, 65, 1001).unwrap();
        s.set_delivery_status(alert.id, DeliveryStatus::Delivered, Some(555), Some(Utc::now()))
            .unwrap();
        // A later update without a message id must not erase the stored one.
        s.set_delivery_status(alert.id, DeliveryStatus::Delivered, None, None)
            .unwrap();
        assert_eq!(s.get_alert(alert.id).unwrap().telegram_message_id, Some(555));
    }

    #[test]
    fn escalation_levels_are_distinct_and_sorted() {
        let (s, rid) = store_with_request();
        s.create_alert(rid, AlertType::Breach, 0, 65, 1001).unwrap();
        s.create_alert(rid, AlertType::Breach, 0, 65, 1002).unwrap();
        s.create_alert(rid, AlertType::Breach, 1, 95, 1001).unwrap();
        assert_eq!(s.escalation_levels(rid).unwrap(), vec![0, 1]);
    }

    #[test]
    fn stats_count_by_type_and_state() {
        let (s, rid) = store_with_request();
        s.create_alert(rid, AlertType::Warning, 0, 48, 1001).unwrap();
        let b = s.create_alert(rid, AlertType::Breach, 0, 65, 1001).unwrap();
        s.resolve_alert_row(b.id, ResolvedAction::MarkResolved, None, None, Utc::now())
            .unwrap();

        let stats = s.alert_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.warnings, 1);
        assert_eq!(stats.breaches, 1);
        assert_eq!(stats.failed_deliveries, 0);
    }
}
