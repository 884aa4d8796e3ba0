use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::store::{ts, Store};

/// Headline numbers for the admin dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total_requests: i64,
    pub open_requests: i64,
    pub answered_requests: i64,
    pub breached_requests: i64,
    pub avg_response_minutes: Option<f64>,
    pub open_alerts: i64,
    pub monitored_chats: i64,
}

/// Per-accountant response aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct AccountantStats {
    #[serde(with = "crate::analytics::id_string")]
    pub responded_by: i64,
    pub answered: i64,
    pub avg_response_minutes: Option<f64>,
    pub breached: i64,
}

/// SLA compliance over a reporting window.
#[derive(Debug, Clone, Serialize)]
pub struct SlaCompliance {
    pub total_answered: i64,
    pub answered_within_sla: i64,
    pub compliance_percent: f64,
}

/// Response-time distribution over a reporting window.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseTimeStats {
    pub count: i64,
    pub avg_minutes: Option<f64>,
    pub min_minutes: Option<i64>,
    pub max_minutes: Option<i64>,
    pub p50_minutes: Option<i64>,
    pub p95_minutes: Option<i64>,
}

impl Store {
    pub fn dashboard(&self) -> Result<Dashboard> {
        let conn = self.conn();
        conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM client_requests),
                (SELECT COUNT(*) FROM client_requests
                   WHERE status NOT IN ('answered','closed')),
                (SELECT COUNT(*) FROM client_requests WHERE status = 'answered'),
                (SELECT COUNT(*) FROM client_requests WHERE sla_breached = 1),
                (SELECT AVG(response_time_minutes) FROM client_requests
                   WHERE response_time_minutes IS NOT NULL),
                (SELECT COUNT(*) FROM sla_alerts WHERE resolved_action IS NULL),
                (SELECT COUNT(*) FROM chats
                   WHERE monitoring_enabled = 1 AND deleted_at IS NULL)",
            [],
            |row| {
                Ok(Dashboard {
                    total_requests: row.get(0)?,
                    open_requests: row.get(1)?,
                    answered_requests: row.get(2)?,
                    breached_requests: row.get(3)?,
                    avg_response_minutes: row.get(4)?,
                    open_alerts: row.get(5)?,
                    monitored_chats: row.get(6)?,
                })
            },
        )
        .map_err(StoreError::from)
    }

    pub fn accountant_stats(&self) -> Result<Vec<AccountantStats>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT responded_by, COUNT(*), AVG(response_time_minutes),
                    COALESCE(SUM(sla_breached), 0)
             FROM client_requests
             WHERE responded_by IS NOT NULL AND status = 'answered'
             GROUP BY responded_by
             ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AccountantStats {
                    responded_by: row.get(0)?,
                    answered: row.get(1)?,
                    avg_response_minutes: row.get(2)?,
                    breached: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn sla_compliance(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<SlaCompliance> {
        let conn = self.conn();
        let (total, within): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(sla_breached = 0), 0)
             FROM client_requests
             WHERE status = 'answered' AND received_at >= ?1 AND received_at < ?2",
            params![ts(from), ts(to)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let percent = if total == 0 {
            100.0
        } else {
            within as f64 * 100.0 / total as f64
        };
        Ok(SlaCompliance {
            total_answered: total,
            answered_within_sla: within,
            compliance_percent: percent,
        })
    }

    pub fn response_time(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ResponseTimeStats> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT response_time_minutes FROM client_requests
             WHERE response_time_minutes IS NOT NULL
               AND received_at >= ?1 AND received_at < ?2
             ORDER BY response_time_minutes",
        )?;
        let minutes: Vec<i64> = stmt
            .query_map(params![ts(from), ts(to)], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        if minutes.is_empty() {
            return Ok(ResponseTimeStats {
                count: 0,
                avg_minutes: None,
                min_minutes: None,
                max_minutes: None,
                p50_minutes: None,
                p95_minutes: None,
            });
        }

        let count = minutes.len();
        let sum: i64 = minutes.iter().sum();
        Ok(ResponseTimeStats {
            count: count as i64,
            avg_minutes: Some(sum as f64 / count as f64),
            min_minutes: Some(minutes[0]),
            max_minutes: Some(minutes[count - 1]),
            p50_minutes: Some(percentile(&minutes, 50)),
            p95_minutes: Some(percentile(&minutes, 95)),
        })
    }

    /// CSV export of requests in a reporting window, newest first.
    /// Transport ids are emitted as plain text so spreadsheet tools do not
    /// truncate 64-bit values.
    pub fn export_report(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<String> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, message_id, status, received_at, category,
                    sla_breached, response_time_minutes, responded_by
             FROM client_requests
             WHERE received_at >= ?1 AND received_at < ?2
             ORDER BY received_at DESC",
        )?;
        let mut out = String::from(
            "request_id,chat_id,message_id,status,received_at,category,breached,response_time_minutes,responded_by\n",
        );
        let rows = stmt.query_map(params![ts(from), ts(to)], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, Option<i64>>(8)?,
            ))
        })?;
        for row in rows.filter_map(|r| r.ok()) {
            let (id, chat_id, message_id, status, received_at, category, breached, rt, by) = row;
            out.push_str(&format!(
                "{id},{chat_id},{message_id},{status},{received_at},{},{},{},{}\n",
                category.unwrap_or_default(),
                breached,
                rt.map(|v| v.to_string()).unwrap_or_default(),
                by.map(|v| v.to_string()).unwrap_or_default(),
            ));
        }
        Ok(out)
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[i64], p: usize) -> i64 {
    let rank = (p * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1]
}

/// Serialize i64 transport ids as JSON strings.
pub(crate) mod id_string {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use slabot_core::types::{Category, ChatKind};
    use crate::types::Resolution;

    fn seeded() -> Store {
        let s = Store::open_in_memory().unwrap();
        s.ensure_chat(-1, ChatKind::Group, None).unwrap();
        let base = Utc.with_ymd_and_hms(2025, 3, 4, 7, 0, 0).unwrap();
        for (i, minutes) in [10, 30, 50, 70].iter().enumerate() {
            let r = s
                .create_request(-1, i as i64 + 1, base, Category::Request, 0.9, "ai")
                .unwrap();
            s.answer_request(
                r.id,
                &Resolution {
                    responded_by: Some(77),
                    response_message_id: None,
                    response_at: base + chrono::Duration::minutes(*minutes),
                    elapsed_minutes: *minutes,
                    breached: *minutes >= 60,
                },
            )
            .unwrap();
        }
        s
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn dashboard_counts() {
        let s = seeded();
        let d = s.dashboard().unwrap();
        assert_eq!(d.total_requests, 4);
        assert_eq!(d.open_requests, 0);
        assert_eq!(d.answered_requests, 4);
        assert_eq!(d.breached_requests, 1);
        assert_eq!(d.avg_response_minutes, Some(40.0));
    }

    #[test]
    fn compliance_over_window() {
        let s = seeded();
        let (from, to) = window();
        let c = s.sla_compliance(from, to).unwrap();
        assert_eq!(c.total_answered, 4);
        assert_eq!(c.answered_within_sla, 3);
        assert!((c.compliance_percent - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn response_time_distribution() {
        let s = seeded();
        let (from, to) = window();
        let rt = s.response_time(from, to).unwrap();
        assert_eq!(rt.count, 4);
        assert_eq!(rt.min_minutes, Some(10));
        assert_eq!(rt.max_minutes, Some(70));
        assert_eq!(rt.p50_minutes, Some(30));
        assert_eq!(rt.p95_minutes, Some(70));
    }

    #[test]
    fn accountant_stats_group_by_responder() {
        let s = seeded();
        let stats = s.accountant_stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].responded_by, 77);
        assert_eq!(stats[0].answered, 4);
        assert_eq!(stats[0].breached, 1);
    }

    #[test]
    fn csv_has_header_and_rows() {
        let s = seeded();
        let (from, to) = window();
        let csv = s.export_report(from, to).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("request_id,chat_id"));
    }
}
