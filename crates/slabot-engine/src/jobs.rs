//! Queue names, job payloads and deterministic job-id construction.
//!
//! Job ids are deterministic so repeated enqueues coalesce and any handler
//! can cancel delayed work by rebuilding the id:
//! `sla-{requestId}`, `sla-warn-{requestId}`, `escalation-{requestId}-{level}`.

use serde::{Deserialize, Serialize};

pub const QUEUE_SLA_TIMERS: &str = "sla-timers";
pub const QUEUE_ALERTS: &str = "alerts";
pub const QUEUE_RETENTION: &str = "data-retention";

pub fn breach_job_id(request_id: i64) -> String {
    format!("sla-{request_id}")
}

pub fn warning_job_id(request_id: i64) -> String {
    format!("sla-warn-{request_id}")
}

pub fn escalation_job_id(request_id: i64, level: i64) -> String {
    format!("escalation-{request_id}-{level}")
}

pub fn send_alert_job_id(alert_id: i64) -> String {
    format!("send-alert-{alert_id}")
}

/// Payloads on the `sla-timers` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SlaJob {
    BreachCheck { request_id: i64 },
    WarningCheck { request_id: i64 },
}

impl SlaJob {
    pub fn kind(&self) -> &'static str {
        match self {
            SlaJob::BreachCheck { .. } => "breach-check",
            SlaJob::WarningCheck { .. } => "warning-check",
        }
    }
}

/// Payloads on the `alerts` queue, consumed by the delivery worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AlertJob {
    /// Deliver one already-created alert row.
    SendAlert { alert_id: i64 },
    /// Create and deliver the alerts of the next escalation level.
    Escalation { request_id: i64, level: i64 },
}

impl AlertJob {
    pub fn kind(&self) -> &'static str {
        match self {
            AlertJob::SendAlert { .. } => "send-alert",
            AlertJob::Escalation { .. } => "escalation",
        }
    }
}

/// Payloads on the `data-retention` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RetentionJob {
    Sweep,
}

impl RetentionJob {
    pub fn kind(&self) -> &'static str {
        "sweep"
    }

    pub const JOB_ID: &'static str = "retention-sweep";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_deterministic() {
        assert_eq!(breach_job_id(17), "sla-17");
        assert_eq!(warning_job_id(17), "sla-warn-17");
        assert_eq!(escalation_job_id(17, 2), "escalation-17-2");
    }

    #[test]
    fn payloads_round_trip_with_kind_tags() {
        let job = SlaJob::BreachCheck { request_id: 5 };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"kind\":\"breach-check\""));
        let back: SlaJob = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, SlaJob::BreachCheck { request_id: 5 }));
    }

    #[test]
    fn alert_job_kinds() {
        assert_eq!(AlertJob::SendAlert { alert_id: 1 }.kind(), "send-alert");
        assert_eq!(
            AlertJob::Escalation {
                request_id: 1,
                level: 1
            }
            .kind(),
            "escalation"
        );
    }
}
