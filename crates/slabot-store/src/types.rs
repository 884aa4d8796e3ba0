use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use slabot_core::types::{
    AlertType, Category, ChatKind, DeliveryStatus, RequestStatus, ResolvedAction,
};

/// Transport ids are 64-bit signed integers and are serialized as JSON
/// strings so JavaScript clients never truncate them. Deserialization
/// accepts both forms.
pub mod id_str {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(super) enum IdRepr {
        Num(i64),
        Str(String),
    }

    pub(super) fn repr_to_i64<E: serde::de::Error>(repr: IdRepr) -> Result<i64, E> {
        match repr {
            IdRepr::Num(v) => Ok(v),
            IdRepr::Str(s) => s
                .parse()
                .map_err(|_| E::custom(format!("invalid 64-bit id: {s:?}"))),
        }
    }

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        repr_to_i64(IdRepr::deserialize(d)?)
    }
}

/// `Option<i64>` variant of [`id_str`].
pub mod id_str_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::id_str::{repr_to_i64, IdRepr};

    pub fn serialize<S: Serializer>(v: &Option<i64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(id) => s.serialize_some(&id.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Option::<IdRepr>::deserialize(d)?.map(repr_to_i64).transpose()
    }
}

/// `Option<Vec<i64>>` variant of [`id_str`], for patch structs.
pub mod id_str_opt_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::id_str::{repr_to_i64, IdRepr};

    #[allow(dead_code)]
    pub fn serialize<S: Serializer>(v: &Option<Vec<i64>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(ids) => {
                let strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                s.serialize_some(&strings)
            }
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<i64>>, D::Error> {
        Option::<Vec<IdRepr>>::deserialize(d)?
            .map(|ids| ids.into_iter().map(repr_to_i64).collect())
            .transpose()
    }
}

/// `Vec<i64>` variant of [`id_str`].
pub mod id_str_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::id_str::{repr_to_i64, IdRepr};

    pub fn serialize<S: Serializer>(v: &[i64], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(v.iter().map(|id| id.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<i64>, D::Error> {
        Vec::<IdRepr>::deserialize(d)?
            .into_iter()
            .map(repr_to_i64)
            .collect()
    }
}

/// A monitored conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    #[serde(with = "id_str")]
    pub chat_id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    #[serde(with = "id_str_opt")]
    pub accountant_user_id: Option<i64>,
    pub accountant_usernames: Vec<String>,
    pub sla_threshold_minutes: i64,
    pub monitoring_enabled: bool,
    pub is_24x7: bool,
    #[serde(with = "id_str_vec")]
    pub manager_ids: Vec<i64>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    /// True when the sender is this chat's accountant (by id or username).
    pub fn is_accountant(&self, sender_id: i64, username: Option<&str>) -> bool {
        if self.accountant_user_id == Some(sender_id) {
            return true;
        }
        match username {
            Some(name) => self
                .accountant_usernames
                .iter()
                .any(|u| u.eq_ignore_ascii_case(name.trim_start_matches('@'))),
            None => false,
        }
    }
}

/// Partial update applied to a chat row; only provided fields are written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ChatPatch {
    pub title: Option<String>,
    #[serde(with = "id_str_opt")]
    pub accountant_user_id: Option<i64>,
    pub accountant_usernames: Option<Vec<String>>,
    pub sla_threshold_minutes: Option<i64>,
    pub monitoring_enabled: Option<bool>,
    pub is_24x7: Option<bool>,
    #[serde(with = "id_str_opt_vec")]
    pub manager_ids: Option<Vec<i64>>,
    pub deleted: Option<bool>,
}

/// One weekday row of a working schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub weekday: u8,
    pub start_time: String,
    pub end_time: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holiday {
    pub scope: String,
    pub chat_id: Option<i64>,
    pub date: NaiveDate,
    pub name: Option<String>,
}

/// One row of the append-only inbound message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(with = "id_str")]
    pub chat_id: i64,
    #[serde(with = "id_str")]
    pub message_id: i64,
    pub edit_version: i64,
    #[serde(with = "id_str")]
    pub sender_id: i64,
    pub sender_username: Option<String>,
    pub text: String,
    pub is_accountant: bool,
    #[serde(with = "id_str_opt")]
    pub reply_to_message_id: Option<i64>,
    pub message_type: String,
    pub sent_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

/// Fields supplied by the ingest path when appending a message row.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: i64,
    pub sender_username: Option<String>,
    pub text: String,
    pub is_accountant: bool,
    pub reply_to_message_id: Option<i64>,
    pub message_type: String,
    pub sent_at: DateTime<Utc>,
}

/// A classified, SLA-tracked client message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    pub id: i64,
    #[serde(with = "id_str")]
    pub chat_id: i64,
    #[serde(with = "id_str")]
    pub message_id: i64,
    pub status: RequestStatus,
    pub received_at: DateTime<Utc>,
    pub category: Option<Category>,
    pub confidence: Option<f64>,
    pub classifier_model: Option<String>,
    pub sla_timer_started_at: Option<DateTime<Utc>>,
    pub sla_timer_paused_at: Option<DateTime<Utc>>,
    pub sla_breached: bool,
    pub response_at: Option<DateTime<Utc>>,
    pub response_time_minutes: Option<i64>,
    #[serde(with = "id_str_opt")]
    pub response_message_id: Option<i64>,
    #[serde(with = "id_str_opt")]
    pub responded_by: Option<i64>,
    pub sla_working_minutes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a request was resolved, recorded by [`crate::Store::answer_request`].
#[derive(Debug, Clone)]
pub struct Resolution {
    pub responded_by: Option<i64>,
    pub response_message_id: Option<i64>,
    pub response_at: DateTime<Utc>,
    pub elapsed_minutes: i64,
    pub breached: bool,
}

/// One escalation alert addressed to one manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaAlert {
    pub id: i64,
    pub request_id: i64,
    pub alert_type: AlertType,
    pub escalation_level: i64,
    pub minutes_elapsed: i64,
    #[serde(with = "id_str")]
    pub manager_telegram_id: i64,
    pub alert_sent_at: Option<DateTime<Utc>>,
    pub delivery_status: DeliveryStatus,
    #[serde(with = "id_str_opt")]
    pub telegram_message_id: Option<i64>,
    pub resolved_action: Option<ResolvedAction>,
    #[serde(with = "id_str_opt")]
    pub acknowledged_by: Option<i64>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The singleton configuration row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub schedule_days: Vec<u8>,
    pub schedule_start: String,
    pub schedule_end: String,
    pub timezone: String,
    pub sla_threshold_minutes: i64,
    pub max_escalations: i64,
    pub escalation_interval_minutes: i64,
    pub warning_percent: i64,
    pub ai_confidence_threshold: f64,
    pub keyword_confidence_threshold: f64,
    pub cache_ttl_minutes: i64,
    pub preview_length: usize,
    #[serde(with = "id_str_vec")]
    pub global_manager_ids: Vec<i64>,
    pub retention_days: i64,
    pub updated_at: DateTime<Utc>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            schedule_days: vec![1, 2, 3, 4, 5],
            schedule_start: "09:00".to_string(),
            schedule_end: "18:00".to_string(),
            timezone: "Europe/Moscow".to_string(),
            sla_threshold_minutes: 60,
            max_escalations: 3,
            escalation_interval_minutes: 30,
            warning_percent: 80,
            ai_confidence_threshold: 0.7,
            keyword_confidence_threshold: 0.5,
            cache_ttl_minutes: 24 * 60,
            preview_length: 200,
            global_manager_ids: Vec::new(),
            retention_days: 365,
            updated_at: Utc::now(),
        }
    }
}

/// Partial update for the settings singleton; only provided fields are
/// written, unknown keys are rejected at the RPC boundary.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SettingsPatch {
    pub schedule_days: Option<Vec<u8>>,
    pub schedule_start: Option<String>,
    pub schedule_end: Option<String>,
    pub timezone: Option<String>,
    pub sla_threshold_minutes: Option<i64>,
    pub max_escalations: Option<i64>,
    pub escalation_interval_minutes: Option<i64>,
    pub warning_percent: Option<i64>,
    pub ai_confidence_threshold: Option<f64>,
    pub keyword_confidence_threshold: Option<f64>,
    pub cache_ttl_minutes: Option<i64>,
    pub preview_length: Option<usize>,
    #[serde(with = "id_str_opt_vec")]
    pub global_manager_ids: Option<Vec<i64>>,
    pub retention_days: Option<i64>,
}
