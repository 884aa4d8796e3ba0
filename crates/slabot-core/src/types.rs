use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram chat kind, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ChatKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "private" => Ok(ChatKind::Private),
            "group" => Ok(ChatKind::Group),
            "supergroup" => Ok(ChatKind::Supergroup),
            other => Err(format!("unknown chat kind: {other}")),
        }
    }
}

/// Lifecycle state of a tracked client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Awaiting a first response; the SLA timer is running.
    Pending,
    /// An accountant has picked the request up.
    InProgress,
    /// Blocked on the client; the SLA timer is paused.
    WaitingClient,
    /// Handed to another specialist.
    Transferred,
    /// Resolved by an accountant response.
    Answered,
    /// SLA breached; manager escalation chain is active.
    Escalated,
    /// Administratively closed.
    Closed,
}

impl RequestStatus {
    /// True while the request still awaits a resolution.
    pub fn is_open(&self) -> bool {
        !matches!(self, RequestStatus::Answered | RequestStatus::Closed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::WaitingClient => "waiting_client",
            RequestStatus::Transferred => "transferred",
            RequestStatus::Answered => "answered",
            RequestStatus::Escalated => "escalated",
            RequestStatus::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "in_progress" => Ok(RequestStatus::InProgress),
            "waiting_client" => Ok(RequestStatus::WaitingClient),
            "transferred" => Ok(RequestStatus::Transferred),
            "answered" => Ok(RequestStatus::Answered),
            "escalated" => Ok(RequestStatus::Escalated),
            "closed" => Ok(RequestStatus::Closed),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// Kind of an SLA alert row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Warning,
    Breach,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertType::Warning => "warning",
            AlertType::Breach => "breach",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "warning" => Ok(AlertType::Warning),
            "breach" => Ok(AlertType::Breach),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

/// Transport outcome for a single alert row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// How an alert reached its terminal state. Once set the row is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedAction {
    MarkResolved,
    AccountantResponded,
    AutoExpired,
}

impl fmt::Display for ResolvedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolvedAction::MarkResolved => "mark_resolved",
            ResolvedAction::AccountantResponded => "accountant_responded",
            ResolvedAction::AutoExpired => "auto_expired",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ResolvedAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mark_resolved" => Ok(ResolvedAction::MarkResolved),
            "accountant_responded" => Ok(ResolvedAction::AccountantResponded),
            "auto_expired" => Ok(ResolvedAction::AutoExpired),
            other => Err(format!("unknown resolved action: {other}")),
        }
    }
}

/// Classifier verdict for an inbound client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Request,
    Spam,
    Gratitude,
    Clarification,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Request => "REQUEST",
            Category::Spam => "SPAM",
            Category::Gratitude => "GRATITUDE",
            Category::Clarification => "CLARIFICATION",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REQUEST" => Ok(Category::Request),
            "SPAM" => Ok(Category::Spam),
            "GRATITUDE" => Ok(Category::Gratitude),
            "CLARIFICATION" => Ok(Category::Clarification),
            other => Err(format!("unknown category: {other}")),
        }
    }
}
