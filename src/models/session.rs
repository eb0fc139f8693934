use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An agent's working session on a project.
///
/// Sessions are the unit of ownership for claims: every claim belongs to
/// exactly one session, and ending a session releases all of its claims in
/// the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    /// Project the session works against. Claim conflicts are scoped to it.
    pub project: String,
    pub agent_name: String,
    /// Intent this session is working towards, if any.
    pub intent_id: Option<Uuid>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// The status of a session.
///
/// - `Active`: The agent may register claims and heartbeat
/// - `Ended`: Terminal; all claims have been released
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The agent called `end_session`.
    Explicit,
    /// The staleness sweep found no activity within the configured timeout.
    Timeout,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(Self::Explicit),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// Input for starting a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionInput {
    pub project: String,
    pub agent_name: String,
    #[serde(default)]
    pub intent_id: Option<Uuid>,
}

/// Query filter for listing sessions. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    pub project: Option<String>,
    pub status: Option<SessionStatus>,
    /// Only sessions started at or after this instant.
    pub started_after: Option<DateTime<Utc>>,
    /// Only sessions started before this instant.
    pub started_before: Option<DateTime<Utc>>,
}

/// Result of ending a session: the ended session and the claims released by
/// this call (empty when the session had already ended).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEnded {
    pub session: Session,
    pub released: Vec<super::Claim>,
}
