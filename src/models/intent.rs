use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A proposed unit of work.
///
/// Intents are created `pending` and only move along the edges enumerated in
/// [`IntentStatus::can_transition_to`]. `rejected`, `completed` and `failed`
/// are terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    pub id: Uuid,
    pub project: String,
    pub author: String,
    pub description: String,
    /// Reference to the contract this work is bound to (e.g. a spec file).
    pub contract_ref: Option<String>,
    /// Content hash of the contract when the intent was proposed.
    pub contract_hash: Option<String>,
    pub acceptance_criteria: Vec<String>,
    pub out_of_scope: Vec<String>,
    pub status: IntentStatus,
    /// Rejection or failure reason.
    pub status_reason: Option<String>,
    /// Build id of the manifest that completed this intent.
    pub build_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Workflow state of an intent.
///
/// ```text
/// pending ──► approved ──► in_progress ──► completed
///    │                          │
///    └──► rejected              └──► failed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Approved,
    Rejected,
    InProgress,
    Completed,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// The transition table. Every edge of the workflow is listed here and
    /// nowhere else.
    pub fn can_transition_to(&self, target: IntentStatus) -> bool {
        use IntentStatus::*;
        match self {
            Pending => matches!(target, Approved | Rejected),
            Approved => matches!(target, InProgress),
            InProgress => matches!(target, Completed | Failed),
            Rejected | Completed | Failed => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    pub const ALL: [IntentStatus; 6] = [
        Self::Pending,
        Self::Approved,
        Self::Rejected,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
    ];
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for proposing a new intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIntentInput {
    pub project: String,
    pub author: String,
    pub description: String,
    #[serde(default)]
    pub contract_ref: Option<String>,
    /// Pinned contract hash. When omitted but `contract_ref` is set, the
    /// current hash of the contract is resolved and pinned at creation.
    #[serde(default)]
    pub contract_hash: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub out_of_scope: Vec<String>,
}

/// Query filter for listing intents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentFilter {
    pub project: Option<String>,
    pub status: Option<IntentStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in IntentStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in IntentStatus::ALL {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn only_enumerated_edges_are_allowed() {
        use IntentStatus::*;
        let allowed = [
            (Pending, Approved),
            (Pending, Rejected),
            (Approved, InProgress),
            (InProgress, Completed),
            (InProgress, Failed),
        ];

        for from in IntentStatus::ALL {
            for to in IntentStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in IntentStatus::ALL {
            assert_eq!(IntentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(IntentStatus::from_str("done"), None);
    }
}
