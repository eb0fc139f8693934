//! Error taxonomy shared by the coordination, workflow and evidence layers.

use thiserror::Error;
use uuid::Uuid;

use crate::models::IntentStatus;

pub type Result<T, E = WardenError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An overlapping active claim held by another session blocks the request.
    #[error("claim conflicts with pattern '{pattern}' held by session {session_id} ({agent_name})")]
    Conflict {
        session_id: Uuid,
        agent_name: String,
        claim_id: Uuid,
        pattern: String,
    },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: IntentStatus,
        to: IntentStatus,
    },

    #[error("contract '{contract_ref}' has drifted: pinned {expected}, current {}", .actual.as_deref().unwrap_or("<missing>"))]
    ContractMismatch {
        contract_ref: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("session {session_id} is not active")]
    StaleSession { session_id: Uuid },

    #[error("agent '{agent}' is on the ignore list")]
    AgentIgnored { agent: String },

    #[error("evidence chain for project '{project}' is broken at index {index} (build {build_id})")]
    ChainIntegrity {
        project: String,
        index: u64,
        build_id: String,
    },

    #[error("artifact storage failed: {0}")]
    StorageFailure(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl WardenError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ContractMismatch { .. } => "contract_mismatch",
            Self::StaleSession { .. } => "stale_session",
            Self::AgentIgnored { .. } => "agent_ignored",
            Self::ChainIntegrity { .. } => "chain_integrity",
            Self::StorageFailure(_) => "storage_failure",
            Self::InvalidInput(_) => "invalid_input",
            Self::Persistence(_) => "persistence",
        }
    }

    /// Expected outcomes the calling agent should handle and retry with
    /// corrected input. Everything else is an alert or an internal failure.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Conflict { .. }
                | Self::InvalidTransition { .. }
                | Self::ContractMismatch { .. }
                | Self::StaleSession { .. }
                | Self::AgentIgnored { .. }
                | Self::InvalidInput(_)
        )
    }
}

impl From<rusqlite::Error> for WardenError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.into())
    }
}
