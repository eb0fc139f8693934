use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A session's registered interest in every path matching `pattern`.
///
/// Claims are released rather than deleted. A claim is *active* while
/// `released_at` is unset and its session is still active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claim {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Normalized path glob, relative to the project root.
    pub pattern: String,
    pub claim_type: ClaimType,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Claim {
    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }
}

/// How strongly a claim asserts ownership.
///
/// - `Hard`: Exclusive. Two hard claims on overlapping patterns from different
///   sessions never coexist.
/// - `Soft`: Advisory. Soft claims never conflict with each other; how they
///   interact with hard claims is decided by [`ClaimPolicy`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Hard,
    Soft,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hard => "hard",
            Self::Soft => "soft",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "hard" => Some(Self::Hard),
            "soft" => Some(Self::Soft),
            _ => None,
        }
    }
}

/// Conflict policy for claims of differing types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimPolicy {
    /// When true, a soft claim is blocked by an overlapping hard claim held by
    /// another session, and a hard claim is blocked by an overlapping soft one.
    pub mixed_claims_conflict: bool,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            mixed_claims_conflict: true,
        }
    }
}

impl ClaimPolicy {
    /// Whether a requested claim of type `requested` must yield to an existing
    /// overlapping claim of type `held` owned by a different session.
    pub fn blocks(&self, requested: ClaimType, held: ClaimType) -> bool {
        match (requested, held) {
            (ClaimType::Hard, ClaimType::Hard) => true,
            (ClaimType::Soft, ClaimType::Soft) => false,
            (ClaimType::Hard, ClaimType::Soft) | (ClaimType::Soft, ClaimType::Hard) => {
                self.mixed_claims_conflict
            }
        }
    }
}

/// Input for registering a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimInput {
    pub pattern: String,
    pub claim_type: ClaimType,
}

/// An active claim joined with the session that holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeldClaim {
    pub claim: Claim,
    pub agent_name: String,
}
