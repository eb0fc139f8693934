use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of events published to the activity bulletin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    SessionStart,
    SessionEnd,
    ClaimRegistered,
    ClaimReleased,
    ClaimConflict,
    ManifestRecorded,
    IntentTransition,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::ClaimRegistered => "claim_registered",
            Self::ClaimReleased => "claim_released",
            Self::ClaimConflict => "claim_conflict",
            Self::ManifestRecorded => "manifest_recorded",
            Self::IntentTransition => "intent_transition",
        }
    }
}

/// A structured event describing a state change in the core.
///
/// Events are fire-and-forget: they are published for observers and never
/// read back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    /// Id of the session, claim, intent or manifest the event is about.
    pub entity_id: String,
    pub project: String,
    pub at: DateTime<Utc>,
    /// Event-specific fields.
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl ActivityEvent {
    pub fn new(
        kind: ActivityKind,
        entity_id: impl ToString,
        project: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            entity_id: entity_id.to_string(),
            project: project.into(),
            at,
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
