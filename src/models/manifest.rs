use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The record of files produced by one build.
///
/// Immutable once appended to its project's ledger. `chain_hash` binds the
/// manifest's canonical content to the previous manifest of the same project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceManifest {
    pub build_id: String,
    pub project: String,
    pub intent_id: Uuid,
    /// Zero-based position in the project's ledger.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    /// Produced files keyed by path. A `BTreeMap` keeps paths sorted.
    pub files: BTreeMap<String, FileEvidence>,
    pub chain_hash: String,
}

/// Content hash and size of one produced file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEvidence {
    pub path: String,
    /// Hex SHA-256 of the file bytes; also the artifact's storage key.
    pub hash: String,
    pub size: u64,
}

/// A file handed over by the build collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl BuildFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Outcome of verifying a project's ledger end to end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainSummary {
    pub project: String,
    /// Number of manifests checked.
    pub length: u64,
    /// Chain hash of the newest manifest, if any.
    pub head: Option<String>,
}

/// Query filter for listing manifests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestFilter {
    pub project: Option<String>,
    pub intent_id: Option<Uuid>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}
