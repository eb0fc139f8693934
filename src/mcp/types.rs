//! Request and response types for MCP tools.

use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::{Claim, Session};

// ============================================================
// Request Types
// ============================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartSessionRequest {
    #[schemars(description = "Project you are working on; claims only conflict within a project")]
    pub project: String,
    #[schemars(description = "Your agent name, as shown to other agents on conflict")]
    pub agent_name: String,
    #[schemars(description = "UUID of the intent this session works towards, if any")]
    #[serde(default)]
    pub intent_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClaimPathsRequest {
    #[schemars(description = "The UUID of your active session")]
    pub session_id: String,
    #[schemars(
        description = "Path globs you intend to edit, relative to the project root (e.g. 'src/payments/**', 'README.md')"
    )]
    pub patterns: Vec<String>,
    #[schemars(
        description = "'hard' for exclusive edits (default) or 'soft' to advertise interest without blocking other soft claims"
    )]
    #[serde(default = "default_claim_type")]
    pub claim_type: String,
}

fn default_claim_type() -> String {
    "hard".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReleaseClaimRequest {
    #[schemars(description = "The UUID of the claim to release")]
    pub claim_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionIdRequest {
    #[schemars(description = "The UUID of your session")]
    pub session_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetIntentRequest {
    #[schemars(description = "The UUID of the intent")]
    pub intent_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BuildFileInput {
    #[schemars(description = "Path of the produced file, relative to the project root")]
    pub path: String,
    #[schemars(description = "UTF-8 content of the file")]
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecordBuildRequest {
    #[schemars(description = "Project whose evidence ledger receives the manifest")]
    pub project: String,
    #[schemars(description = "The UUID of the intent the build was produced for")]
    pub intent_id: String,
    #[schemars(description = "Every file the build produced")]
    pub files: Vec<BuildFileInput>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VerifyChainRequest {
    #[schemars(description = "Project whose evidence ledger should be verified")]
    pub project: String,
}

// ============================================================
// Response Types
// ============================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub project: String,
    pub agent_name: String,
    pub status: String,
    pub last_activity_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
}

impl From<Session> for SessionInfo {
    fn from(s: Session) -> Self {
        Self {
            id: s.id.to_string(),
            project: s.project,
            agent_name: s.agent_name,
            status: s.status.as_str().to_string(),
            last_activity_at: s.last_activity_at.to_rfc3339(),
            end_reason: s.end_reason.map(|r| r.as_str().to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimInfo {
    pub id: String,
    pub pattern: String,
    pub claim_type: String,
    pub released: bool,
}

impl From<Claim> for ClaimInfo {
    fn from(c: Claim) -> Self {
        Self {
            released: c.is_released(),
            id: c.id.to_string(),
            pattern: c.pattern,
            claim_type: c.claim_type.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimPathsResponse {
    pub session_id: String,
    pub claims: Vec<ClaimInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub session: SessionInfo,
    pub released_claims: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordBuildResponse {
    pub build_id: String,
    pub sequence: u64,
    pub chain_hash: String,
    pub files: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyChainResponse {
    pub project: String,
    pub valid: bool,
    pub length: Option<u64>,
    pub broken_at: Option<u64>,
    pub message: String,
}
