use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WardenError;
use crate::models::*;
use crate::Warden;

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ============================================================
// Error Handling
// ============================================================

/// Map a domain error to a response.
///
/// Expected outcomes are returned with their message so the agent can react.
/// Persistence errors are logged server-side and the client only sees a
/// generic message to avoid leaking internal details.
fn api_error(e: WardenError) -> (StatusCode, String) {
    let status = match &e {
        WardenError::NotFound { .. } => StatusCode::NOT_FOUND,
        WardenError::Conflict { .. }
        | WardenError::InvalidTransition { .. }
        | WardenError::ContractMismatch { .. } => StatusCode::CONFLICT,
        WardenError::StaleSession { .. } => StatusCode::GONE,
        WardenError::AgentIgnored { .. } => StatusCode::FORBIDDEN,
        WardenError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WardenError::ChainIntegrity { .. } | WardenError::StorageFailure(_) => {
            tracing::error!("Audit alert: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
        WardenError::Persistence(_) => return internal_error(e),
    };

    tracing::debug!("Request refused: {}", e);
    (status, e.to_string())
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Internal error: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Sessions
// ============================================================

pub async fn start_session(
    State(warden): State<Warden>,
    Json(input): Json<StartSessionInput>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    warden
        .sessions()
        .start_session(input)
        .map(|s| (StatusCode::CREATED, Json(s)))
        .map_err(api_error)
}

pub async fn list_sessions(
    State(warden): State<Warden>,
    Query(filter): Query<SessionFilter>,
) -> ApiResult<Json<Vec<Session>>> {
    warden
        .sessions()
        .list_sessions(&filter)
        .map(Json)
        .map_err(api_error)
}

pub async fn get_session(
    State(warden): State<Warden>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    warden.sessions().get_session(id).map(Json).map_err(api_error)
}

pub async fn heartbeat(
    State(warden): State<Warden>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    warden.sessions().heartbeat(id).map(Json).map_err(api_error)
}

pub async fn end_session(
    State(warden): State<Warden>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionEnded>> {
    warden.sessions().end_session(id).map(Json).map_err(api_error)
}

/// Run one staleness sweep now and return the sessions it ended.
pub async fn sweep(State(warden): State<Warden>) -> ApiResult<Json<Vec<SessionEnded>>> {
    warden.sessions().sweep_stale().map(Json).map_err(api_error)
}

// ============================================================
// Claims
// ============================================================

pub async fn create_claim(
    State(warden): State<Warden>,
    Path(session_id): Path<Uuid>,
    Json(input): Json<ClaimInput>,
) -> ApiResult<(StatusCode, Json<Claim>)> {
    warden
        .sessions()
        .claim(session_id, input)
        .map(|c| (StatusCode::CREATED, Json(c)))
        .map_err(api_error)
}

pub async fn list_session_claims(
    State(warden): State<Warden>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Claim>>> {
    warden
        .sessions()
        .list_claims(session_id)
        .map(Json)
        .map_err(api_error)
}

pub async fn get_claim(State(warden): State<Warden>, Path(id): Path<Uuid>) -> ApiResult<Json<Claim>> {
    warden.sessions().get_claim(id).map(Json).map_err(api_error)
}

pub async fn release_claim(
    State(warden): State<Warden>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Claim>> {
    warden.sessions().release(id).map(Json).map_err(api_error)
}

pub async fn list_active_claims(
    State(warden): State<Warden>,
    Path(project): Path<String>,
) -> ApiResult<Json<Vec<HeldClaim>>> {
    warden
        .sessions()
        .active_claims(&project)
        .map(Json)
        .map_err(api_error)
}

// ============================================================
// Intents
// ============================================================

#[derive(Debug, Deserialize)]
pub struct ReasonInput {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteIntentInput {
    pub build_id: String,
}

pub async fn create_intent(
    State(warden): State<Warden>,
    Json(input): Json<CreateIntentInput>,
) -> ApiResult<(StatusCode, Json<Intent>)> {
    warden
        .intents()
        .create_intent(input)
        .map(|i| (StatusCode::CREATED, Json(i)))
        .map_err(api_error)
}

pub async fn list_intents(
    State(warden): State<Warden>,
    Query(filter): Query<IntentFilter>,
) -> ApiResult<Json<Vec<Intent>>> {
    warden
        .intents()
        .list_intents(&filter)
        .map(Json)
        .map_err(api_error)
}

pub async fn get_intent(
    State(warden): State<Warden>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Intent>> {
    warden.intents().get_intent(id).map(Json).map_err(api_error)
}

pub async fn approve_intent(
    State(warden): State<Warden>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Intent>> {
    warden.intents().approve(id).map(Json).map_err(api_error)
}

pub async fn reject_intent(
    State(warden): State<Warden>,
    Path(id): Path<Uuid>,
    Json(input): Json<ReasonInput>,
) -> ApiResult<Json<Intent>> {
    warden
        .intents()
        .reject(id, input.reason.as_deref())
        .map(Json)
        .map_err(api_error)
}

pub async fn start_intent(
    State(warden): State<Warden>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Intent>> {
    warden.intents().start(id).map(Json).map_err(api_error)
}

pub async fn complete_intent(
    State(warden): State<Warden>,
    Path(id): Path<Uuid>,
    Json(input): Json<CompleteIntentInput>,
) -> ApiResult<Json<Intent>> {
    let manifest = warden
        .vault()
        .get_manifest(&input.build_id)
        .map_err(api_error)?;
    warden
        .intents()
        .complete(id, &manifest)
        .map(Json)
        .map_err(api_error)
}

pub async fn fail_intent(
    State(warden): State<Warden>,
    Path(id): Path<Uuid>,
    Json(input): Json<ReasonInput>,
) -> ApiResult<Json<Intent>> {
    let reason = input.reason.unwrap_or_else(|| "unspecified".to_string());
    warden
        .intents()
        .fail(id, &reason)
        .map(Json)
        .map_err(api_error)
}

// ============================================================
// Evidence
// ============================================================

/// A produced file as sent over HTTP. Content is UTF-8 text.
#[derive(Debug, Deserialize)]
pub struct BuildFileInput {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordBuildInput {
    pub intent_id: Uuid,
    pub files: Vec<BuildFileInput>,
}

pub async fn record_build(
    State(warden): State<Warden>,
    Path(project): Path<String>,
    Json(input): Json<RecordBuildInput>,
) -> ApiResult<(StatusCode, Json<EvidenceManifest>)> {
    let files = input
        .files
        .into_iter()
        .map(|f| BuildFile::new(f.path, f.content))
        .collect();

    warden
        .record_build(&project, input.intent_id, files)
        .map(|m| (StatusCode::CREATED, Json(m)))
        .map_err(api_error)
}

pub async fn list_manifests(
    State(warden): State<Warden>,
    Query(filter): Query<ManifestFilter>,
) -> ApiResult<Json<Vec<EvidenceManifest>>> {
    warden
        .vault()
        .list_manifests(&filter)
        .map(Json)
        .map_err(api_error)
}

pub async fn get_manifest(
    State(warden): State<Warden>,
    Path(build_id): Path<String>,
) -> ApiResult<Json<EvidenceManifest>> {
    warden
        .vault()
        .get_manifest(&build_id)
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactReport {
    pub build_id: String,
    /// Paths whose artifact is missing or corrupt.
    pub damaged: Vec<String>,
}

pub async fn verify_manifest_artifacts(
    State(warden): State<Warden>,
    Path(build_id): Path<String>,
) -> ApiResult<Json<ArtifactReport>> {
    let damaged = warden
        .vault()
        .verify_artifacts(&build_id)
        .map_err(api_error)?;
    Ok(Json(ArtifactReport { build_id, damaged }))
}

/// Chain verification result. A broken chain is a finding, not a failed
/// request, so it is reported with `200 OK`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChainReport {
    pub project: String,
    pub valid: bool,
    pub length: Option<u64>,
    pub head: Option<String>,
    pub broken_at: Option<u64>,
    pub broken_build_id: Option<String>,
}

pub async fn verify_chain(
    State(warden): State<Warden>,
    Path(project): Path<String>,
) -> ApiResult<Json<ChainReport>> {
    match warden.vault().verify_chain(&project) {
        Ok(summary) => Ok(Json(ChainReport {
            project: summary.project,
            valid: true,
            length: Some(summary.length),
            head: summary.head,
            broken_at: None,
            broken_build_id: None,
        })),
        Err(WardenError::ChainIntegrity {
            project,
            index,
            build_id,
        }) => Ok(Json(ChainReport {
            project,
            valid: false,
            length: None,
            head: None,
            broken_at: Some(index),
            broken_build_id: Some(build_id),
        })),
        Err(e) => Err(api_error(e)),
    }
}

pub async fn get_artifact(
    State(warden): State<Warden>,
    Path(hash): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = warden.vault().get_artifact(&hash).map_err(api_error)?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}
