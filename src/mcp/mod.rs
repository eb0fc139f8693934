//! MCP server exposing the coordination tools agents call while they work.

mod types;

pub use types::*;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::WardenError;
use crate::models::*;
use crate::Warden;

#[derive(Clone)]
pub struct McpServer {
    warden: Warden,
    tool_router: ToolRouter<Self>,
}

impl McpServer {
    pub fn new(warden: Warden) -> Self {
        Self {
            warden,
            tool_router: Self::tool_router(),
        }
    }

    fn parse_uuid(s: &str) -> Result<Uuid, McpError> {
        Uuid::parse_str(s)
            .map_err(|e| McpError::invalid_params(format!("Invalid UUID: {}", e), None))
    }

    /// Expected outcomes become `invalid_params` errors carrying the error
    /// kind (and the blocking claim on conflict) so the agent can react.
    fn map_error(e: WardenError) -> McpError {
        if !e.is_expected() {
            tracing::error!("Tool failed: {:#}", e);
            return McpError::internal_error(e.to_string(), Some(json!({ "kind": e.kind() })));
        }

        let data = match &e {
            WardenError::Conflict {
                session_id,
                agent_name,
                claim_id,
                pattern,
            } => json!({
                "kind": e.kind(),
                "blocking_session_id": session_id,
                "blocking_agent": agent_name,
                "blocking_claim_id": claim_id,
                "blocking_pattern": pattern,
            }),
            _ => json!({ "kind": e.kind() }),
        };
        McpError::invalid_params(e.to_string(), Some(data))
    }

    fn to_json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    // ============================================================
    // Tool logic, callable directly from tests
    // ============================================================

    pub fn handle_start_session(&self, req: StartSessionRequest) -> Result<SessionInfo, McpError> {
        let intent_id = req.intent_id.as_deref().map(Self::parse_uuid).transpose()?;
        self.warden
            .sessions()
            .start_session(StartSessionInput {
                project: req.project,
                agent_name: req.agent_name,
                intent_id,
            })
            .map(SessionInfo::from)
            .map_err(Self::map_error)
    }

    /// Claim every pattern or none: on the first refusal, the claims already
    /// taken by this call are released again.
    pub fn handle_claim_paths(&self, req: ClaimPathsRequest) -> Result<ClaimPathsResponse, McpError> {
        let session_id = Self::parse_uuid(&req.session_id)?;
        let claim_type = ClaimType::from_str(&req.claim_type).ok_or_else(|| {
            McpError::invalid_params(
                format!(
                    "Invalid claim_type '{}'. Must be: hard or soft",
                    req.claim_type
                ),
                None,
            )
        })?;
        if req.patterns.is_empty() {
            return Err(McpError::invalid_params("No patterns given", None));
        }

        let sessions = self.warden.sessions();
        let mut claims = Vec::with_capacity(req.patterns.len());
        for pattern in req.patterns {
            match sessions.claim(session_id, ClaimInput { pattern, claim_type }) {
                Ok(claim) => claims.push(claim),
                Err(e) => {
                    for taken in &claims {
                        if let Err(release_err) = sessions.release(taken.id) {
                            tracing::warn!(claim_id = %taken.id, "Failed to undo claim: {}", release_err);
                        }
                    }
                    return Err(Self::map_error(e));
                }
            }
        }

        Ok(ClaimPathsResponse {
            session_id: session_id.to_string(),
            claims: claims.into_iter().map(ClaimInfo::from).collect(),
        })
    }

    pub fn handle_release_claim(&self, req: ReleaseClaimRequest) -> Result<ClaimInfo, McpError> {
        let claim_id = Self::parse_uuid(&req.claim_id)?;
        self.warden
            .sessions()
            .release(claim_id)
            .map(ClaimInfo::from)
            .map_err(Self::map_error)
    }

    pub fn handle_heartbeat(&self, req: SessionIdRequest) -> Result<SessionInfo, McpError> {
        let session_id = Self::parse_uuid(&req.session_id)?;
        self.warden
            .sessions()
            .heartbeat(session_id)
            .map(SessionInfo::from)
            .map_err(Self::map_error)
    }

    pub fn handle_end_session(&self, req: SessionIdRequest) -> Result<EndSessionResponse, McpError> {
        let session_id = Self::parse_uuid(&req.session_id)?;
        let ended = self
            .warden
            .sessions()
            .end_session(session_id)
            .map_err(Self::map_error)?;
        Ok(EndSessionResponse {
            released_claims: ended.released.len(),
            session: ended.session.into(),
        })
    }

    pub fn handle_get_intent(&self, req: GetIntentRequest) -> Result<Intent, McpError> {
        let intent_id = Self::parse_uuid(&req.intent_id)?;
        self.warden
            .intents()
            .get_intent(intent_id)
            .map_err(Self::map_error)
    }

    pub fn handle_record_build(&self, req: RecordBuildRequest) -> Result<RecordBuildResponse, McpError> {
        let intent_id = Self::parse_uuid(&req.intent_id)?;
        let files = req
            .files
            .into_iter()
            .map(|f| BuildFile::new(f.path, f.content))
            .collect();

        let manifest = self
            .warden
            .record_build(&req.project, intent_id, files)
            .map_err(Self::map_error)?;

        Ok(RecordBuildResponse {
            build_id: manifest.build_id,
            sequence: manifest.sequence,
            chain_hash: manifest.chain_hash,
            files: manifest.files.len(),
        })
    }

    pub fn handle_verify_chain(&self, req: VerifyChainRequest) -> Result<VerifyChainResponse, McpError> {
        match self.warden.vault().verify_chain(&req.project) {
            Ok(summary) => Ok(VerifyChainResponse {
                message: format!("Chain of {} manifests is intact", summary.length),
                project: summary.project,
                valid: true,
                length: Some(summary.length),
                broken_at: None,
            }),
            Err(WardenError::ChainIntegrity {
                project,
                index,
                build_id,
            }) => Ok(VerifyChainResponse {
                message: format!(
                    "Manifest {} at index {} does not match the chain",
                    build_id, index
                ),
                project,
                valid: false,
                length: None,
                broken_at: Some(index),
            }),
            Err(e) => Err(Self::map_error(e)),
        }
    }
}

#[tool_router]
impl McpServer {
    // ============================================================
    // Session Tools
    // ============================================================

    #[tool(
        description = "Open a working session on a project. Call this FIRST, before claiming any paths. Returns the session id you pass to every other tool. Fails if your agent name is on the ignore list."
    )]
    async fn start_session(
        &self,
        params: Parameters<StartSessionRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.handle_start_session(params.0)?)
    }

    #[tool(
        description = "Claim the paths you are about to edit. Call this BEFORE changing any file. Either every pattern is claimed or none is. If another agent holds an overlapping claim the call fails with kind 'conflict' naming the blocking agent and pattern; pick other work or wait for them to finish. Claims also count as activity for your session."
    )]
    async fn claim_paths(
        &self,
        params: Parameters<ClaimPathsRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.handle_claim_paths(params.0)?)
    }

    #[tool(
        description = "Release a claim once you are done with those paths so other agents may edit them. Safe to call more than once."
    )]
    async fn release_claim(
        &self,
        params: Parameters<ReleaseClaimRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.handle_release_claim(params.0)?)
    }

    #[tool(
        description = "Signal that you are still working. Sessions without activity are ended by the staleness sweep and lose their claims. Fails with kind 'stale_session' if your session has already ended; start a new one."
    )]
    async fn heartbeat(
        &self,
        params: Parameters<SessionIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.handle_heartbeat(params.0)?)
    }

    #[tool(
        description = "End your session. Releases every claim it still holds. Call this when your work is finished."
    )]
    async fn end_session(
        &self,
        params: Parameters<SessionIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.handle_end_session(params.0)?)
    }

    // ============================================================
    // Intent & Evidence Tools
    // ============================================================

    #[tool(
        description = "Read an intent: description, acceptance criteria, out-of-scope items, contract reference and current workflow status."
    )]
    async fn get_intent(
        &self,
        params: Parameters<GetIntentRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.handle_get_intent(params.0)?)
    }

    #[tool(
        description = "Record the files a build produced for an in-progress intent. Fails with kind 'invalid_transition' if the intent is in any other status. Each file is hashed and stored, and a manifest is appended to the project's tamper-evident evidence ledger. Returns the build id and chain hash."
    )]
    async fn record_build(
        &self,
        params: Parameters<RecordBuildRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.handle_record_build(params.0)?)
    }

    #[tool(
        description = "Recompute a project's evidence chain from genesis. Reports whether it is intact and, if not, the index of the first manifest that was altered."
    )]
    async fn verify_chain(
        &self,
        params: Parameters<VerifyChainRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.handle_verify_chain(params.0)?)
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "rocket-warden".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            instructions: Some(
                r#"RocketWarden keeps concurrent agents from editing the same files and records what each build produced.

WORKFLOW:
1. start_session with your project and agent name
2. claim_paths for every path glob you will edit ('src/payments/**', 'docs/api.md')
3. Work. Call heartbeat periodically during long stretches without new claims
4. record_build with the files your build produced, for the intent you worked on
5. release_claim for paths you are done with, then end_session

CLAIMS:
- 'hard' claims are exclusive: overlapping hard claims from different sessions conflict
- 'soft' claims advertise interest and never conflict with other soft claims
- A claim on a directory covers everything below it
- A conflict is not an error in your work: the response names the agent holding the
  overlapping claim. Choose different work or coordinate; do not edit those paths

SESSIONS:
- A session with no activity for the configured timeout is ended automatically and its
  claims are released. If a tool reports 'stale_session', start a new session and claim again

EVIDENCE:
- Every recorded build is chained to the previous one for the project
- verify_chain reports the first manifest whose contents no longer match the chain"#
                    .into(),
            ),
            ..Default::default()
        }
    }
}

pub async fn run_stdio_server(warden: Warden) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("Starting MCP server via stdio");

    let service = McpServer::new(warden);
    let server = service.serve((stdin(), stdout())).await?;

    let quit_reason = server.waiting().await?;
    tracing::info!("MCP server stopped: {:?}", quit_reason);

    Ok(())
}
