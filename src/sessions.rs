//! Session and claim management.
//!
//! Every mutation of a project's sessions or claims (start, claim, heartbeat,
//! end, and the staleness sweep) runs inside that project's critical
//! section, so two overlapping claim requests are decided one after the
//! other and a sweep always sees the freshest heartbeat.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bulletin::Bulletin;
use crate::clock::Clock;
use crate::collaborators::AgentFilter;
use crate::db::Database;
use crate::error::{Result, WardenError};
use crate::locks::ProjectLocks;
use crate::models::*;
use crate::pattern;

#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    locks: ProjectLocks,
    policy: ClaimPolicy,
    timeout: chrono::Duration,
    agents: Arc<dyn AgentFilter>,
    bulletin: Arc<dyn Bulletin>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(
        db: Database,
        policy: ClaimPolicy,
        timeout: chrono::Duration,
        agents: Arc<dyn AgentFilter>,
        bulletin: Arc<dyn Bulletin>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            locks: ProjectLocks::new(),
            policy,
            timeout,
            agents,
            bulletin,
            clock,
        }
    }

    pub fn start_session(&self, input: StartSessionInput) -> Result<Session> {
        let project = input.project.trim();
        let agent_name = input.agent_name.trim();
        if project.is_empty() || agent_name.is_empty() {
            return Err(WardenError::InvalidInput(
                "project and agent_name are required".to_string(),
            ));
        }

        if self.agents.is_ignored(agent_name) {
            tracing::info!(agent = agent_name, "Rejected session for ignored agent");
            return Err(WardenError::AgentIgnored {
                agent: agent_name.to_string(),
            });
        }

        if let Some(intent_id) = input.intent_id {
            if self.db.get_intent(intent_id)?.is_none() {
                return Err(WardenError::not_found("intent", intent_id));
            }
        }

        let now = self.clock.now();
        let session = Session {
            id: Uuid::new_v4(),
            project: project.to_string(),
            agent_name: agent_name.to_string(),
            intent_id: input.intent_id,
            status: SessionStatus::Active,
            started_at: now,
            last_activity_at: now,
            ended_at: None,
            end_reason: None,
        };

        self.locks
            .with(&session.project, || self.db.insert_session(&session))?;

        tracing::info!(
            session_id = %session.id,
            agent = %session.agent_name,
            project = %session.project,
            "Session started"
        );
        self.bulletin.publish(
            ActivityEvent::new(ActivityKind::SessionStart, session.id, &session.project, now)
                .with_detail(json!({
                    "agent_name": session.agent_name,
                    "intent_id": session.intent_id,
                })),
        );

        Ok(session)
    }

    pub fn get_session(&self, id: Uuid) -> Result<Session> {
        self.db
            .get_session(id)?
            .ok_or_else(|| WardenError::not_found("session", id))
    }

    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        Ok(self.db.list_sessions(filter)?)
    }

    pub fn get_claim(&self, id: Uuid) -> Result<Claim> {
        self.db
            .get_claim(id)?
            .ok_or_else(|| WardenError::not_found("claim", id))
    }

    pub fn list_claims(&self, session_id: Uuid) -> Result<Vec<Claim>> {
        self.get_session(session_id)?;
        Ok(self.db.get_claims_by_session(session_id)?)
    }

    /// Active claims of every active session in a project.
    pub fn active_claims(&self, project: &str) -> Result<Vec<HeldClaim>> {
        Ok(self.db.get_active_claims(project)?)
    }

    /// Register a claim over `pattern` for the session.
    ///
    /// The first writer wins: if an overlapping active claim held by another
    /// session blocks this one under the claim policy, the request fails
    /// immediately with `Conflict` naming the holder. Overlapping claims of
    /// the same session never conflict.
    pub fn claim(&self, session_id: Uuid, input: ClaimInput) -> Result<Claim> {
        let pattern = pattern::normalize(&input.pattern)?;
        let project = self.get_session(session_id)?.project;

        self.locks.with(&project, || {
            // Re-read under the lock: the session may have ended meanwhile.
            let session = self.get_session(session_id)?;
            if !session.is_active() {
                return Err(WardenError::StaleSession { session_id });
            }

            let now = self.clock.now();
            if let Some(blocking) = self.find_blocking(&session, &pattern, input.claim_type)? {
                tracing::info!(
                    session_id = %session_id,
                    pattern = %pattern,
                    blocking_session = %blocking.claim.session_id,
                    blocking_pattern = %blocking.claim.pattern,
                    "Claim conflict"
                );
                self.bulletin.publish(
                    ActivityEvent::new(ActivityKind::ClaimConflict, session_id, &project, now)
                        .with_detail(json!({
                            "pattern": pattern,
                            "claim_type": input.claim_type,
                            "blocking_session_id": blocking.claim.session_id,
                            "blocking_claim_id": blocking.claim.id,
                            "blocking_pattern": blocking.claim.pattern,
                        })),
                );
                return Err(WardenError::Conflict {
                    session_id: blocking.claim.session_id,
                    agent_name: blocking.agent_name,
                    claim_id: blocking.claim.id,
                    pattern: blocking.claim.pattern,
                });
            }

            let claim = Claim {
                id: Uuid::new_v4(),
                session_id,
                pattern: pattern.clone(),
                claim_type: input.claim_type,
                created_at: now,
                released_at: None,
            };
            self.db.insert_claim(&claim)?;
            self.db.touch_session(session_id, now)?;

            tracing::debug!(claim_id = %claim.id, pattern = %claim.pattern, "Claim registered");
            self.bulletin.publish(
                ActivityEvent::new(ActivityKind::ClaimRegistered, claim.id, &project, now)
                    .with_detail(json!({
                        "session_id": session_id,
                        "pattern": claim.pattern,
                        "claim_type": claim.claim_type,
                    })),
            );

            Ok(claim)
        })
    }

    fn find_blocking(
        &self,
        session: &Session,
        pattern: &str,
        claim_type: ClaimType,
    ) -> Result<Option<HeldClaim>> {
        let held = self.db.get_active_claims(&session.project)?;
        Ok(held.into_iter().find(|h| {
            h.claim.session_id != session.id
                && self.policy.blocks(claim_type, h.claim.claim_type)
                && pattern::overlaps(pattern, &h.claim.pattern)
        }))
    }

    /// Release a claim. Idempotent: releasing an already released claim
    /// returns it unchanged, keeping the first `released_at`.
    pub fn release(&self, claim_id: Uuid) -> Result<Claim> {
        let now = self.clock.now();
        let (claim, released_now) = self
            .db
            .release_claim(claim_id, now)?
            .ok_or_else(|| WardenError::not_found("claim", claim_id))?;

        if released_now {
            let project = self
                .db
                .get_session(claim.session_id)?
                .map(|s| s.project)
                .unwrap_or_default();
            tracing::debug!(claim_id = %claim.id, "Claim released");
            self.bulletin.publish(
                ActivityEvent::new(ActivityKind::ClaimReleased, claim.id, project, now)
                    .with_detail(json!({
                        "session_id": claim.session_id,
                        "pattern": claim.pattern,
                    })),
            );
        }

        Ok(claim)
    }

    /// Record that the session's agent is still alive.
    pub fn heartbeat(&self, session_id: Uuid) -> Result<Session> {
        let project = self.get_session(session_id)?.project;

        self.locks.with(&project, || {
            let now = self.clock.now();
            if !self.db.touch_session(session_id, now)? {
                return Err(WardenError::StaleSession { session_id });
            }
            self.get_session(session_id)
        })
    }

    /// End the session, releasing all of its claims atomically. Idempotent.
    pub fn end_session(&self, session_id: Uuid) -> Result<SessionEnded> {
        let project = self.get_session(session_id)?.project;
        self.locks.with(&project, || {
            self.end_locked(session_id, EndReason::Explicit)
        })
    }

    fn end_locked(&self, session_id: Uuid, reason: EndReason) -> Result<SessionEnded> {
        let was_active = self.get_session(session_id)?.is_active();
        let now = self.clock.now();
        let ended = self
            .db
            .end_session(session_id, now, reason)?
            .ok_or_else(|| WardenError::not_found("session", session_id))?;

        if was_active {
            self.publish_end(&ended, now);
        }

        Ok(ended)
    }

    fn publish_end(&self, ended: &SessionEnded, now: DateTime<Utc>) {
        let session = &ended.session;
        for claim in &ended.released {
            self.bulletin.publish(
                ActivityEvent::new(ActivityKind::ClaimReleased, claim.id, &session.project, now)
                    .with_detail(json!({
                        "session_id": session.id,
                        "pattern": claim.pattern,
                    })),
            );
        }

        tracing::info!(
            session_id = %session.id,
            reason = session.end_reason.map(|r| r.as_str()).unwrap_or("explicit"),
            released = ended.released.len(),
            "Session ended"
        );
        self.bulletin.publish(
            ActivityEvent::new(ActivityKind::SessionEnd, session.id, &session.project, now)
                .with_detail(json!({
                    "agent_name": session.agent_name,
                    "reason": session.end_reason,
                    "released_claims": ended.released.len(),
                })),
        );
    }

    fn is_stale(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.is_active() && now - session.last_activity_at > self.timeout
    }

    /// End every active session whose last activity is older than the
    /// timeout. Staleness is re-checked inside the project's critical
    /// section, so a heartbeat that lands first keeps the session alive.
    pub fn sweep_stale(&self) -> Result<Vec<SessionEnded>> {
        let candidates = self.db.list_sessions(&SessionFilter {
            status: Some(SessionStatus::Active),
            ..Default::default()
        })?;

        let mut swept = Vec::new();
        for candidate in candidates {
            if !self.is_stale(&candidate, self.clock.now()) {
                continue;
            }

            let ended = self.locks.with(&candidate.project, || {
                let Some(fresh) = self.db.get_session(candidate.id)? else {
                    return Ok(None);
                };
                if !self.is_stale(&fresh, self.clock.now()) {
                    return Ok(None);
                }
                self.end_locked(fresh.id, EndReason::Timeout).map(Some)
            })?;

            if let Some(ended) = ended {
                swept.push(ended);
            }
        }

        if !swept.is_empty() {
            tracing::info!(count = swept.len(), "Swept stale sessions");
        }
        Ok(swept)
    }
}

/// Run [`SessionManager::sweep_stale`] every `interval` until the handle is
/// aborted. The first sweep happens one interval after spawning.
pub fn spawn_sweeper(manager: SessionManager, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = manager.sweep_stale() {
                tracing::error!("Staleness sweep failed: {}", e);
            }
        }
    })
}
