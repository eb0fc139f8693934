//! Intent workflow.
//!
//! Status changes go through a single compare-and-set on the stored status,
//! so two callers racing on the same edge cannot both win and a refused
//! transition never writes.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::bulletin::Bulletin;
use crate::clock::Clock;
use crate::collaborators::ContractResolver;
use crate::db::Database;
use crate::error::{Result, WardenError};
use crate::models::*;

#[derive(Clone)]
pub struct IntentWorkflow {
    db: Database,
    contracts: Arc<dyn ContractResolver>,
    bulletin: Arc<dyn Bulletin>,
    clock: Arc<dyn Clock>,
}

impl IntentWorkflow {
    pub fn new(
        db: Database,
        contracts: Arc<dyn ContractResolver>,
        bulletin: Arc<dyn Bulletin>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            contracts,
            bulletin,
            clock,
        }
    }

    /// Create a pending intent. A contract reference given without a hash is
    /// pinned to the contract's current content.
    pub fn create_intent(&self, input: CreateIntentInput) -> Result<Intent> {
        let project = input.project.trim();
        let author = input.author.trim();
        if project.is_empty() || author.is_empty() {
            return Err(WardenError::InvalidInput(
                "project and author are required".to_string(),
            ));
        }

        let contract_hash = match (&input.contract_ref, input.contract_hash) {
            (None, Some(_)) => {
                return Err(WardenError::InvalidInput(
                    "contract_hash requires a contract_ref".to_string(),
                ))
            }
            (None, None) => None,
            (Some(_), Some(hash)) => Some(hash),
            (Some(contract_ref), None) => Some(
                self.contracts
                    .current_hash(contract_ref)?
                    .ok_or_else(|| WardenError::not_found("contract", contract_ref))?,
            ),
        };

        let now = self.clock.now();
        let intent = Intent {
            id: Uuid::new_v4(),
            project: project.to_string(),
            author: author.to_string(),
            description: input.description,
            contract_ref: input.contract_ref,
            contract_hash,
            acceptance_criteria: input.acceptance_criteria,
            out_of_scope: input.out_of_scope,
            status: IntentStatus::Pending,
            status_reason: None,
            build_id: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_intent(&intent)?;

        tracing::info!(intent_id = %intent.id, project = %intent.project, "Intent created");
        Ok(intent)
    }

    pub fn get_intent(&self, id: Uuid) -> Result<Intent> {
        self.db
            .get_intent(id)?
            .ok_or_else(|| WardenError::not_found("intent", id))
    }

    pub fn list_intents(&self, filter: &IntentFilter) -> Result<Vec<Intent>> {
        Ok(self.db.list_intents(filter)?)
    }

    /// Pending → Approved, after checking the pinned contract has not drifted.
    pub fn approve(&self, id: Uuid) -> Result<Intent> {
        let intent = self.get_intent(id)?;
        if !intent.status.can_transition_to(IntentStatus::Approved) {
            return Err(WardenError::InvalidTransition {
                from: intent.status,
                to: IntentStatus::Approved,
            });
        }

        if let (Some(contract_ref), Some(expected)) = (&intent.contract_ref, &intent.contract_hash)
        {
            let actual = self.contracts.current_hash(contract_ref)?;
            if actual.as_deref() != Some(expected.as_str()) {
                tracing::info!(
                    intent_id = %id,
                    contract_ref = %contract_ref,
                    "Approval refused, contract drifted"
                );
                return Err(WardenError::ContractMismatch {
                    contract_ref: contract_ref.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        self.transition(id, IntentStatus::Approved, None, None)
    }

    pub fn reject(&self, id: Uuid, reason: Option<&str>) -> Result<Intent> {
        self.transition(id, IntentStatus::Rejected, reason, None)
    }

    pub fn start(&self, id: Uuid) -> Result<Intent> {
        self.transition(id, IntentStatus::InProgress, None, None)
    }

    /// InProgress → Completed, binding the intent to the manifest that
    /// evidences it.
    pub fn complete(&self, id: Uuid, manifest: &EvidenceManifest) -> Result<Intent> {
        if manifest.intent_id != id {
            return Err(WardenError::InvalidInput(format!(
                "manifest {} was recorded for intent {}, not {}",
                manifest.build_id, manifest.intent_id, id
            )));
        }
        self.transition(id, IntentStatus::Completed, None, Some(&manifest.build_id))
    }

    pub fn fail(&self, id: Uuid, reason: &str) -> Result<Intent> {
        self.transition(id, IntentStatus::Failed, Some(reason), None)
    }

    fn transition(
        &self,
        id: Uuid,
        to: IntentStatus,
        reason: Option<&str>,
        build_id: Option<&str>,
    ) -> Result<Intent> {
        let from = self.get_intent(id)?.status;
        if !from.can_transition_to(to) {
            return Err(WardenError::InvalidTransition { from, to });
        }

        let now = self.clock.now();
        if !self.db.transition_intent(id, from, to, now, reason, build_id)? {
            // Lost a race; report the status that won.
            let current = self.get_intent(id)?.status;
            return Err(WardenError::InvalidTransition { from: current, to });
        }

        let intent = self.get_intent(id)?;
        tracing::info!(intent_id = %id, from = %from, to = %to, "Intent transition");
        self.bulletin.publish(
            ActivityEvent::new(ActivityKind::IntentTransition, id, &intent.project, now)
                .with_detail(json!({
                    "from": from,
                    "to": to,
                    "reason": reason,
                    "build_id": build_id,
                })),
        );

        Ok(intent)
    }
}
