//! The `Warden` wires sessions, intents and the evidence vault over one
//! database and drives an intent from approval to recorded evidence.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::bulletin::{Bulletin, TracingBulletin};
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    AgentFilter, BuildRunner, ContractResolver, FsContractResolver, IgnoreList,
};
use crate::config::WardenConfig;
use crate::db::Database;
use crate::error::{Result, WardenError};
use crate::evidence::{ArtifactStore, DbArtifactStore, EvidenceVault, FsArtifactStore};
use crate::intents::IntentWorkflow;
use crate::models::*;
use crate::sessions::SessionManager;

/// The external collaborators the core consults.
#[derive(Clone)]
pub struct Collaborators {
    pub agents: Arc<dyn AgentFilter>,
    pub contracts: Arc<dyn ContractResolver>,
    pub store: Arc<dyn ArtifactStore>,
    pub bulletin: Arc<dyn Bulletin>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Production collaborators as described by the configuration.
    pub fn from_config(db: &Database, config: &WardenConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store: Arc<dyn ArtifactStore> = match &config.artifact_dir {
            Some(dir) => Arc::new(FsArtifactStore::new(dir.clone())?),
            None => Arc::new(DbArtifactStore::new(db.clone(), clock.clone())),
        };

        let contract_root = config
            .contract_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            agents: Arc::new(IgnoreList::new(config.ignored_agents.iter().cloned())),
            contracts: Arc::new(FsContractResolver::new(contract_root)),
            store,
            bulletin: Arc::new(TracingBulletin),
            clock,
        })
    }
}

/// Outcome of [`Warden::execute_intent`].
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Completed {
        intent: Intent,
        manifest: EvidenceManifest,
    },
    Failed {
        intent: Intent,
    },
}

impl BuildOutcome {
    pub fn intent(&self) -> &Intent {
        match self {
            Self::Completed { intent, .. } | Self::Failed { intent } => intent,
        }
    }
}

#[derive(Clone)]
pub struct Warden {
    db: Database,
    config: WardenConfig,
    sessions: SessionManager,
    intents: IntentWorkflow,
    vault: EvidenceVault,
}

impl Warden {
    pub fn new(db: Database, config: WardenConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            agents,
            contracts,
            store,
            bulletin,
            clock,
        } = collaborators;

        let sessions = SessionManager::new(
            db.clone(),
            config.claim_policy(),
            config.session_timeout(),
            agents,
            bulletin.clone(),
            clock.clone(),
        );
        let intents = IntentWorkflow::new(db.clone(), contracts, bulletin.clone(), clock.clone());
        let vault = EvidenceVault::new(db.clone(), store, bulletin, clock);

        Self {
            db,
            config,
            sessions,
            intents,
            vault,
        }
    }

    /// Open (and migrate) the configured database and build the production
    /// collaborators around it.
    pub fn from_config(config: WardenConfig) -> anyhow::Result<Self> {
        let db = match &config.db_path {
            Some(path) => Database::open(path.clone())?,
            None => Database::open_default()?,
        };
        db.migrate()?;

        let collaborators = Collaborators::from_config(&db, &config)?;
        Ok(Self::new(db, config, collaborators))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn intents(&self) -> &IntentWorkflow {
        &self.intents
    }

    pub fn vault(&self) -> &EvidenceVault {
        &self.vault
    }

    /// Record build output for an in-progress intent of the same project.
    pub fn record_build(
        &self,
        project: &str,
        intent_id: Uuid,
        files: Vec<BuildFile>,
    ) -> Result<EvidenceManifest> {
        let intent = self.intents.get_intent(intent_id)?;
        if intent.project != project {
            return Err(WardenError::InvalidInput(format!(
                "intent {} belongs to project '{}', not '{}'",
                intent_id, intent.project, project
            )));
        }
        if intent.status != IntentStatus::InProgress {
            return Err(WardenError::InvalidTransition {
                from: intent.status,
                to: IntentStatus::InProgress,
            });
        }
        self.vault.record_build(project, intent_id, files)
    }

    /// Start an approved intent (or resume an in-progress one), run its
    /// build and record the evidence.
    ///
    /// A failed build or unusable build output marks the intent failed. A
    /// `StorageFailure` is returned as an error with the intent left in
    /// progress, so the same call can be retried.
    pub fn execute_intent(&self, intent_id: Uuid, runner: &dyn BuildRunner) -> Result<BuildOutcome> {
        let intent = self.intents.get_intent(intent_id)?;
        let intent = match intent.status {
            IntentStatus::Approved => self.intents.start(intent_id)?,
            IntentStatus::InProgress => intent,
            from => {
                return Err(WardenError::InvalidTransition {
                    from,
                    to: IntentStatus::InProgress,
                })
            }
        };

        let files = match runner.run(&intent) {
            Ok(files) => files,
            Err(reason) => {
                tracing::warn!(intent_id = %intent_id, "Build failed: {}", reason);
                let intent = self.intents.fail(intent_id, &reason)?;
                return Ok(BuildOutcome::Failed { intent });
            }
        };

        let manifest = match self.vault.record_build(&intent.project, intent_id, files) {
            Ok(manifest) => manifest,
            Err(WardenError::InvalidInput(reason)) => {
                let intent = self
                    .intents
                    .fail(intent_id, &format!("invalid build output: {}", reason))?;
                return Ok(BuildOutcome::Failed { intent });
            }
            Err(e) => return Err(e),
        };

        let intent = self.intents.complete(intent_id, &manifest)?;
        Ok(BuildOutcome::Completed { intent, manifest })
    }
}
