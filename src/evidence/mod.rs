//! Evidence vault: content-addressed artifacts plus a hash-chained manifest
//! ledger per project.
//!
//! Appends to one project's ledger are linearized by a per-project critical
//! section because each chain hash depends on the one before it. Ledgers of
//! different projects are appended independently.

mod canonical;
mod store;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::json;
use uuid::Uuid;

pub use canonical::{canonical_bytes, chain_hash, content_hash, GENESIS_HASH};
pub use store::{ArtifactStore, DbArtifactStore, FsArtifactStore};

use crate::bulletin::Bulletin;
use crate::clock::Clock;
use crate::db::Database;
use crate::error::{Result, WardenError};
use crate::locks::ProjectLocks;
use crate::models::*;
use crate::pattern;

#[derive(Clone)]
pub struct EvidenceVault {
    db: Database,
    store: Arc<dyn ArtifactStore>,
    locks: ProjectLocks,
    /// Hashes referenced by in-flight `record_build` calls, with use counts.
    /// A failed call never deletes an artifact another call is relying on.
    pins: Arc<Mutex<HashMap<String, usize>>>,
    bulletin: Arc<dyn Bulletin>,
    clock: Arc<dyn Clock>,
}

impl EvidenceVault {
    pub fn new(
        db: Database,
        store: Arc<dyn ArtifactStore>,
        bulletin: Arc<dyn Bulletin>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            store,
            locks: ProjectLocks::new(),
            pins: Arc::new(Mutex::new(HashMap::new())),
            bulletin,
            clock,
        }
    }

    /// Hash and store the produced files, then append a manifest chained to
    /// the project's previous one.
    ///
    /// All or nothing: if any artifact write or the ledger append fails, the
    /// artifacts written by this call are removed and no manifest exists.
    pub fn record_build(
        &self,
        project: &str,
        intent_id: Uuid,
        files: Vec<BuildFile>,
    ) -> Result<EvidenceManifest> {
        if project.trim().is_empty() {
            return Err(WardenError::InvalidInput("project is empty".to_string()));
        }

        let mut evidence = BTreeMap::new();
        let mut contents: HashMap<String, Vec<u8>> = HashMap::new();

        for file in files {
            let path = pattern::normalize(&file.path)?;
            let hash = content_hash(&file.content);
            let entry = FileEvidence {
                path: path.clone(),
                hash: hash.clone(),
                size: file.content.len() as u64,
            };
            if evidence.insert(path.clone(), entry).is_some() {
                return Err(WardenError::InvalidInput(format!(
                    "duplicate file path '{}'",
                    path
                )));
            }
            contents.entry(hash).or_insert(file.content);
        }

        let hashes: Vec<String> = contents.keys().cloned().collect();
        self.pin(&hashes);
        let result = self.locks.with(project, || {
            self.append_locked(project, intent_id, evidence, &contents)
        });
        self.unpin(&hashes);

        let manifest = result?;

        tracing::info!(
            project = %manifest.project,
            build_id = %manifest.build_id,
            sequence = manifest.sequence,
            files = manifest.files.len(),
            "Recorded build manifest"
        );
        self.bulletin.publish(
            ActivityEvent::new(
                ActivityKind::ManifestRecorded,
                &manifest.build_id,
                &manifest.project,
                manifest.created_at,
            )
            .with_detail(json!({
                "intent_id": manifest.intent_id,
                "sequence": manifest.sequence,
                "chain_hash": manifest.chain_hash,
                "files": manifest.files.len(),
            })),
        );

        Ok(manifest)
    }

    fn append_locked(
        &self,
        project: &str,
        intent_id: Uuid,
        files: BTreeMap<String, FileEvidence>,
        contents: &HashMap<String, Vec<u8>>,
    ) -> Result<EvidenceManifest> {
        let mut written = Vec::new();

        for (hash, content) in contents {
            let stored = self
                .store
                .contains(hash)
                .and_then(|exists| {
                    if exists {
                        Ok(false)
                    } else {
                        self.store.put(hash, content).map(|_| true)
                    }
                });

            match stored {
                Ok(true) => written.push(hash.clone()),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(project, hash = %hash, "Artifact write failed: {:#}", e);
                    self.rollback(&written);
                    return Err(WardenError::StorageFailure(format!(
                        "artifact {}: {:#}",
                        hash, e
                    )));
                }
            }
        }

        let appended = self.db.latest_manifest(project).and_then(|prior| {
            let (sequence, prior_hash) = match &prior {
                Some(m) => (m.sequence + 1, m.chain_hash.as_str()),
                None => (0, GENESIS_HASH),
            };

            let mut manifest = EvidenceManifest {
                build_id: Uuid::new_v4().to_string(),
                project: project.to_string(),
                intent_id,
                sequence,
                created_at: self.clock.now(),
                files,
                chain_hash: String::new(),
            };
            manifest.chain_hash = chain_hash(&manifest, prior_hash);

            self.db.append_manifest(&manifest)?;
            Ok(manifest)
        });

        appended.map_err(|e| {
            tracing::error!(project, "Ledger append failed: {:#}", e);
            self.rollback(&written);
            WardenError::StorageFailure(format!("ledger append: {:#}", e))
        })
    }

    /// Remove artifacts written by a failed call, unless another in-flight
    /// call pinned them or a committed manifest references them.
    fn rollback(&self, written: &[String]) {
        let pins = self.pins.lock().expect("pin lock poisoned");
        for hash in written {
            if pins.get(hash).copied().unwrap_or(0) > 1 {
                continue;
            }
            match self.db.artifact_referenced(hash) {
                Ok(false) => {
                    if let Err(e) = self.store.remove(hash) {
                        tracing::error!(hash = %hash, "Failed to roll back artifact: {:#}", e);
                    }
                }
                Ok(true) => {}
                Err(e) => tracing::error!(hash = %hash, "Failed to check artifact references: {:#}", e),
            }
        }
    }

    fn pin(&self, hashes: &[String]) {
        let mut pins = self.pins.lock().expect("pin lock poisoned");
        for hash in hashes {
            *pins.entry(hash.clone()).or_insert(0) += 1;
        }
    }

    fn unpin(&self, hashes: &[String]) {
        let mut pins = self.pins.lock().expect("pin lock poisoned");
        for hash in hashes {
            if let Some(count) = pins.get_mut(hash) {
                *count -= 1;
                if *count == 0 {
                    pins.remove(hash);
                }
            }
        }
    }

    pub fn get_manifest(&self, build_id: &str) -> Result<EvidenceManifest> {
        self.db
            .get_manifest(build_id)?
            .ok_or_else(|| WardenError::not_found("manifest", build_id))
    }

    pub fn list_manifests(&self, filter: &ManifestFilter) -> Result<Vec<EvidenceManifest>> {
        Ok(self.db.list_manifests(filter)?)
    }

    pub fn get_artifact(&self, hash: &str) -> Result<Vec<u8>> {
        self.store
            .get(hash)?
            .ok_or_else(|| WardenError::not_found("artifact", hash))
    }

    /// Recompute the project's chain from genesis in ledger order.
    ///
    /// Returns `ChainIntegrity` with the index of the first manifest whose
    /// recomputed hash disagrees with the stored one. Never repairs anything.
    pub fn verify_chain(&self, project: &str) -> Result<ChainSummary> {
        let ledger = self.db.get_ledger(project)?;
        let mut prior = GENESIS_HASH.to_string();

        for (index, manifest) in ledger.iter().enumerate() {
            let index = index as u64;
            let recomputed = chain_hash(manifest, &prior);
            let paths_consistent = manifest.files.iter().all(|(key, file)| *key == file.path);
            if manifest.sequence != index || !paths_consistent || recomputed != manifest.chain_hash {
                tracing::error!(
                    project,
                    index,
                    build_id = %manifest.build_id,
                    stored = %manifest.chain_hash,
                    recomputed = %recomputed,
                    "Evidence chain integrity violation"
                );
                return Err(WardenError::ChainIntegrity {
                    project: project.to_string(),
                    index,
                    build_id: manifest.build_id.clone(),
                });
            }
            prior = manifest.chain_hash.clone();
        }

        Ok(ChainSummary {
            project: project.to_string(),
            length: ledger.len() as u64,
            head: ledger.last().map(|m| m.chain_hash.clone()),
        })
    }

    /// Files of a manifest whose stored artifact is missing or no longer
    /// hashes to its key.
    pub fn verify_artifacts(&self, build_id: &str) -> Result<Vec<String>> {
        let manifest = self.get_manifest(build_id)?;
        let mut intact: HashMap<String, bool> = HashMap::new();
        let mut bad = Vec::new();

        for (path, file) in &manifest.files {
            let ok = match intact.get(&file.hash) {
                Some(ok) => *ok,
                None => {
                    let ok = matches!(
                        self.store.get(&file.hash)?,
                        Some(bytes) if content_hash(&bytes) == file.hash
                    );
                    intact.insert(file.hash.clone(), ok);
                    ok
                }
            };
            if !ok {
                bad.push(path.clone());
            }
        }

        Ok(bad)
    }
}
