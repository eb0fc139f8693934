//! Interfaces to the external collaborators the core consults: the agent
//! ignore list, the contract resolver and the build runner.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::evidence::content_hash;
use crate::models::{BuildFile, Intent};

/// Decides whether an agent may open sessions at all.
pub trait AgentFilter: Send + Sync {
    fn is_ignored(&self, agent_name: &str) -> bool;
}

/// Static ignore list. Entries match an agent name exactly, or as a prefix
/// when they end in `*` (`bot-*` ignores `bot-7`).
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    entries: Vec<String>,
}

impl IgnoreList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(Into::into)
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }
}

impl AgentFilter for IgnoreList {
    fn is_ignored(&self, agent_name: &str) -> bool {
        self.entries.iter().any(|entry| match entry.strip_suffix('*') {
            Some(prefix) => agent_name.starts_with(prefix),
            None => entry == agent_name,
        })
    }
}

/// Resolves a contract reference to the hash of its current content.
pub trait ContractResolver: Send + Sync {
    /// `Ok(None)` when the contract no longer exists.
    fn current_hash(&self, contract_ref: &str) -> Result<Option<String>>;
}

/// Contracts are files below a root directory; the hash is the SHA-256 of
/// the file bytes.
#[derive(Debug, Clone)]
pub struct FsContractResolver {
    root: PathBuf,
}

impl FsContractResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, contract_ref: &str) -> Option<PathBuf> {
        let relative = Path::new(contract_ref);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl ContractResolver for FsContractResolver {
    fn current_hash(&self, contract_ref: &str) -> Result<Option<String>> {
        let Some(path) = self.resolve(contract_ref) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read contract {}", path.display()))?;
        Ok(Some(content_hash(&bytes)))
    }
}

/// In-memory contract registry.
#[derive(Debug, Clone, Default)]
pub struct StaticContracts {
    hashes: Arc<Mutex<HashMap<String, String>>>,
}

impl StaticContracts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the content of a contract.
    pub fn set(&self, contract_ref: impl Into<String>, content: &[u8]) {
        self.hashes
            .lock()
            .expect("contract lock poisoned")
            .insert(contract_ref.into(), content_hash(content));
    }

    pub fn remove(&self, contract_ref: &str) {
        self.hashes
            .lock()
            .expect("contract lock poisoned")
            .remove(contract_ref);
    }
}

impl ContractResolver for StaticContracts {
    fn current_hash(&self, contract_ref: &str) -> Result<Option<String>> {
        Ok(self
            .hashes
            .lock()
            .expect("contract lock poisoned")
            .get(contract_ref)
            .cloned())
    }
}

/// Executes the build for an in-progress intent.
///
/// The runner is opaque to the core: it either yields the produced files or
/// a failure reason.
pub trait BuildRunner: Send + Sync {
    fn run(&self, intent: &Intent) -> Result<Vec<BuildFile>, String>;
}

impl<F> BuildRunner for F
where
    F: Fn(&Intent) -> Result<Vec<BuildFile>, String> + Send + Sync,
{
    fn run(&self, intent: &Intent) -> Result<Vec<BuildFile>, String> {
        self(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_list_matches_exact_names_and_prefixes() {
        let list = IgnoreList::new(["dependabot", "bot-*", "  "]);
        assert!(list.is_ignored("dependabot"));
        assert!(list.is_ignored("bot-7"));
        assert!(!list.is_ignored("claude"));
        assert!(!list.is_ignored("dependabot-2"));
    }

    #[test]
    fn fs_resolver_hashes_contract_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("spec.md"), b"v1").unwrap();

        let resolver = FsContractResolver::new(dir.path());
        assert_eq!(
            resolver.current_hash("spec.md").unwrap(),
            Some(content_hash(b"v1"))
        );
        assert_eq!(resolver.current_hash("missing.md").unwrap(), None);
        assert_eq!(resolver.current_hash("../spec.md").unwrap(), None);
    }

    #[test]
    fn static_contracts_track_replacements() {
        let contracts = StaticContracts::new();
        contracts.set("api.yaml", b"one");
        let first = contracts.current_hash("api.yaml").unwrap();
        contracts.set("api.yaml", b"two");
        assert_ne!(contracts.current_hash("api.yaml").unwrap(), first);
        contracts.remove("api.yaml");
        assert_eq!(contracts.current_hash("api.yaml").unwrap(), None);
    }
}
