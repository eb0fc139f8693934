//! Content-addressed artifact storage.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::Database;

/// Bytes keyed by their content hash. Writing a hash that is already present
/// is a no-op, so an artifact referenced by many manifests is stored once.
pub trait ArtifactStore: Send + Sync {
    fn contains(&self, hash: &str) -> Result<bool>;
    fn put(&self, hash: &str, content: &[u8]) -> Result<()>;
    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>>;
    fn remove(&self, hash: &str) -> Result<()>;
}

/// Stores artifacts in the `artifacts` table next to the ledger.
#[derive(Clone)]
pub struct DbArtifactStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl DbArtifactStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

impl ArtifactStore for DbArtifactStore {
    fn contains(&self, hash: &str) -> Result<bool> {
        self.db.has_artifact(hash)
    }

    fn put(&self, hash: &str, content: &[u8]) -> Result<()> {
        self.db.put_artifact(hash, content, self.clock.now())?;
        Ok(())
    }

    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        self.db.get_artifact(hash)
    }

    fn remove(&self, hash: &str) -> Result<()> {
        self.db.delete_artifact(hash)?;
        Ok(())
    }
}

/// Stores artifacts as files under `<root>/<first two hex chars>/<hash>`.
///
/// Files are written to a temporary name and renamed into place, so a reader
/// never observes a partially written artifact.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create artifact dir {}", root.display()))?;
        Ok(Self { root })
    }

    fn path_for(&self, hash: &str) -> Result<PathBuf> {
        if hash.len() < 2 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("Invalid artifact hash: {}", hash);
        }
        Ok(self.root.join(&hash[..2]).join(hash))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn contains(&self, hash: &str) -> Result<bool> {
        Ok(self.path_for(hash)?.exists())
    }

    fn put(&self, hash: &str, content: &[u8]) -> Result<()> {
        let path = self.path_for(hash)?;
        if path.exists() {
            return Ok(());
        }

        let dir = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Artifact path has no parent directory"))?;
        std::fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(".{}.{}.tmp", hash, Uuid::new_v4()));
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write artifact {}", hash))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("Failed to move artifact {} into place", hash));
        }
        Ok(())
    }

    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(hash)?;
        if !path.exists() {
            return Ok(None);
        }
        let content =
            std::fs::read(&path).with_context(|| format!("Failed to read artifact {}", hash))?;
        Ok(Some(content))
    }

    fn remove(&self, hash: &str) -> Result<()> {
        let path = self.path_for(hash)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove artifact {}", hash)),
        }
    }
}
