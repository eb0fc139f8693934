use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::Deserialize;

use crate::models::ClaimPolicy;

const APP_NAME: &str = "rocket-warden";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WardenConfig {
    /// Seconds without a heartbeat or claim before a session is swept.
    pub session_timeout_secs: u64,
    /// Seconds between staleness sweeps.
    pub sweep_interval_secs: u64,
    /// Whether soft and hard claims on overlapping patterns block each other.
    pub mixed_claims_conflict: bool,
    /// Agents that may not open sessions. A trailing `*` matches a prefix.
    pub ignored_agents: Vec<String>,
    /// Directory contract references are resolved against.
    pub contract_root: Option<PathBuf>,
    /// Store artifacts on disk here instead of in the database.
    pub artifact_dir: Option<PathBuf>,
    /// Database location. Defaults to the platform data directory.
    pub db_path: Option<PathBuf>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
            mixed_claims_conflict: true,
            ignored_agents: Vec::new(),
            contract_root: None,
            artifact_dir: None,
            db_path: None,
        }
    }
}

impl WardenConfig {
    /// Load configuration from the user's config directory, then apply
    /// environment overrides. Falls back to defaults if the file is missing or
    /// fails to parse.
    pub fn load() -> Self {
        let config = match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    fn try_load() -> Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse config file")
    }

    /// Apply `ROCKET_WARDEN_*` overrides. Unparseable values are ignored.
    pub fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secs) = var("ROCKET_WARDEN_SESSION_TIMEOUT_SECS").and_then(|s| s.parse().ok())
        {
            self.session_timeout_secs = secs;
        }
        if let Some(secs) = var("ROCKET_WARDEN_SWEEP_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
            self.sweep_interval_secs = secs;
        }
        if let Some(flag) = var("ROCKET_WARDEN_MIXED_CLAIMS_CONFLICT").and_then(|s| s.parse().ok())
        {
            self.mixed_claims_conflict = flag;
        }
        if let Some(agents) = var("ROCKET_WARDEN_IGNORED_AGENTS") {
            self.ignored_agents = agents
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(root) = var("ROCKET_WARDEN_CONTRACT_ROOT") {
            self.contract_root = Some(PathBuf::from(root));
        }
        if let Some(dir) = var("ROCKET_WARDEN_ARTIFACT_DIR") {
            self.artifact_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = var("ROCKET_WARDEN_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Idle time after which a session is stale. Values beyond what a
    /// `TimeDelta` can hold saturate, so such sessions are never swept.
    pub fn session_timeout(&self) -> chrono::TimeDelta {
        i64::try_from(self.session_timeout_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .unwrap_or(chrono::TimeDelta::MAX)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            mixed_claims_conflict: self.mixed_claims_conflict,
        }
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
