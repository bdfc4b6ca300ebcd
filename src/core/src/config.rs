use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Published module allow-list.
pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/arsen3d/module-allowlist/main/allowlist.json";

/// Which transport talks to the container runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Invoke the `docker` command-line client
    Cli,
    /// Talk to the engine HTTP API directly
    Api,
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Allow-list manifest location
    pub manifest_url: String,

    /// Directory holding `<sanitized-reference>.tar` archives
    pub archive_dir: PathBuf,

    /// Branch the module template is read from
    pub template_branch: String,

    /// Module template file name
    pub template_file: String,

    /// Runtime transport
    pub engine: EngineKind,

    /// Container client binary (for `EngineKind::Cli`)
    pub docker_binary: String,

    /// Engine API base URL (for `EngineKind::Api`)
    pub docker_host: String,

    /// Deadline for each HTTP request, in seconds
    pub http_timeout_secs: u64,

    /// Deadline for each runtime call, in seconds
    pub runtime_timeout_secs: u64,

    /// Modules processed in parallel (1 = sequential)
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            archive_dir: PathBuf::from("images"),
            template_branch: "main".to_string(),
            template_file: "lilypad_module.json.tmpl".to_string(),
            engine: EngineKind::Cli,
            docker_binary: "docker".to_string(),
            docker_host: "http://localhost:2375".to_string(),
            http_timeout_secs: 60,
            runtime_timeout_secs: 30 * 60,
            concurrency: 1,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a YAML file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: SyncConfig = serde_yaml::from_str(&data)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded sync configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.manifest_url.trim().is_empty() {
            return Err(SyncError::Config("manifest_url is empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(SyncError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.engine == EngineKind::Api && self.docker_host.trim().is_empty() {
            return Err(SyncError::Config(
                "docker_host is required for the api engine".to_string(),
            ));
        }
        if self.template_file.is_empty() {
            return Err(SyncError::Config("template_file is empty".to_string()));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime_timeout_secs)
    }
}
