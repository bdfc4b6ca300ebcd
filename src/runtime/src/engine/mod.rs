//! Image store adapter: the boundary to the local container runtime.
//!
//! The sync flows only ever talk to the runtime through [`ImageEngine`].
//! Two transports are provided:
//!
//! - [`DockerCli`] invokes the `docker` command-line client
//! - [`DockerApi`] talks to the engine HTTP API (`DOCKER_HOST=tcp://...`)

mod api;
mod cli;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modcache_core::config::{EngineKind, SyncConfig};
use modcache_core::error::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

pub use api::DockerApi;
pub use cli::DockerCli;

/// Tag the engine reports for dangling images.
pub const UNTAGGED: &str = "<none>:<none>";

/// An image known to the local runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineImage {
    /// Image ID (e.g., "sha256:3f57d9401f8d...")
    pub id: String,
    /// Repository tags (e.g., ["redis:7", "redis:latest"])
    pub repo_tags: Vec<String>,
    /// Size in bytes, when the runtime reports it
    pub size_bytes: Option<u64>,
    /// Creation time, when the runtime reports it
    pub created: Option<DateTime<Utc>>,
}

impl EngineImage {
    /// Repository tags that name a real image (dangling `<none>` tags removed).
    pub fn named_tags(&self) -> impl Iterator<Item = &str> {
        self.repo_tags
            .iter()
            .map(String::as_str)
            .filter(|tag| *tag != UNTAGGED && !tag.starts_with("<none>"))
    }
}

/// Owned archive stream handed to [`ImageEngine::import`].
pub type ArchiveReader = Box<dyn AsyncRead + Unpin + Send + Sync>;

/// Capabilities the sync flows need from a container runtime.
#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// List installed images.
    async fn list(&self) -> Result<Vec<EngineImage>>;

    /// Pull `reference` from its registry.
    async fn pull(&self, reference: &str) -> Result<()>;

    /// Stream the exported archive of `reference` into `dest`.
    ///
    /// Returns the number of bytes written.
    async fn export(
        &self,
        reference: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;

    /// Import an archive read from `source`.
    ///
    /// Returns the runtime's own description of what was loaded.
    async fn import(&self, source: ArchiveReader) -> Result<String>;
}

/// Build the engine selected by `config`.
pub fn from_config(config: &SyncConfig) -> Result<Arc<dyn ImageEngine>> {
    let engine: Arc<dyn ImageEngine> = match config.engine {
        EngineKind::Cli => Arc::new(
            DockerCli::new(&config.docker_binary).with_timeout(config.runtime_timeout()),
        ),
        EngineKind::Api => Arc::new(DockerApi::new(
            &config.docker_host,
            config.runtime_timeout(),
        )?),
    };
    tracing::debug!(engine = ?config.engine, "Container engine selected");
    Ok(engine)
}

#[cfg(test)]
pub(crate) mod fake {
    //! Recording in-memory engine for unit tests.

    use std::collections::HashSet;

    use modcache_core::error::SyncError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeEngine {
        pub images: Vec<EngineImage>,
        pub fail_pull: HashSet<String>,
        pub fail_export: HashSet<String>,
        pub pulls: Mutex<Vec<String>>,
        pub exports: Mutex<Vec<String>>,
        pub imports: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeEngine {
        pub fn archive_bytes(reference: &str) -> Vec<u8> {
            format!("archive of {reference}").into_bytes()
        }
    }

    #[async_trait]
    impl ImageEngine for FakeEngine {
        async fn list(&self) -> Result<Vec<EngineImage>> {
            Ok(self.images.clone())
        }

        async fn pull(&self, reference: &str) -> Result<()> {
            self.pulls.lock().await.push(reference.to_string());
            if self.fail_pull.contains(reference) {
                return Err(SyncError::runtime("pull", reference, "pull access denied"));
            }
            Ok(())
        }

        async fn export(
            &self,
            reference: &str,
            dest: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<u64> {
            self.exports.lock().await.push(reference.to_string());
            if self.fail_export.contains(reference) {
                dest.write_all(b"partial").await?;
                return Err(SyncError::runtime("save", reference, "No such image"));
            }
            let bytes = Self::archive_bytes(reference);
            dest.write_all(&bytes).await?;
            Ok(bytes.len() as u64)
        }

        async fn import(&self, mut source: ArchiveReader) -> Result<String> {
            let mut buf = Vec::new();
            source.read_to_end(&mut buf).await?;
            self.imports.lock().await.push(buf);
            Ok("Loaded image".to_string())
        }
    }
}
