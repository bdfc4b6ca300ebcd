//! On-disk image archive cache.
//!
//! Each image reference maps to `<archive_dir>/<sanitized>.tar`, where the
//! sanitized name replaces every `/` and `:` with `_` (`redis:7` becomes
//! `redis_7.tar`). The mapping is not collision-free: `org/app:1` and
//! `org_app_1` share a file.
//!
//! Exports are written to a uniquely named `.partial` file and renamed into
//! place once complete, so a failed export never leaves a truncated archive
//! that later runs would treat as present.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use modcache_core::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::engine::ImageEngine;

const ARCHIVE_EXT: &str = "tar";

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Storage key for a reference: every `/` and `:` becomes `_`.
pub fn sanitize(reference: &str) -> String {
    reference.replace(['/', ':'], "_")
}

/// An archive present in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    /// File name without the `.tar` extension
    pub name: String,
    /// Tags recorded in the archive's `manifest.json`
    pub repo_tags: Vec<String>,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Entry of the `manifest.json` written by `docker save`.
#[derive(Debug, Deserialize)]
struct SavedManifest {
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
}

/// Result of [`ArchiveCache::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    /// A new archive was written
    Saved { bytes: u64 },
    /// The archive already existed; the engine was not called
    Skipped,
}

/// Archive directory backed by an image engine.
pub struct ArchiveCache {
    dir: PathBuf,
    engine: Arc<dyn ImageEngine>,
}

impl ArchiveCache {
    pub fn new(dir: impl Into<PathBuf>, engine: Arc<dyn ImageEngine>) -> Self {
        Self {
            dir: dir.into(),
            engine,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Archive path for `reference`.
    pub fn path_for(&self, reference: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", sanitize(reference), ARCHIVE_EXT))
    }

    pub async fn exists(&self, reference: &str) -> bool {
        tokio::fs::try_exists(self.path_for(reference))
            .await
            .unwrap_or(false)
    }

    /// Export `reference` into the cache unless its archive already exists.
    pub async fn save(&self, reference: &str) -> Result<SaveStatus> {
        let path = self.path_for(reference);
        if self.exists(reference).await {
            tracing::info!(
                reference = %reference,
                path = %path.display(),
                "Archive already exists, skipping"
            );
            return Ok(SaveStatus::Skipped);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let partial = partial_path(&path);

        let bytes = match self.write_partial(reference, &partial).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        tracing::info!(
            reference = %reference,
            path = %path.display(),
            bytes,
            "Image archive saved"
        );
        Ok(SaveStatus::Saved { bytes })
    }

    async fn write_partial(&self, reference: &str, partial: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::create(partial).await?;
        let bytes = self.engine.export(reference, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(bytes)
    }

    /// Import the archive of `reference` into the runtime.
    pub async fn load(&self, reference: &str) -> Result<String> {
        let path = self.path_for(reference);
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            SyncError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open archive {}: {}", path.display(), e),
            ))
        })?;

        let message = self.engine.import(Box::new(file)).await?;
        tracing::info!(
            reference = %reference,
            path = %path.display(),
            "Image archive loaded"
        );
        Ok(message)
    }

    /// List completed archives, sorted by file name.
    pub async fn list(&self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(ARCHIVE_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }

            let tags_path = path.clone();
            let repo_tags = tokio::task::spawn_blocking(move || read_repo_tags(&tags_path))
                .await
                .unwrap_or_default();

            entries.push(ArchiveEntry {
                name,
                repo_tags,
                size_bytes: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
                path,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// Read the repo tags recorded in a saved image archive.
///
/// Returns an empty list when the file is not a tar archive or carries no
/// `manifest.json`.
fn read_repo_tags(path: &Path) -> Vec<String> {
    let Ok(file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    let mut archive = tar::Archive::new(file);
    let Ok(entries) = archive.entries() else {
        return Vec::new();
    };

    for mut entry in entries.flatten() {
        let is_manifest = entry
            .path()
            .map(|p| p.strip_prefix(".").unwrap_or(&*p) == Path::new("manifest.json"))
            .unwrap_or(false);
        if !is_manifest {
            continue;
        }
        let mut content = String::new();
        if entry.read_to_string(&mut content).is_err() {
            return Vec::new();
        }
        let manifests: Vec<SavedManifest> = serde_json::from_str(&content).unwrap_or_default();
        return manifests
            .into_iter()
            .flat_map(|m| m.repo_tags.unwrap_or_default())
            .collect();
    }
    Vec::new()
}

/// Unique sibling of `path` for an in-progress export.
fn partial_path(path: &Path) -> PathBuf {
    let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}.{}.partial", name, std::process::id(), seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use tempfile::TempDir;

    fn cache(tmp: &TempDir, engine: Arc<FakeEngine>) -> ArchiveCache {
        ArchiveCache::new(tmp.path().join("images"), engine)
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("redis:7"), "redis_7");
        assert_eq!(sanitize("ghcr.io/org/app:v1"), "ghcr.io_org_app_v1");
        assert_eq!(sanitize("localhost:5000/app"), "localhost_5000_app");
    }

    #[test]
    fn test_path_for_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp, Arc::new(FakeEngine::default()));
        let first = cache.path_for("org/repo:latest");
        assert_eq!(first, cache.path_for("org/repo:latest"));
        assert_eq!(first, tmp.path().join("images").join("org_repo_latest.tar"));
    }

    #[test]
    fn test_path_for_aliases_underscore() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp, Arc::new(FakeEngine::default()));
        assert_eq!(cache.path_for("a/b:1"), cache.path_for("a_b_1"));
    }

    #[test]
    fn test_partial_paths_are_unique() {
        let path = Path::new("/tmp/images/redis_7.tar");
        let a = partial_path(path);
        let b = partial_path(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        assert!(a.to_string_lossy().ends_with(".partial"));
    }

    #[tokio::test]
    async fn test_save_writes_archive() {
        let tmp = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let cache = cache(&tmp, engine.clone());

        assert!(!cache.exists("redis:7").await);
        let status = cache.save("redis:7").await.unwrap();
        let expected = FakeEngine::archive_bytes("redis:7");
        assert_eq!(
            status,
            SaveStatus::Saved {
                bytes: expected.len() as u64
            }
        );
        assert!(cache.exists("redis:7").await);
        assert_eq!(std::fs::read(cache.path_for("redis:7")).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_save_skips_existing() {
        let tmp = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let cache = cache(&tmp, engine.clone());

        std::fs::create_dir_all(cache.dir()).unwrap();
        std::fs::write(cache.path_for("redis:7"), b"original").unwrap();

        assert_eq!(cache.save("redis:7").await.unwrap(), SaveStatus::Skipped);
        assert!(engine.exports.lock().await.is_empty());
        assert_eq!(std::fs::read(cache.path_for("redis:7")).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_failed_export_leaves_no_file() {
        let tmp = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine {
            fail_export: ["ghost:1".to_string()].into(),
            ..Default::default()
        });
        let cache = cache(&tmp, engine);

        let err = cache.save("ghost:1").await.unwrap_err();
        assert!(matches!(err, SyncError::Runtime { .. }));
        assert!(!cache.exists("ghost:1").await);
        let leftovers: Vec<_> = std::fs::read_dir(cache.dir()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_load_streams_archive() {
        let tmp = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let cache = cache(&tmp, engine.clone());

        cache.save("redis:7").await.unwrap();
        cache.load("redis:7").await.unwrap();

        let imports = engine.imports.lock().await;
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0], FakeEngine::archive_bytes("redis:7"));
    }

    #[tokio::test]
    async fn test_load_missing_archive() {
        let tmp = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let cache = cache(&tmp, engine.clone());

        let err = cache.load("redis:7").await.unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
        assert!(engine.imports.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_list() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp, Arc::new(FakeEngine::default()));

        assert!(cache.list().await.unwrap().is_empty());

        cache.save("redis:7").await.unwrap();
        cache.save("ghcr.io/org/app:v1").await.unwrap();
        std::fs::write(cache.dir().join("notes.txt"), "ignored").unwrap();

        let entries = cache.list().await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["ghcr.io_org_app_v1", "redis_7"]);
        assert!(entries.iter().all(|e| e.size_bytes > 0));
        assert!(entries.iter().all(|e| e.modified.is_some()));
        // Fake archives are not tar files
        assert!(entries.iter().all(|e| e.repo_tags.is_empty()));
    }

    #[tokio::test]
    async fn test_list_reads_repo_tags() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp, Arc::new(FakeEngine::default()));
        std::fs::create_dir_all(cache.dir()).unwrap();

        let manifest = br#"[{"Config":"abc.json","RepoTags":["org/repo:latest"],"Layers":[]}]"#;
        let file = std::fs::File::create(cache.path_for("org/repo:latest")).unwrap();
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "manifest.json", &manifest[..])
            .unwrap();
        builder.finish().unwrap();
        drop(builder);

        let entries = cache.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "org_repo_latest");
        assert_eq!(entries[0].repo_tags, vec!["org/repo:latest"]);
    }
}
