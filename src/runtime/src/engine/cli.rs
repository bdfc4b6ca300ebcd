//! `docker` command-line transport.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modcache_core::error::{Result, SyncError};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

use super::{ArchiveReader, EngineImage, ImageEngine};

/// Default deadline for a single runtime invocation.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// One line of `docker images --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageLine {
    #[serde(rename = "ID")]
    id: String,
    repository: String,
    tag: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

/// Engine backed by the container runtime's command-line client.
pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, operation: &str, reference: &str, err: std::io::Error) -> SyncError {
        SyncError::runtime(
            operation,
            reference,
            format!("failed to run {}: {}", self.binary, err),
        )
    }

    /// Run `fut` under the configured deadline.
    async fn deadline<T>(
        &self,
        operation: &str,
        reference: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "{} {} {} after {}s",
                self.binary,
                operation,
                reference,
                self.timeout.as_secs()
            ))),
        }
    }

    async fn list_inner(&self) -> Result<Vec<EngineImage>> {
        let output = self
            .command(&["images", "--format", "{{json .}}"])
            .output()
            .await
            .map_err(|e| self.spawn_error("images", "", e))?;

        if !output.status.success() {
            return Err(SyncError::runtime(
                "images",
                "",
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut images: Vec<EngineImage> = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let parsed: ImageLine = serde_json::from_str(line).map_err(|e| {
                SyncError::runtime("images", "", format!("unexpected output {line:?}: {e}"))
            })?;
            let tag = format!("{}:{}", parsed.repository, parsed.tag);

            // The client prints one line per tag; fold them back per image ID.
            if let Some(existing) = images.iter_mut().find(|img| img.id == parsed.id) {
                existing.repo_tags.push(tag);
                continue;
            }
            images.push(EngineImage {
                id: parsed.id,
                repo_tags: vec![tag],
                size_bytes: parsed.size.as_deref().and_then(parse_human_size),
                created: parsed.created_at.as_deref().and_then(parse_created_at),
            });
        }
        Ok(images)
    }

    async fn pull_inner(&self, reference: &str) -> Result<()> {
        let output = self
            .command(&["pull", reference])
            .output()
            .await
            .map_err(|e| self.spawn_error("pull", reference, e))?;

        if !output.status.success() {
            return Err(SyncError::runtime(
                "pull",
                reference,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        tracing::debug!(
            reference = %reference,
            output = %String::from_utf8_lossy(&output.stdout).trim(),
            "docker pull finished"
        );
        Ok(())
    }

    async fn export_inner(
        &self,
        reference: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let mut child = self
            .command(&["save", reference])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error("save", reference, e))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::runtime("save", reference, "stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SyncError::runtime("save", reference, "stderr not captured"))?;

        let drain_stderr = async {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        };
        let (copied, stderr_text) =
            tokio::join!(tokio::io::copy(&mut stdout, &mut *dest), drain_stderr);

        let status = child.wait().await?;
        if !status.success() {
            return Err(SyncError::runtime("save", reference, stderr_text.trim()));
        }
        let bytes = copied?;
        dest.flush().await?;
        Ok(bytes)
    }

    async fn import_inner(&self, mut source: ArchiveReader) -> Result<String> {
        let mut child = self
            .command(&["load"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error("load", "", e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SyncError::runtime("load", "", "stdin not captured"))?;

        let feed = async move {
            let fed = tokio::io::copy(&mut source, &mut stdin).await;
            // Closing stdin tells the client the archive is complete.
            drop(stdin);
            fed
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            return Err(SyncError::runtime(
                "load",
                "",
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        fed?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ImageEngine for DockerCli {
    async fn list(&self) -> Result<Vec<EngineImage>> {
        self.deadline("images", "", self.list_inner()).await
    }

    async fn pull(&self, reference: &str) -> Result<()> {
        self.deadline("pull", reference, self.pull_inner(reference)).await
    }

    async fn export(
        &self,
        reference: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        self.deadline("save", reference, self.export_inner(reference, dest))
            .await
    }

    async fn import(&self, source: ArchiveReader) -> Result<String> {
        self.deadline("load", "", self.import_inner(source)).await
    }
}

/// Parse the client's human-readable sizes ("117MB", "1.2GB", "512kB").
///
/// The client prints decimal (SI) units.
fn parse_human_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number.trim().parse().ok()?;
    let multiplier: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" => 1e3,
        "mb" => 1e6,
        "gb" => 1e9,
        "tb" => 1e12,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

/// Parse `CreatedAt` as printed by the client ("2024-03-01 10:20:30 +0000 UTC").
fn parse_created_at(s: &str) -> Option<DateTime<Utc>> {
    let head: Vec<&str> = s.split_whitespace().take(3).collect();
    if head.len() < 3 {
        return None;
    }
    DateTime::parse_from_str(&head.join(" "), "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_human_size() {
        assert_eq!(parse_human_size("117MB"), Some(117_000_000));
        assert_eq!(parse_human_size("1.5GB"), Some(1_500_000_000));
        assert_eq!(parse_human_size("512kB"), Some(512_000));
        assert_eq!(parse_human_size("42B"), Some(42));
        assert_eq!(parse_human_size("lots"), None);
        assert_eq!(parse_human_size("3PB"), None);
    }

    #[test]
    fn test_parse_created_at() {
        let dt = parse_created_at("2024-03-01 10:20:30 +0000 UTC").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T10:20:30+00:00");

        let shifted = parse_created_at("2024-03-01 12:20:30 +0200 EET").unwrap();
        assert_eq!(shifted, dt);

        assert!(parse_created_at("yesterday").is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_is_runtime_error() {
        let engine = DockerCli::new("/nonexistent/modcache-docker");
        let err = engine.pull("redis:7").await.unwrap_err();
        assert!(matches!(err, SyncError::Runtime { .. }));
    }

    /// Exercises every operation against a stand-in client script.
    ///
    /// Kept in a single test so the script is written once before any
    /// process is spawned.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_engine_against_stub_script() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let loaded = tmp.path().join("loaded.tar");
        let script = tmp.path().join("docker");
        std::fs::write(
            &script,
            format!(
                r#"#!/bin/sh
case "$1" in
  images)
    echo '{{"ID":"abc","Repository":"redis","Tag":"7","Size":"117MB","CreatedAt":"2024-03-01 10:20:30 +0000 UTC"}}'
    echo '{{"ID":"abc","Repository":"redis","Tag":"latest","Size":"117MB","CreatedAt":"2024-03-01 10:20:30 +0000 UTC"}}'
    echo '{{"ID":"def","Repository":"<none>","Tag":"<none>","Size":"5MB","CreatedAt":"2024-03-01 10:20:30 +0000 UTC"}}'
    ;;
  pull)
    if [ "$2" = "denied:1" ]; then echo "pull access denied" >&2; exit 1; fi
    if [ "$2" = "slow:1" ]; then sleep 5; fi
    echo "pulled $2"
    ;;
  save)
    if [ "$2" = "missing:1" ]; then echo "No such image: $2" >&2; exit 1; fi
    printf 'TARDATA-%s' "$2"
    ;;
  load)
    cat > "{loaded}"
    echo "Loaded image: redis:7"
    ;;
esac
"#,
                loaded = loaded.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let engine = DockerCli::new(script.to_string_lossy().to_string())
            .with_timeout(Duration::from_secs(2));

        // list folds tags per image
        let images = engine.list().await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].repo_tags, vec!["redis:7", "redis:latest"]);
        assert_eq!(images[0].size_bytes, Some(117_000_000));
        assert!(images[0].created.is_some());
        assert_eq!(images[1].named_tags().count(), 0);

        // pull
        engine.pull("redis:7").await.unwrap();
        let err = engine.pull("denied:1").await.unwrap_err();
        assert!(err.to_string().contains("pull access denied"));

        // export
        let mut buf: Vec<u8> = Vec::new();
        let bytes = engine.export("redis:7", &mut buf).await.unwrap();
        assert_eq!(buf, b"TARDATA-redis:7");
        assert_eq!(bytes, buf.len() as u64);
        let err = engine.export("missing:1", &mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Runtime { .. }));

        // import
        let message = engine
            .import(Box::new(std::io::Cursor::new(b"ARCHIVE".to_vec())))
            .await
            .unwrap();
        assert_eq!(message, "Loaded image: redis:7");
        assert_eq!(std::fs::read(&loaded).unwrap(), b"ARCHIVE");

        // deadline
        let slow = DockerCli::new(script.to_string_lossy().to_string())
            .with_timeout(Duration::from_millis(200));
        let err = slow.pull("slow:1").await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
    }
}
