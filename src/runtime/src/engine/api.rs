//! Engine HTTP API transport (`/images/*` endpoints over TCP).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use modcache_core::error::{Result, SyncError};
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use super::{ArchiveReader, EngineImage, ImageEngine};

/// Entry of `GET /images/json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiImage {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    #[serde(default)]
    size: Option<i64>,
    #[serde(default)]
    created: Option<i64>,
}

/// One JSON message of a streamed progress body.
#[derive(Debug, Default, Deserialize)]
struct ProgressMessage {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Engine backed by the runtime's HTTP API.
pub struct DockerApi {
    base_url: String,
    client: reqwest::Client,
}

impl DockerApi {
    /// Create a client for the API at `base_url` (e.g. `http://localhost:2375`).
    ///
    /// `tcp://` is accepted as an alias for `http://`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = match base_url.strip_prefix("tcp://") {
            Some(rest) => format!("http://{rest}"),
            None => base_url.to_string(),
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request_error(operation: &str, reference: &str, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(format!("{operation} {reference}: {err}"))
        } else {
            SyncError::runtime(operation, reference, err.to_string())
        }
    }

    /// Fail on a non-2xx response, carrying the body text.
    async fn check(
        operation: &str,
        reference: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::runtime(
            operation,
            reference,
            format!("{} {}", status.as_u16(), body.trim()),
        ))
    }

    async fn read_progress(
        operation: &str,
        reference: &str,
        response: reqwest::Response,
    ) -> Result<Vec<String>> {
        let body = response
            .text()
            .await
            .map_err(|e| Self::request_error(operation, reference, e))?;
        scan_progress(operation, reference, &body)
    }
}

/// Collect progress lines, failing on the first `error` message.
///
/// The engine answers 200 to pulls and loads and reports failures inside
/// the streamed body.
fn scan_progress(operation: &str, reference: &str, body: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let message: ProgressMessage = serde_json::from_str(line).unwrap_or_default();
        if let Some(error) = message.error {
            return Err(SyncError::runtime(operation, reference, error));
        }
        if let Some(text) = message.stream.or(message.status) {
            lines.push(text.trim().to_string());
        }
    }
    Ok(lines)
}

#[async_trait]
impl ImageEngine for DockerApi {
    async fn list(&self) -> Result<Vec<EngineImage>> {
        let response = self
            .client
            .get(self.url("/images/json"))
            .send()
            .await
            .map_err(|e| Self::request_error("images", "", e))?;
        let response = Self::check("images", "", response).await?;
        let images: Vec<ApiImage> = response
            .json()
            .await
            .map_err(|e| SyncError::runtime("images", "", e.to_string()))?;

        Ok(images
            .into_iter()
            .map(|img| EngineImage {
                id: img.id,
                repo_tags: img.repo_tags.unwrap_or_default(),
                size_bytes: img.size.and_then(|s| u64::try_from(s).ok()),
                created: img
                    .created
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            })
            .collect())
    }

    async fn pull(&self, reference: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/images/create"))
            .query(&[("fromImage", reference)])
            .send()
            .await
            .map_err(|e| Self::request_error("pull", reference, e))?;
        let response = Self::check("pull", reference, response).await?;
        let progress = Self::read_progress("pull", reference, response).await?;
        tracing::debug!(
            reference = %reference,
            last = progress.last().map(String::as_str).unwrap_or(""),
            "Engine pull finished"
        );
        Ok(())
    }

    async fn export(
        &self,
        reference: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let response = self
            .client
            .get(self.url("/images/get"))
            .query(&[("names", reference)])
            .send()
            .await
            .map_err(|e| Self::request_error("save", reference, e))?;
        let response = Self::check("save", reference, response).await?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Self::request_error("save", reference, e))?;
            dest.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        dest.flush().await?;
        Ok(written)
    }

    async fn import(&self, source: ArchiveReader) -> Result<String> {
        let body = reqwest::Body::wrap_stream(ReaderStream::new(source));
        let response = self
            .client
            .post(self.url("/images/load"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
            .body(body)
            .send()
            .await
            .map_err(|e| Self::request_error("load", "", e))?;
        let response = Self::check("load", "", response).await?;
        let progress = Self::read_progress("load", "", response).await?;
        Ok(progress.join("\n"))
    }
}
