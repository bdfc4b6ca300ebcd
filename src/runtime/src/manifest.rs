//! Allow-list manifest loading.

use std::path::Path;

use modcache_core::config::SyncConfig;
use modcache_core::error::{Result, SyncError};
use modcache_core::model::ModuleRecord;

use crate::http::{build_client, fetch_bytes};

/// Fetches and decodes the module allow-list.
pub struct ManifestLoader {
    client: reqwest::Client,
    url: String,
}

impl ManifestLoader {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Ok(Self::new(
            build_client(config.http_timeout())?,
            &config.manifest_url,
        ))
    }

    /// Fetch the manifest. A single GET, no retry.
    pub async fn load(&self) -> Result<Vec<ModuleRecord>> {
        tracing::info!(url = %self.url, "Fetching module allow-list");
        let body = fetch_bytes(&self.client, &self.url).await?;
        let records = decode(&body)?;
        tracing::info!(count = records.len(), "Loaded module allow-list");
        Ok(records)
    }
}

/// Decode a manifest body: a JSON array of `{ "ModuleId", "Image" }` objects.
pub fn decode(body: &[u8]) -> Result<Vec<ModuleRecord>> {
    serde_json::from_slice(body)
        .map_err(|e| SyncError::Decode(format!("Invalid module allow-list: {e}")))
}

/// Read a manifest from a local file (for hosts without access to the manifest URL).
pub async fn from_file(path: &Path) -> Result<Vec<ModuleRecord>> {
    let body = tokio::fs::read(path).await?;
    let records = decode(&body)?;
    tracing::info!(
        path = %path.display(),
        count = records.len(),
        "Loaded module allow-list from file"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = r#"[
        {"ModuleId":"https://github.com/org/repo","Image":""},
        {"ModuleId":"redis:7","Image":""}
    ]"#;

    #[test]
    fn test_decode() {
        let records = decode(BODY.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], ModuleRecord::new("redis:7"));
    }

    #[test]
    fn test_decode_empty_array() {
        assert!(decode(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_object() {
        let err = decode(br#"{"ModuleId":"redis:7"}"#).unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_missing_module_id() {
        assert!(matches!(
            decode(br#"[{"Image":"redis:7"}]"#),
            Err(SyncError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_load() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/allowlist.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
            .mount(&server)
            .await;

        let loader = ManifestLoader::new(
            build_client(Duration::from_secs(5)).unwrap(),
            format!("{}/allowlist.json", server.uri()),
        );
        let records = loader.load().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].module_id, "https://github.com/org/repo");
    }

    #[tokio::test]
    async fn test_load_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let loader = ManifestLoader::new(
            build_client(Duration::from_secs(5)).unwrap(),
            format!("{}/allowlist.json", server.uri()),
        );
        assert!(matches!(
            loader.load().await,
            Err(SyncError::Fetch {
                status_code: 500,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_from_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("allowlist.json");
        std::fs::write(&file, BODY).unwrap();
        assert_eq!(from_file(&file).await.unwrap().len(), 2);

        let missing = from_file(&tmp.path().join("absent.json")).await;
        assert!(matches!(missing, Err(SyncError::Io(_))));
    }
}
