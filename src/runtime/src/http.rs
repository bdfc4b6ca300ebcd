//! Shared HTTP plumbing for the manifest and template fetches.

use std::time::Duration;

use modcache_core::error::{Result, SyncError};

/// Build the client used for manifest and template requests.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("modcache/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {e}")))
}

/// GET `url` and return the body, failing on transport errors and non-2xx.
pub(crate) async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await.map_err(|e| SyncError::Fetch {
        url: url.to_string(),
        status_code: 0,
        message: e.to_string(),
    })?;

    if !response.status().is_success() {
        return Err(SyncError::Fetch {
            url: url.to_string(),
            status_code: response.status().as_u16(),
            message: response
                .status()
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        });
    }

    let bytes = response.bytes().await.map_err(|e| SyncError::Fetch {
        url: url.to_string(),
        status_code: 0,
        message: e.to_string(),
    })?;

    Ok(bytes.to_vec())
}
