//! Module identifier → image reference resolution.
//!
//! A module identifier is either an image reference, which passes through
//! untouched, or the URL of a module repository. For repositories the
//! module template is fetched from the raw-content host and the image is
//! scraped out of it. The template is not valid JSON (it carries template
//! placeholders), so extraction is a text pattern match rather than a parse.

use std::sync::OnceLock;

use modcache_core::config::SyncConfig;
use modcache_core::error::{Result, SyncError};
use modcache_core::model::is_repository_url;
use regex::Regex;

use crate::http::{build_client, fetch_bytes};

const SOURCE_HOST: &str = "github.com";
const RAW_HOST: &str = "raw.githubusercontent.com";

/// Extract the value of the first `"Image": "<value>"` field in `text`.
pub fn extract_image_field(text: &str) -> Option<String> {
    static IMAGE_FIELD: OnceLock<Regex> = OnceLock::new();
    let re = IMAGE_FIELD
        .get_or_init(|| Regex::new(r#""Image":\s*"([^"]+)""#).expect("valid image pattern"));
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Resolves module identifiers to image references.
#[derive(Clone)]
pub struct ModuleResolver {
    client: reqwest::Client,
    branch: String,
    template_file: String,
}

impl ModuleResolver {
    /// Create a resolver reading `main/lilypad_module.json.tmpl`.
    pub fn new(client: reqwest::Client) -> Self {
        let defaults = SyncConfig::default();
        Self {
            client,
            branch: defaults.template_branch,
            template_file: defaults.template_file,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let client = build_client(config.http_timeout())?;
        Ok(Self::new(client).with_template(&config.template_branch, &config.template_file))
    }

    /// Override the branch and file name of the module template.
    pub fn with_template(mut self, branch: &str, template_file: &str) -> Self {
        self.branch = branch.to_string();
        self.template_file = template_file.to_string();
        self
    }

    /// Template URL for a repository identifier; `None` for image references.
    pub fn template_url(&self, module_id: &str) -> Option<String> {
        if !is_repository_url(module_id) {
            return None;
        }
        let raw = module_id.replacen(SOURCE_HOST, RAW_HOST, 1);
        Some(format!(
            "{}/{}/{}",
            raw.trim_end_matches('/'),
            self.branch,
            self.template_file
        ))
    }

    /// Resolve `module_id` to an image reference.
    pub async fn resolve(&self, module_id: &str) -> Result<String> {
        let Some(url) = self.template_url(module_id) else {
            return Ok(module_id.to_string());
        };

        tracing::debug!(module = %module_id, url = %url, "Fetching module template");
        let body = fetch_bytes(&self.client, &url).await?;
        let text = String::from_utf8_lossy(&body);

        match extract_image_field(&text) {
            Some(image) => {
                tracing::debug!(module = %module_id, image = %image, "Resolved module image");
                Ok(image)
            }
            None => {
                tracing::warn!(
                    module = %module_id,
                    body = %text,
                    "No image found in module template"
                );
                Err(SyncError::NoImageFound {
                    module_id: module_id.to_string(),
                })
            }
        }
    }
}
