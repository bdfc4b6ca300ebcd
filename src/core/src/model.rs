//! Data model shared by the resolver, archive cache and sync driver.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Whether a module identifier names a module repository (`http://` or
/// `https://`) rather than an image reference such as `httpd:2.4`.
pub fn is_repository_url(module_id: &str) -> bool {
    module_id.starts_with("http://") || module_id.starts_with("https://")
}

/// `"Image": null` decodes as an empty string.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// One entry of the allow-list manifest.
///
/// `module_id` is either a direct image reference (`redis:7`) or an
/// `http(s)` URL pointing at a module repository. `image` is usually empty
/// in the published manifest and is filled in by resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    #[serde(rename = "ModuleId")]
    pub module_id: String,

    #[serde(rename = "Image", default, deserialize_with = "null_as_empty")]
    pub image: String,

    /// Content identifier of a pre-built archive, when the allow-list has one
    #[serde(rename = "Cid", default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

impl ModuleRecord {
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            image: String::new(),
            cid: None,
        }
    }
}

/// Per-module result of a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncOutcome {
    Resolved,
    SkippedNoImageFound,
    FetchFailed,
    ArchiveFailed,
    RuntimeFailed,
}

impl SyncOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, SyncOutcome::Resolved)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncOutcome::Resolved => "resolved",
            SyncOutcome::SkippedNoImageFound => "skipped (no image)",
            SyncOutcome::FetchFailed => "fetch failed",
            SyncOutcome::ArchiveFailed => "archive failed",
            SyncOutcome::RuntimeFailed => "runtime failed",
        };
        f.write_str(s)
    }
}

/// Which convergence flow the sync driver runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Pull, then make sure an archive exists.
    EnsureExported,
    /// Load from the archive, healing the archive first if it is missing.
    EnsureLoaded,
}

/// Outcome of one module within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleReport {
    pub module_id: String,
    /// Resolved image reference, if resolution got that far
    pub image: Option<String>,
    pub outcome: SyncOutcome,
    /// Error message for failed outcomes
    pub detail: Option<String>,
}

impl ModuleReport {
    pub fn resolved(module_id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            image: Some(image.into()),
            outcome: SyncOutcome::Resolved,
            detail: None,
        }
    }

    pub fn failed(
        module_id: impl Into<String>,
        image: Option<String>,
        outcome: SyncOutcome,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            image,
            outcome,
            detail: Some(detail.into()),
        }
    }
}

/// Outcome counts over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub resolved: usize,
    pub skipped_no_image: usize,
    pub fetch_failed: usize,
    pub archive_failed: usize,
    pub runtime_failed: usize,
}

impl SyncSummary {
    pub fn from_reports(reports: &[ModuleReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            match report.outcome {
                SyncOutcome::Resolved => summary.resolved += 1,
                SyncOutcome::SkippedNoImageFound => summary.skipped_no_image += 1,
                SyncOutcome::FetchFailed => summary.fetch_failed += 1,
                SyncOutcome::ArchiveFailed => summary.archive_failed += 1,
                SyncOutcome::RuntimeFailed => summary.runtime_failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.resolved
            + self.skipped_no_image
            + self.fetch_failed
            + self.archive_failed
            + self.runtime_failed
    }

    /// True when every module converged.
    pub fn is_clean(&self) -> bool {
        self.resolved == self.total()
    }
}
