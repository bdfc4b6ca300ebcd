//! Sync driver: per-module convergence flows over a manifest.
//!
//! Every module is processed to completion independently of the others. A
//! failure is recorded as that module's [`ModuleReport`] and never stops the
//! batch. With `concurrency > 1` modules run on a bounded pool; reports are
//! still returned in manifest order.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use modcache_core::config::SyncConfig;
use modcache_core::error::Result;
use modcache_core::model::{ModuleRecord, ModuleReport, SyncMode, SyncSummary};

use crate::archive::ArchiveCache;
use crate::engine::{self, ImageEngine};
use crate::resolver::ModuleResolver;

/// What a sync would do for a resolved module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    /// An archive is already cached and would be imported
    LoadArchive { path: PathBuf },
    /// The allow-list carries a content identifier for a pre-built archive
    FetchFromIpfs { cid: String },
    /// The image would be pulled from its registry
    Pull { image: String },
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedAction::LoadArchive { path } => write!(f, "load {}", path.display()),
            PlannedAction::FetchFromIpfs { cid } => write!(f, "ipfs get {cid}; load {cid}"),
            PlannedAction::Pull { image } => write!(f, "pull {image}"),
        }
    }
}

/// Dry-run result for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub report: ModuleReport,
    pub template_url: Option<String>,
    /// `None` when the module could not be resolved
    pub action: Option<PlannedAction>,
}

/// Drives the ensure-exported / ensure-loaded flows.
pub struct SyncDriver {
    engine: Arc<dyn ImageEngine>,
    resolver: ModuleResolver,
    archive: ArchiveCache,
    concurrency: usize,
}

impl SyncDriver {
    pub fn new(engine: Arc<dyn ImageEngine>, resolver: ModuleResolver, archive: ArchiveCache) -> Self {
        Self {
            engine,
            resolver,
            archive,
            concurrency: 1,
        }
    }

    /// Wire engine, resolver and archive cache from configuration.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        let engine = engine::from_config(config)?;
        let resolver = ModuleResolver::from_config(config)?;
        let archive = ArchiveCache::new(config.archive_dir.clone(), engine.clone());
        Ok(Self::new(engine, resolver, archive).with_concurrency(config.concurrency))
    }

    /// Process up to `concurrency` modules at once (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn archive(&self) -> &ArchiveCache {
        &self.archive
    }

    /// Run `mode` over every record and return one report per record, in order.
    pub async fn run(&self, mode: SyncMode, records: Vec<ModuleRecord>) -> Vec<ModuleReport> {
        tracing::info!(
            mode = ?mode,
            modules = records.len(),
            concurrency = self.concurrency,
            "Starting sync"
        );

        let reports: Vec<ModuleReport> = stream::iter(records)
            .map(|record| async move {
                match mode {
                    SyncMode::EnsureExported => self.ensure_exported(record).await,
                    SyncMode::EnsureLoaded => self.ensure_loaded(record).await,
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let summary = SyncSummary::from_reports(&reports);
        tracing::info!(
            total = summary.total(),
            resolved = summary.resolved,
            failed = reports.iter().filter(|r| !r.outcome.is_success()).count(),
            "Sync finished"
        );
        reports
    }

    /// Pull (best-effort), then make sure an archive exists.
    ///
    /// Always pulls, even when the archive is already cached.
    pub async fn ensure_exported(&self, mut record: ModuleRecord) -> ModuleReport {
        let reference = match self.resolve(&mut record).await {
            Ok(reference) => reference,
            Err(e) => return finish(&record.module_id, None, Err(e)),
        };

        let _ = self.refresh(&reference).await;
        let result = self.archive.save(&reference).await.map(|_| ());
        finish(&record.module_id, Some(reference), result)
    }

    /// Load the image from its archive, building the archive first if missing.
    pub async fn ensure_loaded(&self, mut record: ModuleRecord) -> ModuleReport {
        let reference = match self.resolve(&mut record).await {
            Ok(reference) => reference,
            Err(e) => return finish(&record.module_id, None, Err(e)),
        };

        let result = self.load_with_heal(&reference).await;
        finish(&record.module_id, Some(reference), result)
    }

    /// Archive every tagged image currently installed in the runtime.
    pub async fn export_installed(&self) -> Result<Vec<ModuleReport>> {
        let images = self.engine.list().await?;
        let tags: Vec<String> = images
            .iter()
            .flat_map(|img| img.named_tags().map(String::from))
            .collect();
        tracing::info!(count = tags.len(), "Exporting installed images");

        Ok(stream::iter(tags)
            .map(|tag| async move {
                let result = self.archive.save(&tag).await.map(|_| ());
                finish(&tag, Some(tag.clone()), result)
            })
            .buffered(self.concurrency)
            .collect()
            .await)
    }

    /// Resolve every record and report what a sync would do, without
    /// touching the runtime or the archive directory.
    pub async fn plan(&self, records: Vec<ModuleRecord>) -> Vec<PlanEntry> {
        stream::iter(records)
            .map(|record| self.plan_module(record))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn plan_module(&self, record: ModuleRecord) -> PlanEntry {
        let template_url = self.resolver.template_url(&record.module_id);
        match self.resolver.resolve(&record.module_id).await {
            Ok(image) => {
                let action = if self.archive.exists(&image).await {
                    PlannedAction::LoadArchive {
                        path: self.archive.path_for(&image),
                    }
                } else if let Some(cid) = record.cid.clone().filter(|c| !c.is_empty()) {
                    PlannedAction::FetchFromIpfs { cid }
                } else {
                    PlannedAction::Pull {
                        image: image.clone(),
                    }
                };
                PlanEntry {
                    report: ModuleReport::resolved(record.module_id, image),
                    template_url,
                    action: Some(action),
                }
            }
            Err(e) => PlanEntry {
                report: ModuleReport::failed(record.module_id, None, e.outcome(), e.to_string()),
                template_url,
                action: None,
            },
        }
    }

    async fn resolve(&self, record: &mut ModuleRecord) -> Result<String> {
        let reference = self.resolver.resolve(&record.module_id).await?;
        record.image = reference.clone();
        Ok(reference)
    }

    async fn load_with_heal(&self, reference: &str) -> Result<()> {
        if !self.archive.exists(reference).await {
            tracing::info!(
                reference = %reference,
                path = %self.archive.path_for(reference).display(),
                "No archive cached, pulling and saving first"
            );
            let _ = self.refresh(reference).await;
            self.archive.save(reference).await?;
        }
        self.archive.load(reference).await?;
        Ok(())
    }

    /// Pull `reference` from its registry. Failures are logged and returned;
    /// callers decide whether they matter.
    async fn refresh(&self, reference: &str) -> Result<()> {
        match self.engine.pull(reference).await {
            Ok(()) => {
                tracing::info!(reference = %reference, "Pulled image");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    reference = %reference,
                    error = %e,
                    "Pull failed, continuing with local image"
                );
                Err(e)
            }
        }
    }
}

/// Turn a flow result into the module's report, logging its status line.
fn finish(module_id: &str, image: Option<String>, result: Result<()>) -> ModuleReport {
    match result {
        Ok(()) => {
            tracing::info!(
                module = %module_id,
                image = image.as_deref().unwrap_or(""),
                "Module synced"
            );
            ModuleReport::resolved(module_id, image.unwrap_or_default())
        }
        Err(e) => {
            let outcome = e.outcome();
            tracing::warn!(
                module = %module_id,
                image = image.as_deref().unwrap_or(""),
                outcome = %outcome,
                error = %e,
                "Module sync failed"
            );
            ModuleReport::failed(module_id, image, outcome, e.to_string())
        }
    }
}
