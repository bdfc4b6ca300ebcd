//! CLI command definitions and dispatch.

mod archives;
mod export_installed;
mod plan;
mod sync;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use modcache_core::config::{EngineKind, SyncConfig};
use modcache_core::error::Result;
use modcache_core::model::{ModuleRecord, ModuleReport, SyncMode, SyncSummary};
use modcache_runtime::{manifest, ManifestLoader};

/// modcache - keep images for allow-listed modules archived and loaded.
#[derive(Parser)]
#[command(name = "modcache", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Defaults to `load`
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Options shared by every command. Flags override the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// YAML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Allow-list manifest URL
    #[arg(long, global = true, value_name = "URL")]
    pub manifest_url: Option<String>,

    /// Read the allow-list from a local file instead of fetching it
    #[arg(long, global = true, value_name = "FILE", conflicts_with = "manifest_url")]
    pub manifest_file: Option<PathBuf>,

    /// Directory holding image archives
    #[arg(long, global = true, value_name = "DIR")]
    pub archive_dir: Option<PathBuf>,

    /// How to talk to the container runtime
    #[arg(long, global = true, value_enum)]
    pub engine: Option<EngineArg>,

    /// Engine API address, used with `--engine api`
    #[arg(long, global = true, value_name = "URL")]
    pub docker_host: Option<String>,

    /// Modules processed in parallel
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Exit with status 2 if any module did not resolve
    #[arg(long, global = true)]
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineArg {
    /// `docker` command-line client
    Cli,
    /// Engine HTTP API
    Api,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Cli => EngineKind::Cli,
            EngineArg::Api => EngineKind::Api,
        }
    }
}

impl GlobalArgs {
    /// Build the effective configuration: config file (or defaults), then flags.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::from_file(path)?,
            None => SyncConfig::default(),
        };

        if let Some(url) = &self.manifest_url {
            config.manifest_url = url.clone();
        }
        if let Some(dir) = &self.archive_dir {
            config.archive_dir = dir.clone();
        }
        if let Some(engine) = self.engine {
            config.engine = engine.into();
        }
        if let Some(host) = &self.docker_host {
            config.docker_host = host.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load the allow-list from `--manifest-file` or the configured URL.
    pub async fn load_manifest(&self, config: &SyncConfig) -> Result<Vec<ModuleRecord>> {
        match &self.manifest_file {
            Some(path) => manifest::from_file(path).await,
            None => ManifestLoader::from_config(config)?.load().await,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Load every module image from its archive, archiving it first if missing
    Load(sync::SyncArgs),
    /// Pull every module image and make sure its archive exists
    Export(sync::SyncArgs),
    /// Archive every tagged image currently installed in the runtime
    ExportInstalled(export_installed::ExportInstalledArgs),
    /// Show what a sync would do without touching the runtime
    Plan(plan::PlanArgs),
    /// List archives in the archive directory
    Archives(archives::ArchivesArgs),
}

/// Some modules did not converge and `--strict` was given.
#[derive(Debug, thiserror::Error)]
#[error("{failed} of {total} modules did not resolve")]
pub struct StrictFailure {
    pub failed: usize,
    pub total: usize,
}

/// Apply `--strict` to a finished batch.
pub(crate) fn check_strict(
    global: &GlobalArgs,
    reports: &[ModuleReport],
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let summary = SyncSummary::from_reports(reports);
    if global.strict && !summary.is_clean() {
        return Err(Box::new(StrictFailure {
            failed: summary.total() - summary.resolved,
            total: summary.total(),
        }));
    }
    Ok(())
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let global = cli.global;
    match cli.command {
        None => sync::execute(&global, SyncMode::EnsureLoaded, sync::SyncArgs::default()).await,
        Some(Command::Load(args)) => sync::execute(&global, SyncMode::EnsureLoaded, args).await,
        Some(Command::Export(args)) => {
            sync::execute(&global, SyncMode::EnsureExported, args).await
        }
        Some(Command::ExportInstalled(args)) => export_installed::execute(&global, args).await,
        Some(Command::Plan(args)) => plan::execute(&global, args).await,
        Some(Command::Archives(args)) => archives::execute(&global, args).await,
    }
}
