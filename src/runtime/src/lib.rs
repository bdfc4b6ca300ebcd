//! modcache runtime - module resolution, archive cache and sync flows.
//!
//! This crate wires the allow-list manifest, the module resolver, the
//! on-disk archive cache and the container engine adapters into the
//! ensure-exported / ensure-loaded sync flows.

pub mod archive;
pub mod engine;
pub mod http;
pub mod manifest;
pub mod resolver;
pub mod sync;

// Re-export common types
pub use archive::{sanitize, ArchiveCache, ArchiveEntry, SaveStatus};
pub use engine::{ArchiveReader, DockerApi, DockerCli, EngineImage, ImageEngine};
pub use manifest::ManifestLoader;
pub use resolver::{extract_image_field, ModuleResolver};
pub use sync::{PlanEntry, PlannedAction, SyncDriver};

/// modcache runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
