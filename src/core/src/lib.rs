//! modcache Core - Foundational Types
//!
//! Error taxonomy, configuration and the data model shared by the
//! runtime and CLI crates.

pub mod config;
pub mod error;
pub mod model;

// Re-export commonly used types
pub use config::{EngineKind, SyncConfig, DEFAULT_MANIFEST_URL};
pub use error::{Result, SyncError};
pub use model::{ModuleRecord, ModuleReport, SyncMode, SyncOutcome, SyncSummary};

/// modcache version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
