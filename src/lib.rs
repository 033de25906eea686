//! gemmirror - pull-through RubyGems mirror
//!
//! Keeps a local copy of selected gems and serves them through the compact
//! index protocol:
//! - Incremental regeneration of `names`, `versions` and `info/<name>`
//! - Content-addressed artifact files for cheap cache validation
//! - Parallel package reading with per-file failure tolerance
//! - On-demand fetching of missing packages from the upstream host

// Use mimalloc for better memory performance
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod cli;
pub mod core;
pub mod registry;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    artifact::{ArtifactStore, CurrentArtifact},
    batch::PackageBatchProcessor,
    cache::DiskCache,
    config::MirrorConfig,
    context::{IgnoreSet, MirrorContext},
    engine::{BuildReport, IndexEngine, UpdateReport, UpdateStatus},
    fetcher::{FetchKind, FetchSummary, MirrorFetcher},
    gem::{GemIdentity, SpecificationRecord},
    service::{MirrorService, ServedArtifact},
    version::{Requirement, Version},
    version_index::{VersionIndex, VersionIndexCache},
};

pub use crate::registry::{
    reader::{GemArchiveReader, PackageReader, ReadError},
    source::{HttpSource, Source},
};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to retrieve {resource}: {reason}")]
    Fetch { resource: String, reason: String },

    #[error("Corrupt package file: {}", .0.display())]
    CorruptArtifact(PathBuf),

    #[error("Package file {} declares {declared}", .path.display())]
    NameMismatch { path: PathBuf, declared: String },

    #[error("Malformed version index: {0}")]
    MalformedIndex(String),

    #[error("{0}")]
    PrerequisiteMissing(String),

    #[error("No artifact found for {0}")]
    ArtifactMissing(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MirrorError>;

/// A runtime dependency declared by a gem version
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version_spec: String,
}

/// Global constants for layout and tuning
pub mod constants {
    use std::time::Duration;

    pub const DEFAULT_PLATFORM: &str = "ruby";
    pub const CONFIG_FILE: &str = "gemmirror.toml";
    pub const GEMS_DIR: &str = "gems";
    pub const INFO_DIR: &str = "info";
    pub const CACHE_DIR: &str = ".cache";
    pub const SCAN_STATE: &str = ".scan-state.json";
    pub const MARSHAL_DIR: &str = "quick/Marshal.4.8";
    pub const NAMES: &str = "names";
    pub const VERSIONS: &str = "versions";
    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MEMORY_CACHE_ENTRIES: usize = 1000;
    pub const MAX_CONCURRENT_DOWNLOADS: usize = 8;
}
