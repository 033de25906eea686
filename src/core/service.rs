//! Read side of the mirror, as used by the HTTP route layer.

use crate::constants::{GEMS_DIR, MARSHAL_DIR, NAMES, VERSIONS};
use crate::core::artifact::{CurrentArtifact, info_logical};
use crate::core::engine::IndexEngine;
use crate::core::fetcher::{FetchKind, MirrorFetcher};
use crate::core::gem::{GemDependencies, GemIdentity};
use crate::registry::source::Source;
use crate::utils::hash::hex_to_bytes;
use crate::{MirrorError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::path::PathBuf;
use std::sync::Arc;

pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// An artifact ready to be served, with headers taken from its file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedArtifact {
    pub path: PathBuf,
    /// `ETag` header value
    pub etag: String,
    /// `Repr-Digest` header value
    pub repr_digest: String,
    pub content_type: &'static str,
}

impl From<CurrentArtifact> for ServedArtifact {
    fn from(current: CurrentArtifact) -> Self {
        let digest = hex_to_bytes(&current.strong_digest).unwrap_or_default();
        Self {
            etag: format!("\"{}\"", current.fast_digest),
            repr_digest: format!("sha-256=:{}:", STANDARD.encode(digest)),
            content_type: CONTENT_TYPE,
            path: current.path,
        }
    }
}

pub struct MirrorService<S: Source> {
    engine: Arc<IndexEngine>,
    fetcher: MirrorFetcher<S>,
}

impl<S: Source> MirrorService<S> {
    pub fn new(engine: Arc<IndexEngine>, fetcher: MirrorFetcher<S>) -> Self {
        Self { engine, fetcher }
    }

    pub fn fetcher(&self) -> &MirrorFetcher<S> {
        &self.fetcher
    }

    pub fn names(&self) -> Result<ServedArtifact> {
        Ok(self.engine.store().read_current(NAMES)?.into())
    }

    pub fn versions(&self) -> Result<ServedArtifact> {
        Ok(self.engine.store().read_current(VERSIONS)?.into())
    }

    /// `None` when the gem is unknown
    pub fn info(&self, name: &str) -> Result<Option<ServedArtifact>> {
        if !is_plain_name(name) {
            return Ok(None);
        }
        match self.engine.store().read_current(&info_logical(name)) {
            Ok(current) => Ok(Some(current.into())),
            Err(MirrorError::ArtifactMissing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Dependency listings for several gems, memoized per name
    pub fn dependencies_for(&self, names: &[String]) -> Result<Vec<GemDependencies>> {
        let cache = &self.engine.context().cache;
        let mut listing = Vec::new();
        for name in names.iter().filter(|n| is_plain_name(n)) {
            let deps: Vec<GemDependencies> =
                cache.get_or_compute(name, || self.engine.dependency_listing(name))?;
            listing.extend(deps);
        }
        tracing::debug!("Dependency cache hit rate {:.0}%", cache.hit_rate() * 100.0);
        Ok(listing)
    }

    /// Local path for a gem or gemspec request, fetching it first if needed
    pub async fn resolve(&self, resource: &str) -> Option<PathBuf> {
        let resource = resource.trim_start_matches('/');
        let (kind, filename) = if let Some(file) = resource.strip_prefix(&format!("{}/", GEMS_DIR)) {
            (FetchKind::Package, file)
        } else if let Some(file) = resource.strip_prefix(&format!("{}/", MARSHAL_DIR)) {
            (FetchKind::DependencyBlob, file)
        } else {
            return None;
        };

        let suffix_ok = match kind {
            FetchKind::Package => filename.ends_with(".gem"),
            FetchKind::DependencyBlob => filename.ends_with(".gemspec.rz"),
        };
        if !suffix_ok || !is_plain_name(filename) {
            return None;
        }

        let identity = GemIdentity::from_filename(filename)?;
        self.fetcher.ensure(&identity, kind).await;

        let path = self.fetcher.local_path(&identity, kind);
        path.is_file().then_some(path)
    }
}

/// A single path component, so requests cannot leave the mirror directory
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
