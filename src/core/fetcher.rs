use crate::constants::MAX_CONCURRENT_DOWNLOADS;
use crate::core::config::GemSpec;
use crate::core::context::MirrorContext;
use crate::core::engine::{IndexEngine, UpdateStatus};
use crate::core::gem::GemIdentity;
use crate::core::version_index::VersionIndex;
use crate::registry::source::Source;
use crate::utils::fs::atomic_write;
use crate::{MirrorError, Result};
use futures::stream::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The two kinds of file the mirror pulls from upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    /// A `.gem` archive under `gems/`
    Package,
    /// A `.gemspec.rz` blob under `quick/Marshal.4.8/`
    DependencyBlob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchOutcome {
    Fetched,
    Present,
    Ignored,
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl FetchSummary {
    fn record(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Fetched => self.fetched += 1,
            FetchOutcome::Present | FetchOutcome::Ignored => self.skipped += 1,
            FetchOutcome::Failed => self.failed += 1,
        }
    }
}

/// Pulls missing gems from the upstream source into the mirror
pub struct MirrorFetcher<S: Source> {
    ctx: Arc<MirrorContext>,
    source: S,
    engine: Option<Arc<IndexEngine>>,
}

impl<S: Source> MirrorFetcher<S> {
    pub fn new(ctx: Arc<MirrorContext>, source: S) -> Self {
        Self {
            ctx,
            source,
            engine: None,
        }
    }

    /// Engine used for the scoped index update after a package fetch
    pub fn with_engine(mut self, engine: Arc<IndexEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Where a fetched file of `kind` lives in the mirror
    pub fn local_path(&self, identity: &GemIdentity, kind: FetchKind) -> PathBuf {
        match kind {
            FetchKind::Package => self.ctx.config.gems_dir().join(identity.gem_filename()),
            FetchKind::DependencyBlob => {
                self.ctx.config.marshal_dir().join(identity.gemspec_filename())
            }
        }
    }

    /// Make sure the file for `identity` exists locally.
    ///
    /// Returns true only when the file was downloaded by this call.
    pub async fn ensure(&self, identity: &GemIdentity, kind: FetchKind) -> bool {
        let outcome = self.fetch_one(identity, kind).await;
        if outcome != FetchOutcome::Fetched {
            return false;
        }

        if kind == FetchKind::Package && self.ctx.config.update_on_fetch {
            self.update_index_for(&identity.name).await;
        }
        true
    }

    async fn fetch_one(&self, identity: &GemIdentity, kind: FetchKind) -> FetchOutcome {
        if self.ctx.ignored.contains(kind, identity) {
            debug!("Skipping ignored {} ({:?})", identity, kind);
            return FetchOutcome::Ignored;
        }

        let path = self.local_path(identity, kind);
        if path.exists() {
            debug!("Skipping {}, already present", path.display());
            return FetchOutcome::Present;
        }

        info!("Fetching {}", identity);
        let fetched = match kind {
            FetchKind::Package => self.source.fetch_package(&identity.gem_filename()).await,
            FetchKind::DependencyBlob => {
                self.source
                    .fetch_dependency_blob(&identity.gemspec_filename())
                    .await
            }
        };

        let result = match fetched {
            Ok(bytes) => atomic_write(&path, &bytes).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => FetchOutcome::Fetched,
            Err(e) => {
                error!("Failed to retrieve {}: {}", identity, e);
                debug!("Adding {} ({:?}) to the list of ignored gems", identity, kind);
                self.ctx.ignored.insert(kind, identity);
                FetchOutcome::Failed
            }
        }
    }

    async fn update_index_for(&self, name: &str) {
        let Some(engine) = self.engine.clone() else {
            return;
        };

        let scope = name.to_string();
        let status = tokio::task::spawn_blocking(move || engine.incremental_update_scoped(&scope)).await;
        match status {
            Ok(UpdateStatus::Fatal(e)) => warn!("Index update for {} failed: {}", name, e),
            Ok(status) => debug!("Index update for {}: {}", name, status),
            Err(e) => error!("Index update for {} panicked: {}", name, e),
        }
    }

    /// Versions of a configured gem that `update` should mirror
    pub fn versions_for(&self, spec: &GemSpec, index: &VersionIndex) -> Result<Vec<GemIdentity>> {
        let newest = index.newest(&spec.name);
        if spec.only_latest {
            return Ok(newest.into_iter().collect());
        }

        let requirement = spec.requirement()?;
        let available: Vec<GemIdentity> = index
            .lookup(&spec.name)
            .iter()
            .map(|(v, p)| GemIdentity::new(&spec.name, v, p))
            .collect();

        let mut selected: Vec<GemIdentity> = match requirement.exact_version() {
            // compare as strings so "3.4" does not pick up "3.4.0"
            Some(exact) => available
                .iter()
                .filter(|g| g.version == exact.as_str())
                .cloned()
                .collect(),
            None => available,
        };
        if selected.is_empty() {
            selected.extend(newest);
        }

        selected.retain(|g| requirement.is_satisfied_by(&g.version()));
        Ok(selected)
    }

    /// Fetch every gem listed in the configuration.
    ///
    /// The index is not touched; run an index build afterwards.
    pub async fn fetch_configured(&self, index: &VersionIndex) -> Result<FetchSummary> {
        let mut summary = FetchSummary::default();
        let mut pending = Vec::new();

        for spec in &self.ctx.config.source.gems {
            match self.versions_for(spec, index) {
                Ok(versions) if versions.is_empty() => {
                    warn!("No upstream version of {} matches its requirement", spec.name);
                }
                Ok(versions) => pending.extend(versions),
                Err(e) => {
                    error!("{}", e);
                    summary.failed += 1;
                }
            }
        }

        let mut downloads = futures::stream::iter(pending)
            .map(|identity| async move {
                self.ctx.check_interrupt()?;
                let mut outcomes = vec![self.fetch_one(&identity, FetchKind::Package).await];
                if self.ctx.config.fetch_gemspecs {
                    outcomes.push(self.fetch_one(&identity, FetchKind::DependencyBlob).await);
                }
                Ok::<_, MirrorError>(outcomes)
            })
            .buffer_unordered(MAX_CONCURRENT_DOWNLOADS);

        while let Some(outcomes) = downloads.next().await {
            for outcome in outcomes? {
                summary.record(outcome);
            }
        }

        info!(
            "Fetched {} files, skipped {}, failed {}",
            summary.fetched, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    /// Download and parse the upstream `versions` listing
    pub async fn fetch_upstream_index(&self) -> Result<VersionIndex> {
        info!("Updating upstream version list");
        let blob = self.source.fetch_version_list().await?;
        VersionIndex::parse(&blob).map_err(|e| match e {
            MirrorError::MalformedIndex(reason) => {
                MirrorError::MalformedIndex(format!("upstream versions: {}", reason))
            }
            other => other,
        })
    }
}
