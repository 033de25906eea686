//! Full and incremental builds of the compact index.
//!
//! Records are computed in parallel first; artifacts are written one after
//! the other once every worker has joined, so readers never see a half
//! written index.

use crate::constants::{NAMES, SCAN_STATE, VERSIONS};
use crate::core::artifact::{ArtifactStore, info_logical};
use crate::core::batch::PackageBatchProcessor;
use crate::core::context::MirrorContext;
use crate::core::gem::{GemDependencies, GemIdentity, SpecificationRecord};
use crate::core::scan_state::ScanState;
use crate::core::version_index::{SEPARATOR, VersionIndex, VersionIndexCache};
use crate::registry::reader::PackageReader;
use crate::utils::fs::{file_name, filesystem_now, list_package_files, modified};
use crate::utils::hash::fast_digest;
use crate::{MirrorError, Result};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub packages: usize,
    pub names: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Package files that were new, removed or modified
    pub changed_files: usize,
    /// Gem names whose `info` artifact was rewritten
    pub names: Vec<String>,
}

/// Outcome of an incremental update
#[derive(Debug)]
pub enum UpdateStatus {
    Updated(UpdateReport),
    NoChanges,
    Fatal(MirrorError),
}

impl UpdateStatus {
    pub fn into_result(self) -> Result<Option<UpdateReport>> {
        match self {
            UpdateStatus::Updated(report) => Ok(Some(report)),
            UpdateStatus::NoChanges => Ok(None),
            UpdateStatus::Fatal(e) => Err(e),
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStatus::Updated(report) => write!(f, "updated {}", report.names.len()),
            UpdateStatus::NoChanges => f.write_str("no changes"),
            UpdateStatus::Fatal(e) => write!(f, "failed: {}", e),
        }
    }
}

/// What changed on disk since the last index was written
#[derive(Debug, Default)]
struct ChangeSet {
    files: Vec<PathBuf>,
    removed: Vec<GemIdentity>,
}

/// A local package file and every identity its name can stand for
#[derive(Debug)]
struct PackageFile {
    path: PathBuf,
    candidates: Vec<GemIdentity>,
}

impl PackageFile {
    fn may_be(&self, name: &str) -> bool {
        self.candidates.iter().any(|g| g.name == name)
    }

    /// The reading already recorded in `index`
    fn indexed<'a>(&'a self, index: &VersionIndex) -> Option<&'a GemIdentity> {
        self.candidates.iter().find(|g| index.contains(g))
    }
}

pub struct IndexEngine {
    ctx: Arc<MirrorContext>,
    store: ArtifactStore,
    batch: PackageBatchProcessor,
    versions: VersionIndexCache,
}

impl IndexEngine {
    pub fn new(ctx: Arc<MirrorContext>, reader: Arc<dyn PackageReader>) -> Self {
        let store = ArtifactStore::new(ctx.config.destination.clone());
        let batch = PackageBatchProcessor::new(reader, ctx.interrupt_flag());
        Self {
            ctx,
            store,
            batch,
            versions: VersionIndexCache::new(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn context(&self) -> &MirrorContext {
        &self.ctx
    }

    fn package_files(&self) -> Result<Vec<PackageFile>> {
        let files = list_package_files(&self.ctx.config.gems_dir())?;
        Ok(files
            .into_iter()
            .filter_map(|path| {
                let candidates = GemIdentity::candidates_from_filename(&file_name(&path));
                if candidates.is_empty() {
                    debug!("Ignoring unrecognised file {}", path.display());
                    return None;
                }
                Some(PackageFile { path, candidates })
            })
            .collect())
    }

    fn scan_state_path(&self) -> PathBuf {
        self.ctx.config.destination.join(SCAN_STATE)
    }

    fn record_scan(&self, scope: Option<&str>, started: SystemTime) -> Result<()> {
        let path = self.scan_state_path();
        let mut state = ScanState::load(&path)?;
        state.record(scope, started);
        state.save(&path)
    }

    fn process(&self, paths: &[PathBuf]) -> Result<Vec<SpecificationRecord>> {
        self.batch.process(paths, self.ctx.config.concurrency)
    }

    /// The `versions` index as last written, reparsed only when it changes
    pub fn current_index(&self) -> Result<Arc<VersionIndex>> {
        let current = self.store.read_current(VERSIONS)?;
        self.versions.load(&current.path)
    }

    /// Rebuild every artifact from all local gem files
    pub fn full_build(&self) -> Result<BuildReport> {
        self.store.refresh()?;
        let started = filesystem_now(&self.ctx.config.destination)?;
        let files: Vec<PathBuf> = self.package_files()?.into_iter().map(|f| f.path).collect();
        info!("Building full index from {} gems", files.len());

        let records = self.process(&files)?;
        self.ctx.check_interrupt()?;

        let grouped = group_by_name(records.iter());
        let names: Vec<String> = grouped.keys().cloned().collect();

        self.write_names(names.iter().map(String::as_str))?;
        let digests = self.write_infos(&grouped)?;

        let lines: Vec<String> = grouped
            .iter()
            .map(|(name, records)| {
                let tokens: Vec<String> = records.iter().map(|r| r.identity.version_token()).collect();
                versions_line(name, &tokens, &digests[name])
            })
            .collect();
        self.store.append_versions(&lines, None)?;

        for stale in self.store.info_names()? {
            if !grouped.contains_key(&stale) {
                debug!("Removing info for {}", stale);
                self.store.remove(&info_logical(&stale))?;
            }
        }

        self.ctx.cache.clear()?;
        self.record_scan(None, started)?;
        info!("Indexed {} gems under {} names", records.len(), names.len());
        Ok(BuildReport {
            packages: records.len(),
            names: names.len(),
        })
    }

    pub fn incremental_update(&self) -> UpdateStatus {
        self.run_update(None)
    }

    /// Incremental update restricted to one gem name
    pub fn incremental_update_scoped(&self, name: &str) -> UpdateStatus {
        self.run_update(Some(name))
    }

    fn run_update(&self, scope: Option<&str>) -> UpdateStatus {
        match self.try_update(scope) {
            Ok(Some(report)) => UpdateStatus::Updated(report),
            Ok(None) => UpdateStatus::NoChanges,
            Err(e) => UpdateStatus::Fatal(e),
        }
    }

    fn try_update(&self, scope: Option<&str>) -> Result<Option<UpdateReport>> {
        self.store.refresh()?;
        let current = match self.store.read_current(VERSIONS) {
            Ok(current) => current,
            Err(MirrorError::ArtifactMissing(_)) => {
                return Err(MirrorError::PrerequisiteMissing(
                    "No versions index found; run a full index build first".to_string(),
                ));
            }
            Err(e) => return Err(e),
        };
        let index = self.versions.load(&current.path)?;
        let previous = std::fs::read(&current.path)?;

        let started = filesystem_now(&self.ctx.config.destination)?;
        let state = ScanState::load(&self.scan_state_path())?;
        let files = self.package_files()?;
        let changes = self.detect_changes(&index, &files, &state, modified(&current.path)?, scope)?;
        if changes.files.is_empty() && changes.removed.is_empty() {
            info!("Index is up to date");
            return Ok(None);
        }
        info!(
            "Updating index: {} changed gems, {} removed",
            changes.files.len(),
            changes.removed.len()
        );

        let changed_records = self.process(&changes.files)?;
        self.ctx.check_interrupt()?;

        let changed_names: BTreeSet<String> = changed_records
            .iter()
            .map(|r| r.identity.name.clone())
            .chain(changes.removed.iter().map(|g| g.name.clone()))
            .collect();
        if changed_names.is_empty() {
            info!("No readable changes found");
            return Ok(None);
        }

        // info/<name> lists every version, so re-read all siblings
        let siblings: Vec<PathBuf> = files
            .iter()
            .filter(|f| changed_names.iter().any(|name| f.may_be(name)))
            .map(|f| f.path.clone())
            .collect();
        let widened_records = self.process(&siblings)?;
        self.ctx.check_interrupt()?;

        let mut grouped = group_by_name(
            widened_records
                .iter()
                .filter(|r| changed_names.contains(&r.identity.name)),
        );
        for name in &changed_names {
            grouped.entry(name.clone()).or_default();
        }

        // names declared by the gems read this run, else as already indexed
        let declared: BTreeMap<String, &str> = changed_records
            .iter()
            .chain(widened_records.iter())
            .map(|r| (r.identity.gem_filename(), r.identity.name.as_str()))
            .collect();
        let all_names: BTreeSet<&str> = files
            .iter()
            .filter_map(|f| {
                declared
                    .get(&file_name(&f.path))
                    .copied()
                    .or_else(|| f.indexed(&index).map(|g| g.name.as_str()))
            })
            .collect();
        self.write_names(all_names.into_iter())?;
        let digests = self.write_infos(&grouped)?;

        let lines: Vec<String> = grouped
            .iter()
            .map(|(name, records)| {
                let mut tokens: Vec<String> =
                    records.iter().map(|r| r.identity.version_token()).collect();
                let present: BTreeSet<&GemIdentity> = records.iter().map(|r| &r.identity).collect();
                tokens.extend(
                    index
                        .lookup(name)
                        .iter()
                        .map(|(v, p)| GemIdentity::new(name, v, p))
                        .filter(|g| !present.contains(g))
                        .map(|g| format!("-{}", g.version_token())),
                );
                versions_line(name, &tokens, &digests[name])
            })
            .collect();
        self.store.append_versions(&lines, Some(&previous))?;

        for name in &changed_names {
            self.ctx.cache.invalidate(name)?;
        }
        self.record_scan(scope, started)?;

        Ok(Some(UpdateReport {
            changed_files: changes.files.len() + changes.removed.len(),
            names: changed_names.into_iter().collect(),
        }))
    }

    fn detect_changes(
        &self,
        index: &VersionIndex,
        files: &[PackageFile],
        state: &ScanState,
        fallback: SystemTime,
        scope: Option<&str>,
    ) -> Result<ChangeSet> {
        let in_scope = |name: &str| scope.is_none_or(|s| s == name);

        let mut changed: BTreeSet<PathBuf> = BTreeSet::new();
        let mut on_disk: BTreeSet<&GemIdentity> = BTreeSet::new();
        for file in files {
            match file.indexed(index) {
                Some(identity) => {
                    on_disk.insert(identity);
                    if in_scope(&identity.name)
                        && modified(&file.path)? > state.since(&identity.name, fallback)
                    {
                        changed.insert(file.path.clone());
                    }
                }
                None => {
                    if file.candidates.iter().any(|g| in_scope(&g.name)) {
                        changed.insert(file.path.clone());
                    }
                }
            }
        }

        let removed = index
            .identities()
            .filter(|g| in_scope(&g.name) && !on_disk.contains(g))
            .collect();

        Ok(ChangeSet {
            files: changed.into_iter().collect(),
            removed,
        })
    }

    fn write_names<'a>(&self, names: impl Iterator<Item = &'a str>) -> Result<()> {
        let mut content = format!("{}\n", SEPARATOR);
        for name in names {
            content.push_str(name);
            content.push('\n');
        }
        self.store.write(NAMES, content.as_bytes())?;
        Ok(())
    }

    /// Write `info/<name>` for each group; returns each file's fast digest
    fn write_infos(
        &self,
        grouped: &BTreeMap<String, Vec<&SpecificationRecord>>,
    ) -> Result<BTreeMap<String, String>> {
        let contents: Vec<(&String, String)> = grouped
            .par_iter()
            .map(|(name, records)| (name, info_content(records)))
            .collect();

        let mut digests = BTreeMap::new();
        for (name, content) in contents {
            self.store.write(&info_logical(name), content.as_bytes())?;
            digests.insert(name.clone(), fast_digest(content.as_bytes()));
        }
        Ok(digests)
    }

    /// Dependency listing for every local version of `name`
    pub fn dependency_listing(&self, name: &str) -> Result<Vec<GemDependencies>> {
        let paths: Vec<PathBuf> = self
            .package_files()?
            .into_iter()
            .filter(|f| f.may_be(name))
            .map(|f| f.path)
            .collect();
        let mut records = self.process(&paths)?;
        records.retain(|r| r.identity.name == name);
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(records.iter().map(GemDependencies::from).collect())
    }
}

fn group_by_name<'a>(
    records: impl Iterator<Item = &'a SpecificationRecord>,
) -> BTreeMap<String, Vec<&'a SpecificationRecord>> {
    let mut grouped: BTreeMap<String, Vec<&SpecificationRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.identity.name.clone()).or_default().push(record);
    }
    for records in grouped.values_mut() {
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records.dedup_by(|a, b| a.identity == b.identity);
    }
    grouped
}

fn info_content(records: &[&SpecificationRecord]) -> String {
    let mut content = format!("{}\n", SEPARATOR);
    for record in records {
        content.push_str(&record.info_line());
        content.push('\n');
    }
    content
}

fn versions_line(name: &str, tokens: &[String], digest: &str) -> String {
    format!("{} {} {}", name, tokens.join(","), digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MirrorConfig;
    use crate::registry::reader::GemArchiveReader;
    use crate::registry::reader::tests::{build_gem, gemspec_yaml};
    use std::path::Path;
    use tempfile::{TempDir, tempdir};

    fn engine() -> (TempDir, IndexEngine) {
        let temp = tempdir().unwrap();
        let mut config = MirrorConfig::for_destination(temp.path(), "http://localhost");
        config.concurrency = 2;
        let ctx = Arc::new(MirrorContext::new(config).unwrap());
        let engine = IndexEngine::new(ctx, Arc::new(GemArchiveReader::new()));
        (temp, engine)
    }

    fn add_gem(root: &Path, name: &str, version: &str) {
        let dir = root.join("gems");
        std::fs::create_dir_all(&dir).unwrap();
        let yaml = gemspec_yaml(name, version, "ruby", &[("rack", "1.0")]);
        std::fs::write(dir.join(format!("{}-{}.gem", name, version)), build_gem(&yaml)).unwrap();
    }

    #[test]
    fn test_update_without_index_is_fatal() {
        let (temp, engine) = engine();
        add_gem(temp.path(), "rack", "1.0.0");
        let status = engine.incremental_update();
        assert!(matches!(status, UpdateStatus::Fatal(MirrorError::PrerequisiteMissing(_))));
        assert!(status.to_string().starts_with("failed: "));
    }

    #[test]
    fn test_full_build_writes_all_artifacts() {
        let (temp, engine) = engine();
        add_gem(temp.path(), "rack", "1.0.0");
        add_gem(temp.path(), "rack", "1.1.0");
        add_gem(temp.path(), "Sinatra", "2.0.0");

        let report = engine.full_build().unwrap();
        assert_eq!(report, BuildReport { packages: 3, names: 2 });

        let names = engine.store().read_content(NAMES).unwrap();
        assert_eq!(names, b"---\nSinatra\nrack\n");

        let info = String::from_utf8(engine.store().read_content(&info_logical("rack")).unwrap()).unwrap();
        let lines: Vec<&str> = info.lines().collect();
        assert_eq!(lines[0], "---");
        assert!(lines[1].starts_with("1.0.0 rack:>= 1.0|checksum:"));
        assert!(lines[2].starts_with("1.1.0 "));

        let index = engine.current_index().unwrap();
        assert_eq!(index.lookup("rack").len(), 2);
        let info_digest = engine.store().read_current(&info_logical("rack")).unwrap().fast_digest;
        assert_eq!(index.digest("rack"), Some(info_digest.as_str()));
    }

    #[test]
    fn test_scoped_update_ignores_other_names() {
        let (temp, engine) = engine();
        add_gem(temp.path(), "rack", "1.0.0");
        engine.full_build().unwrap();

        add_gem(temp.path(), "sinatra", "2.0.0");
        assert!(matches!(engine.incremental_update_scoped("rack"), UpdateStatus::NoChanges));

        match engine.incremental_update_scoped("sinatra") {
            UpdateStatus::Updated(report) => assert_eq!(report.names, vec!["sinatra"]),
            other => panic!("unexpected status: {}", other),
        }
    }

    #[test]
    fn test_removed_gem_is_yanked_from_versions() {
        let (temp, engine) = engine();
        add_gem(temp.path(), "rack", "1.0.0");
        add_gem(temp.path(), "rack", "2.0.0");
        engine.full_build().unwrap();

        std::fs::remove_file(temp.path().join("gems/rack-1.0.0.gem")).unwrap();
        let status = engine.incremental_update();
        assert!(matches!(status, UpdateStatus::Updated(_)));

        let index = engine.current_index().unwrap();
        assert_eq!(index.lookup("rack"), &[("2.0.0".to_string(), "ruby".to_string())]);
        assert!(matches!(engine.incremental_update(), UpdateStatus::NoChanges));
    }

    #[test]
    fn test_dependency_listing() {
        let (temp, engine) = engine();
        add_gem(temp.path(), "rack-test", "0.2.0");
        add_gem(temp.path(), "rack-test", "0.10.0");

        let listing = engine.dependency_listing("rack-test").unwrap();
        let numbers: Vec<&str> = listing.iter().map(|d| d.number.as_str()).collect();
        assert_eq!(numbers, vec!["0.2.0", "0.10.0"]);
        assert_eq!(listing[0].dependencies, vec![("rack".to_string(), ">= 1.0".to_string())]);
        assert!(engine.dependency_listing("missing").unwrap().is_empty());
    }
}
