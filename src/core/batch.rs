use crate::core::gem::SpecificationRecord;
use crate::core::version::is_valid_version;
use crate::registry::reader::{PackageReader, ReadError};
use crate::utils::fs::file_name;
use crate::{MirrorError, Result};
use dashmap::DashMap;
use rayon::ThreadPool;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

/// Reads many gem files on a bounded worker pool, skipping the bad ones
pub struct PackageBatchProcessor {
    reader: Arc<dyn PackageReader>,
    interrupt: Arc<AtomicBool>,
    /// Worker pools by thread count, built on first use
    pools: DashMap<usize, Arc<ThreadPool>>,
}

impl PackageBatchProcessor {
    pub fn new(reader: Arc<dyn PackageReader>, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            reader,
            interrupt,
            pools: DashMap::new(),
        }
    }

    fn pool(&self, concurrency: usize) -> Result<Arc<ThreadPool>> {
        let threads = concurrency.max(1);
        if let Some(pool) = self.pools.get(&threads) {
            return Ok(Arc::clone(pool.value()));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gem-reader-{}", i))
            .build()
            .map_err(|e| MirrorError::WorkerPool(e.to_string()))?;
        Ok(Arc::clone(self.pools.entry(threads).or_insert(Arc::new(pool)).value()))
    }

    /// Read every path with `concurrency` workers.
    ///
    /// Each worker writes only the slot of its input index, so failed files
    /// leave an empty slot behind. An interrupt aborts the whole batch.
    pub fn process(&self, paths: &[PathBuf], concurrency: usize) -> Result<Vec<SpecificationRecord>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.pool(concurrency)?;
        let mut slots: Vec<Option<SpecificationRecord>> = vec![None; paths.len()];
        pool.install(|| {
            slots
                .par_iter_mut()
                .zip(paths.par_iter())
                .try_for_each(|(slot, path)| -> Result<()> {
                    if self.interrupt.load(Ordering::SeqCst) {
                        return Err(MirrorError::Interrupted);
                    }
                    *slot = self.load(path)?;
                    Ok(())
                })
        })?;

        Ok(slots.into_iter().flatten().collect())
    }

    /// Read one file. `Ok(None)` means the file was skipped.
    fn load(&self, path: &Path) -> Result<Option<SpecificationRecord>> {
        let len = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                error!("Unable to process {}: {}", path.display(), e);
                return Ok(None);
            }
        };
        if len == 0 {
            warn!("Skipping zero-length gem: {}", MirrorError::CorruptArtifact(path.to_path_buf()));
            return Ok(None);
        }

        let record = match self.reader.read(path) {
            Ok(record) => record,
            Err(ReadError::Interrupted) => return Err(MirrorError::Interrupted),
            Err(ReadError::Format(reason)) => {
                warn!("Unable to process {}: {}", path.display(), reason);
                return Ok(None);
            }
            Err(e) => {
                error!("Unable to process {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        let expected = file_name(path);
        if record.identity.gem_filename() != expected {
            let mismatch = MirrorError::NameMismatch {
                path: path.to_path_buf(),
                declared: record.identity.to_string(),
            };
            warn!("Skipping misnamed gem: {}", mismatch);
            return Ok(None);
        }

        if !is_valid_version(&record.identity.version) {
            warn!(
                "Skipping gem {} with invalid version {:?}",
                path.display(),
                record.identity.version
            );
            return Ok(None);
        }

        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gem::GemIdentity;
    use crate::registry::reader::GemArchiveReader;
    use crate::registry::reader::tests::{build_gem, gemspec_yaml};
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    struct InterruptingReader;

    impl PackageReader for InterruptingReader {
        fn read(&self, _path: &Path) -> std::result::Result<SpecificationRecord, ReadError> {
            Err(ReadError::Interrupted)
        }
    }

    fn processor(reader: Arc<dyn PackageReader>) -> PackageBatchProcessor {
        PackageBatchProcessor::new(reader, Arc::new(AtomicBool::new(false)))
    }

    fn write_gem(dir: &Path, filename: &str, name: &str, version: &str) -> PathBuf {
        let path = dir.join(filename);
        std::fs::write(&path, build_gem(&gemspec_yaml(name, version, "ruby", &[]))).unwrap();
        path
    }

    #[test]
    fn test_skips_bad_files_and_keeps_going() {
        let temp = tempdir().unwrap();
        let dir = temp.path();
        let good = write_gem(dir, "rack-1.0.0.gem", "rack", "1.0.0");
        let empty = dir.join("empty-1.0.0.gem");
        std::fs::write(&empty, b"").unwrap();
        let garbage = dir.join("garbage-1.0.0.gem");
        std::fs::write(&garbage, b"this is not a gem archive").unwrap();
        let misnamed = write_gem(dir, "other-1.0.0.gem", "rack", "1.0.0");
        let bad_version = write_gem(dir, "odd-latest.gem", "odd", "latest");
        let dashed_version = write_gem(dir, "foo-1.0.0-rc1.gem", "foo", "1.0.0-rc1");

        let records = processor(Arc::new(GemArchiveReader::new()))
            .process(&[good, empty, garbage, misnamed, bad_version, dashed_version], 4)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, GemIdentity::ruby("rack", "1.0.0"));
    }

    #[test]
    fn test_pool_size_does_not_change_results() {
        let temp = tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..12)
            .map(|i| {
                let version = format!("1.{}.0", i);
                write_gem(temp.path(), &format!("g{}-{}.gem", i % 3, version), &format!("g{}", i % 3), &version)
            })
            .collect();

        let reader: Arc<dyn PackageReader> = Arc::new(GemArchiveReader::new());
        let single: BTreeSet<GemIdentity> = processor(reader.clone())
            .process(&paths, 1)
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        let parallel: BTreeSet<GemIdentity> = processor(reader)
            .process(&paths, 8)
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(single.len(), 12);
        assert_eq!(single, parallel);
    }

    #[test]
    fn test_interrupt_aborts_batch() {
        let temp = tempdir().unwrap();
        let path = write_gem(temp.path(), "rack-1.0.0.gem", "rack", "1.0.0");

        let result = processor(Arc::new(InterruptingReader)).process(&[path.clone()], 2);
        assert!(matches!(result, Err(MirrorError::Interrupted)));

        let flagged = PackageBatchProcessor::new(
            Arc::new(GemArchiveReader::new()),
            Arc::new(AtomicBool::new(true)),
        );
        assert!(matches!(flagged.process(&[path], 2), Err(MirrorError::Interrupted)));
    }

    #[test]
    fn test_pools_are_reused() {
        let temp = tempdir().unwrap();
        let path = write_gem(temp.path(), "rack-1.0.0.gem", "rack", "1.0.0");
        let processor = processor(Arc::new(GemArchiveReader::new()));

        for _ in 0..3 {
            assert_eq!(processor.process(&[path.clone()], 2).unwrap().len(), 1);
        }
        assert_eq!(processor.pools.len(), 1);

        processor.process(&[path], 3).unwrap();
        assert_eq!(processor.pools.len(), 2);
    }
}
