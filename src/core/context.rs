use crate::core::cache::DiskCache;
use crate::core::config::MirrorConfig;
use crate::core::fetcher::FetchKind;
use crate::core::gem::GemIdentity;
use crate::{MirrorError, Result};
use dashmap::DashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fetches that failed during this run and must not be retried
#[derive(Debug, Default)]
pub struct IgnoreSet {
    entries: DashSet<(FetchKind, GemIdentity)>,
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kind: FetchKind, identity: &GemIdentity) {
        self.entries.insert((kind, identity.clone()));
    }

    pub fn contains(&self, kind: FetchKind, identity: &GemIdentity) -> bool {
        self.entries.contains(&(kind, identity.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Everything a mirror operation needs, built once per process
pub struct MirrorContext {
    pub config: MirrorConfig,
    pub cache: DiskCache,
    pub ignored: IgnoreSet,
    interrupt: Arc<AtomicBool>,
}

impl MirrorContext {
    pub fn new(config: MirrorConfig) -> Result<Self> {
        let cache = DiskCache::new(config.cache_dir())?;
        Ok(Self {
            config,
            cache,
            ignored: IgnoreSet::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag shared with the signal handler
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn check_interrupt(&self) -> Result<()> {
        if self.is_interrupted() {
            return Err(MirrorError::Interrupted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_set_is_scoped_to_identity() {
        let ignored = IgnoreSet::new();
        ignored.insert(FetchKind::Package, &GemIdentity::ruby("g", "1.0.0"));

        assert!(ignored.contains(FetchKind::Package, &GemIdentity::ruby("g", "1.0.0")));
        assert!(!ignored.contains(FetchKind::Package, &GemIdentity::new("g", "1.0.0", "java")));
        assert!(!ignored.contains(FetchKind::Package, &GemIdentity::ruby("g", "2.0.0")));
        assert!(!ignored.contains(FetchKind::DependencyBlob, &GemIdentity::ruby("g", "1.0.0")));
        assert_eq!(ignored.len(), 1);
    }

    #[test]
    fn test_interrupt_flag() {
        let temp = tempfile::tempdir().unwrap();
        let config = MirrorConfig::for_destination(temp.path(), "http://localhost");
        let ctx = MirrorContext::new(config).unwrap();
        assert!(ctx.check_interrupt().is_ok());

        ctx.interrupt_flag().store(true, Ordering::SeqCst);
        assert!(matches!(ctx.check_interrupt(), Err(MirrorError::Interrupted)));
    }
}
