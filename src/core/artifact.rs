//! Content-addressed compact index artifacts.
//!
//! Every artifact is stored as `<logical>.<fast>.<strong>.list`, where the two
//! tokens are digests of the file's own bytes. Readers get the ETag and
//! digest headers from the file name without hashing anything.

use crate::constants::{INFO_DIR, VERSIONS};
use crate::core::version_index::{CREATED_AT_PREFIX, SEPARATOR};
use crate::utils::fs::{atomic_write_sync, file_name};
use crate::utils::hash::{fast_digest, strong_digest};
use crate::{MirrorError, Result};
use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static ARTIFACT_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+)\.([0-9a-f]{16})\.([0-9a-f]{64})\.list$").expect("artifact pattern is valid")
});

/// The physical file currently backing a logical artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentArtifact {
    pub path: PathBuf,
    pub fast_digest: String,
    pub strong_digest: String,
}

impl CurrentArtifact {
    fn from_path(path: PathBuf) -> Option<(String, Self)> {
        let name = file_name(&path);
        let caps = ARTIFACT_FILE.captures(&name)?;
        let base = caps[1].to_string();
        let artifact = Self {
            fast_digest: caps[2].to_string(),
            strong_digest: caps[3].to_string(),
            path,
        };
        Some((base, artifact))
    }
}

pub fn info_logical(name: &str) -> String {
    format!("{}/{}", INFO_DIR, name)
}

/// Fresh `versions` header stamped with the current time
pub fn versions_header() -> String {
    format!(
        "{}{}\n{}\n",
        CREATED_AT_PREFIX,
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        SEPARATOR
    )
}

pub struct ArtifactStore {
    root: PathBuf,
    current: RwLock<FxHashMap<String, CurrentArtifact>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            current: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory and file-name prefix of a logical name (`info/rack`)
    fn locate(&self, logical: &str) -> (PathBuf, String) {
        let path = self.root.join(logical);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        (dir, file_name(&path))
    }

    fn logical_for(&self, dir: &Path, base: &str) -> String {
        match dir.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => base.to_string(),
            Ok(rel) => format!("{}/{}", rel.to_string_lossy(), base),
            Err(_) => base.to_string(),
        }
    }

    /// Every file in `dir` matching the artifact pattern for `base`
    fn matching_files(dir: &Path, base: &str) -> Result<Vec<CurrentArtifact>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some((found, artifact)) = CurrentArtifact::from_path(entry.path()) {
                if found == base {
                    matches.push(artifact);
                }
            }
        }
        Ok(matches)
    }

    fn table_read(&self) -> Result<std::sync::RwLockReadGuard<'_, FxHashMap<String, CurrentArtifact>>> {
        self.current
            .read()
            .map_err(|_| MirrorError::Cache("artifact table lock poisoned".to_string()))
    }

    fn table_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, FxHashMap<String, CurrentArtifact>>> {
        self.current
            .write()
            .map_err(|_| MirrorError::Cache("artifact table lock poisoned".to_string()))
    }

    /// Rebuild the lookup table from a directory listing
    pub fn refresh(&self) -> Result<()> {
        let mut table = FxHashMap::default();
        for dir in [self.root.clone(), self.root.join(INFO_DIR)] {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                if let Some((base, artifact)) = CurrentArtifact::from_path(entry.path()) {
                    table.insert(self.logical_for(&dir, &base), artifact);
                }
            }
        }
        *self.table_write()? = table;
        Ok(())
    }

    /// Write `content` as the new current file for `logical` and retire the old ones
    pub fn write(&self, logical: &str, content: &[u8]) -> Result<PathBuf> {
        let (dir, base) = self.locate(logical);
        let fast = fast_digest(content);
        let strong = strong_digest(content);
        let target = dir.join(format!("{}.{}.{}.list", base, fast, strong));

        atomic_write_sync(&target, content)?;

        for stale in Self::matching_files(&dir, &base)? {
            if stale.path != target {
                std::fs::remove_file(&stale.path)?;
            }
        }

        tracing::debug!("Wrote {}", target.display());
        self.table_write()?.insert(
            logical.to_string(),
            CurrentArtifact {
                path: target.clone(),
                fast_digest: fast,
                strong_digest: strong,
            },
        );
        Ok(target)
    }

    pub fn read_current(&self, logical: &str) -> Result<CurrentArtifact> {
        if let Some(current) = self.table_read()?.get(logical) {
            if current.path.is_file() {
                return Ok(current.clone());
            }
        }

        // Another process may have written it; look at the directory once
        let (dir, base) = self.locate(logical);
        let mut found = Self::matching_files(&dir, &base)?;
        found.sort_by_key(|a| std::fs::metadata(&a.path).and_then(|m| m.modified()).ok());
        match found.pop() {
            Some(current) => {
                self.table_write()?.insert(logical.to_string(), current.clone());
                Ok(current)
            }
            None => {
                self.table_write()?.remove(logical);
                Err(MirrorError::ArtifactMissing(logical.to_string()))
            }
        }
    }

    pub fn read_content(&self, logical: &str) -> Result<Vec<u8>> {
        let current = self.read_current(logical)?;
        Ok(std::fs::read(current.path)?)
    }

    /// Append lines to an artifact, keeping `previous` byte-for-byte.
    /// Without previous content a fresh `created_at` header comes first.
    pub fn append(&self, logical: &str, entries: &[String], previous: Option<&[u8]>) -> Result<PathBuf> {
        let mut content = match previous {
            Some(previous) => {
                let mut content = previous.to_vec();
                if !content.is_empty() && !content.ends_with(b"\n") {
                    content.push(b'\n');
                }
                content
            }
            None => versions_header().into_bytes(),
        };
        for entry in entries {
            content.extend_from_slice(entry.as_bytes());
            content.push(b'\n');
        }
        self.write(logical, &content)
    }

    pub fn append_versions(&self, entries: &[String], previous: Option<&[u8]>) -> Result<PathBuf> {
        self.append(VERSIONS, entries, previous)
    }

    pub fn remove(&self, logical: &str) -> Result<()> {
        let (dir, base) = self.locate(logical);
        for stale in Self::matching_files(&dir, &base)? {
            std::fs::remove_file(&stale.path)?;
        }
        self.table_write()?.remove(logical);
        Ok(())
    }

    /// Gem names that currently have an `info` artifact
    pub fn info_names(&self) -> Result<Vec<String>> {
        let dir = self.root.join(INFO_DIR);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            if let Some((base, _)) = CurrentArtifact::from_path(entry?.path()) {
                names.push(base);
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NAMES;
    use tempfile::tempdir;

    fn count_matches(dir: &Path, prefix: &str) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                let name = e.as_ref().unwrap().file_name().to_string_lossy().to_string();
                name.starts_with(prefix) && name.ends_with(".list")
            })
            .count()
    }

    #[test]
    fn test_write_embeds_digests() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        let content = b"---\nrack\nsinatra\n";
        let path = store.write(NAMES, content).unwrap();

        let current = store.read_current(NAMES).unwrap();
        assert_eq!(current.path, path);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(current.fast_digest, fast_digest(&bytes));
        assert_eq!(current.strong_digest, strong_digest(&bytes));
        assert_eq!(
            file_name(&path),
            format!("names.{}.{}.list", fast_digest(content), strong_digest(content))
        );
    }

    #[test]
    fn test_write_retires_previous_file() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        store.write(NAMES, b"---\nrack\n").unwrap();
        store.write(NAMES, b"---\nrack\nsinatra\n").unwrap();
        store.write(&info_logical("rack"), b"---\n1.0.0 |checksum:abc\n").unwrap();
        store.write(&info_logical("rack"), b"---\n1.0.0 |checksum:def\n").unwrap();

        assert_eq!(count_matches(temp.path(), "names."), 1);
        assert_eq!(count_matches(&temp.path().join(INFO_DIR), "rack."), 1);
        assert_eq!(store.read_content(NAMES).unwrap(), b"---\nrack\nsinatra\n");
    }

    #[test]
    fn test_missing_artifact() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        assert!(matches!(
            store.read_current(VERSIONS),
            Err(MirrorError::ArtifactMissing(_))
        ));
        assert!(matches!(
            store.read_current(&info_logical("unknown")),
            Err(MirrorError::ArtifactMissing(_))
        ));
    }

    #[test]
    fn test_similar_names_do_not_collide() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        store.write(&info_logical("rack"), b"---\n1\n").unwrap();
        store.write(&info_logical("rack-test"), b"---\n2\n").unwrap();
        store.write(&info_logical("rack"), b"---\n3\n").unwrap();

        assert_eq!(store.read_content(&info_logical("rack-test")).unwrap(), b"---\n2\n");
        assert_eq!(store.info_names().unwrap(), vec!["rack", "rack-test"]);
    }

    #[test]
    fn test_refresh_picks_up_existing_files() {
        let temp = tempdir().unwrap();
        let path = ArtifactStore::new(temp.path()).write(&info_logical("rack"), b"---\n").unwrap();

        let store = ArtifactStore::new(temp.path());
        store.refresh().unwrap();
        assert_eq!(store.read_current(&info_logical("rack")).unwrap().path, path);
    }

    #[test]
    fn test_append_preserves_previous_bytes() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());

        store.append_versions(&["rack 1.0.0 aaa".to_string()], None).unwrap();
        let first = store.read_content(VERSIONS).unwrap();
        assert!(first.starts_with(b"created_at: "));

        store
            .append_versions(&["rack 1.0.0,1.1.0 bbb".to_string()], Some(&first))
            .unwrap();
        let second = store.read_content(VERSIONS).unwrap();
        assert!(second.starts_with(&first));
        assert!(second.ends_with(b"rack 1.0.0,1.1.0 bbb\n"));
        assert_eq!(count_matches(temp.path(), "versions."), 1);
    }

    #[test]
    fn test_remove() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        store.write(&info_logical("rack"), b"---\n").unwrap();
        store.remove(&info_logical("rack")).unwrap();
        assert!(store.info_names().unwrap().is_empty());
        assert!(store.read_current(&info_logical("rack")).is_err());
    }
}
