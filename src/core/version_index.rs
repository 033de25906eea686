//! Parser for the compact index `versions` format.
//!
//! ```text
//! created_at: 2025-01-01T00:00:00Z
//! ---
//! rack 1.0.0,1.1.0,2.0.0-java 1d2f7c...
//! ```
//!
//! Later lines for a name extend the earlier ones and a `-` prefixed token
//! removes a version, which is what makes appending to the file safe.

use crate::constants::DEFAULT_PLATFORM;
use crate::core::gem::GemIdentity;
use crate::{MirrorError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;

pub const CREATED_AT_PREFIX: &str = "created_at: ";
pub const SEPARATOR: &str = "---";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameEntry {
    /// Sorted ascending by version
    pub versions: Vec<(String, String)>,
    pub digest: String,
}

#[derive(Debug, Default)]
pub struct VersionIndex {
    created_at: String,
    entries: BTreeMap<String, NameEntry>,
    grouped: OnceLock<Vec<(String, Vec<GemIdentity>)>>,
}

impl PartialEq for VersionIndex {
    fn eq(&self, other: &Self) -> bool {
        self.created_at == other.created_at && self.entries == other.entries
    }
}

impl Eq for VersionIndex {}

impl Clone for VersionIndex {
    fn clone(&self) -> Self {
        Self {
            created_at: self.created_at.clone(),
            entries: self.entries.clone(),
            grouped: OnceLock::new(),
        }
    }
}

/// Split `1.0.0-x86_64-linux` into version and platform
fn split_token(token: &str) -> (String, String) {
    match token.split_once('-') {
        Some((version, platform)) if !platform.is_empty() => {
            (version.to_string(), platform.to_string())
        }
        _ => (token.to_string(), DEFAULT_PLATFORM.to_string()),
    }
}

impl VersionIndex {
    pub fn new(created_at: &str) -> Self {
        Self {
            created_at: created_at.to_string(),
            ..Default::default()
        }
    }

    pub fn parse(blob: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(blob)
            .map_err(|e| MirrorError::MalformedIndex(format!("not UTF-8: {}", e)))?;
        let mut lines = text.lines();

        let created_at = lines
            .next()
            .and_then(|line| line.strip_prefix(CREATED_AT_PREFIX))
            .map(str::trim)
            .ok_or_else(|| MirrorError::MalformedIndex("missing created_at header".to_string()))?;
        chrono::DateTime::parse_from_rfc3339(created_at).map_err(|e| {
            MirrorError::MalformedIndex(format!("invalid created_at {:?}: {}", created_at, e))
        })?;

        if lines.next().map(str::trim) != Some(SEPARATOR) {
            return Err(MirrorError::MalformedIndex(
                "missing header separator".to_string(),
            ));
        }

        let mut index = Self::new(created_at);
        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [] => continue,
                [name] => {
                    return Err(MirrorError::MalformedIndex(format!(
                        "line for {} has no versions",
                        name
                    )));
                }
                [name, groups @ .., last] if groups.is_empty() => {
                    index.apply_line(name, &[*last], "");
                }
                [name, groups @ .., digest] => {
                    index.apply_line(name, groups, digest);
                }
            }
        }

        Ok(index)
    }

    fn apply_line(&mut self, name: &str, groups: &[&str], digest: &str) {
        let entry = self.entries.entry(name.to_string()).or_default();
        for token in groups.iter().flat_map(|g| g.split(',')).filter(|t| !t.is_empty()) {
            match token.strip_prefix('-') {
                Some(removed) => {
                    let removed = split_token(removed);
                    entry.versions.retain(|v| *v != removed);
                }
                None => {
                    let added = split_token(token);
                    if !entry.versions.contains(&added) {
                        entry.versions.push(added);
                    }
                }
            }
        }
        entry.versions.sort_by(|(va, pa), (vb, pb)| {
            GemIdentity::new(name, va, pa).cmp(&GemIdentity::new(name, vb, pb))
        });
        if !digest.is_empty() {
            entry.digest = digest.to_string();
        }
        self.grouped = OnceLock::new();
    }

    /// Add versions for a name, as a parsed line would
    pub fn insert(&mut self, name: &str, tokens: &[&str], digest: &str) {
        self.apply_line(name, tokens, digest);
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn lookup(&self, name: &str) -> &[(String, String)] {
        self.entries.get(name).map_or(&[], |e| e.versions.as_slice())
    }

    pub fn digest(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.digest.as_str())
    }

    pub fn contains(&self, identity: &GemIdentity) -> bool {
        self.lookup(&identity.name)
            .iter()
            .any(|(v, p)| *v == identity.version && *p == identity.platform)
    }

    pub fn identities(&self) -> impl Iterator<Item = GemIdentity> + '_ {
        self.entries.iter().flat_map(|(name, entry)| {
            entry
                .versions
                .iter()
                .map(move |(v, p)| GemIdentity::new(name, v, p))
        })
    }

    /// Newest version of a gem, preferring releases over prereleases
    pub fn newest(&self, name: &str) -> Option<GemIdentity> {
        let versions = self.lookup(name);
        versions
            .iter()
            .rev()
            .find(|(v, _)| !crate::core::version::Version::new(v).is_prerelease())
            .or_else(|| versions.last())
            .map(|(v, p)| GemIdentity::new(name, v, p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Gems grouped by name, sorted case-insensitively. Computed once.
    pub fn grouped_by_name(&self) -> &[(String, Vec<GemIdentity>)] {
        self.grouped.get_or_init(|| {
            let mut grouped: Vec<(String, Vec<GemIdentity>)> = self
                .entries
                .iter()
                .filter(|(_, entry)| !entry.versions.is_empty())
                .map(|(name, entry)| {
                    let gems = entry
                        .versions
                        .iter()
                        .map(|(v, p)| GemIdentity::new(name, v, p))
                        .collect();
                    (name.clone(), gems)
                })
                .collect();
            grouped.sort_by_key(|(name, _)| name.to_lowercase());
            grouped
        })
    }

    pub fn serialize(&self) -> String {
        let mut out = format!("{}{}\n{}\n", CREATED_AT_PREFIX, self.created_at, SEPARATOR);
        for (name, entry) in &self.entries {
            if entry.versions.is_empty() {
                continue;
            }
            let tokens: Vec<String> = entry
                .versions
                .iter()
                .map(|(v, p)| GemIdentity::new(name, v, p).version_token())
                .collect();
            out.push_str(&format!("{} {} {}\n", name, tokens.join(","), entry.digest));
        }
        out
    }
}

/// Keeps the last parsed index and reparses only when the file changes
#[derive(Debug, Default)]
pub struct VersionIndexCache {
    state: Mutex<Option<(PathBuf, SystemTime, Arc<VersionIndex>)>>,
}

impl VersionIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, path: &Path) -> Result<Arc<VersionIndex>> {
        let mtime = std::fs::metadata(path)?.modified()?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| MirrorError::Cache("version index lock poisoned".to_string()))?;

        if let Some((cached_path, cached_mtime, index)) = state.as_ref() {
            if cached_path == path && *cached_mtime == mtime {
                return Ok(Arc::clone(index));
            }
        }

        tracing::debug!("Parsing version index {}", path.display());
        let index = Arc::new(VersionIndex::parse(&std::fs::read(path)?)?);
        *state = Some((path.to_path_buf(), mtime, Arc::clone(&index)));
        Ok(index)
    }
}
