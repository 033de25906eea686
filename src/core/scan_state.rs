//! When the package files behind the index were last checked for changes.

use crate::Result;
use crate::utils::fs::atomic_write_sync;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;
use tracing::warn;

/// Start times of the last completed scans.
///
/// A scoped update only looks at one name, so it records its own mark and
/// leaves the mark for every other name where it was.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    full: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    scoped: BTreeMap<String, DateTime<Utc>>,
}

impl ScanState {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!("Ignoring unreadable scan state {}: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_sync(path, &serde_json::to_vec_pretty(self)?)
    }

    /// Files of `name` modified after this instant are not indexed yet
    pub fn since(&self, name: &str, fallback: SystemTime) -> SystemTime {
        let full = self.full.map_or(fallback, SystemTime::from);
        match self.scoped.get(name) {
            Some(scoped) => full.max(SystemTime::from(*scoped)),
            None => full,
        }
    }

    /// Mark a finished scan that started at `started`
    pub fn record(&mut self, scope: Option<&str>, started: SystemTime) {
        let started = DateTime::<Utc>::from(started);
        match scope {
            Some(name) => {
                self.scoped.insert(name.to_string(), started);
            }
            None => {
                self.full = Some(started);
                self.scoped.clear();
            }
        }
    }
}
