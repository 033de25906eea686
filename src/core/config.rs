use crate::constants::*;
use crate::core::version::Requirement;
use crate::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MirrorConfig {
    /// Directory holding gems, index artifacts and the cache
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    /// Worker threads used to read gem files
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Run a scoped index update after each on-demand package fetch
    #[serde(default = "default_update_on_fetch", rename = "update-on-fetch")]
    pub update_on_fetch: bool,
    /// Also mirror the `quick/Marshal.4.8` gemspec blobs
    #[serde(default = "default_fetch_gemspecs", rename = "fetch-gemspecs")]
    pub fetch_gemspecs: bool,
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    #[serde(default = "default_source_name")]
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs", rename = "timeout-secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub gems: Vec<GemSpec>,
}

/// A gem listed for mirroring by `update`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GemSpec {
    pub name: String,
    #[serde(default)]
    pub requirement: Option<String>,
    /// Always take the newest upstream version, ignoring `requirement`
    #[serde(default, rename = "only-latest")]
    pub only_latest: bool,
}

impl GemSpec {
    pub fn requirement(&self) -> Result<Requirement> {
        match &self.requirement {
            None => Ok(Requirement::any()),
            Some(spec) => Requirement::parse(spec).ok_or_else(|| {
                MirrorError::Config(format!("Invalid requirement for {}: {}", self.name, spec))
            }),
        }
    }
}

fn default_destination() -> PathBuf {
    PathBuf::from("public")
}

fn default_concurrency() -> usize {
    num_cpus::get()
}

fn default_update_on_fetch() -> bool {
    true
}

fn default_fetch_gemspecs() -> bool {
    true
}

fn default_source_name() -> String {
    "rubygems".to_string()
}

fn default_timeout_secs() -> u64 {
    HTTP_TIMEOUT.as_secs()
}

pub const TEMPLATE: &str = r#"# gemmirror configuration.
#
# The directory to store the gems, the compact index and the cache in.
destination = "public"

# Worker threads used when reading gem files while indexing.
# concurrency = 8

# Refresh the index for a gem right after it was fetched on demand.
update-on-fetch = true

# Mirror the quick/Marshal.4.8 gemspec files alongside the gems.
fetch-gemspecs = true

# The source gems are downloaded from. Gems listed here are fetched by
# `gemmirror update`; any other gem is fetched the first time it is asked for.
[source]
name = "rubygems"
host = "https://rubygems.org"
# proxy = "http://proxy.local:3128"
# username = "mirror"
# password = "secret"

[[source.gems]]
name = "rack"
requirement = ">= 1.0.0"
"#;

impl MirrorConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).await.map_err(|e| {
            MirrorError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: MirrorConfig = toml::from_str(contents)
            .map_err(|e| MirrorError::Config(format!("Failed to parse {}: {}", CONFIG_FILE, e)))?;
        config.source.host = config.source.host.trim_end_matches('/').to_string();
        config.source.name = config.source.name.to_lowercase().split_whitespace().collect::<Vec<_>>().join("_");
        if config.concurrency == 0 {
            config.concurrency = 1;
        }
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| MirrorError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, contents).await?;
        Ok(())
    }

    /// Resolve a relative destination against the config file location
    pub fn resolve_destination(&mut self, config_path: &Path) {
        if self.destination.is_relative() {
            if let Some(parent) = config_path.parent() {
                self.destination = parent.join(&self.destination);
            }
        }
    }

    pub fn gems_dir(&self) -> PathBuf {
        self.destination.join(GEMS_DIR)
    }

    pub fn marshal_dir(&self) -> PathBuf {
        self.destination.join(MARSHAL_DIR)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.destination.join(CACHE_DIR)
    }

    /// A configuration for a local mirror without configured gems
    pub fn for_destination(destination: impl Into<PathBuf>, host: &str) -> Self {
        Self {
            destination: destination.into(),
            concurrency: default_concurrency(),
            update_on_fetch: default_update_on_fetch(),
            fetch_gemspecs: default_fetch_gemspecs(),
            source: SourceConfig {
                name: default_source_name(),
                host: host.trim_end_matches('/').to_string(),
                proxy: None,
                username: None,
                password: None,
                timeout_secs: default_timeout_secs(),
                gems: Vec::new(),
            },
        }
    }
}

/// Look for the config in the working directory, then the user config dir
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("gemmirror").join(CONFIG_FILE))
        .filter(|path| path.exists())
        .unwrap_or(local)
}
