use crate::Dependency;
use crate::constants::DEFAULT_PLATFORM;
use crate::core::version::{Version, is_valid_version};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

const PACKAGE_SUFFIXES: [&str; 2] = [".gem", ".gemspec.rz"];

/// Uniquely identifies one distributable gem file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GemIdentity {
    pub name: String,
    pub version: String,
    pub platform: String,
}

impl GemIdentity {
    pub fn new(name: &str, version: &str, platform: &str) -> Self {
        let platform = if platform.is_empty() { DEFAULT_PLATFORM } else { platform };
        Self {
            name: name.to_string(),
            version: version.to_string(),
            platform: platform.to_string(),
        }
    }

    pub fn ruby(name: &str, version: &str) -> Self {
        Self::new(name, version, DEFAULT_PLATFORM)
    }

    pub fn is_ruby(&self) -> bool {
        self.platform.eq_ignore_ascii_case(DEFAULT_PLATFORM)
    }

    pub fn version(&self) -> Version {
        Version::new(&self.version)
    }

    /// `name-version` or `name-version-platform`
    pub fn full_name(&self) -> String {
        if self.is_ruby() {
            format!("{}-{}", self.name, self.version)
        } else {
            format!("{}-{}-{}", self.name, self.version, self.platform)
        }
    }

    /// Version token as written in the compact index (`1.0` or `1.0-java`)
    pub fn version_token(&self) -> String {
        if self.is_ruby() {
            self.version.clone()
        } else {
            format!("{}-{}", self.version, self.platform)
        }
    }

    pub fn gem_filename(&self) -> String {
        format!("{}.gem", self.full_name())
    }

    pub fn gemspec_filename(&self) -> String {
        format!("{}.gemspec.rz", self.full_name())
    }

    /// Every identity a `.gem` or `.gemspec.rz` file name can stand for,
    /// shortest name first.
    ///
    /// Names may themselves contain `-<version>`, so more than one reading can
    /// survive; callers settle it against the index or the gemspec.
    pub fn candidates_from_filename(filename: &str) -> Vec<Self> {
        let Some(stem) = PACKAGE_SUFFIXES.iter().find_map(|s| filename.strip_suffix(s)) else {
            return Vec::new();
        };
        let parts: Vec<&str> = stem.split('-').collect();
        (1..parts.len())
            .filter(|&i| is_valid_version(parts[i]))
            .map(|i| (parts[..i].join("-"), parts[i], parts[i + 1..].join("-")))
            .filter(|(name, _, platform)| !name.is_empty() && is_platform(platform))
            .map(|(name, version, platform)| Self::new(&name, version, &platform))
            .collect()
    }

    /// Parse a `.gem` or `.gemspec.rz` file name back into an identity
    pub fn from_filename(filename: &str) -> Option<Self> {
        Self::candidates_from_filename(filename).into_iter().next()
    }
}

// `x86_64-linux`, `java`, `universal-darwin-19`; never a leading digit
fn is_platform(platform: &str) -> bool {
    platform.is_empty()
        || (!platform.starts_with(|c: char| c.is_ascii_digit())
            && platform.split('-').all(|part| {
                !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            }))
}

impl Ord for GemIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version().cmp(&other.version()))
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| other.is_ruby().cmp(&self.is_ruby()))
            .then_with(|| self.platform.cmp(&other.platform))
    }
}

impl PartialOrd for GemIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for GemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Metadata extracted from one local gem file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecificationRecord {
    pub identity: GemIdentity,
    pub dependencies: Vec<Dependency>,
    pub required_ruby_version: Option<String>,
    pub required_rubygems_version: Option<String>,
    /// SHA-256 of the gem archive
    pub checksum: String,
}

impl SpecificationRecord {
    /// One line of an `info/<name>` artifact
    pub fn info_line(&self) -> String {
        let deps: Vec<String> = self
            .dependencies
            .iter()
            .map(|d| format!("{}:{}", d.name, join_requirement(&d.version_spec)))
            .collect();

        let mut line = format!(
            "{} {}|checksum:{}",
            self.identity.version_token(),
            deps.join(","),
            self.checksum
        );
        if let Some(ruby) = meaningful_requirement(&self.required_ruby_version) {
            line.push_str(&format!(",ruby:{}", join_requirement(ruby)));
        }
        if let Some(rubygems) = meaningful_requirement(&self.required_rubygems_version) {
            line.push_str(&format!(",rubygems:{}", join_requirement(rubygems)));
        }
        line
    }
}

fn join_requirement(spec: &str) -> String {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("&")
}

// ">= 0" carries no information and is left out of info lines
fn meaningful_requirement(req: &Option<String>) -> Option<&str> {
    req.as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty() && *r != ">= 0")
}

/// Dependency listing entry served to clients for one gem version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemDependencies {
    pub name: String,
    pub number: String,
    pub platform: String,
    pub dependencies: Vec<(String, String)>,
}

impl From<&SpecificationRecord> for GemDependencies {
    fn from(record: &SpecificationRecord) -> Self {
        Self {
            name: record.identity.name.clone(),
            number: record.identity.version.clone(),
            platform: record.identity.platform.clone(),
            dependencies: record
                .dependencies
                .iter()
                .map(|d| (d.name.clone(), d.version_spec.clone()))
                .collect(),
        }
    }
}
