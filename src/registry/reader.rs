use crate::Dependency;
use crate::core::gem::{GemIdentity, SpecificationRecord};
use crate::utils::hash::strong_digest;
use flate2::read::GzDecoder;
use serde_yaml::Value;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReadError {
    /// The file is not a gem archive this reader understands
    #[error("Unsupported package format: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interrupted while reading package")]
    Interrupted,
}

/// Turns a local package file into a specification record
pub trait PackageReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<SpecificationRecord, ReadError>;
}

/// Reads `.gem` archives: a tar holding a gzipped YAML gemspec in `metadata.gz`
#[derive(Debug, Default, Clone)]
pub struct GemArchiveReader;

impl GemArchiveReader {
    pub fn new() -> Self {
        Self
    }

    fn metadata_yaml(bytes: &[u8]) -> Result<String, ReadError> {
        let mut archive = tar::Archive::new(bytes);
        let entries = archive
            .entries()
            .map_err(|e| ReadError::Format(format!("not a tar archive: {}", e)))?;

        for entry in entries {
            let entry = entry.map_err(|e| ReadError::Format(format!("broken tar entry: {}", e)))?;
            let is_metadata = entry
                .path()
                .map(|p| p.as_os_str() == "metadata.gz")
                .unwrap_or(false);
            if !is_metadata {
                continue;
            }

            let mut yaml = String::new();
            GzDecoder::new(entry)
                .read_to_string(&mut yaml)
                .map_err(|e| ReadError::Format(format!("unreadable metadata.gz: {}", e)))?;
            return Ok(yaml);
        }

        Err(ReadError::Format("metadata.gz not found".to_string()))
    }

    fn parse_gemspec(yaml: &str, checksum: String) -> Result<SpecificationRecord, ReadError> {
        let spec: Value = serde_yaml::from_str(yaml)
            .map_err(|e| ReadError::Format(format!("invalid gemspec YAML: {}", e)))?;
        let spec = untag(&spec);

        let name = scalar(field(spec, "name"))
            .ok_or_else(|| ReadError::Format("gemspec has no name".to_string()))?;
        let version = version_string(field(spec, "version"))
            .ok_or_else(|| ReadError::Format("gemspec has no version".to_string()))?;
        let platform = scalar(field(spec, "platform")).unwrap_or_default();

        let dependencies = match field(spec, "dependencies") {
            Some(Value::Sequence(deps)) => deps
                .iter()
                .map(untag)
                .filter(|dep| {
                    // older gemspecs omit the type and mean runtime
                    scalar(field(dep, "type")).is_none_or(|t| t.trim_start_matches(':') == "runtime")
                })
                .filter_map(|dep| {
                    let name = scalar(field(dep, "name"))?;
                    let requirement = field(dep, "requirement")
                        .or_else(|| field(dep, "version_requirements"))
                        .and_then(requirement_string)
                        .unwrap_or_else(|| ">= 0".to_string());
                    Some(Dependency { name, version_spec: requirement })
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(SpecificationRecord {
            identity: GemIdentity::new(&name, &version, &platform),
            dependencies,
            required_ruby_version: field(spec, "required_ruby_version").and_then(requirement_string),
            required_rubygems_version: field(spec, "required_rubygems_version")
                .and_then(requirement_string),
            checksum,
        })
    }
}

impl PackageReader for GemArchiveReader {
    fn read(&self, path: &Path) -> Result<SpecificationRecord, ReadError> {
        let bytes = std::fs::read(path)?;
        let checksum = strong_digest(&bytes);
        let yaml = Self::metadata_yaml(&bytes)?;
        Self::parse_gemspec(&yaml, checksum)
    }
}

/// Strip Ruby object tags such as `!ruby/object:Gem::Version`
fn untag(value: &Value) -> &Value {
    match value {
        Value::Tagged(tagged) => untag(&tagged.value),
        other => other,
    }
}

fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_mapping()?.get(key).map(untag)
}

fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `version:` is either a plain scalar or a `Gem::Version` mapping
fn version_string(value: Option<&Value>) -> Option<String> {
    let value = value?;
    scalar(Some(value)).or_else(|| scalar(field(value, "version")))
}

/// Render a `Gem::Requirement` as `">= 1.0, < 2"`
fn requirement_string(value: &Value) -> Option<String> {
    let Some(Value::Sequence(requirements)) = field(value, "requirements") else {
        return scalar(Some(value));
    };

    let parts: Vec<String> = requirements
        .iter()
        .filter_map(|pair| match untag(pair) {
            Value::Sequence(pair) if pair.len() == 2 => {
                let op = scalar(Some(untag(&pair[0])))?;
                let version = version_string(Some(untag(&pair[1])))?;
                Some(format!("{} {}", op, version))
            }
            _ => None,
        })
        .collect();

    if parts.is_empty() { None } else { Some(parts.join(", ")) }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    pub(crate) fn gemspec_yaml(name: &str, version: &str, platform: &str, deps: &[(&str, &str)]) -> String {
        let mut yaml = format!(
            "--- !ruby/object:Gem::Specification\nname: {name}\nversion: !ruby/object:Gem::Version\n  version: {version}\nplatform: {platform}\n"
        );
        yaml.push_str("dependencies:\n");
        for (dep, version) in deps {
            yaml.push_str(&format!(
                "- !ruby/object:Gem::Dependency\n  name: {dep}\n  requirement: !ruby/object:Gem::Requirement\n    requirements:\n    - - \">=\"\n      - !ruby/object:Gem::Version\n        version: '{version}'\n  type: :runtime\n  prerelease: false\n"
            ));
        }
        yaml.push_str(
            "- !ruby/object:Gem::Dependency\n  name: rspec\n  requirement: !ruby/object:Gem::Requirement\n    requirements:\n    - - \"~>\"\n      - !ruby/object:Gem::Version\n        version: '3.0'\n  type: :development\n  prerelease: false\n",
        );
        yaml.push_str(
            "required_ruby_version: !ruby/object:Gem::Requirement\n  requirements:\n  - - \">=\"\n    - !ruby/object:Gem::Version\n      version: 2.3.0\nrequired_rubygems_version: !ruby/object:Gem::Requirement\n  requirements:\n  - - \">=\"\n    - !ruby/object:Gem::Version\n      version: '0'\n",
        );
        yaml
    }

    /// Build a minimal `.gem` archive containing only `metadata.gz`
    pub(crate) fn build_gem(yaml: &str) -> Vec<u8> {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(yaml.as_bytes()).unwrap();
        let metadata = gz.finish().unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(metadata.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "metadata.gz", metadata.as_slice()).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_reads_gem_archive() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("rack-test-1.1.0.gem");
        let bytes = build_gem(&gemspec_yaml("rack-test", "1.1.0", "ruby", &[("rack", "1.0")]));
        std::fs::write(&path, &bytes).unwrap();

        let record = GemArchiveReader::new().read(&path).unwrap();
        assert_eq!(record.identity, GemIdentity::ruby("rack-test", "1.1.0"));
        assert_eq!(
            record.dependencies,
            vec![Dependency {
                name: "rack".to_string(),
                version_spec: ">= 1.0".to_string()
            }]
        );
        assert_eq!(record.required_ruby_version.as_deref(), Some(">= 2.3.0"));
        assert_eq!(record.required_rubygems_version.as_deref(), Some(">= 0"));
        assert_eq!(record.checksum, strong_digest(&bytes));
    }

    #[test]
    fn test_platform_is_kept() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nokogiri-1.10.0-java.gem");
        std::fs::write(&path, build_gem(&gemspec_yaml("nokogiri", "1.10.0", "java", &[]))).unwrap();

        let record = GemArchiveReader::new().read(&path).unwrap();
        assert_eq!(record.identity.platform, "java");
        assert!(record.dependencies.is_empty());
    }

    #[test]
    fn test_garbage_is_a_format_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("broken-1.0.0.gem");
        std::fs::write(&path, b"definitely not a tar archive, just some text").unwrap();
        assert!(matches!(GemArchiveReader::new().read(&path), Err(ReadError::Format(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp = tempdir().unwrap();
        let result = GemArchiveReader::new().read(&temp.path().join("missing-1.0.gem"));
        assert!(matches!(result, Err(ReadError::Io(_))));
    }
}
