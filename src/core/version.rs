//! RubyGems version ordering and requirement matching.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]+(\.[0-9A-Za-z]+)*$")
        .expect("version pattern is valid")
});

static SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+|[A-Za-z]+").expect("segment pattern is valid"));

/// Check a version string against the RubyGems version syntax
pub fn is_valid_version(s: &str) -> bool {
    VERSION_PATTERN.is_match(s.trim())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Num(u64),
    Str(String),
}

impl Segment {
    fn cmp_segment(&self, other: &Segment) -> Ordering {
        match (self, other) {
            (Segment::Num(a), Segment::Num(b)) => a.cmp(b),
            (Segment::Str(a), Segment::Str(b)) => a.cmp(b),
            // letters mark a prerelease and sort below any number
            (Segment::Num(_), Segment::Str(_)) => Ordering::Greater,
            (Segment::Str(_), Segment::Num(_)) => Ordering::Less,
        }
    }
}

/// A gem version number.
///
/// Equality and ordering follow RubyGems, so `"3.4"` and `"3.4.0"` compare
/// equal. Use [`Version::as_str`] when the exact spelling matters.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    segments: Vec<Segment>,
}

impl Version {
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim().to_string();
        let segments = SEGMENT
            .find_iter(&raw)
            .map(|m| {
                let s = m.as_str();
                match s.parse::<u64>() {
                    Ok(n) => Segment::Num(n),
                    Err(_) => Segment::Str(s.to_string()),
                }
            })
            .collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_prerelease(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Str(_)))
    }

    /// The release this version belongs to, with prerelease segments removed
    pub fn release(&self) -> Version {
        if !self.is_prerelease() {
            return self.clone();
        }
        let numeric: Vec<String> = self
            .segments
            .iter()
            .take_while(|s| matches!(s, Segment::Num(_)))
            .map(|s| match s {
                Segment::Num(n) => n.to_string(),
                Segment::Str(s) => s.clone(),
            })
            .collect();
        Version::new(&numeric.join("."))
    }

    /// Upper bound used by the pessimistic operator: `2.3.1` bumps to `2.4`
    pub fn bump(&self) -> Version {
        let mut numeric: Vec<u64> = self
            .segments
            .iter()
            .take_while(|s| matches!(s, Segment::Num(_)))
            .filter_map(|s| match s {
                Segment::Num(n) => Some(*n),
                Segment::Str(_) => None,
            })
            .collect();
        if numeric.len() > 1 {
            numeric.pop();
        }
        if let Some(last) = numeric.last_mut() {
            *last += 1;
        } else {
            numeric.push(1);
        }
        let joined: Vec<String> = numeric.iter().map(u64::to_string).collect();
        Version::new(&joined.join("."))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        let zero = Segment::Num(0);
        for i in 0..len {
            let a = self.segments.get(i).unwrap_or(&zero);
            let b = other.segments.get(i).unwrap_or(&zero);
            match a.cmp_segment(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Pessimistic,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::Pessimistic => "~>",
        }
    }
}

/// A set of version constraints such as `">= 1.0, < 2"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    constraints: Vec<(Op, Version)>,
}

impl Requirement {
    /// Matches every version
    pub fn any() -> Self {
        Self {
            constraints: vec![(Op::Ge, Version::new("0"))],
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut constraints = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            // longest operators first so ">=" is not read as ">"
            let (op, rest) = [
                ("~>", Op::Pessimistic),
                (">=", Op::Ge),
                ("<=", Op::Le),
                ("!=", Op::Ne),
                ("=", Op::Eq),
                (">", Op::Gt),
                ("<", Op::Lt),
            ]
            .iter()
            .find_map(|(prefix, op)| part.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((Op::Eq, part));

            let rest = rest.trim();
            if !is_valid_version(rest) {
                return None;
            }
            constraints.push((op, Version::new(rest)));
        }

        if constraints.is_empty() {
            return Some(Self::any());
        }
        Some(Self { constraints })
    }

    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        self.constraints.iter().all(|(op, req)| match op {
            Op::Eq => version == req,
            Op::Ne => version != req,
            Op::Gt => version > req,
            Op::Lt => version < req,
            Op::Ge => version >= req,
            Op::Le => version <= req,
            Op::Pessimistic => version >= req && version.release() < req.bump(),
        })
    }

    /// The version pinned by a single `=` constraint, if any
    pub fn exact_version(&self) -> Option<&Version> {
        match self.constraints.as_slice() {
            [(Op::Eq, v)] => Some(v),
            _ => None,
        }
    }
}

impl Default for Requirement {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .constraints
            .iter()
            .map(|(op, v)| format!("{} {}", op.as_str(), v))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerelease_sorts_before_release() {
        let versions = ["0.0.2", "0.0.1", "0.0.2.alpha2", "0.0.1.alpha1"];
        let mut parsed: Vec<Version> = versions.iter().map(|v| Version::new(v)).collect();
        parsed.sort();
        let order: Vec<&str> = parsed.iter().map(Version::as_str).collect();
        assert_eq!(order, vec!["0.0.1.alpha1", "0.0.1", "0.0.2.alpha2", "0.0.2"]);
    }

    #[test]
    fn test_trailing_zero_equality() {
        assert_eq!(Version::new("3.4"), Version::new("3.4.0"));
        assert!(Version::new("1.10") > Version::new("1.9"));
    }

    #[test]
    fn test_version_syntax() {
        assert!(is_valid_version("1.0.0"));
        assert!(is_valid_version("0.0.1.alpha1"));
        assert!(is_valid_version("2.0.0.rc1"));
        // `-` separates the platform in file names and index tokens
        assert!(!is_valid_version("2.0.0-rc1"));
        assert!(!is_valid_version("latest"));
        assert!(!is_valid_version(""));
    }

    #[test]
    fn test_requirement_matching() {
        let req = Requirement::parse(">= 1.0, < 2").unwrap();
        assert!(req.is_satisfied_by(&Version::new("1.5")));
        assert!(!req.is_satisfied_by(&Version::new("2.0")));

        let pessimistic = Requirement::parse("~> 2.3.1").unwrap();
        assert!(pessimistic.is_satisfied_by(&Version::new("2.3.9")));
        assert!(!pessimistic.is_satisfied_by(&Version::new("2.4.0")));

        let bare = Requirement::parse("1.2.3").unwrap();
        assert_eq!(bare.exact_version(), Some(&Version::new("1.2.3")));
        assert!(Requirement::parse("").unwrap().is_satisfied_by(&Version::new("0.1")));
        assert!(Requirement::parse(">= banana").is_none());
    }

    #[test]
    fn test_requirement_display() {
        let req = Requirement::parse(">=1.0,<2").unwrap();
        assert_eq!(req.to_string(), ">= 1.0, < 2");
    }
}
