//! Version parsing, comparison and constraint matching.
//!
//! Versions are lenient semver: `MAJOR[.MINOR[.PATCH]][-PRE][+BUILD]` with
//! missing components defaulting to `0`. Ordering is numeric on the core
//! triple; a pre-release sorts before the release it precedes and two
//! pre-releases compare lexically. Build metadata never affects ordering or
//! equality.
//!
//! # Example
//!
//! ```
//! use quiver_core::version::{select_best, Version, VersionSpecifier};
//!
//! let v = Version::parse("1.4").unwrap();
//! assert_eq!(v.to_string(), "1.4.0");
//!
//! let spec = VersionSpecifier::parse("~=1.2.0").unwrap();
//! assert!(spec.matches(&Version::parse("1.2.9").unwrap()));
//! assert!(!spec.matches(&Version::parse("1.3.0").unwrap()));
//!
//! assert_eq!(select_best(&["1.0.0", "garbage", "2.0.0-rc1"]).unwrap(), "2.0.0-rc1");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::VersionError;

/// A parsed version.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
    pub build: Option<String>,
}

impl Version {
    /// Create a release version.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
            build: None,
        }
    }

    /// Parse a version string.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let invalid = |reason: &str| VersionError::InvalidVersion {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        if trimmed.is_empty() {
            return Err(invalid("empty version"));
        }

        let (rest, build) = match trimmed.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (trimmed, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        for (label, part) in [("pre-release", pre), ("build metadata", build)] {
            if let Some(part) = part {
                if part.is_empty() {
                    return Err(invalid(&format!("empty {}", label)));
                }
                if !part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
                {
                    return Err(invalid(&format!("invalid characters in {}", label)));
                }
            }
        }

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return Err(invalid("too many numeric components"));
        }

        let mut numbers = [0_u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("numeric component expected"));
            }
            *slot = part.parse().map_err(|_| invalid("numeric component too large"))?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre: pre.map(String::from),
            build: build.map(String::from),
        })
    }

    /// Whether this is a pre-release.
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }
}

/// Three-way comparison returning `-1`, `0` or `1`.
pub fn compare(a: &Version, b: &Version) -> i32 {
    match a.cmp(b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
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

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.pre.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Comparison operator of a specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// `~=`: at least the given version, same major and minor.
    Compatible,
}

impl Operator {
    // Two-character operators first so `>=` is not read as `>`.
    const TOKENS: [(&'static str, Operator); 7] = [
        ("~=", Operator::Compatible),
        ("==", Operator::Eq),
        (">=", Operator::Ge),
        ("<=", Operator::Le),
        ("!=", Operator::Ne),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Compatible => "~=",
        }
    }

    /// Split a leading operator off `input`.
    pub(crate) fn strip(input: &str) -> Option<(Operator, &str)> {
        Self::TOKENS
            .iter()
            .find_map(|(token, op)| input.strip_prefix(token).map(|rest| (*op, rest)))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `OPERATOR VERSION` constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionSpecifier {
    pub operator: Operator,
    pub version: Version,
}

impl VersionSpecifier {
    pub fn new(operator: Operator, version: Version) -> Self {
        Self { operator, version }
    }

    /// Parse `~=1.2`, `>= 2.0.0`, or a bare version (treated as `==`).
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::InvalidSpecifier {
                input: input.to_string(),
                reason: "empty specifier".to_string(),
            });
        }

        let (operator, rest) = Operator::strip(trimmed).unwrap_or((Operator::Eq, trimmed));
        let version =
            Version::parse(rest.trim()).map_err(|e| VersionError::InvalidSpecifier {
                input: input.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { operator, version })
    }

    /// Whether `candidate` satisfies this specifier.
    pub fn matches(&self, candidate: &Version) -> bool {
        let ordering = candidate.cmp(&self.version);
        match self.operator {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Compatible => {
                ordering != Ordering::Less
                    && candidate.major == self.version.major
                    && candidate.minor == self.version.minor
            }
        }
    }
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator, self.version)
    }
}

/// A conjunction of specifiers, written `>=1.0,<2.0`. Empty matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionConstraint {
    pub specifiers: Vec<VersionSpecifier>,
}

impl VersionConstraint {
    /// A constraint that accepts every version.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let specifiers = input
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(VersionSpecifier::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { specifiers })
    }

    pub fn is_any(&self) -> bool {
        self.specifiers.is_empty()
    }

    pub fn matches(&self, candidate: &Version) -> bool {
        self.specifiers.iter().all(|s| s.matches(candidate))
    }

    /// Pick the highest candidate satisfying every specifier.
    pub fn select_best_matching<S: AsRef<str>>(
        &self,
        candidates: &[S],
    ) -> Result<String, VersionError> {
        if candidates.is_empty() {
            return Err(VersionError::NoVersionsAvailable);
        }
        let matching = filter_by_multiple(candidates, &self.specifiers);
        if matching.is_empty() {
            return Err(VersionError::NoValidVersions {
                count: candidates.len(),
            });
        }
        select_best(&matching)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.specifiers.iter().map(|s| s.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

/// Return the original string of the highest parseable candidate.
pub fn select_best<S: AsRef<str>>(candidates: &[S]) -> Result<String, VersionError> {
    if candidates.is_empty() {
        return Err(VersionError::NoVersionsAvailable);
    }

    candidates
        .iter()
        .filter_map(|raw| {
            Version::parse(raw.as_ref())
                .ok()
                .map(|parsed| (parsed, raw.as_ref()))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, raw)| raw.to_string())
        .ok_or(VersionError::NoValidVersions {
            count: candidates.len(),
        })
}

/// Keep the versions that satisfy every specifier, preserving input order.
/// Unparseable versions never match.
pub fn filter_by_multiple<S: AsRef<str>>(
    versions: &[S],
    specifiers: &[VersionSpecifier],
) -> Vec<String> {
    versions
        .iter()
        .filter(|raw| match Version::parse(raw.as_ref()) {
            Ok(v) => specifiers.iter().all(|s| s.matches(&v)),
            Err(_) => false,
        })
        .map(|raw| raw.as_ref().to_string())
        .collect()
}
