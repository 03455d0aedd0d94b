//! Version compatibility gate for service plugins.
//!
//! Versions are written `v<major>.<minor>[.<build>[-<suffix>]]`. The total
//! order compares major, minor, then the build: a version without a build sorts
//! before any version with one, and within a build a missing suffix sorts
//! before a present one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors produced by parsing or range checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("invalid version format {input:?}: {reason}")]
    InvalidFormat { input: String, reason: &'static str },
    #[error("version {version} outside supported range {range}")]
    Unsupported { version: Version, range: SupportRange },
}

/// Build component of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Build {
    pub number: u64,
    pub suffix: Option<u64>,
}

/// A plugin or controller version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub build: Option<Build>,
}

impl Version {
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor, build: None }
    }

    pub const fn with_build(mut self, number: u64, suffix: Option<u64>) -> Self {
        self.build = Some(Build { number, suffix });
        self
    }

    /// Parse `v<major>.<minor>[.<build>[-<suffix>]]`.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let invalid = |reason| VersionError::InvalidFormat {
            input: input.to_owned(),
            reason,
        };

        let rest = input.strip_prefix('v').ok_or_else(|| invalid("missing 'v' prefix"))?;
        let mut parts = rest.split('.');

        let major = parse_number(parts.next()).ok_or_else(|| invalid("bad major"))?;
        let minor = parse_number(parts.next()).ok_or_else(|| invalid("bad minor"))?;

        let build = match parts.next() {
            None => None,
            Some(build) => {
                let (number, suffix) = match build.split_once('-') {
                    Some((number, suffix)) => {
                        let suffix = parse_number(Some(suffix)).ok_or_else(|| invalid("bad suffix"))?;
                        (number, Some(suffix))
                    }
                    None => (build, None),
                };
                let number = parse_number(Some(number)).ok_or_else(|| invalid("bad build"))?;
                Some(Build { number, suffix })
            }
        };

        if parts.next().is_some() {
            return Err(invalid("too many components"));
        }

        Ok(Self { major, minor, build })
    }
}

fn parse_number(part: Option<&str>) -> Option<u64> {
    let part = part?;
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{}", build.number)?;
            if let Some(suffix) = build.suffix {
                write!(f, "-{suffix}")?;
            }
        }
        Ok(())
    }
}

/// Inclusive range of accepted versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportRange {
    pub min: Version,
    pub max: Version,
}

impl SupportRange {
    pub const fn new(min: Version, max: Version) -> Self {
        Self { min, max }
    }

    /// Returns true if `min <= max`.
    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.min <= *version && *version <= self.max
    }

    /// Accept `version` or fail with [`VersionError::Unsupported`].
    pub fn check(&self, version: &Version) -> Result<(), VersionError> {
        if self.contains(version) {
            Ok(())
        } else {
            Err(VersionError::Unsupported {
                version: *version,
                range: *self,
            })
        }
    }
}

impl fmt::Display for SupportRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}
