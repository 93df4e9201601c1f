//! Plugin versions and dependency constraints.
//!
//! Only the small subset the plugin graph needs: `major.minor.patch` numbers
//! and the constraint forms `*`, `=1.2.3`, `>=1.0`, `^1.2` and bare `1.2`
//! (read as `^1.2`).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error returned when a version or constraint cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{0}'")]
pub struct VersionError(String);

/// A `major.minor.patch` version. Missing components parse as `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u64, VersionError> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let version = Version::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A constraint a dependency's version must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionReq {
    Any,
    Exact(Version),
    AtLeast(Version),
    /// Same left-most non-zero component, and at least this version.
    Caret(Version),
}

impl VersionReq {
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => version == v,
            Self::AtLeast(v) => version >= v,
            Self::Caret(v) => {
                if version < v {
                    false
                } else if v.major > 0 {
                    version.major == v.major
                } else if v.minor > 0 {
                    version.major == 0 && version.minor == v.minor
                } else {
                    version.major == 0 && version.minor == 0 && version.patch == v.patch
                }
            }
        }
    }
}

impl FromStr for VersionReq {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::Any);
        }
        // `>=` must be tried before `=`.
        if let Some(rest) = s.strip_prefix(">=") {
            return rest.parse().map(Self::AtLeast);
        }
        if let Some(rest) = s.strip_prefix('=') {
            return rest.parse().map(Self::Exact);
        }
        s.strip_prefix('^').unwrap_or(s).parse().map(Self::Caret)
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(v) => write!(f, "={v}"),
            Self::AtLeast(v) => write!(f, ">={v}"),
            Self::Caret(v) => write!(f, "^{v}"),
        }
    }
}
