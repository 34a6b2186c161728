use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EdgeError;

/// Release version compared numerically segment by segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
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

    /// Version of the running binary
    pub fn current() -> Self {
        env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or(Version::new(0, 0, 0))
    }
}

impl FromStr for Version {
    type Err = EdgeError;

    /// Accepts `1`, `1.2`, `v1.2.3`, `1.2.3-rc.1` and `1.2.3+build`; suffixes are ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();

        if core.is_empty() {
            return Err(EdgeError::invalid_version(format!("empty version '{}'", s)));
        }

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return Err(EdgeError::invalid_version(format!(
                "too many segments in '{}'",
                s
            )));
        }

        let mut segments = [0u64; 3];
        for (slot, part) in segments.iter_mut().zip(parts.iter()) {
            *slot = part.parse::<u64>().map_err(|_| {
                EdgeError::invalid_version(format!("non-numeric segment '{}' in '{}'", part, s))
            })?;
        }

        Ok(Version::new(segments[0], segments[1], segments[2]))
    }
}

impl TryFrom<String> for Version {
    type Error = EdgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
