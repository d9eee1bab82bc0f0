//! Kubernetes version handling.
//!
//! Versions are semver `MAJOR.MINOR.PATCH`, with a `MAJOR.MINOR` short form
//! that users may request and that admission resolves to the highest
//! non-expired patch published in the cloud profile.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Version parsing errors.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("invalid version {0:?}: expected MAJOR.MINOR or MAJOR.MINOR.PATCH")]
    Malformed(String),

    #[error("invalid version segment {0:?}: not a number")]
    Segment(String),
}

/// A `MAJOR.MINOR[.PATCH]` version.
///
/// `patch == None` is the short form. Ordering puts the short form before
/// any concrete patch of the same minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: Option<u64>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch: Some(patch),
        }
    }

    /// True for the `MAJOR.MINOR` short form.
    pub fn is_short(&self) -> bool {
        self.patch.is_none()
    }

    /// True when both versions share `MAJOR.MINOR`.
    pub fn same_minor(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split('.').collect();
        if segments.len() != 2 && segments.len() != 3 {
            return Err(VersionError::Malformed(s.to_string()));
        }

        let parse = |segment: &str| -> Result<u64, VersionError> {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::Segment(segment.to_string()));
            }
            segment
                .parse()
                .map_err(|_| VersionError::Segment(segment.to_string()))
        };

        Ok(Self {
            major: parse(segments[0])?,
            minor: parse(segments[1])?,
            patch: segments.get(2).copied().map(parse).transpose()?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A published version with an optional expiration date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirableVersion {
    pub version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
}

impl ExpirableVersion {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            expiration_date: None,
        }
    }

    /// True once the expiration date, if any, has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date.map_or(false, |date| date <= now)
    }
}

/// The highest non-expired `MAJOR.MINOR.PATCH` in `published` whose
/// `MAJOR.MINOR` equals `short` exactly.
pub fn highest_patch_version(
    published: &[ExpirableVersion],
    short: &Version,
    now: DateTime<Utc>,
) -> Option<Version> {
    published
        .iter()
        .filter(|v| !v.is_expired(now))
        .map(|v| v.version)
        .filter(|v| !v.is_short() && v.same_minor(short))
        .max()
}
