//! Protocol and build compatibility gate.
//!
//! The protocol version is a semver-like string; a mismatch in major or
//! minor refuses the connection. The build id is an arbitrary string and
//! is advisory, unless both sides report genuine (non-fallback) values,
//! in which case a mismatch fails closed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel a build reports when its real id is unknown (local builds,
/// stripped release pipelines). Fallback builds never fail the gate.
pub const BUILD_ID_FALLBACK: &str = "dev";

/// Parse failure for a protocol version string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid protocol version string: {0}")]
pub struct VersionParseError(pub String);

/// Semver-like protocol version. Only major and minor gate compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse "major.minor.patch" (patch optional).
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u32, VersionParseError> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| VersionParseError(s.to_string())),
                None if required => Err(VersionParseError(s.to_string())),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(true)?;
        let patch = next(false)?;
        if parts.next().is_some() {
            return Err(VersionParseError(s.to_string()));
        }
        Ok(Self { major, minor, patch })
    }

    /// Compatible when major and minor match; patch drift is fine.
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Build-id gate: fatal only when both sides report genuine ids that
/// differ. Either side reporting the fallback sentinel passes.
pub fn build_ids_compatible(local: &str, remote: &str) -> bool {
    if local == BUILD_ID_FALLBACK || remote == BUILD_ID_FALLBACK {
        return true;
    }
    local == remote
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_version() {
        assert_eq!(ProtocolVersion::parse("1.2.3"), Ok(ProtocolVersion::new(1, 2, 3)));
    }

    #[test]
    fn parse_without_patch_defaults_to_zero() {
        assert_eq!(ProtocolVersion::parse("2.0"), Ok(ProtocolVersion::new(2, 0, 0)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ProtocolVersion::parse("one.two").is_err());
        assert!(ProtocolVersion::parse("1").is_err());
        assert!(ProtocolVersion::parse("1.2.3.4").is_err());
    }

    #[test]
    fn patch_drift_is_compatible() {
        let a = ProtocolVersion::new(1, 2, 0);
        let b = ProtocolVersion::new(1, 2, 9);
        assert!(a.is_compatible_with(&b));
    }

    #[test]
    fn minor_mismatch_is_fatal() {
        let a = ProtocolVersion::new(1, 2, 0);
        let b = ProtocolVersion::new(1, 3, 0);
        assert!(!a.is_compatible_with(&b));
    }

    #[test]
    fn build_gate_fails_closed_on_genuine_mismatch() {
        assert!(!build_ids_compatible("a1b2c3", "d4e5f6"));
        assert!(build_ids_compatible("a1b2c3", "a1b2c3"));
        assert!(build_ids_compatible("a1b2c3", BUILD_ID_FALLBACK));
        assert!(build_ids_compatible(BUILD_ID_FALLBACK, "d4e5f6"));
    }
}
