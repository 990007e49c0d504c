//! Package version representation
//!
//! Haskell package versions are dotted sequences of integers with no
//! semantic-versioning structure (four components are common), so this
//! crate carries its own ordered version type instead of `semver`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error produced when parsing a version string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version {input:?}: {reason}")]
pub struct VersionParseError {
    /// The rejected input
    pub input: String,
    /// Why it was rejected
    pub reason: &'static str,
}

/// A package version: a non-empty sequence of numeric components
///
/// Ordering is componentwise; a version that is a strict prefix of
/// another compares smaller (`1.2 < 1.2.0`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(Vec<u32>);

impl Version {
    /// Create a version from explicit components
    ///
    /// # Panics
    ///
    /// Panics if `components` is empty.
    #[must_use]
    pub fn new(components: Vec<u32>) -> Self {
        assert!(!components.is_empty(), "version needs at least one component");
        Self(components)
    }

    /// The numeric components, most significant first
    #[must_use]
    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionParseError {
                input: s.to_string(),
                reason: "empty string",
            });
        }
        let mut components = Vec::new();
        for part in s.split('.') {
            let n = part.parse::<u32>().map_err(|_| VersionParseError {
                input: s.to_string(),
                reason: "component is not a decimal number",
            })?;
            components.push(n);
        }
        Ok(Self(components))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        for input in ["1", "0.5.0.2", "4.17.2.1"] {
            let v: Version = input.parse().unwrap();
            assert_eq!(v.to_string(), input);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Version>().is_err());
        assert!("1..2".parse::<Version>().is_err());
        assert!("1.2-rc1".parse::<Version>().is_err());
    }

    #[test]
    fn ordering_is_componentwise() {
        let parse = |s: &str| s.parse::<Version>().unwrap();
        assert!(parse("1.2") < parse("1.10"));
        assert!(parse("1.2") < parse("1.2.0"));
        assert!(parse("2") > parse("1.99.99"));
    }

    #[test]
    fn serde_uses_string_form() {
        let v: Version = "1.2.3.4".parse().unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"1.2.3.4\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
