//! Package identity

use crate::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a package at a pinned version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId {
    /// Package name
    pub name: String,
    /// Pinned version
    pub version: Version,
}

impl PackageId {
    /// Create a new package identifier
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_name_dash_version() {
        let id = PackageId::new("text", "2.0.2".parse().unwrap());
        assert_eq!(id.to_string(), "text-2.0.2");
    }
}
