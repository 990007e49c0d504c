//! Build stage enumeration

use serde::{Deserialize, Serialize};
use std::fmt;

/// One stage of a package's build lifecycle, as tracked by the result
/// ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Compile, copy, and register the package
    Build,
    /// Generate HTML documentation
    Haddock,
    /// Build and run test suites
    Test,
    /// Build (but never run) benchmarks
    Bench,
}

impl Stage {
    /// All stages, in lifecycle order
    pub const ALL: [Stage; 4] = [Stage::Build, Stage::Haddock, Stage::Test, Stage::Bench];

    /// Directory name used in the on-disk ledger tree
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Build => "Build",
            Stage::Haddock => "Haddock",
            Stage::Test => "Test",
            Stage::Bench => "Bench",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
