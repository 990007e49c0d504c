//! Build driver error types

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("{} package(s) failed to build", .errors.len())]
    BuildsFailed {
        /// Package name to truncated failure description
        errors: BTreeMap<String, String>,
        /// Warnings collected alongside the failures
        warnings: Vec<String>,
    },

    #[error("dependency {name} is not part of the build plan")]
    DependencyMissing { name: String },

    #[error("dependency {name} failed to build")]
    DependencyFailed { name: String },

    #[error("build tool {name} is provided by no planned package")]
    ToolMissing { name: String },

    #[error("{command} exited with {code}")]
    ProcessFailed { command: String, code: i32 },

    #[error("{command} was killed by a signal")]
    ProcessKilled { command: String },

    #[error("failed to spawn {command}: {message}")]
    SpawnFailed { command: String, message: String },

    #[error("{command} timed out after {seconds} seconds")]
    Timeout { command: String, seconds: u64 },

    #[error("unpack of {package} produced no source directory")]
    UnpackFailed { package: String },

    #[error("no .cabal file found under {dir}")]
    CabalFileMissing { dir: String },

    #[error("package database at {path} could not be initialised: {message}")]
    PackageDbInit { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_dependency() {
        let err = BuildError::DependencyFailed {
            name: "text".to_string(),
        };
        assert_eq!(err.to_string(), "dependency text failed to build");
    }
}
