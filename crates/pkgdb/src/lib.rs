#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Binary package database management
//!
//! The driver either registers packages into the compiler's global
//! database or into a snapshot-local one under the install tree. This
//! crate initialises the local database when its `package.cache` is
//! absent and enumerates the packages already registered, which the
//! state machine uses to detect registrations lost since a previous
//! run.

use kiln_errors::{BuildError, Result};
use kiln_toolchain::ProcessRunner;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const GHC_PKG: &str = "ghc-pkg";
const CACHE_FILE: &str = "package.cache";

/// Handle on the package database the build registers into
#[derive(Debug, Clone)]
pub struct PackageDb {
    path: Option<PathBuf>,
}

impl PackageDb {
    /// Use the compiler's global database
    #[must_use]
    pub fn global() -> Self {
        Self { path: None }
    }

    /// Use a snapshot-local database at the given path
    #[must_use]
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// The local database path, if one is configured
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Initialise the local database unless it already has a cache
    ///
    /// `ghc-pkg init` refuses to reuse an existing directory, so a
    /// cacheless leftover tree is removed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the stale tree cannot be removed or
    /// `ghc-pkg init` fails.
    pub async fn ensure(&self, runner: &ProcessRunner) -> Result<()> {
        let Some(db) = &self.path else {
            return Ok(());
        };
        if tokio::fs::try_exists(db.join(CACHE_FILE)).await.unwrap_or(false) {
            return Ok(());
        }
        tracing::debug!(db = %db.display(), "initialising package database");
        match tokio::fs::remove_dir_all(db).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(kiln_errors::Error::io_with_path(&e, db)),
        }
        let result = runner
            .run_capture(GHC_PKG, &["init".to_string(), db.display().to_string()], None)
            .await?;
        if result.success {
            Ok(())
        } else {
            Err(BuildError::PackageDbInit {
                path: db.display().to_string(),
                message: "ghc-pkg init exited non-zero".to_string(),
            }
            .into())
        }
    }

    /// Names of every package currently registered in this database
    ///
    /// # Errors
    ///
    /// Returns an error if `ghc-pkg list` cannot be run or exits
    /// non-zero.
    pub async fn registered_packages(&self, runner: &ProcessRunner) -> Result<BTreeSet<String>> {
        let mut args = Vec::new();
        match &self.path {
            Some(db) => args.push(format!("--package-db={}", db.display())),
            None => args.push("--global".to_string()),
        }
        args.push("list".to_string());
        args.push("--simple-output".to_string());

        let result = runner.run_capture(GHC_PKG, &args, None).await?;
        if !result.success {
            return Err(BuildError::PackageDbInit {
                path: self
                    .path
                    .as_ref()
                    .map_or_else(|| "global".to_string(), |p| p.display().to_string()),
                message: "ghc-pkg list exited non-zero".to_string(),
            }
            .into());
        }
        Ok(parse_simple_output(&result.stdout))
    }
}

/// Parse `ghc-pkg list --simple-output`: whitespace-separated
/// `name-version` tokens, version suffix stripped
fn parse_simple_output(output: &str) -> BTreeSet<String> {
    output
        .split_whitespace()
        .filter_map(|token| token.rsplit_once('-').map(|(name, _)| name.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_events::EventSink;
    use std::collections::HashMap;

    #[test]
    fn simple_output_parsing_keeps_hyphenated_names() {
        let parsed = parse_simple_output("base-4.17.2.1 unordered-containers-0.2.19.1\ntext-2.0.2\n");
        let expected: BTreeSet<String> = ["base", "unordered-containers", "text"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn simple_output_parsing_ignores_unversioned_tokens() {
        assert!(parse_simple_output("garbage").is_empty());
        assert!(parse_simple_output("").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ensure_initialises_a_missing_database() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("ghc-pkg");
        std::fs::write(
            &script,
            "#!/bin/sh\nif [ \"$1\" = init ]; then mkdir -p \"$2\" && : > \"$2/package.cache\"; fi\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.insert(
            "PATH".to_string(),
            format!("{}:{}", bin.display(), env.get("PATH").cloned().unwrap_or_default()),
        );
        let runner = ProcessRunner::new("pkgdb", env, EventSink::discard());

        let db_path = dir.path().join("pkgdb");
        let db = PackageDb::local(&db_path);
        db.ensure(&runner).await.unwrap();
        assert!(db_path.join("package.cache").exists());

        // A second ensure is a no-op.
        db.ensure(&runner).await.unwrap();
    }
}
