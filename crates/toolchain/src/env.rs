//! Child process environment construction
//!
//! A pure function from the inherited environment to the one handed to
//! every spawned tool: deny-listed variables removed, the install `bin/`
//! prepended to `PATH`, and the local package database exported when one
//! is configured.

use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variable exported when a local package database is in use
pub const PACKAGE_SANDBOX_VAR: &str = "HASKELL_PACKAGE_SANDBOX";

#[cfg(windows)]
const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: char = ':';

/// What the child environment should look like
#[derive(Debug, Clone, Default)]
pub struct EnvSpec {
    /// Variable names stripped from the inherited environment
    pub deny: Vec<String>,
    /// Install `bin/` directory prepended to `PATH`
    pub bin_dir: Option<PathBuf>,
    /// Local package database exported via [`PACKAGE_SANDBOX_VAR`]
    pub package_db: Option<PathBuf>,
}

/// On Windows `PATH` lookup is case-insensitive; match accordingly.
fn is_path_var(name: &str) -> bool {
    if cfg!(windows) {
        name.eq_ignore_ascii_case("PATH")
    } else {
        name == "PATH"
    }
}

/// Build a child environment from the inherited one
#[must_use]
pub fn child_environment<I>(inherited: I, spec: &EnvSpec) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: HashMap<String, String> = inherited
        .into_iter()
        .filter(|(name, _)| !spec.deny.iter().any(|denied| denied == name))
        .collect();

    if let Some(bin) = &spec.bin_dir {
        let bin = bin.display().to_string();
        let path_key = env
            .keys()
            .find(|name| is_path_var(name))
            .cloned()
            .unwrap_or_else(|| "PATH".to_string());
        let value = match env.get(&path_key) {
            Some(existing) if !existing.is_empty() => {
                format!("{bin}{PATH_LIST_SEPARATOR}{existing}")
            }
            _ => bin,
        };
        env.insert(path_key, value);
    }

    if let Some(db) = &spec.package_db {
        env.insert(PACKAGE_SANDBOX_VAR.to_string(), db.display().to_string());
    }

    env
}
