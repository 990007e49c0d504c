//! Build driver configuration

use crate::fetch::SourceFetcher;
use kiln_events::EventSink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What to do when a declared build tool has no providing package
///
/// Upstream metadata is frequently wrong about tool dependencies, so the
/// default tolerates them silently; strict curators can opt into hard
/// failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolMissingPolicy {
    /// Proceed as if the tool dependency were satisfied
    #[default]
    Ignore,
    /// Fail the depending package's task
    Fail,
}

/// Configuration for one build run
#[derive(Clone)]
pub struct BuildConfig {
    /// Installation destination root
    pub install_dest: PathBuf,
    /// Per-package stage logs land here
    pub log_dir: PathBuf,
    /// Scratch space for unpacked sources
    pub work_dir: PathBuf,
    /// Maximum concurrently running external processes
    pub jobs: usize,
    /// Register into the compiler's global database instead of a
    /// snapshot-local one
    pub global_db: bool,
    /// Run the haddock stage
    pub enable_haddock: bool,
    /// Run the test stage
    pub enable_tests: bool,
    /// Run the benchmark stage
    pub enable_benches: bool,
    /// Emit verbose configure output
    pub verbose: bool,
    /// Rewrite `.cabal` files so every dependency range accepts any
    /// version
    pub allow_newer: bool,
    /// Ask haddock for hoogle databases
    pub build_hoogle: bool,
    /// Trust an existing Cabal installation instead of building it
    pub no_rebuild_cabal: bool,
    /// Clone Cabal from upstream HEAD instead of unpacking the pinned
    /// release
    pub cabal_from_head: bool,
    /// Repository cloned when `cabal_from_head` is set
    pub cabal_git_url: String,
    /// Link executables dynamically
    pub executable_dynamic: bool,
    /// Policy for tool dependencies no package provides
    pub tool_missing: ToolMissingPolicy,
    /// Environment variables never passed to child processes
    pub env_deny: Vec<String>,
    /// Compiler-bundled documentation copied into the install doc tree
    pub compiler_doc_dir: Option<PathBuf>,
    /// Wall-clock budget for a single test-suite run
    pub test_timeout: Duration,
    /// Where driver output goes
    pub sink: EventSink,
    /// Downloads pinned source tarballs (required only when the plan
    /// carries source URLs)
    pub fetcher: Option<Arc<dyn SourceFetcher>>,
}

impl BuildConfig {
    /// Configuration with defaults for everything but the two
    /// destination trees
    #[must_use]
    pub fn new(install_dest: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        let install_dest = install_dest.into();
        let work_dir = install_dest.join("build");
        Self {
            install_dest,
            log_dir: log_dir.into(),
            work_dir,
            jobs: 4,
            global_db: false,
            enable_haddock: true,
            enable_tests: true,
            enable_benches: true,
            verbose: false,
            allow_newer: false,
            build_hoogle: false,
            no_rebuild_cabal: false,
            cabal_from_head: false,
            cabal_git_url: "https://github.com/haskell/cabal.git".to_string(),
            executable_dynamic: false,
            tool_missing: ToolMissingPolicy::default(),
            env_deny: Vec::new(),
            compiler_doc_dir: None,
            test_timeout: Duration::from_secs(600),
            sink: EventSink::discard(),
            fetcher: None,
        }
    }

    /// Set the parallelism bound
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Register into the global package database
    #[must_use]
    pub fn with_global_db(mut self, global: bool) -> Self {
        self.global_db = global;
        self
    }

    /// Enable or disable the haddock stage
    #[must_use]
    pub fn with_haddock(mut self, enable: bool) -> Self {
        self.enable_haddock = enable;
        self
    }

    /// Enable or disable the test stage
    #[must_use]
    pub fn with_tests(mut self, enable: bool) -> Self {
        self.enable_tests = enable;
        self
    }

    /// Enable or disable the benchmark stage
    #[must_use]
    pub fn with_benches(mut self, enable: bool) -> Self {
        self.enable_benches = enable;
        self
    }

    /// Rewrite dependency bounds to accept any version
    #[must_use]
    pub fn with_allow_newer(mut self, allow: bool) -> Self {
        self.allow_newer = allow;
        self
    }

    /// Policy for unsatisfiable tool dependencies
    #[must_use]
    pub fn with_tool_missing(mut self, policy: ToolMissingPolicy) -> Self {
        self.tool_missing = policy;
        self
    }

    /// Variables stripped from every child environment
    #[must_use]
    pub fn with_env_deny<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env_deny = names.into_iter().map(Into::into).collect();
        self
    }

    /// Event sink receiving all driver output
    #[must_use]
    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    /// Source tarball fetcher
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Wall-clock budget for one test-suite binary
    #[must_use]
    pub fn with_test_timeout(mut self, budget: Duration) -> Self {
        self.test_timeout = budget;
        self
    }
}

impl std::fmt::Debug for BuildConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildConfig")
            .field("install_dest", &self.install_dest)
            .field("log_dir", &self.log_dir)
            .field("jobs", &self.jobs)
            .field("global_db", &self.global_db)
            .field("enable_haddock", &self.enable_haddock)
            .field("enable_tests", &self.enable_tests)
            .field("enable_benches", &self.enable_benches)
            .field("allow_newer", &self.allow_newer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = BuildConfig::new("/opt/s", "/opt/s/logs");
        assert_eq!(config.jobs, 4);
        assert_eq!(config.test_timeout, Duration::from_secs(600));
        assert_eq!(config.tool_missing, ToolMissingPolicy::Ignore);
        assert!(!config.global_db);
        assert_eq!(config.work_dir, PathBuf::from("/opt/s/build"));
    }

    #[test]
    fn jobs_never_drop_to_zero() {
        let config = BuildConfig::new("/opt/s", "/opt/s/logs").with_jobs(0);
        assert_eq!(config.jobs, 1);
    }
}
