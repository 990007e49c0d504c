//! Shared per-run build state
//!
//! One [`BuildContext`] is allocated per run and cloned into every
//! package task. Everything inside is either immutable or safe for
//! concurrent use.

use crate::config::BuildConfig;
use crate::gate::DependencyGate;
use crate::haddock::HaddockStore;
use crate::latch::Latch;
use dashmap::DashMap;
use kiln_events::{Event, EventSink};
use kiln_ledger::Ledger;
use kiln_pkgdb::PackageDb;
use kiln_toolchain::InstallLayout;
use kiln_types::BuildPlan;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OnceCell, Semaphore};

/// Failure messages are truncated to this length in the final report
pub const ERROR_DISPLAY_LIMIT: usize = 500;

/// Shared state for one build run
#[derive(Clone)]
pub struct BuildContext {
    /// The frozen plan
    pub plan: Arc<BuildPlan>,
    /// Run configuration
    pub config: Arc<BuildConfig>,
    /// Install tree paths
    pub layout: InstallLayout,
    /// The package database builds register into
    pub db: PackageDb,
    /// Per-(package, stage) result ledger
    pub ledger: Ledger,
    /// Bounded job semaphore: at most `J` running external processes
    pub jobs: Arc<Semaphore>,
    /// The package database is not safe for concurrent writers
    pub register_lock: Arc<tokio::sync::Mutex<()>>,
    /// Tasks currently executing any stage
    pub active: Arc<AtomicUsize>,
    /// Package name to truncated failure description
    pub errors: Arc<DashMap<String, String>>,
    /// Append-only warning list surfaced in the final report
    pub warnings: Arc<Mutex<Vec<String>>>,
    /// Haddock interfaces and dependency closures
    pub haddock: Arc<HaddockStore>,
    /// Per-package completion latches
    pub latches: Arc<HashMap<String, Arc<Latch>>>,
    /// Dependency gate over the latches
    pub gate: DependencyGate,
    /// Packages registered in the database when the run started
    pub registered: Arc<BTreeSet<String>>,
    /// Which hyperlinked-source flag this haddock accepts; probed once
    pub hyperlink_flag: Arc<OnceCell<&'static str>>,
    /// Filtered environment handed to every child process
    pub child_env: Arc<HashMap<String, String>>,
    /// Event sink
    pub sink: EventSink,
}

impl BuildContext {
    /// Latch for a planned package
    ///
    /// Latches are allocated for every plan entry before any task
    /// starts, so a miss is a driver bug.
    #[must_use]
    pub fn latch(&self, name: &str) -> Option<&Arc<Latch>> {
        self.latches.get(name)
    }

    /// Record a warning and surface it as an event
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        self.sink.emit(Event::Warning {
            message: message.clone(),
        });
        let mut warnings = self
            .warnings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        warnings.push(message);
    }

    /// Snapshot of the collected warnings
    #[must_use]
    pub fn warnings_snapshot(&self) -> Vec<String> {
        self.warnings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

/// RAII active-task counter increment
pub struct ActiveGuard {
    counter: Arc<AtomicUsize>,
}

impl ActiveGuard {
    /// Increment `counter` until dropped
    #[must_use]
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
