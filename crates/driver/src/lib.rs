#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Concurrent dependency-ordered build driver
//!
//! Given a resolved build plan, the driver compiles every package exactly
//! once in dependency order, maintains a binary package database and an
//! HTML documentation tree, and aggregates failures and warnings into a
//! single report. One task per package runs the unpack / configure /
//! build / haddock / test / bench state machine; cross-package ordering
//! flows through per-package single-assignment latches, a bounded job
//! semaphore, and a register-stage mutex.

pub mod cabal;
pub mod config;
pub mod driver;
pub mod fetch;
pub mod gate;
pub mod haddock;
pub mod latch;
pub mod state;
pub mod task;

pub use config::{BuildConfig, ToolMissingPolicy};
pub use driver::{perform_build, BuildReport};
pub use fetch::SourceFetcher;
pub use gate::DependencyGate;
pub use haddock::HaddockStore;
pub use latch::Latch;
pub use state::BuildContext;

/// The package providing the `Setup.hs` support library; implicit
/// dependency of everything else and the only package the driver may be
/// told to clone from upstream HEAD.
pub const CABAL_PACKAGE: &str = "Cabal";
