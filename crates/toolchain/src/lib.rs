#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! External toolchain adapter
//!
//! This crate wraps every external process the build driver spawns:
//! `runghc Setup` invocations, `ghc-pkg`, `haddock`, `git`, and `tar`.
//! Each invocation runs with an explicitly filtered environment, a fixed
//! working directory, and its combined stdout/stderr appended to a
//! per-stage log file that is opened lazily on first use.

pub mod args;
pub mod env;
pub mod layout;
pub mod runner;

pub use args::{configure_args, runghc_args, ArgBuilder};
pub use env::{child_environment, EnvSpec};
pub use layout::InstallLayout;
pub use runner::{shell_quote_command, ProcessRunner, StageLog};
