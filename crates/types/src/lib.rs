#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the kiln build driver
//!
//! This crate provides the fundamental types used throughout the system:
//! the immutable build plan, package identities and versions, component
//! and stage enumerations, and per-package constraints.

pub mod package;
pub mod plan;
pub mod stage;
pub mod version;

pub use package::PackageId;
pub use plan::{
    BuildPlan, Component, DepInfo, PackageConstraints, PackageDescription, PackagePlan, TestState,
};
pub use stage::Stage;
pub use version::{Version, VersionParseError};
