//! The immutable build plan
//!
//! A plan names every package to build at a pinned version, together with
//! its parsed description (components, modules, dependency consumers),
//! per-package constraints, and the snapshot-wide sets of core packages
//! and executables that ship with the compiler and are never built.

use crate::{PackageId, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A buildable component of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Library,
    Executable,
    TestSuite,
    Benchmark,
}

impl Component {
    /// The components whose consumers must be satisfied before a
    /// library build can start
    #[must_use]
    pub fn library_set() -> BTreeSet<Component> {
        [Component::Library, Component::Executable].into_iter().collect()
    }
}

/// Expected outcome for an optional stage (haddock, tests, benchmarks)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    /// Skip the stage entirely
    DontBuild,
    /// Run the stage; failure is a hard error
    #[default]
    ExpectSuccess,
    /// Run the stage; success is surprising and produces a warning
    ExpectFailure,
}

impl TestState {
    /// Whether the stage should run at all
    #[must_use]
    pub fn enabled(self) -> bool {
        !matches!(self, TestState::DontBuild)
    }
}

/// Per-package build constraints supplied by the plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConstraints {
    /// Cabal flag assignments forced for this package
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    /// Extra arguments appended verbatim to `Setup configure`
    #[serde(default)]
    pub configure_args: Vec<String>,
    /// Skip every build stage for this package
    #[serde(default)]
    pub skip_build: bool,
    /// Expected haddock outcome
    #[serde(default)]
    pub haddocks: TestState,
    /// Expected test-suite outcome
    #[serde(default)]
    pub tests: TestState,
    /// Expected benchmark outcome
    #[serde(default)]
    pub benches: TestState,
    /// Build the library with profiling enabled
    #[serde(default)]
    pub library_profiling: bool,
}

/// The set of components that consume one declared dependency
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepInfo {
    /// Components of the depending package that need this dependency
    pub components: BTreeSet<Component>,
}

impl DepInfo {
    /// A dependency consumed by the given components
    #[must_use]
    pub fn for_components<I: IntoIterator<Item = Component>>(components: I) -> Self {
        Self {
            components: components.into_iter().collect(),
        }
    }

    /// Whether any consuming component is in `wanted`
    #[must_use]
    pub fn consumed_by(&self, wanted: &BTreeSet<Component>) -> bool {
        self.components.intersection(wanted).next().is_some()
    }
}

/// Parsed description of one package, as extracted from its `.cabal`
/// file by the (external) metadata parser
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescription {
    /// Exposed and other modules
    #[serde(default)]
    pub modules: Vec<String>,
    /// Declared components
    #[serde(default)]
    pub components: BTreeSet<Component>,
    /// Library dependencies: package name to consuming components
    #[serde(default)]
    pub dependencies: BTreeMap<String, DepInfo>,
    /// Build-tool dependencies: tool name to consuming components
    #[serde(default)]
    pub tools: BTreeMap<String, DepInfo>,
    /// Declared executable names, used to resolve tool dependencies
    #[serde(default)]
    pub executable_names: Vec<String>,
    /// Declared test-suite names, in `.cabal` order
    #[serde(default)]
    pub test_suite_names: Vec<String>,
    /// Whether the `.cabal` file declares `build-type: Simple`
    #[serde(default)]
    pub simple_build_type: bool,
}

impl PackageDescription {
    /// Whether the package declares a library component
    #[must_use]
    pub fn has_library(&self) -> bool {
        self.components.contains(&Component::Library)
    }

    /// Whether there is anything for haddock to document
    #[must_use]
    pub fn has_modules(&self) -> bool {
        !self.modules.is_empty()
    }

    /// Names of declared test suites
    #[must_use]
    pub fn test_suites(&self) -> &[String] {
        &self.test_suite_names
    }
}

/// Plan entry for a single package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagePlan {
    /// Pinned version
    pub version: Version,
    /// Build constraints
    #[serde(default)]
    pub constraints: PackageConstraints,
    /// Parsed package description
    #[serde(default)]
    pub description: PackageDescription,
    /// Upstream tarball location, when the plan pins one
    #[serde(default)]
    pub source_url: Option<String>,
}

impl PackagePlan {
    /// Identifier for this plan entry
    #[must_use]
    pub fn package_id(&self, name: &str) -> PackageId {
        PackageId::new(name, self.version.clone())
    }
}

/// The resolved, immutable build plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildPlan {
    /// Every package to build, keyed by name
    pub packages: BTreeMap<String, PackagePlan>,
    /// Packages installed with the compiler; never built
    #[serde(default)]
    pub core_packages: BTreeSet<String>,
    /// Executables installed with the compiler
    #[serde(default)]
    pub core_executables: BTreeSet<String>,
    /// Overrides mapping a declared tool name to the packages providing it
    #[serde(default)]
    pub tool_overrides: BTreeMap<String, Vec<String>>,
}

impl BuildPlan {
    /// Look up a package's plan entry
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PackagePlan> {
        self.packages.get(name)
    }

    /// Whether `name` is a core package
    #[must_use]
    pub fn is_core(&self, name: &str) -> bool {
        self.core_packages.contains(name)
    }

    /// Whether `name` is an executable shipped with the compiler
    #[must_use]
    pub fn is_core_executable(&self, name: &str) -> bool {
        self.core_executables.contains(name)
    }
}
