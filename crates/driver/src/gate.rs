//! Dependency gate
//!
//! Blocks a package's stages until every required dependency has a
//! registered library. The gate never consumes a job slot, so any number
//! of tasks may wait while up to `J` others run.

use crate::config::ToolMissingPolicy;
use crate::latch::Latch;
use crate::CABAL_PACKAGE;
use kiln_errors::{BuildError, Result};
use kiln_types::{BuildPlan, Component};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Shared gate over the plan's dependency edges and per-package latches
#[derive(Debug, Clone)]
pub struct DependencyGate {
    plan: Arc<BuildPlan>,
    latches: Arc<HashMap<String, Arc<Latch>>>,
    /// Declared tool name to the packages providing it
    tool_map: Arc<BTreeMap<String, Vec<String>>>,
    tool_missing: ToolMissingPolicy,
}

/// Build the tool map from declared executables, with plan overrides
/// taking precedence
#[must_use]
pub fn tool_map(plan: &BuildPlan) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, pkg) in &plan.packages {
        for exe in &pkg.description.executable_names {
            map.entry(exe.clone()).or_default().push(name.clone());
        }
    }
    for (tool, providers) in &plan.tool_overrides {
        map.insert(tool.clone(), providers.clone());
    }
    map
}

impl DependencyGate {
    /// A gate over the given plan and latch set
    #[must_use]
    pub fn new(
        plan: Arc<BuildPlan>,
        latches: Arc<HashMap<String, Arc<Latch>>>,
        tool_missing: ToolMissingPolicy,
    ) -> Self {
        let tool_map = Arc::new(tool_map(&plan));
        Self {
            plan,
            latches,
            tool_map,
            tool_missing,
        }
    }

    /// The packages `package` must wait for before building `required`
    /// components
    fn blocking_dependencies(
        &self,
        package: &str,
        required: &BTreeSet<Component>,
    ) -> Result<BTreeSet<String>> {
        let mut deps = BTreeSet::new();

        if let Some(pkg) = self.plan.get(package) {
            for (dep, info) in &pkg.description.dependencies {
                if info.consumed_by(required) {
                    deps.insert(dep.clone());
                }
            }
            for (tool, info) in &pkg.description.tools {
                if !info.consumed_by(required) {
                    continue;
                }
                match self.tool_map.get(tool) {
                    Some(providers) => deps.extend(providers.iter().cloned()),
                    None => {
                        if self.plan.is_core_executable(tool) {
                            continue;
                        }
                        match self.tool_missing {
                            ToolMissingPolicy::Ignore => {
                                tracing::debug!(package, tool = %tool, "tolerating missing tool");
                            }
                            ToolMissingPolicy::Fail => {
                                return Err(BuildError::ToolMissing {
                                    name: tool.clone(),
                                }
                                .into());
                            }
                        }
                    }
                }
            }
        }

        // Setup.hs compiles against the Cabal library everywhere.
        if package != CABAL_PACKAGE
            && (self.plan.get(CABAL_PACKAGE).is_some() || self.plan.is_core(CABAL_PACKAGE))
        {
            deps.insert(CABAL_PACKAGE.to_string());
        }

        deps.remove(package);
        Ok(deps)
    }

    /// Wait until every required dependency of `package` is ready
    ///
    /// # Errors
    ///
    /// [`BuildError::DependencyMissing`] when a non-core dependency is
    /// absent from the plan, [`BuildError::DependencyFailed`] when one
    /// resolved without a usable library, and
    /// [`BuildError::ToolMissing`] under the `Fail` tool policy.
    pub async fn wait(&self, package: &str, required: &BTreeSet<Component>) -> Result<()> {
        let deps = self.blocking_dependencies(package, required)?;

        let mut pending: Vec<(&str, &Arc<Latch>)> = Vec::new();
        for dep in &deps {
            if self.plan.is_core(dep) {
                continue;
            }
            let Some(latch) = self.latches.get(dep) else {
                return Err(BuildError::DependencyMissing { name: dep.clone() }.into());
            };
            pending.push((dep, latch));
        }

        // One pass over the current snapshot first: if anything already
        // failed, fail fast instead of blocking on the others.
        for (dep, latch) in &pending {
            if latch.peek() == Some(false) {
                return Err(BuildError::DependencyFailed {
                    name: (*dep).to_string(),
                }
                .into());
            }
        }

        for (dep, latch) in pending {
            if !latch.wait().await {
                return Err(BuildError::DependencyFailed {
                    name: dep.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}
