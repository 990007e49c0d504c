//! Haddock interface store
//!
//! Tracks the `.haddock` interface file each package produced and
//! computes the transitive library/executable dependency closure used to
//! cross-link documentation between packages.

use dashmap::DashMap;
use kiln_types::{BuildPlan, Component, PackageId};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

fn library_edge(components: &BTreeSet<Component>) -> bool {
    components.contains(&Component::Library) || components.contains(&Component::Executable)
}

/// Shared store of produced haddock interfaces and memoised closures
#[derive(Debug, Default)]
pub struct HaddockStore {
    /// `name-version` to absolute `.haddock` path
    files: DashMap<String, PathBuf>,
    /// Package name to its transitive library/executable dep names.
    /// Grown monotonically; the whole insert-recurse-overwrite sequence
    /// for a node runs under this one lock so no caller can observe the
    /// in-progress placeholder.
    memo: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl HaddockStore {
    /// An empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the interface file a package produced
    pub fn record_interface(&self, id: &PackageId, path: PathBuf) {
        self.files.insert(id.to_string(), path);
    }

    /// Number of recorded interfaces
    #[must_use]
    pub fn interface_count(&self) -> usize {
        self.files.len()
    }

    /// Transitive library/executable dependency names of `name`
    ///
    /// Self-dependencies (legal in this ecosystem) terminate through the
    /// placeholder inserted before recursing.
    #[must_use]
    pub fn closure(&self, plan: &BuildPlan, name: &str) -> BTreeSet<String> {
        let mut memo = self
            .memo
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Self::closure_locked(&mut memo, plan, name)
    }

    fn closure_locked(
        memo: &mut HashMap<String, BTreeSet<String>>,
        plan: &BuildPlan,
        name: &str,
    ) -> BTreeSet<String> {
        if let Some(cached) = memo.get(name) {
            return cached.clone();
        }
        // Placeholder stops self-cycles before the real value exists.
        memo.insert(name.to_string(), BTreeSet::new());

        let mut deps = BTreeSet::new();
        if let Some(pkg) = plan.get(name) {
            for (dep, info) in &pkg.description.dependencies {
                if library_edge(&info.components) {
                    deps.insert(dep.clone());
                    deps.extend(Self::closure_locked(memo, plan, dep));
                }
            }
        }
        memo.insert(name.to_string(), deps.clone());
        deps
    }

    /// `--haddock-options=--read-interface=...` arguments for building
    /// `id`'s documentation against everything in its closure
    #[must_use]
    pub fn interface_args(&self, plan: &BuildPlan, id: &PackageId) -> Vec<String> {
        let closure = self.closure(plan, &id.name);
        let mut args: Vec<String> = self
            .files
            .iter()
            .filter(|entry| {
                entry
                    .key()
                    .rsplit_once('-')
                    .is_some_and(|(name, _)| closure.contains(name))
            })
            .map(|entry| {
                format!(
                    "--haddock-options=--read-interface=../{}/,{}",
                    entry.key(),
                    entry.value().display()
                )
            })
            .collect();
        args.sort();
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::{DepInfo, PackageDescription, PackagePlan};

    fn plan_with_deps(edges: &[(&str, &[&str])]) -> BuildPlan {
        let mut plan = BuildPlan::default();
        for (name, deps) in edges {
            let mut description = PackageDescription::default();
            for dep in *deps {
                description.dependencies.insert(
                    (*dep).to_string(),
                    DepInfo::for_components([Component::Library]),
                );
            }
            plan.packages.insert(
                (*name).to_string(),
                PackagePlan {
                    version: "1.0".parse().unwrap(),
                    constraints: kiln_types::PackageConstraints::default(),
                    description,
                    source_url: None,
                },
            );
        }
        plan
    }

    #[test]
    fn closure_is_transitive() {
        let plan = plan_with_deps(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let store = HaddockStore::new();
        let closure = store.closure(&plan, "a");
        let expected: BTreeSet<String> =
            ["b", "c"].into_iter().map(String::from).collect();
        assert_eq!(closure, expected);
    }

    #[test]
    fn self_dependency_terminates() {
        let plan = plan_with_deps(&[("a", &["a", "b"]), ("b", &[])]);
        let store = HaddockStore::new();
        let closure = store.closure(&plan, "a");
        let expected: BTreeSet<String> =
            ["a", "b"].into_iter().map(String::from).collect();
        assert_eq!(closure, expected);
    }

    #[test]
    fn non_library_edges_are_ignored() {
        let mut plan = plan_with_deps(&[("a", &[]), ("quickcheck", &[])]);
        plan.packages
            .get_mut("a")
            .unwrap()
            .description
            .dependencies
            .insert(
                "quickcheck".to_string(),
                DepInfo::for_components([Component::TestSuite]),
            );
        let store = HaddockStore::new();
        assert!(store.closure(&plan, "a").is_empty());
    }

    #[test]
    fn interface_args_follow_the_closure() {
        let plan = plan_with_deps(&[("a", &["b"]), ("b", &[]), ("c", &[])]);
        let store = HaddockStore::new();
        store.record_interface(
            &PackageId::new("b", "1.0".parse().unwrap()),
            PathBuf::from("/doc/b-1.0/b.haddock"),
        );
        store.record_interface(
            &PackageId::new("c", "1.0".parse().unwrap()),
            PathBuf::from("/doc/c-1.0/c.haddock"),
        );

        let args = store.interface_args(&plan, &PackageId::new("a", "1.0".parse().unwrap()));
        assert_eq!(
            args,
            vec![
                "--haddock-options=--read-interface=../b-1.0/,/doc/b-1.0/b.haddock".to_string()
            ]
        );
    }

    #[test]
    fn memo_survives_repeated_queries() {
        let plan = plan_with_deps(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let store = HaddockStore::new();
        let first = store.closure(&plan, "a");
        let second = store.closure(&plan, "a");
        assert_eq!(first, second);
        assert_eq!(store.closure(&plan, "b").len(), 1);
    }
}
