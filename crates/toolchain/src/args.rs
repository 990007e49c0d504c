//! Argument generation for toolchain invocations
//!
//! Argument lists are assembled through [`ArgBuilder`], a scoped
//! append-only builder, so every generator reads as a flat recipe.

use crate::InstallLayout;
use kiln_types::{PackageConstraints, PackageId};
use std::path::Path;

/// Append-only argument list builder
#[derive(Debug, Default)]
pub struct ArgBuilder {
    args: Vec<String>,
}

impl ArgBuilder {
    /// Start an empty argument list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one argument
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.args.push(arg.into());
        }
        self
    }

    /// The finished argument list
    #[must_use]
    pub fn finish(self) -> Vec<String> {
        self.args
    }
}

/// Arguments for `runghc` ahead of the `Setup` script
///
/// The package-db flags ensure `Setup` itself compiles against the
/// global database plus, when configured, the snapshot's local one.
#[must_use]
pub fn runghc_args(package_db: Option<&Path>) -> Vec<String> {
    let mut builder = ArgBuilder::new();
    builder.arg("-clear-package-db").arg("-global-package-db");
    if let Some(db) = package_db {
        builder.arg(format!("-package-db={}", db.display()));
    }
    builder.finish()
}

/// Arguments for `Setup configure`
///
/// Emits the package-db stack, the per-tree install dirs, the signed
/// flag assignment, profiling/dynamic toggles, and finally the
/// plan-supplied arguments verbatim.
#[must_use]
pub fn configure_args(
    layout: &InstallLayout,
    id: &PackageId,
    constraints: &PackageConstraints,
    package_db: Option<&Path>,
    executable_dynamic: bool,
) -> Vec<String> {
    let mut builder = ArgBuilder::new();

    builder.arg("--package-db=clear").arg("--package-db=global");
    if let Some(db) = package_db {
        builder.arg(format!("--package-db={}", db.display()));
    }

    let doc_dir = layout.package_doc_dir(id);
    builder
        .arg(format!("--bindir={}", layout.bin_dir().display()))
        .arg(format!("--libdir={}", layout.lib_dir().display()))
        .arg(format!("--datadir={}", layout.share_dir().display()))
        .arg(format!("--libexecdir={}", layout.libexec_dir().display()))
        .arg(format!("--sysconfdir={}", layout.etc_dir().display()))
        .arg(format!("--docdir={}", doc_dir.display()))
        .arg(format!("--htmldir={}", doc_dir.display()))
        .arg(format!("--haddockdir={}", doc_dir.display()));

    if !constraints.flags.is_empty() {
        let rendered: Vec<String> = constraints
            .flags
            .iter()
            .map(|(name, enabled)| {
                if *enabled {
                    name.clone()
                } else {
                    format!("-{name}")
                }
            })
            .collect();
        builder.arg(format!("--flags={}", rendered.join(" ")));
    }

    if constraints.library_profiling {
        builder.arg("--enable-library-profiling");
    }
    if executable_dynamic {
        builder.arg("--enable-executable-dynamic");
    }

    builder.args(constraints.configure_args.iter().cloned());
    builder.finish()
}
