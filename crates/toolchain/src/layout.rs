//! Installation tree layout
//!
//! Everything the driver produces lives under one destination root:
//!
//! ```text
//! <root>/bin  lib  share  libexec  etc  doc  pkgdb  prevres
//! ```

use kiln_types::PackageId;
use std::path::{Path, PathBuf};

/// Paths inside the installation destination
#[derive(Debug, Clone)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    /// Layout rooted at the (canonicalised) installation destination
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The destination root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Installed executables
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Installed libraries
    #[must_use]
    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    /// Installed data files
    #[must_use]
    pub fn share_dir(&self) -> PathBuf {
        self.root.join("share")
    }

    /// Installed private executables
    #[must_use]
    pub fn libexec_dir(&self) -> PathBuf {
        self.root.join("libexec")
    }

    /// Installed configuration
    #[must_use]
    pub fn etc_dir(&self) -> PathBuf {
        self.root.join("etc")
    }

    /// Root of the documentation tree
    #[must_use]
    pub fn doc_dir(&self) -> PathBuf {
        self.root.join("doc")
    }

    /// Documentation directory for one package
    #[must_use]
    pub fn package_doc_dir(&self, id: &PackageId) -> PathBuf {
        self.doc_dir().join(id.to_string())
    }

    /// The binary package database
    #[must_use]
    pub fn package_db(&self) -> PathBuf {
        self.root.join("pkgdb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_doc_dir_uses_name_dash_version() {
        let layout = InstallLayout::new("/opt/snapshot");
        let id = PackageId::new("text", "2.0.2".parse().unwrap());
        assert_eq!(
            layout.package_doc_dir(&id),
            PathBuf::from("/opt/snapshot/doc/text-2.0.2")
        );
    }
}
