#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Crash-resumable result ledger
//!
//! The ledger persists per-(package, stage) outcomes across runs as tiny
//! files under `<root>/prevres/<Stage>/<name>-<version>` whose body is the
//! literal bytes `success` or `failure`. It is the only code that touches
//! the `prevres` tree. A subsequent run consults it to skip stages that
//! already succeeded in the same installation tree.

use kiln_errors::Result;
use kiln_types::{PackageId, Stage, TestState};
use std::path::{Path, PathBuf};

const SUCCESS: &[u8] = b"success";
const FAILURE: &[u8] = b"failure";

/// Outcome recorded for one (package, stage) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    /// Nothing recorded (or the record was unreadable)
    NoResult,
    /// The stage completed successfully
    Success,
    /// The stage failed
    Failure,
}

/// On-disk success/failure store rooted at the installation directory
#[derive(Debug, Clone)]
pub struct Ledger {
    root: PathBuf,
}

impl Ledger {
    /// Create a ledger rooted at the installation destination
    #[must_use]
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            root: install_root.into(),
        }
    }

    fn entry_path(&self, stage: Stage, id: &PackageId) -> PathBuf {
        self.root
            .join("prevres")
            .join(stage.as_str())
            .join(id.to_string())
    }

    /// Read the recorded outcome for a stage
    ///
    /// Any I/O error (including a missing file) reads as
    /// [`StageResult::NoResult`].
    pub async fn get(&self, stage: Stage, id: &PackageId) -> StageResult {
        match tokio::fs::read(self.entry_path(stage, id)).await {
            Ok(body) if body == SUCCESS => StageResult::Success,
            Ok(body) if body == FAILURE => StageResult::Failure,
            Ok(_) | Err(_) => StageResult::NoResult,
        }
    }

    /// Record an outcome, overwriting any previous entry
    ///
    /// # Errors
    ///
    /// Returns an error if the entry directory cannot be created or the
    /// record cannot be written.
    pub async fn put(&self, stage: Stage, id: &PackageId, success: bool) -> Result<()> {
        let path = self.entry_path(stage, id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| kiln_errors::Error::io_with_path(&e, parent))?;
        }
        let body = if success { SUCCESS } else { FAILURE };
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| kiln_errors::Error::io_with_path(&e, path))?;
        Ok(())
    }

    /// Delete the entries for every stage of a package
    ///
    /// Missing entries are ignored; a rebuild clears the ledger first so
    /// a crash mid-rebuild leaves it conservatively empty.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures other than `NotFound`.
    pub async fn clear_all(&self, id: &PackageId) -> Result<()> {
        for stage in Stage::ALL {
            let path = self.entry_path(stage, id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(kiln_errors::Error::io_with_path(&e, path)),
            }
        }
        Ok(())
    }

    /// The ledger root (for diagnostics)
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Whether a stage needs to run given its previous outcome and the
/// plan's expectation
///
/// Prior successes never re-run in the same installation tree, and an
/// unexpected prior failure of an `ExpectFailure` stage stays failed
/// until the constraints say otherwise.
#[must_use]
pub fn should_rerun(prev: StageResult, expected: TestState) -> bool {
    match expected {
        TestState::DontBuild => false,
        TestState::ExpectSuccess | TestState::ExpectFailure => match prev {
            StageResult::NoResult => true,
            StageResult::Success => false,
            StageResult::Failure => expected == TestState::ExpectSuccess,
        },
    }
}
