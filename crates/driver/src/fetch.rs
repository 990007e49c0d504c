//! Source download seam
//!
//! HTTP transfer is owned by a collaborator; the driver only needs "put
//! the bytes of this URL at that path". Archive unpacking stays in the
//! driver because it is just another external tool (`tar`).

use async_trait::async_trait;
use kiln_errors::Result;
use std::path::Path;

/// Downloads pinned source tarballs
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download `url` to `dest`, replacing any existing file
    ///
    /// # Errors
    ///
    /// Returns an error when the transfer fails; the driver records it
    /// as the package's build failure.
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}
