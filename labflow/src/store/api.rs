//! Versioned store API seam.
//!
//! The remote store is branch-addressable and append-only at the revision
//! level: documents live at paths inside a branch, and every write
//! produces a new tip revision. The wire-level hosting API is out of
//! scope; this trait is the whole surface the control layer consumes.

use crate::errors::LabflowError;
use async_trait::async_trait;

/// A content/commit identifier inside the store.
pub type Revision = String;

/// Client interface to the remote versioned store.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Returns the current tip revision of a branch.
    async fn branch_tip(&self, git_ref: &str) -> Result<Revision, LabflowError>;

    /// Creates a branch rooted at the given revision. Returns whether the
    /// store accepted the creation.
    async fn create_branch(&self, git_ref: &str, from_revision: &str)
        -> Result<bool, LabflowError>;

    /// Reads a document from a branch. `None` means not found.
    async fn read_document(
        &self,
        git_ref: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, LabflowError>;

    /// Writes a document to a branch with a commit message. Returns
    /// whether the store accepted the write.
    async fn write_document(
        &self,
        git_ref: &str,
        path: &str,
        bytes: &[u8],
        message: &str,
    ) -> Result<bool, LabflowError>;
}
