//! Session document persistence.
//!
//! One JSON document per session, at a fixed path inside the target
//! branch. The document is read at pipeline start and written at
//! checkpoints; a detected conflict produces a new branch rather than an
//! overwrite, and the outcome tells the caller which branch the write
//! actually landed on.

use super::adapter::{merge_documents, Document, StoreAdapter, WriteTarget};
use super::api::VersionedStore;
use crate::errors::LabflowError;
use crate::session::ResearchSession;
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Fixed path of the session document inside a branch.
pub const SESSION_DOCUMENT_PATH: &str = ".research/research_history.json";

/// The result of a checkpoint write.
///
/// A forked outcome is NOT an error: the write landed safely, just on a
/// new branch. The caller MUST propagate `branch` downstream — later
/// checkpoints against the old reference would silently diverge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// The branch the document was written to.
    pub branch: String,
    /// Whether a conflict forced the write onto a fork.
    pub forked: bool,
    /// Dotted paths of the conflicting fields, when forked.
    pub conflicts: Vec<String>,
}

/// Loads and checkpoints session documents on the remote store.
pub struct SessionStore {
    adapter: StoreAdapter,
}

impl SessionStore {
    /// Creates a new session store.
    #[must_use]
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Self {
            adapter: StoreAdapter::new(store),
        }
    }

    /// Reads the raw session document from a branch. Missing documents
    /// come back as an empty mapping.
    pub async fn load_document(&self, branch: &str) -> Result<Document, LabflowError> {
        let bytes = self
            .adapter
            .store()
            .read_document(branch, SESSION_DOCUMENT_PATH)
            .await?;
        match bytes {
            None => Ok(Document::new()),
            Some(bytes) => {
                let value: serde_json::Value = serde_json::from_slice(&bytes)?;
                match value {
                    serde_json::Value::Object(map) => Ok(map),
                    _ => Err(LabflowError::Serialization(format!(
                        "session document at '{SESSION_DOCUMENT_PATH}' is not a JSON object"
                    ))),
                }
            }
        }
    }

    /// Reads the session from a branch, when one was ever persisted there.
    pub async fn load(&self, branch: &str) -> Result<Option<ResearchSession>, LabflowError> {
        let document = self.load_document(branch).await?;
        if document.is_empty() {
            return Ok(None);
        }
        let session = serde_json::from_value(serde_json::Value::Object(document))?;
        Ok(Some(session))
    }

    /// Reads the prior document and reconciles it with `overlay`,
    /// latest-wins (shallow).
    pub async fn load_merged(
        &self,
        branch: &str,
        overlay: &Document,
    ) -> Result<Document, LabflowError> {
        let prior = self.load_document(branch).await?;
        Ok(merge_documents(&prior, overlay))
    }

    /// Checkpoints a session onto a branch, forking on conflict.
    ///
    /// The conflict baseline is the document currently on the branch: a
    /// concurrent writer that changed overlapping fields since our last
    /// read shows up as a difference here and forces a fork.
    pub async fn checkpoint(
        &self,
        session: &ResearchSession,
        branch: &str,
        stage_name: &str,
    ) -> Result<WriteOutcome, LabflowError> {
        let new_fields = session_document(session)?;
        let base_document = self.load_document(branch).await?;

        let WriteTarget {
            branch: target,
            forked,
            conflicts,
            ..
        } = self
            .adapter
            .prepare_write(&base_document, &new_fields, branch, stage_name)
            .await?;

        let bytes = serde_json::to_vec_pretty(&new_fields)?;
        let message = format!(
            "checkpoint session {} at stage {} ({})",
            session.session_id,
            stage_name,
            iso_timestamp()
        );
        let written = self
            .adapter
            .store()
            .write_document(&target, SESSION_DOCUMENT_PATH, &bytes, &message)
            .await?;
        if !written {
            return Err(LabflowError::Internal(format!(
                "store refused to write session document on branch '{target}'"
            )));
        }

        debug!(branch = %target, forked, "session checkpoint written");
        Ok(WriteOutcome {
            branch: target,
            forked,
            conflicts,
        })
    }
}

fn session_document(session: &ResearchSession) -> Result<Document, LabflowError> {
    match serde_json::to_value(session)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(LabflowError::Serialization(
            "session did not serialize to a JSON object".to_string(),
        )),
    }
}
