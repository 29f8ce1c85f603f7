//! Optimistic conflict detection and branch forking.
//!
//! The remote store is the only cross-run shared mutable resource, and all
//! coordination over it is optimistic: detect conflicting fields before a
//! write, and when a true conflict exists, isolate the write on a fork of
//! the branch instead of overwriting. The store never silently drops data.
//!
//! The conflict predicate is DEEP (it recurses into nested mappings) while
//! [`merge_documents`] is SHALLOW. The asymmetry is deliberate: merge
//! implements "latest wins" reconciliation when loading prior state, the
//! conflict predicate implements "protect concurrent writers" before a
//! write. Unifying the two would change which concurrent writes get
//! classified as conflicting versus silently overridden.

use super::api::{Revision, VersionedStore};
use crate::errors::LabflowError;
use crate::utils::compact_timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

/// A JSON document: the unit the store persists.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Where a prepared write should land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteTarget {
    /// The branch to write to. Equals the requested branch unless the
    /// write was forked.
    pub branch: String,
    /// Whether a conflict forced a fork. When true, the caller MUST
    /// propagate the new branch reference downstream or state silently
    /// diverges.
    pub forked: bool,
    /// The tip revision the fork was rooted at, when forked.
    pub base_revision: Option<Revision>,
    /// Dotted paths of the conflicting fields, when forked.
    pub conflicts: Vec<String>,
}

/// Collects the dotted paths of fields present in both documents with
/// different values.
///
/// Recurses into nested mappings. A field present in only one side is a
/// pure addition and never a conflict.
#[must_use]
pub fn conflicting_fields(base: &Document, new_fields: &Document) -> Vec<String> {
    let mut conflicts = Vec::new();
    walk_conflicts(base, new_fields, "", &mut conflicts);
    conflicts
}

fn walk_conflicts(base: &Document, new_fields: &Document, prefix: &str, out: &mut Vec<String>) {
    for (key, new_value) in new_fields {
        let Some(base_value) = base.get(key) else {
            continue;
        };
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match (base_value, new_value) {
            (serde_json::Value::Object(base_map), serde_json::Value::Object(new_map)) => {
                walk_conflicts(base_map, new_map, &path, out);
            }
            (b, n) if b == n => {}
            _ => out.push(path),
        }
    }
}

/// Merges two documents, right-biased and SHALLOW.
///
/// Every top-level field in `new` overrides the same field in `old`;
/// fields only in `old` are kept. Used for "latest wins" reconciliation
/// when loading prior state before augmenting it.
#[must_use]
pub fn merge_documents(old: &Document, new: &Document) -> Document {
    let mut merged = old.clone();
    for (key, value) in new {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Builds the deterministic name of a fork branch.
///
/// The name is a pure function of `{branch_ref, stage_name, timestamp}`:
/// a readable prefix plus a short hash of the triple.
#[must_use]
pub fn fork_branch_name(branch_ref: &str, stage_name: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(branch_ref.as_bytes());
    hasher.update(b"\0");
    hasher.update(stage_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(timestamp.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{branch_ref}-{stage_name}-{timestamp}-{}", &digest[..8])
}

/// Prepares writes against the remote store, forking on conflict.
pub struct StoreAdapter {
    store: Arc<dyn VersionedStore>,
}

impl StoreAdapter {
    /// Creates a new adapter.
    #[must_use]
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store client.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn VersionedStore> {
        &self.store
    }

    /// Decides where `new_fields` should be written relative to
    /// `base_document` on `branch_ref`.
    ///
    /// No conflict: write in place on `branch_ref`. Conflict: read the
    /// current tip of `branch_ref`, create a fork branch rooted there, and
    /// return the fork; the caller writes `new_fields` to the returned
    /// branch and propagates the reference downstream.
    pub async fn prepare_write(
        &self,
        base_document: &Document,
        new_fields: &Document,
        branch_ref: &str,
        stage_name: &str,
    ) -> Result<WriteTarget, LabflowError> {
        let conflicts = conflicting_fields(base_document, new_fields);
        if conflicts.is_empty() {
            return Ok(WriteTarget {
                branch: branch_ref.to_string(),
                forked: false,
                base_revision: None,
                conflicts,
            });
        }

        warn!(
            branch = branch_ref,
            stage = stage_name,
            conflicts = ?conflicts,
            "write conflict detected; forking"
        );

        let tip = self.store.branch_tip(branch_ref).await?;
        let fork = fork_branch_name(branch_ref, stage_name, &compact_timestamp());
        let created = self.store.create_branch(&fork, &tip).await?;
        if !created {
            return Err(LabflowError::Internal(format!(
                "store refused to create fork branch '{fork}' from revision '{tip}'"
            )));
        }

        info!(branch = %fork, root = %tip, "forked branch for conflicting write");
        Ok(WriteTarget {
            branch: fork,
            forked: true,
            base_revision: Some(tip),
            conflicts,
        })
    }
}
