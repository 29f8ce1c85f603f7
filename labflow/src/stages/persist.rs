//! The persist stage: checkpoint the session onto the remote store.

use super::{fields, read_session};
use crate::pipeline::Step;
use crate::state::{PipelineState, StateDelta};
use crate::store::{SessionStore, VersionedStore};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

/// Writes the session document at a checkpoint, forking on conflict.
///
/// When the write lands on a fork, the stage propagates the new branch
/// reference through the state — downstream steps and later checkpoints
/// must follow it, or their view of the session silently diverges from
/// what was written.
pub struct PersistStage {
    sessions: SessionStore,
}

impl Debug for PersistStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistStage").finish()
    }
}

impl PersistStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Self {
            sessions: SessionStore::new(store),
        }
    }
}

#[async_trait]
impl Step for PersistStage {
    fn name(&self) -> &str {
        "persist_session"
    }

    fn inputs(&self) -> Vec<String> {
        vec![fields::SESSION.to_string(), fields::BRANCH_REF.to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::BRANCH_REF.to_string()]
    }

    async fn execute(&self, inputs: &PipelineState) -> anyhow::Result<StateDelta> {
        let session = read_session(inputs)?;
        let branch = inputs.get_str(fields::BRANCH_REF).unwrap_or("main");

        let outcome = self
            .sessions
            .checkpoint(&session, branch, self.name())
            .await?;
        if outcome.forked {
            warn!(
                from = branch,
                to = %outcome.branch,
                conflicts = ?outcome.conflicts,
                "checkpoint forked; propagating the new branch reference"
            );
        }

        let mut delta = StateDelta::new();
        delta.insert(
            fields::BRANCH_REF.to_string(),
            serde_json::Value::String(outcome.branch),
        );
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ResearchSession;
    use crate::store::SESSION_DOCUMENT_PATH;
    use crate::testing::mocks::InMemoryStore;

    fn input_state(session: &ResearchSession) -> PipelineState {
        let mut state = PipelineState::new();
        state.insert(
            fields::SESSION,
            serde_json::to_value(session).expect("session"),
        );
        state.insert(fields::BRANCH_REF, serde_json::json!("main"));
        state
    }

    #[tokio::test]
    async fn test_clean_checkpoint_stays_on_branch() {
        let store = Arc::new(InMemoryStore::new());
        let stage = PersistStage::new(store.clone());

        let mut session = ResearchSession::new("H1");
        session.begin_iteration();

        let delta = stage.execute(&input_state(&session)).await.expect("execute");

        assert_eq!(delta[fields::BRANCH_REF], serde_json::json!("main"));
        let stored = store
            .read_document("main", SESSION_DOCUMENT_PATH)
            .await
            .expect("read");
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_conflicting_checkpoint_propagates_fork() {
        let store = Arc::new(InMemoryStore::new());
        let stage = PersistStage::new(store.clone());

        let mut session = ResearchSession::new("H1");
        session.begin_iteration();
        stage.execute(&input_state(&session)).await.expect("first");

        // A concurrent writer rewrites the document on main.
        let mut other = session.clone();
        other.hypothesis = "overwritten".to_string();
        let bytes = serde_json::to_vec_pretty(&other).expect("serialize");
        store
            .write_document("main", SESSION_DOCUMENT_PATH, &bytes, "concurrent")
            .await
            .expect("raw write");

        session.hypothesis = "H1 v2".to_string();
        let delta = stage.execute(&input_state(&session)).await.expect("second");

        let branch = delta[fields::BRANCH_REF].as_str().expect("branch");
        assert_ne!(branch, "main");
        let stored = store
            .read_document(branch, SESSION_DOCUMENT_PATH)
            .await
            .expect("read");
        assert!(stored.is_some());
    }
}
