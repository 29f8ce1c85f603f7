//! The front door: run research pipelines and look up their sessions.

use crate::errors::LabflowError;
use crate::pipeline::Executor;
use crate::session::{select_best_iteration, IterationId, ResearchSession};
use crate::stages::{fields, research_pipeline, ResearchConfig, ResearchDeps};
use crate::state::PipelineState;
use crate::store::{Document, SessionStore};
use dashmap::DashMap;
use tracing::info;

/// Runs research pipelines over explicit collaborators and keeps an
/// in-memory index of the sessions they produced.
///
/// One runner may drive many concurrent pipeline instances; each instance
/// is strictly sequential internally, and the remote store is the only
/// shared mutable resource between them.
pub struct ResearchRunner {
    deps: ResearchDeps,
    config: ResearchConfig,
    executor: Executor,
    sessions: DashMap<String, ResearchSession>,
}

impl ResearchRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(deps: ResearchDeps, config: ResearchConfig) -> Self {
        Self {
            deps,
            config,
            executor: Executor::new(),
            sessions: DashMap::new(),
        }
    }

    /// Runs the canonical research pipeline for a hypothesis on a branch.
    ///
    /// Prior state on the branch is loaded and reconciled latest-wins
    /// before the run, so a hypothesis can be resumed where it left off.
    /// Returns the final pipeline state; the session it carries is also
    /// indexed for [`Self::get_session`].
    pub async fn run_hypothesis(
        &self,
        hypothesis: &str,
        branch_ref: &str,
    ) -> Result<PipelineState, LabflowError> {
        let sessions = SessionStore::new(self.deps.store.clone());

        let mut overlay = Document::new();
        overlay.insert(
            "hypothesis".to_string(),
            serde_json::Value::String(hypothesis.to_string()),
        );
        let merged = sessions.load_merged(branch_ref, &overlay).await?;
        let session = if merged.contains_key("session_id") {
            serde_json::from_value(serde_json::Value::Object(merged))?
        } else {
            ResearchSession::new(hypothesis)
        };
        info!(
            session_id = %session.session_id,
            branch = branch_ref,
            resumed = !session.iterations.is_empty(),
            "starting research pipeline"
        );

        let mut state = PipelineState::new();
        state.insert(fields::HYPOTHESIS, serde_json::json!(hypothesis));
        state.insert(fields::SESSION, serde_json::to_value(&session)?);
        state.insert(fields::BRANCH_REF, serde_json::json!(branch_ref));
        state.insert(fields::REVISION_COUNT, serde_json::json!(0));

        let definition = research_pipeline(&self.deps, &self.config)?;
        let final_state = self.executor.run(&definition, state).await?;

        if let Some(final_session) = final_state.get_as::<ResearchSession>(fields::SESSION) {
            self.sessions
                .insert(final_session.session_id.clone(), final_session);
        }
        Ok(final_state)
    }

    /// Returns a session by id.
    #[must_use]
    pub fn get_session(&self, session_id: &str) -> Option<ResearchSession> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Re-runs best-iteration selection on an indexed session.
    pub fn select_best(&self, session_id: &str, metric: &str) -> Option<IterationId> {
        let mut entry = self.sessions.get_mut(session_id)?;
        select_best_iteration(entry.value_mut(), metric)
    }

    /// Returns the ids of all indexed sessions.
    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}
