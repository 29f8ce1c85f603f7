//! The writeup stage: draft a manuscript from the best iteration.

use super::{fields, read_session};
use crate::pipeline::Step;
use crate::session::IterationId;
use crate::state::{PipelineState, StateDelta};
use crate::textgen::{ResponseShape, TextRequest, TextService};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

/// Drafts a manuscript from the selected best iteration.
///
/// A missing or undecodable response degrades the manuscript to null;
/// the session already holds everything needed to retry later.
pub struct WriteupStage {
    text: Arc<dyn TextService>,
}

impl Debug for WriteupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteupStage").finish()
    }
}

impl WriteupStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(text: Arc<dyn TextService>) -> Self {
        Self { text }
    }
}

#[async_trait]
impl Step for WriteupStage {
    fn name(&self) -> &str {
        "write_manuscript"
    }

    fn inputs(&self) -> Vec<String> {
        vec![
            fields::SESSION.to_string(),
            fields::BEST_ITERATION_ID.to_string(),
        ]
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::MANUSCRIPT.to_string()]
    }

    async fn execute(&self, inputs: &PipelineState) -> anyhow::Result<StateDelta> {
        let session = read_session(inputs)?;
        let best_id: Option<IterationId> = inputs.get_as(fields::BEST_ITERATION_ID);
        let best = best_id.and_then(|id| session.iteration(id));

        let prompt = match best {
            Some(iteration) => format!(
                "Write up the experiment for hypothesis '{}'.\nDesign: {}\nAnalysis: {}",
                session.hypothesis,
                iteration.design.as_deref().unwrap_or(""),
                iteration.analysis.as_deref().unwrap_or(""),
            ),
            None => format!(
                "Write up the experiment for hypothesis '{}'",
                session.hypothesis
            ),
        };
        let request = TextRequest::new(prompt, ResponseShape::Manuscript);

        let manuscript = match self.text.invoke(&request).await? {
            Some(response) => match response.as_manuscript() {
                Some(manuscript) => serde_json::to_value(manuscript)?,
                None => {
                    warn!("manuscript response did not decode; degrading to null");
                    serde_json::Value::Null
                }
            },
            None => {
                warn!("no manuscript produced; degrading to null");
                serde_json::Value::Null
            }
        };

        let mut delta = StateDelta::new();
        delta.insert(fields::MANUSCRIPT.to_string(), manuscript);
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ResearchSession;
    use crate::testing::fixtures::manuscript_response;
    use crate::testing::mocks::MockTextService;

    fn input_state() -> PipelineState {
        let mut session = ResearchSession::new("H1");
        let iteration = session.begin_iteration();
        iteration.design = Some("the design".to_string());
        iteration.analysis = Some("the analysis".to_string());
        session.best_iteration_id = Some(1);

        let mut state = PipelineState::new();
        state.insert(
            fields::SESSION,
            serde_json::to_value(session).expect("session"),
        );
        state.insert(fields::BEST_ITERATION_ID, serde_json::json!(1));
        state
    }

    #[tokio::test]
    async fn test_manuscript_is_driven_by_the_best_iteration() {
        let text = Arc::new(
            MockTextService::new().with_responses(vec![Some(manuscript_response())]),
        );
        let stage = WriteupStage::new(text.clone());

        let delta = stage.execute(&input_state()).await.expect("execute");

        assert!(delta[fields::MANUSCRIPT].is_object());
        // The prompt carries the best iteration's design and analysis.
        let prompt = &text.requests()[0].prompt;
        assert!(prompt.contains("the design"));
        assert!(prompt.contains("the analysis"));
    }

    #[tokio::test]
    async fn test_no_response_degrades_to_null() {
        let text = Arc::new(MockTextService::new());
        let stage = WriteupStage::new(text);

        let delta = stage.execute(&input_state()).await.expect("execute");
        assert!(delta[fields::MANUSCRIPT].is_null());
    }
}
