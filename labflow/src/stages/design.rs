//! The design stage: turn a hypothesis into an experiment design.

use super::{fields, read_session, write_session, ResearchConfig};
use crate::errors::NoResponseError;
use crate::pipeline::feedback::{self, FeedbackPolicy, Verdict};
use crate::pipeline::Step;
use crate::session::ResearchSession;
use crate::state::{PipelineState, StateDelta};
use crate::textgen::{ResponseShape, TextRequest, TextResponse, TextService};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Generates an experiment design and opens a fresh iteration.
///
/// Runs a consistency loop (one attempt by default): produce a design,
/// check that it decodes to a usable plan, and retry with the validation
/// feedback if the budget allows. A missing session is created from the
/// hypothesis, so the stage also works on a cold start.
pub struct DesignStage {
    text: Arc<dyn TextService>,
    policy: FeedbackPolicy,
}

impl Debug for DesignStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesignStage")
            .field("policy", &self.policy)
            .finish()
    }
}

impl DesignStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(text: Arc<dyn TextService>, config: &ResearchConfig) -> Self {
        Self {
            text,
            policy: FeedbackPolicy::new(config.design_attempts),
        }
    }
}

#[async_trait]
impl Step for DesignStage {
    fn name(&self) -> &str {
        "generate_design"
    }

    fn inputs(&self) -> Vec<String> {
        vec![fields::HYPOTHESIS.to_string(), fields::SESSION.to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::SESSION.to_string(), fields::DESIGN.to_string()]
    }

    async fn execute(&self, inputs: &PipelineState) -> anyhow::Result<StateDelta> {
        let hypothesis = inputs
            .get_str(fields::HYPOTHESIS)
            .ok_or_else(|| anyhow::anyhow!("state has no '{}' field", fields::HYPOTHESIS))?
            .to_string();

        let mut session = read_session(inputs)
            .unwrap_or_else(|_| ResearchSession::new(hypothesis.clone()));

        let text = self.text.clone();
        let outcome = feedback::attempt(
            self.policy,
            |_prev: Option<&TextResponse>, prev_feedback| {
                let request = TextRequest::new(
                    design_prompt(&hypothesis, prev_feedback),
                    ResponseShape::Design,
                );
                let text = text.clone();
                async move {
                    text.invoke(&request)
                        .await?
                        .ok_or_else(|| crate::errors::LabflowError::from(NoResponseError::new("design")))
                }
            },
            |response: &TextResponse| {
                let verdict = match response.as_design() {
                    Some(design) if !design.plan.trim().is_empty() => Verdict::pass(),
                    Some(_) => Verdict::fail("the design has an empty plan"),
                    None => Verdict::fail("the response did not decode to a design"),
                };
                async move { verdict }
            },
        )
        .await
        .map_err(|err: crate::errors::LabflowError| anyhow::Error::from(err))?;

        if !outcome.succeeded {
            anyhow::bail!(
                "design did not validate after {} attempts: {}",
                outcome.attempts,
                outcome.last_feedback.unwrap_or_default()
            );
        }
        // The verdict only passes on a decodable design.
        let design = outcome
            .artifact
            .as_design()
            .ok_or_else(|| anyhow::anyhow!("validated design failed to decode"))?;
        debug!(title = %design.title, attempts = outcome.attempts, "design accepted");

        let iteration = session.begin_iteration();
        iteration.design = Some(design.plan.clone());

        let mut delta = StateDelta::new();
        write_session(&mut delta, &session)?;
        delta.insert(
            fields::DESIGN.to_string(),
            serde_json::Value::String(design.plan),
        );
        Ok(delta)
    }
}

fn design_prompt(hypothesis: &str, prev_feedback: Option<&str>) -> String {
    match prev_feedback {
        None => format!("Design an experiment to test the hypothesis: {hypothesis}"),
        Some(feedback) => format!(
            "Design an experiment to test the hypothesis: {hypothesis}\n\
             The previous design was rejected: {feedback}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::design_response;
    use crate::testing::mocks::MockTextService;

    fn input_state(with_session: bool) -> PipelineState {
        let mut state = PipelineState::new();
        state.insert(fields::HYPOTHESIS, serde_json::json!("H1"));
        if with_session {
            let session = ResearchSession::new("H1");
            state.insert(fields::SESSION, serde_json::to_value(session).expect("session"));
        }
        state
    }

    #[tokio::test]
    async fn test_design_opens_a_new_iteration() {
        let text = Arc::new(MockTextService::new().with_responses(vec![Some(design_response())]));
        let stage = DesignStage::new(text, &ResearchConfig::default());

        let delta = stage.execute(&input_state(true)).await.expect("execute");

        let session: ResearchSession =
            serde_json::from_value(delta[fields::SESSION].clone()).expect("session");
        assert_eq!(session.iterations.len(), 1);
        assert!(session.iterations[0].design.is_some());
        assert!(delta.contains_key(fields::DESIGN));
    }

    #[tokio::test]
    async fn test_cold_start_creates_session() {
        let text = Arc::new(MockTextService::new().with_responses(vec![Some(design_response())]));
        let stage = DesignStage::new(text, &ResearchConfig::default());

        let delta = stage.execute(&input_state(false)).await.expect("execute");

        let session: ResearchSession =
            serde_json::from_value(delta[fields::SESSION].clone()).expect("session");
        assert_eq!(session.hypothesis, "H1");
    }

    #[tokio::test]
    async fn test_no_response_is_fatal() {
        let text = Arc::new(MockTextService::new());
        let stage = DesignStage::new(text, &ResearchConfig::default());

        let err = stage.execute(&input_state(true)).await.unwrap_err();
        assert!(err.to_string().contains("no usable answer"));
    }

    #[tokio::test]
    async fn test_consistency_loop_retries_with_feedback() {
        let config = ResearchConfig {
            design_attempts: 2,
            ..ResearchConfig::default()
        };
        let text = Arc::new(MockTextService::new().with_responses(vec![
            Some(crate::textgen::TextResponse::new(serde_json::json!("not a design"))),
            Some(design_response()),
        ]));
        let stage = DesignStage::new(text.clone(), &config);

        stage.execute(&input_state(true)).await.expect("execute");

        assert_eq!(text.call_count(), 2);
        // The retry prompt carries the rejection feedback.
        assert!(text.requests()[1].prompt.contains("rejected"));
    }
}
