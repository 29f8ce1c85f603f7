//! The code stage: turn a design into runnable experiment code.

use super::{fields, read_session, write_session, ResearchConfig};
use crate::errors::NoResponseError;
use crate::pipeline::feedback::{self, FeedbackPolicy, Verdict};
use crate::pipeline::Step;
use crate::state::{PipelineState, StateDelta};
use crate::textgen::{ResponseShape, TextRequest, TextResponse, TextService};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

/// Generates experiment code inside a code-fix feedback loop.
///
/// Each attempt feeds the previous patch and the validation feedback back
/// into the service. On exhaustion the stage proceeds with the last patch
/// that yielded any source at all — an imperfect patch still produces an
/// observable run, which the analyze stage can react to.
///
/// When the current iteration already carries an analysis, the stage is
/// being re-entered through the revision loop: it opens a new iteration
/// and carries the design over.
pub struct CodeStage {
    text: Arc<dyn TextService>,
    policy: FeedbackPolicy,
}

impl Debug for CodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeStage")
            .field("policy", &self.policy)
            .finish()
    }
}

impl CodeStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(text: Arc<dyn TextService>, config: &ResearchConfig) -> Self {
        Self {
            text,
            policy: FeedbackPolicy::new(config.code_fix_attempts),
        }
    }
}

#[async_trait]
impl Step for CodeStage {
    fn name(&self) -> &str {
        "generate_code"
    }

    fn inputs(&self) -> Vec<String> {
        vec![fields::DESIGN.to_string(), fields::SESSION.to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::SESSION.to_string(), fields::CODE.to_string()]
    }

    async fn execute(&self, inputs: &PipelineState) -> anyhow::Result<StateDelta> {
        let design = inputs
            .get_str(fields::DESIGN)
            .ok_or_else(|| anyhow::anyhow!("state has no '{}' field", fields::DESIGN))?
            .to_string();
        let mut session = read_session(inputs)?;

        let text = self.text.clone();
        let outcome = feedback::attempt(
            self.policy,
            |prev: Option<&TextResponse>, prev_feedback| {
                let request = TextRequest::new(
                    code_prompt(&design, prev.and_then(TextResponse::as_code_patch), prev_feedback),
                    ResponseShape::CodePatch,
                );
                let text = text.clone();
                async move {
                    text.invoke(&request)
                        .await?
                        .ok_or_else(|| {
                            crate::errors::LabflowError::from(NoResponseError::new("code patch"))
                        })
                }
            },
            |response: &TextResponse| {
                let verdict = match response.as_code_patch() {
                    Some(patch) if !patch.source.trim().is_empty() => Verdict::pass(),
                    Some(_) => Verdict::fail("the patch is empty"),
                    None => Verdict::fail("the response carried no usable code block"),
                };
                async move { verdict }
            },
        )
        .await
        .map_err(|err: crate::errors::LabflowError| anyhow::Error::from(err))?;

        let patch = outcome.artifact.as_code_patch();
        if !outcome.succeeded {
            warn!(
                attempts = outcome.attempts,
                feedback = outcome.last_feedback.as_deref().unwrap_or(""),
                "code-fix loop exhausted; proceeding with the last patch"
            );
        }
        let source = patch
            .map(|p| p.source)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no usable code after {} attempts: {}",
                    outcome.attempts,
                    outcome.last_feedback.unwrap_or_default()
                )
            })?;
        debug!(attempts = outcome.attempts, succeeded = outcome.succeeded, "code generated");

        // Re-entry through the revision loop starts a fresh iteration.
        let needs_new_iteration = session
            .latest_iteration()
            .map_or(true, |it| it.analysis.is_some());
        if needs_new_iteration {
            let carried = design.clone();
            let iteration = session.begin_iteration();
            iteration.design = Some(carried);
        }
        if let Some(iteration) = session.latest_iteration_mut() {
            iteration.code = Some(source.clone());
        }

        let mut delta = StateDelta::new();
        write_session(&mut delta, &session)?;
        delta.insert(fields::CODE.to_string(), serde_json::Value::String(source));
        Ok(delta)
    }
}

fn code_prompt(
    design: &str,
    prev_patch: Option<crate::textgen::CodePatch>,
    prev_feedback: Option<&str>,
) -> String {
    match (prev_patch, prev_feedback) {
        (Some(patch), Some(feedback)) => format!(
            "Write code for this experiment design:\n{design}\n\
             The previous attempt was rejected: {feedback}\n\
             Previous code:\n{}",
            patch.source
        ),
        (_, Some(feedback)) => format!(
            "Write code for this experiment design:\n{design}\n\
             The previous attempt was rejected: {feedback}"
        ),
        _ => format!("Write code for this experiment design:\n{design}"),
    }
}
