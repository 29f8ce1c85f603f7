//! Bounded produce/validate feedback loops.
//!
//! Wraps a (produce, validate) step pair: attempt `i` produces an artifact
//! from the previous artifact and the previous validation feedback, then
//! validates it. The loop stops on the first passing validation, or after
//! `max_attempts` with the LAST artifact and `succeeded = false` — callers
//! must check the flag before trusting the artifact.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::debug;

/// Configuration for a feedback loop.
///
/// `max_attempts` is a call-site decision, not engine behavior: code-fix
/// loops typically run with 8, consistency checks with 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackPolicy {
    /// Maximum produce/validate attempts. Always at least 1.
    pub max_attempts: usize,
}

impl Default for FeedbackPolicy {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

impl FeedbackPolicy {
    /// Creates a policy. A zero `max_attempts` is raised to 1.
    #[must_use]
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

/// The result of validating one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the artifact passed validation.
    pub passed: bool,
    /// Feedback handed to the next produce call on failure.
    pub feedback: Option<String>,
}

impl Verdict {
    /// A passing verdict.
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            feedback: None,
        }
    }

    /// A failing verdict with feedback for the next attempt.
    #[must_use]
    pub fn fail(feedback: impl Into<String>) -> Self {
        Self {
            passed: false,
            feedback: Some(feedback.into()),
        }
    }
}

/// The outcome of a feedback loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome<A> {
    /// The last produced artifact — not necessarily valid when
    /// `succeeded` is false.
    pub artifact: A,
    /// Whether some attempt passed validation.
    pub succeeded: bool,
    /// How many produce/validate pairs ran.
    pub attempts: usize,
    /// The feedback from the final failing validation, if any.
    pub last_feedback: Option<String>,
}

/// Runs a bounded produce/validate loop.
///
/// Attempt `i` calls `produce(prev_artifact, prev_feedback)` and then
/// `validate(artifact)`. Both are called at most `policy.max_attempts`
/// times. A produce failure aborts the loop with its error; validation is
/// infallible and expresses rejection through the verdict.
pub async fn attempt<A, E, P, PFut, V, VFut>(
    policy: FeedbackPolicy,
    mut produce: P,
    mut validate: V,
) -> Result<LoopOutcome<A>, E>
where
    P: FnMut(Option<&A>, Option<&str>) -> PFut,
    PFut: Future<Output = Result<A, E>>,
    V: FnMut(&A) -> VFut,
    VFut: Future<Output = Verdict>,
{
    let mut prev: Option<A> = None;
    let mut feedback: Option<String> = None;
    let mut attempts = 0usize;

    loop {
        attempts += 1;
        let artifact = produce(prev.as_ref(), feedback.as_deref()).await?;
        let verdict = validate(&artifact).await;

        if verdict.passed {
            debug!(attempts, "feedback loop passed");
            return Ok(LoopOutcome {
                artifact,
                succeeded: true,
                attempts,
                last_feedback: None,
            });
        }

        feedback = verdict.feedback;
        debug!(
            attempts,
            max_attempts = policy.max_attempts,
            feedback = feedback.as_deref().unwrap_or(""),
            "feedback loop attempt rejected"
        );

        if attempts >= policy.max_attempts {
            return Ok(LoopOutcome {
                artifact,
                succeeded: false,
                attempts,
                last_feedback: feedback,
            });
        }

        prev = Some(artifact);
    }
}
