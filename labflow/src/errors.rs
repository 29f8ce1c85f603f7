//! Error types for the labflow control layer.
//!
//! The taxonomy separates fatal failures (malformed pipeline definitions,
//! step exceptions) from soft failures (correlation and polling budgets
//! running out), since callers treat the two very differently: fatal errors
//! abort the pipeline invocation, soft failures degrade a stage's output
//! and let the session continue.

use thiserror::Error;

/// The main error type for labflow operations.
#[derive(Debug, Error)]
pub enum LabflowError {
    /// A step handler failed.
    #[error("{0}")]
    Step(#[from] StepError),

    /// The executor ran out of transitions before reaching the terminal marker.
    #[error("{0}")]
    GraphExhausted(#[from] GraphExhaustedError),

    /// No conditional edge matched the current state.
    #[error("{0}")]
    NoMatchingEdge(#[from] NoMatchingEdgeError),

    /// A step attempted to write a field it never declared.
    #[error("{0}")]
    UndeclaredWrite(#[from] UndeclaredWriteError),

    /// A pipeline definition failed validation at build time.
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    /// The external job trigger refused the dispatch.
    #[error("{0}")]
    DispatchRejected(#[from] DispatchRejectedError),

    /// Dispatch likely succeeded but no new run appeared within budget.
    #[error("{0}")]
    RunNotFound(#[from] RunNotFoundError),

    /// A correlated run never reached a terminal state within budget.
    #[error("{0}")]
    PollTimeout(#[from] PollTimeoutError),

    /// The generative-text service returned no usable answer.
    #[error("{0}")]
    NoResponse(#[from] NoResponseError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for LabflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl LabflowError {
    /// Whether this error is a soft failure.
    ///
    /// Soft failures degrade a stage's output to empty/null; the session
    /// continues to the next best-effort action. Everything else aborts the
    /// current pipeline invocation.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::RunNotFound(_) | Self::PollTimeout(_))
    }
}

/// Error raised when a pipeline definition fails validation.
#[derive(Debug, Clone, Error)]
#[error("Invalid pipeline definition: {message}")]
pub struct DefinitionError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
}

impl DefinitionError {
    /// Creates a new definition error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
        }
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }
}

/// Error raised when a step handler fails.
///
/// The failing step's name and the original cause are preserved intact;
/// the executor stops immediately with no automatic rollback. Retry, if
/// wanted, is an explicit feedback-loop wrap at the call site, never
/// implicit.
#[derive(Debug, Error)]
#[error("Step '{step}' failed: {source}")]
pub struct StepError {
    /// The name of the failing step.
    pub step: String,
    /// The original cause.
    #[source]
    pub source: anyhow::Error,
}

impl StepError {
    /// Creates a new step error.
    #[must_use]
    pub fn new(step: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            step: step.into(),
            source,
        }
    }
}

/// Error raised when the recursion limit is reached before the terminal
/// marker. Indicates a programming error in the pipeline definition.
#[derive(Debug, Clone, Error)]
#[error("Pipeline exhausted its transition limit of {limit} before reaching the terminal marker (last step: '{last_step}')")]
pub struct GraphExhaustedError {
    /// The transition limit that was hit.
    pub limit: usize,
    /// The step that was current when the limit was hit.
    pub last_step: String,
}

impl GraphExhaustedError {
    /// Creates a new graph exhausted error.
    #[must_use]
    pub fn new(limit: usize, last_step: impl Into<String>) -> Self {
        Self {
            limit,
            last_step: last_step.into(),
        }
    }
}

/// Error raised when no outgoing edge of a step matches the current state.
/// Indicates a programming error in the pipeline definition.
#[derive(Debug, Clone, Error)]
#[error("No outgoing edge of step '{step}' matched the current state")]
pub struct NoMatchingEdgeError {
    /// The step whose edges were evaluated.
    pub step: String,
}

impl NoMatchingEdgeError {
    /// Creates a new no-matching-edge error.
    #[must_use]
    pub fn new(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }
}

/// Error raised when a step writes a field outside its declared outputs.
#[derive(Debug, Clone, Error)]
#[error("Step '{step}' wrote undeclared field '{field}'")]
pub struct UndeclaredWriteError {
    /// The offending step.
    pub step: String,
    /// The field that was not declared as an output.
    pub field: String,
}

impl UndeclaredWriteError {
    /// Creates a new undeclared write error.
    #[must_use]
    pub fn new(step: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            field: field.into(),
        }
    }
}

/// Error raised when the job trigger call itself reports rejection.
///
/// Fatal for that attempt; the caller may retry the whole correlation call
/// as a policy decision at the call site.
#[derive(Debug, Clone, Error)]
#[error("Dispatch of job '{job}' on ref '{git_ref}' was rejected by the job API")]
pub struct DispatchRejectedError {
    /// The job that was dispatched.
    pub job: String,
    /// The ref the dispatch targeted.
    pub git_ref: String,
}

impl DispatchRejectedError {
    /// Creates a new dispatch rejected error.
    #[must_use]
    pub fn new(job: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            git_ref: git_ref.into(),
        }
    }
}

/// Error raised when the correlation budget is exhausted without observing
/// a new run id.
///
/// The dispatch itself was accepted, so the run may exist but be
/// unobservable. Distinct from [`DispatchRejectedError`]: downstream
/// tolerates "no run yet", so callers log and proceed with an absent run id.
#[derive(Debug, Clone, Error)]
#[error("No new run of job '{job}' on ref '{git_ref}' appeared after {attempts} polls")]
pub struct RunNotFoundError {
    /// The job that was dispatched.
    pub job: String,
    /// The ref the dispatch targeted.
    pub git_ref: String,
    /// The number of list polls performed.
    pub attempts: usize,
}

impl RunNotFoundError {
    /// Creates a new run-not-found error.
    #[must_use]
    pub fn new(job: impl Into<String>, git_ref: impl Into<String>, attempts: usize) -> Self {
        Self {
            job: job.into(),
            git_ref: git_ref.into(),
            attempts,
        }
    }
}

/// Error raised when a correlated run never reached a terminal state
/// within the polling budget.
///
/// Explicitly NOT equated with an observed failing conclusion: the run may
/// still be in flight when the budget runs out.
#[derive(Debug, Clone, Error)]
#[error("Run {run_id} did not complete after {attempts} status polls")]
pub struct PollTimeoutError {
    /// The run being polled.
    pub run_id: u64,
    /// The number of status polls performed.
    pub attempts: usize,
}

impl PollTimeoutError {
    /// Creates a new poll timeout error.
    #[must_use]
    pub fn new(run_id: u64, attempts: usize) -> Self {
        Self { run_id, attempts }
    }
}

/// Error raised when the generative-text service returns no usable answer.
#[derive(Debug, Clone, Error)]
#[error("Text service returned no usable answer for '{request}'")]
pub struct NoResponseError {
    /// A short description of the request that got no answer.
    pub request: String,
}

impl NoResponseError {
    /// Creates a new no-response error.
    #[must_use]
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
        }
    }
}
