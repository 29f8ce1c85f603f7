//! The iteration ledger: sessions, iterations, and best-iteration
//! selection.
//!
//! A [`ResearchSession`] tracks one hypothesis over its full lifetime.
//! Iterations accumulate monotonically — they are appended, filled in by
//! the stage that owns each field, and never deleted — so the ledger is a
//! faithful history even when individual stages degrade or fail softly.

use crate::jobs::{CompletedRun, RunConclusion, RunId, RunState};
use crate::utils::{generate_uuid, iso_timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordinal identifier of an iteration within its session, 1-based.
pub type IterationId = u64;

/// The outcome of one external job run, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// The correlated run id; absent when correlation ran out of budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Last observed lifecycle state; absent when no run was observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RunState>,
    /// Observed conclusion, when the run completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<RunConclusion>,
}

impl JobOutcome {
    /// A dispatch whose run was never observed.
    #[must_use]
    pub fn missing() -> Self {
        Self {
            run_id: None,
            state: None,
            conclusion: None,
        }
    }

    /// A correlated run that never reached a terminal state in budget.
    #[must_use]
    pub fn unfinished(run_id: RunId, state: RunState) -> Self {
        Self {
            run_id: Some(run_id),
            state: Some(state),
            conclusion: None,
        }
    }

    /// A run that completed with the given conclusion.
    #[must_use]
    pub fn completed(run: CompletedRun) -> Self {
        Self {
            run_id: Some(run.run_id),
            state: Some(RunState::Completed),
            conclusion: run.conclusion,
        }
    }

    /// Whether this outcome is an observed success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.conclusion == Some(RunConclusion::Success)
    }
}

/// One pass of a hypothesis through design → code → run → analyze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchIteration {
    /// Ordinal within the session, 1-based.
    pub iteration_id: IterationId,
    /// The experiment design, filled by the design stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<String>,
    /// The generated code, filled by the code stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Outcomes of the external runs, in dispatch order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<JobOutcome>,
    /// The analysis text, filled by the analyze stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    /// Named numeric metrics extracted by the analyze stage.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    /// Creation timestamp.
    pub created_at: String,
}

impl ResearchIteration {
    /// Creates a new empty iteration.
    #[must_use]
    pub fn new(iteration_id: IterationId) -> Self {
        Self {
            iteration_id,
            design: None,
            code: None,
            runs: Vec::new(),
            analysis: None,
            metrics: BTreeMap::new(),
            created_at: iso_timestamp(),
        }
    }

    /// Returns the named metric, when present.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// One hypothesis's full lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSession {
    /// Stable session identifier.
    pub session_id: String,
    /// The hypothesis under investigation.
    pub hypothesis: String,
    /// Iterations in creation order.
    #[serde(default)]
    pub iterations: Vec<ResearchIteration>,
    /// The iteration selected to drive downstream writing stages. Set
    /// only by best-iteration selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_iteration_id: Option<IterationId>,
    /// Creation timestamp.
    pub created_at: String,
}

impl ResearchSession {
    /// Creates a new session for a hypothesis.
    #[must_use]
    pub fn new(hypothesis: impl Into<String>) -> Self {
        Self {
            session_id: generate_uuid(),
            hypothesis: hypothesis.into(),
            iterations: Vec::new(),
            best_iteration_id: None,
            created_at: iso_timestamp(),
        }
    }

    /// Appends a fresh iteration and returns a mutable borrow of it.
    pub fn begin_iteration(&mut self) -> &mut ResearchIteration {
        let next_id = self.iterations.len() as IterationId + 1;
        self.iterations.push(ResearchIteration::new(next_id));
        let last = self.iterations.len() - 1;
        &mut self.iterations[last]
    }

    /// Returns the latest iteration.
    #[must_use]
    pub fn latest_iteration(&self) -> Option<&ResearchIteration> {
        self.iterations.last()
    }

    /// Returns the latest iteration mutably.
    pub fn latest_iteration_mut(&mut self) -> Option<&mut ResearchIteration> {
        self.iterations.last_mut()
    }

    /// Looks up an iteration by id.
    #[must_use]
    pub fn iteration(&self, id: IterationId) -> Option<&ResearchIteration> {
        self.iterations.iter().find(|it| it.iteration_id == id)
    }

    /// Returns the iteration selection would currently pick, without
    /// recording it.
    #[must_use]
    pub fn peek_best_iteration(&self, metric: &str) -> Option<IterationId> {
        let mut best: Option<(IterationId, f64)> = None;
        for iteration in &self.iterations {
            let Some(value) = iteration.metric(metric) else {
                continue;
            };
            let better = best.map_or(true, |(_, best_value)| value > best_value);
            if better {
                best = Some((iteration.iteration_id, value));
            }
        }
        best.map(|(id, _)| id)
            // No iteration carries the metric: default to the latest.
            .or_else(|| self.latest_iteration().map(|it| it.iteration_id))
    }
}

/// Selects the best iteration by a named metric and records it on the
/// session.
///
/// The iteration with the highest value of `metric` wins; iterations
/// without the metric are skipped. When no iteration carries the metric,
/// the latest iteration is selected. Returns `None` only for a session
/// with no iterations.
pub fn select_best_iteration(
    session: &mut ResearchSession,
    metric: &str,
) -> Option<IterationId> {
    let best = session.peek_best_iteration(metric);
    session.best_iteration_id = best;
    best
}
