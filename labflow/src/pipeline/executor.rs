//! Sequential pipeline execution.
//!
//! One pipeline runs strictly sequentially: no two steps of the same run
//! execute concurrently. Determinism is preferred over throughput here;
//! cross-iteration parallelism comes from running independent pipeline
//! instances, not from interleaving steps within one.

use super::definition::{EdgeTarget, PipelineDefinition};
use crate::errors::{
    GraphExhaustedError, LabflowError, NoMatchingEdgeError, StepError,
};
use crate::state::PipelineState;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Executes pipeline definitions over a shared state.
#[derive(Debug, Clone, Default)]
pub struct Executor;

impl Executor {
    /// Creates a new executor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Runs a definition to the terminal marker using its own transition
    /// budget.
    ///
    /// # Errors
    ///
    /// * [`LabflowError::Step`] when a step handler fails; execution stops
    ///   immediately with no automatic rollback, so callers decide whether
    ///   to persist partial progress.
    /// * [`LabflowError::GraphExhausted`] when the budget runs out before
    ///   the terminal marker.
    /// * [`LabflowError::NoMatchingEdge`] when no edge of a completed step
    ///   matches the merged state.
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        initial_state: PipelineState,
    ) -> Result<PipelineState, LabflowError> {
        self.run_with_limit(definition, initial_state, definition.recursion_limit())
            .await
    }

    /// Runs a definition with an explicit transition budget.
    pub async fn run_with_limit(
        &self,
        definition: &PipelineDefinition,
        initial_state: PipelineState,
        recursion_limit: usize,
    ) -> Result<PipelineState, LabflowError> {
        let started = Instant::now();
        let mut state = initial_state;
        let mut current = definition.start().to_string();
        let mut transitions = 0usize;

        info!(
            pipeline = definition.name(),
            start = %current,
            recursion_limit,
            "pipeline started"
        );

        loop {
            if transitions >= recursion_limit {
                warn!(
                    pipeline = definition.name(),
                    step = %current,
                    transitions,
                    "transition budget exhausted"
                );
                return Err(GraphExhaustedError::new(recursion_limit, current).into());
            }

            // Build-time validation guarantees every reachable name resolves.
            let step = definition
                .step(&current)
                .ok_or_else(|| LabflowError::Internal(format!("unknown step '{current}'")))?;

            let projection = state.project(&step.inputs());
            debug!(
                pipeline = definition.name(),
                step = %current,
                inputs = ?projection.field_names(),
                "step started"
            );
            let step_started = Instant::now();

            let delta = step
                .execute(&projection)
                .await
                .map_err(|cause| StepError::new(&current, cause))?;

            state.merge_outputs(&current, &step.outputs(), delta)?;
            transitions += 1;

            debug!(
                pipeline = definition.name(),
                step = %current,
                duration_ms = step_started.elapsed().as_millis() as u64,
                "step completed"
            );

            let next = definition
                .edges(&current)
                .iter()
                .find(|edge| edge.matches(&state))
                .map(|edge| edge.target.clone())
                .ok_or_else(|| NoMatchingEdgeError::new(&current))?;

            match next {
                EdgeTarget::End => {
                    info!(
                        pipeline = definition.name(),
                        transitions,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "pipeline completed"
                    );
                    return Ok(state);
                }
                EdgeTarget::Step(name) => {
                    current = name;
                }
            }
        }
    }
}
