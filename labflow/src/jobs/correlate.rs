//! Dispatch correlation by before/after snapshot diffing.
//!
//! The trigger endpoint does not echo the run id it created, so the
//! correlator snapshots the known run ids for (job, ref) immediately
//! before dispatching, then re-lists at a fixed interval: the first id not
//! in the snapshot is the run this dispatch produced.
//!
//! Known limitation: two near-simultaneous dispatches on the same ref can
//! be misattributed if both runs appear between two polls. The external
//! API offers no stronger primitive, so the window is accepted; snapshot
//! immediately before dispatch and poll promptly to keep it small.

use super::api::{JobApi, RunId};
use crate::errors::{DispatchRejectedError, LabflowError, RunNotFoundError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the correlation poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationConfig {
    /// Maximum number of run-list polls after dispatch.
    pub max_attempts: usize,
    /// Fixed interval between polls in milliseconds.
    pub interval_ms: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            interval_ms: 5000,
        }
    }
}

impl CorrelationConfig {
    /// Creates a new config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum poll attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_interval_ms(mut self, interval: u64) -> Self {
        self.interval_ms = interval;
        self
    }
}

/// Short-lived correlation context for one dispatch.
///
/// Holds the trigger coordinates and the pre-dispatch snapshot; discarded
/// once a run id is found or correlation fails.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    /// The dispatched job.
    pub job: String,
    /// The ref the dispatch targeted.
    pub git_ref: String,
    snapshot: HashSet<RunId>,
}

impl DispatchHandle {
    /// Creates a handle from the run ids known before dispatch.
    #[must_use]
    pub fn new(job: impl Into<String>, git_ref: impl Into<String>, known: &[RunId]) -> Self {
        Self {
            job: job.into(),
            git_ref: git_ref.into(),
            snapshot: known.iter().copied().collect(),
        }
    }

    /// Returns the first id in `runs` that is not in the snapshot.
    #[must_use]
    pub fn first_unseen(&self, runs: &[RunId]) -> Option<RunId> {
        runs.iter().copied().find(|id| !self.snapshot.contains(id))
    }
}

/// Dispatches jobs and discovers the resulting run id.
pub struct JobCorrelator {
    api: Arc<dyn JobApi>,
    config: CorrelationConfig,
}

impl JobCorrelator {
    /// Creates a new correlator.
    #[must_use]
    pub fn new(api: Arc<dyn JobApi>, config: CorrelationConfig) -> Self {
        Self { api, config }
    }

    /// Dispatches a job run and returns the correlated run id.
    ///
    /// # Errors
    ///
    /// * [`LabflowError::DispatchRejected`] when the trigger call itself
    ///   reports rejection.
    /// * [`LabflowError::RunNotFound`] when the dispatch was accepted but
    ///   no new run id appeared within the poll budget. Distinct from
    ///   rejection: the run may exist but be unobservable, and downstream
    ///   tolerates "no run yet".
    pub async fn dispatch_and_correlate(
        &self,
        job: &str,
        git_ref: &str,
        inputs: &HashMap<String, serde_json::Value>,
    ) -> Result<RunId, LabflowError> {
        // Snapshot BEFORE dispatch; anything that appears afterwards is a
        // correlation candidate.
        let known = self.api.list_runs(job, git_ref).await?;
        let handle = DispatchHandle::new(job, git_ref, &known);
        debug!(job, git_ref, known = known.len(), "snapshotted runs before dispatch");

        let accepted = self.api.dispatch(job, git_ref, inputs).await?;
        if !accepted {
            return Err(DispatchRejectedError::new(job, git_ref).into());
        }

        for attempt in 1..=self.config.max_attempts {
            let runs = self.api.list_runs(&handle.job, &handle.git_ref).await?;
            if let Some(run_id) = handle.first_unseen(&runs) {
                info!(job, git_ref, run_id, attempt, "correlated dispatched run");
                return Ok(run_id);
            }
            debug!(job, git_ref, attempt, "no new run yet");
            if attempt < self.config.max_attempts {
                tokio::time::sleep(Duration::from_millis(self.config.interval_ms)).await;
            }
        }

        Err(RunNotFoundError::new(job, git_ref, self.config.max_attempts).into())
    }
}
