//! External job API seam.
//!
//! The compute agent is a CI-style job runner addressed by (job, ref). Its
//! trigger endpoint is fire-and-forget: it acknowledges the dispatch but
//! does not echo the run id it created, which is why correlation exists at
//! all (see [`super::correlate`]).

use crate::errors::LabflowError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of one run of an external job.
pub type RunId = u64;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Queued, not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Reached a terminal state.
    Completed,
}

/// Terminal outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    /// The run succeeded.
    Success,
    /// The run failed.
    Failure,
    /// The run was cancelled.
    Cancelled,
}

/// A point-in-time status report for one run.
///
/// `conclusion` is meaningful only when `state` is
/// [`RunState::Completed`]; the API may report it as absent until then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    /// The run identifier.
    pub run_id: RunId,
    /// Lifecycle state.
    pub state: RunState,
    /// Terminal outcome, when completed.
    pub conclusion: Option<RunConclusion>,
}

impl RunStatus {
    /// Whether the run reached a terminal state.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// A run that reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedRun {
    /// The run identifier.
    pub run_id: RunId,
    /// The observed conclusion. Absent conclusions do happen on some job
    /// APIs even for completed runs; callers treat that as "unknown", not
    /// as failure.
    pub conclusion: Option<RunConclusion>,
}

/// Client interface to the external job API.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Lists the known run ids for a (job, ref) pair, newest included.
    async fn list_runs(&self, job: &str, git_ref: &str) -> Result<Vec<RunId>, LabflowError>;

    /// Triggers a run. Returns whether the trigger call was accepted —
    /// acceptance says nothing about which run id was assigned.
    async fn dispatch(
        &self,
        job: &str,
        git_ref: &str,
        inputs: &HashMap<String, serde_json::Value>,
    ) -> Result<bool, LabflowError>;

    /// Reports the current status of a run.
    async fn run_status(&self, run_id: RunId) -> Result<RunStatus, LabflowError>;
}
