//! Bounded polling of a known run to a terminal state.
//!
//! Works for runs discovered by correlation or any other way. Exhausting
//! the budget while the run is still pending/running surfaces as a
//! [`PollTimeoutError`] — never as a failing conclusion, which is a
//! different observation entirely.

use super::api::{CompletedRun, JobApi, RunId};
use crate::errors::{LabflowError, PollTimeoutError};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the status poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum number of status polls.
    pub max_attempts: usize,
    /// Fixed interval between polls in milliseconds.
    pub interval_ms: u64,
    /// Whether to apply full jitter to each interval, spreading polls from
    /// concurrent pipeline instances.
    pub jitter: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            interval_ms: 15_000,
            jitter: false,
        }
    }
}

impl PollConfig {
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

    /// Enables full jitter on the interval.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    fn delay(&self) -> Duration {
        let ms = if self.jitter && self.interval_ms > 0 {
            rand::thread_rng().gen_range(0..=self.interval_ms)
        } else {
            self.interval_ms
        };
        Duration::from_millis(ms)
    }
}

/// Polls runs to completion under a budget.
pub struct RunPoller {
    api: Arc<dyn JobApi>,
    config: PollConfig,
}

impl RunPoller {
    /// Creates a new poller.
    #[must_use]
    pub fn new(api: Arc<dyn JobApi>, config: PollConfig) -> Self {
        Self { api, config }
    }

    /// Polls a run until it reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`LabflowError::PollTimeout`] when the budget is exhausted
    /// while the run is still pending or running.
    pub async fn poll_to_completion(&self, run_id: RunId) -> Result<CompletedRun, LabflowError> {
        for attempt in 1..=self.config.max_attempts {
            let status = self.api.run_status(run_id).await?;
            if status.is_completed() {
                info!(run_id, attempt, conclusion = ?status.conclusion, "run completed");
                return Ok(CompletedRun {
                    run_id,
                    conclusion: status.conclusion,
                });
            }
            debug!(run_id, attempt, state = ?status.state, "run still in flight");
            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.delay()).await;
            }
        }

        Err(PollTimeoutError::new(run_id, self.config.max_attempts).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::api::{RunConclusion, RunState, RunStatus};
    use crate::testing::mocks::ScriptedJobApi;

    fn fast(max_attempts: usize) -> PollConfig {
        PollConfig::new()
            .with_max_attempts(max_attempts)
            .with_interval_ms(0)
    }

    fn status(state: RunState, conclusion: Option<RunConclusion>) -> RunStatus {
        RunStatus {
            run_id: 7,
            state,
            conclusion,
        }
    }

    #[tokio::test]
    async fn test_polls_until_completed() {
        let api = Arc::new(ScriptedJobApi::new().with_statuses(
            7,
            vec![
                status(RunState::Pending, None),
                status(RunState::Running, None),
                status(RunState::Completed, Some(RunConclusion::Success)),
            ],
        ));
        let poller = RunPoller::new(api.clone(), fast(10));

        let done = poller.poll_to_completion(7).await.expect("completed");

        assert_eq!(done.run_id, 7);
        assert_eq!(done.conclusion, Some(RunConclusion::Success));
        assert_eq!(api.status_calls(), 3);
    }

    #[tokio::test]
    async fn test_observed_failure_is_not_a_timeout() {
        let api = Arc::new(ScriptedJobApi::new().with_statuses(
            7,
            vec![status(RunState::Completed, Some(RunConclusion::Failure))],
        ));
        let poller = RunPoller::new(api, fast(3));

        let done = poller.poll_to_completion(7).await.expect("completed");

        // A failing conclusion is a successful poll, not an error.
        assert_eq!(done.conclusion, Some(RunConclusion::Failure));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_poll_timeout() {
        // The script's final status repeats, so the run never completes.
        let api = Arc::new(
            ScriptedJobApi::new().with_statuses(7, vec![status(RunState::Running, None)]),
        );
        let poller = RunPoller::new(api.clone(), fast(5));

        let err = poller.poll_to_completion(7).await.unwrap_err();

        match err {
            LabflowError::PollTimeout(e) => {
                assert_eq!(e.run_id, 7);
                assert_eq!(e.attempts, 5);
            }
            other => panic!("expected PollTimeout, got {other}"),
        }
        assert_eq!(api.status_calls(), 5);
    }

    #[tokio::test]
    async fn test_completed_with_absent_conclusion() {
        let api = Arc::new(
            ScriptedJobApi::new().with_statuses(7, vec![status(RunState::Completed, None)]),
        );
        let poller = RunPoller::new(api, fast(2));

        let done = poller.poll_to_completion(7).await.expect("completed");
        assert_eq!(done.conclusion, None);
    }
}
