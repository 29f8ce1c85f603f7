//! The experiment stage: dispatch runs to the external job runner and
//! collect their outcomes.

use super::{fields, read_session, write_session, ResearchConfig};
use crate::jobs::{JobApi, JobCorrelator, RunPoller, RunState};
use crate::pipeline::Step;
use crate::session::JobOutcome;
use crate::state::{PipelineState, StateDelta};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{info, warn};

/// Dispatches the iteration's experiment runs and polls them to
/// completion.
///
/// Dispatches correlate one at a time — each dispatch snapshots the run
/// list before triggering, so the previous run's id is already known and
/// never misattributed. Status polling then fans out over the correlated
/// runs and fans back in before the stage returns; from the executor's
/// perspective the stage is still one atomic unit.
///
/// Soft failures degrade instead of aborting: a correlation budget
/// running out records an outcome with no run id, a poll budget running
/// out records the run as unfinished. Only a rejected dispatch is fatal.
pub struct ExperimentStage {
    jobs: Arc<dyn JobApi>,
    job_name: String,
    runs_per_iteration: usize,
    correlation: crate::jobs::CorrelationConfig,
    poll: crate::jobs::PollConfig,
}

impl Debug for ExperimentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentStage")
            .field("job_name", &self.job_name)
            .field("runs_per_iteration", &self.runs_per_iteration)
            .finish()
    }
}

impl ExperimentStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(jobs: Arc<dyn JobApi>, config: &ResearchConfig) -> Self {
        Self {
            jobs,
            job_name: config.job_name.clone(),
            runs_per_iteration: config.runs_per_iteration.max(1),
            correlation: config.correlation,
            poll: config.poll,
        }
    }
}

#[async_trait]
impl Step for ExperimentStage {
    fn name(&self) -> &str {
        "run_experiment"
    }

    fn inputs(&self) -> Vec<String> {
        vec![
            fields::CODE.to_string(),
            fields::SESSION.to_string(),
            fields::BRANCH_REF.to_string(),
        ]
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::SESSION.to_string(), fields::RUNS.to_string()]
    }

    async fn execute(&self, inputs: &PipelineState) -> anyhow::Result<StateDelta> {
        let mut session = read_session(inputs)?;
        let git_ref = inputs
            .get_str(fields::BRANCH_REF)
            .unwrap_or("main")
            .to_string();
        let code = inputs.get_str(fields::CODE).unwrap_or_default().to_string();

        let correlator = JobCorrelator::new(self.jobs.clone(), self.correlation);
        let iteration_id = session
            .latest_iteration()
            .map_or(0, |it| it.iteration_id);

        let mut dispatch_inputs: HashMap<String, serde_json::Value> = HashMap::new();
        dispatch_inputs.insert("code".to_string(), serde_json::json!(code));
        dispatch_inputs.insert("iteration".to_string(), serde_json::json!(iteration_id));

        // Correlate sequentially: each snapshot already contains the runs
        // of the previous dispatches on this ref.
        let mut correlated = Vec::new();
        let mut outcomes = Vec::new();
        for _ in 0..self.runs_per_iteration {
            match correlator
                .dispatch_and_correlate(&self.job_name, &git_ref, &dispatch_inputs)
                .await
            {
                Ok(run_id) => correlated.push(run_id),
                Err(err) if err.is_soft() => {
                    warn!(error = %err, "run unobservable; recording an absent outcome");
                    outcomes.push(JobOutcome::missing());
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Fan out the status polls, fan back in before returning.
        let poller = RunPoller::new(self.jobs.clone(), self.poll);
        let polls = join_all(
            correlated
                .iter()
                .map(|&run_id| poller.poll_to_completion(run_id)),
        )
        .await;

        for (run_id, result) in correlated.into_iter().zip(polls) {
            match result {
                Ok(completed) => {
                    info!(run_id, conclusion = ?completed.conclusion, "run finished");
                    outcomes.push(JobOutcome::completed(completed));
                }
                Err(err) if err.is_soft() => {
                    warn!(run_id, error = %err, "poll budget exhausted; recording run as unfinished");
                    outcomes.push(JobOutcome::unfinished(run_id, RunState::Running));
                }
                Err(err) => return Err(err.into()),
            }
        }

        if let Some(iteration) = session.latest_iteration_mut() {
            iteration.runs = outcomes.clone();
        }

        let mut delta = StateDelta::new();
        write_session(&mut delta, &session)?;
        delta.insert(fields::RUNS.to_string(), serde_json::to_value(&outcomes)?);
        Ok(delta)
    }
}
