//! The analyze stage: interpret run outcomes and extract metrics.

use super::{fields, read_session, write_session, ResearchConfig};
use crate::pipeline::Step;
use crate::session::JobOutcome;
use crate::state::{PipelineState, StateDelta};
use crate::textgen::{AnalysisReport, ResponseShape, TextRequest, TextService};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

/// Analyzes the current iteration's runs.
///
/// The expected response shape is keyed on the number of runs being
/// analyzed. A missing or undecodable response degrades the stage: the
/// analysis comes back empty, no metrics are recorded, and no revision is
/// requested — the session continues to its next best-effort action.
pub struct AnalyzeStage {
    text: Arc<dyn TextService>,
    metric: String,
}

impl Debug for AnalyzeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzeStage")
            .field("metric", &self.metric)
            .finish()
    }
}

impl AnalyzeStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(text: Arc<dyn TextService>, config: &ResearchConfig) -> Self {
        Self {
            text,
            metric: config.metric.clone(),
        }
    }
}

#[async_trait]
impl Step for AnalyzeStage {
    fn name(&self) -> &str {
        "analyze_results"
    }

    fn inputs(&self) -> Vec<String> {
        vec![
            fields::SESSION.to_string(),
            fields::RUNS.to_string(),
            fields::REVISION_COUNT.to_string(),
        ]
    }

    fn outputs(&self) -> Vec<String> {
        vec![
            fields::SESSION.to_string(),
            fields::ANALYSIS.to_string(),
            fields::NEEDS_REVISION.to_string(),
            fields::REVISION_COUNT.to_string(),
        ]
    }

    async fn execute(&self, inputs: &PipelineState) -> anyhow::Result<StateDelta> {
        let mut session = read_session(inputs)?;
        let runs: Vec<JobOutcome> = inputs.get_as(fields::RUNS).unwrap_or_default();
        let revision_count = inputs.get_u64(fields::REVISION_COUNT).unwrap_or(0) + 1;

        let request = TextRequest::new(
            analysis_prompt(&runs, &self.metric),
            ResponseShape::analysis_for_runs(runs.len()),
        );
        let report = match self.text.invoke(&request).await? {
            Some(response) => match response.as_analysis() {
                Some(report) => Some(report),
                None => {
                    warn!("analysis response did not decode; degrading to an empty analysis");
                    None
                }
            },
            None => {
                warn!("no analysis produced; degrading to an empty analysis");
                None
            }
        };
        let report = report.unwrap_or_else(|| AnalysisReport {
            summary: String::new(),
            metrics: Default::default(),
            needs_revision: false,
        });
        debug!(
            needs_revision = report.needs_revision,
            metrics = report.metrics.len(),
            "analysis recorded"
        );

        if let Some(iteration) = session.latest_iteration_mut() {
            iteration.analysis = Some(report.summary.clone());
            iteration.metrics.extend(report.metrics.clone());
        }

        let mut delta = StateDelta::new();
        write_session(&mut delta, &session)?;
        delta.insert(
            fields::ANALYSIS.to_string(),
            serde_json::Value::String(report.summary),
        );
        delta.insert(
            fields::NEEDS_REVISION.to_string(),
            serde_json::Value::Bool(report.needs_revision),
        );
        delta.insert(
            fields::REVISION_COUNT.to_string(),
            serde_json::json!(revision_count),
        );
        Ok(delta)
    }
}

fn analysis_prompt(runs: &[JobOutcome], metric: &str) -> String {
    let successes = runs.iter().filter(|r| r.is_success()).count();
    format!(
        "Analyze {} experiment runs ({} succeeded); report the '{}' metric",
        runs.len(),
        successes,
        metric
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{CompletedRun, RunConclusion};
    use crate::session::ResearchSession;
    use crate::testing::fixtures::analysis_response;
    use crate::testing::mocks::MockTextService;

    fn input_state() -> PipelineState {
        let mut session = ResearchSession::new("H1");
        let iteration = session.begin_iteration();
        iteration.runs = vec![JobOutcome::completed(CompletedRun {
            run_id: 3,
            conclusion: Some(RunConclusion::Success),
        })];

        let mut state = PipelineState::new();
        state.insert(
            fields::SESSION,
            serde_json::to_value(&session).expect("session"),
        );
        state.insert(
            fields::RUNS,
            serde_json::to_value(&session.iterations[0].runs).expect("runs"),
        );
        state
    }

    #[tokio::test]
    async fn test_metrics_land_on_the_iteration() {
        let text = Arc::new(MockTextService::new().with_responses(vec![Some(
            analysis_response("looks strong", &[("score", 0.9)], false),
        )]));
        let stage = AnalyzeStage::new(text.clone(), &ResearchConfig::default());

        let delta = stage.execute(&input_state()).await.expect("execute");

        let session: ResearchSession =
            serde_json::from_value(delta[fields::SESSION].clone()).expect("session");
        assert_eq!(session.iterations[0].metric("score"), Some(0.9));
        assert_eq!(
            session.iterations[0].analysis.as_deref(),
            Some("looks strong")
        );
        assert_eq!(delta[fields::NEEDS_REVISION], serde_json::json!(false));
        assert_eq!(delta[fields::REVISION_COUNT], serde_json::json!(1));

        // The expected shape is keyed on the run count.
        assert_eq!(
            text.requests()[0].shape,
            ResponseShape::analysis_for_runs(1)
        );
    }

    #[tokio::test]
    async fn test_revision_request_propagates() {
        let text = Arc::new(MockTextService::new().with_responses(vec![Some(
            analysis_response("flaky results", &[], true),
        )]));
        let stage = AnalyzeStage::new(text, &ResearchConfig::default());

        let delta = stage.execute(&input_state()).await.expect("execute");
        assert_eq!(delta[fields::NEEDS_REVISION], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_no_response_degrades_to_empty_analysis() {
        let text = Arc::new(MockTextService::new());
        let stage = AnalyzeStage::new(text, &ResearchConfig::default());

        let delta = stage.execute(&input_state()).await.expect("execute");

        assert_eq!(delta[fields::ANALYSIS], serde_json::json!(""));
        assert_eq!(delta[fields::NEEDS_REVISION], serde_json::json!(false));

        let session: ResearchSession =
            serde_json::from_value(delta[fields::SESSION].clone()).expect("session");
        assert!(session.iterations[0].metrics.is_empty());
    }

    #[tokio::test]
    async fn test_revision_count_increments_across_passes() {
        let text = Arc::new(MockTextService::new());
        let stage = AnalyzeStage::new(text, &ResearchConfig::default());

        let mut state = input_state();
        state.insert(fields::REVISION_COUNT, serde_json::json!(2));

        let delta = stage.execute(&state).await.expect("execute");
        assert_eq!(delta[fields::REVISION_COUNT], serde_json::json!(3));
    }
}
