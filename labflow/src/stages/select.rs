//! The best-iteration selection stage.

use super::{fields, read_session, write_session, ResearchConfig};
use crate::pipeline::Step;
use crate::session::select_best_iteration;
use crate::state::{PipelineState, StateDelta};
use async_trait::async_trait;
use tracing::info;

/// Selects the iteration that drives the writing stages.
///
/// The only place `best_iteration_id` is ever set.
#[derive(Debug)]
pub struct SelectBestStage {
    metric: String,
}

impl SelectBestStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: &ResearchConfig) -> Self {
        Self {
            metric: config.metric.clone(),
        }
    }
}

#[async_trait]
impl Step for SelectBestStage {
    fn name(&self) -> &str {
        "select_best_iteration"
    }

    fn inputs(&self) -> Vec<String> {
        vec![fields::SESSION.to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![
            fields::SESSION.to_string(),
            fields::BEST_ITERATION_ID.to_string(),
        ]
    }

    async fn execute(&self, inputs: &PipelineState) -> anyhow::Result<StateDelta> {
        let mut session = read_session(inputs)?;
        let best = select_best_iteration(&mut session, &self.metric);
        info!(metric = %self.metric, best = ?best, "best iteration selected");

        let mut delta = StateDelta::new();
        write_session(&mut delta, &session)?;
        delta.insert(
            fields::BEST_ITERATION_ID.to_string(),
            serde_json::to_value(best)?,
        );
        Ok(delta)
    }
}
