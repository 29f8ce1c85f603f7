//! The research stages and their pipeline wiring.
//!
//! Each stage is a [`crate::pipeline::Step`] that receives its
//! collaborators (text service, job API, store client) explicitly at
//! construction — there is no global registry to resolve them from. The
//! canonical design → code → run → analyze → write graph is assembled by
//! [`research_pipeline`].

mod analyze;
mod code;
mod design;
mod experiment;
mod persist;
mod select;
mod writeup;

#[cfg(test)]
mod integration_tests;

pub use analyze::AnalyzeStage;
pub use code::CodeStage;
pub use design::DesignStage;
pub use experiment::ExperimentStage;
pub use persist::PersistStage;
pub use select::SelectBestStage;
pub use writeup::WriteupStage;

use crate::errors::DefinitionError;
use crate::jobs::{CorrelationConfig, PollConfig};
use crate::pipeline::{PipelineDefinition, Step};
use crate::session::ResearchSession;
use crate::state::{PipelineState, StateDelta};
use std::sync::Arc;

/// State field names shared by the stages.
pub mod fields {
    /// The hypothesis under investigation.
    pub const HYPOTHESIS: &str = "hypothesis";
    /// The serialized research session.
    pub const SESSION: &str = "session";
    /// The current experiment design.
    pub const DESIGN: &str = "design";
    /// The current generated code.
    pub const CODE: &str = "code";
    /// Outcomes of the current iteration's runs.
    pub const RUNS: &str = "runs";
    /// The current analysis summary.
    pub const ANALYSIS: &str = "analysis";
    /// Whether the analysis asks for another code revision.
    pub const NEEDS_REVISION: &str = "needs_revision";
    /// How many analyze passes have run.
    pub const REVISION_COUNT: &str = "revision_count";
    /// The selected best iteration id.
    pub const BEST_ITERATION_ID: &str = "best_iteration_id";
    /// The manuscript draft.
    pub const MANUSCRIPT: &str = "manuscript";
    /// The branch the session document lives on.
    pub const BRANCH_REF: &str = "branch_ref";
}

/// The external collaborators a research pipeline needs.
///
/// Passed explicitly into every stage constructor.
#[derive(Clone)]
pub struct ResearchDeps {
    /// Generative-text service client.
    pub text: Arc<dyn crate::textgen::TextService>,
    /// External job API client.
    pub jobs: Arc<dyn crate::jobs::JobApi>,
    /// Versioned store client.
    pub store: Arc<dyn crate::store::VersionedStore>,
}

impl ResearchDeps {
    /// Bundles the three collaborators.
    #[must_use]
    pub fn new(
        text: Arc<dyn crate::textgen::TextService>,
        jobs: Arc<dyn crate::jobs::JobApi>,
        store: Arc<dyn crate::store::VersionedStore>,
    ) -> Self {
        Self { text, jobs, store }
    }
}

/// Per-pipeline configuration, owned by the call site.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// The external job to dispatch experiment runs on.
    pub job_name: String,
    /// The metric best-iteration selection ranks by.
    pub metric: String,
    /// Consistency-loop budget for the design stage.
    pub design_attempts: usize,
    /// Code-fix loop budget for the code stage.
    pub code_fix_attempts: usize,
    /// How many experiment runs each iteration dispatches.
    pub runs_per_iteration: usize,
    /// How many analyze-driven code revisions are allowed.
    pub max_revisions: u64,
    /// Correlation poll budget.
    pub correlation: CorrelationConfig,
    /// Run-status poll budget.
    pub poll: PollConfig,
    /// Transition budget for the whole graph.
    pub recursion_limit: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            job_name: "experiment-runner".to_string(),
            metric: "score".to_string(),
            design_attempts: 1,
            code_fix_attempts: 8,
            runs_per_iteration: 1,
            max_revisions: 2,
            correlation: CorrelationConfig::default(),
            poll: PollConfig::default(),
            recursion_limit: 25,
        }
    }
}

impl ResearchConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the job name.
    #[must_use]
    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = name.into();
        self
    }

    /// Sets the selection metric.
    #[must_use]
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    /// Sets the revision budget.
    #[must_use]
    pub fn with_max_revisions(mut self, revisions: u64) -> Self {
        self.max_revisions = revisions;
        self
    }

    /// Sets the correlation budget.
    #[must_use]
    pub fn with_correlation(mut self, config: CorrelationConfig) -> Self {
        self.correlation = config;
        self
    }

    /// Sets the status-poll budget.
    #[must_use]
    pub fn with_poll(mut self, config: PollConfig) -> Self {
        self.poll = config;
        self
    }
}

/// Reads the session out of a stage's input projection.
pub(crate) fn read_session(state: &PipelineState) -> anyhow::Result<ResearchSession> {
    state
        .get_as::<ResearchSession>(fields::SESSION)
        .ok_or_else(|| anyhow::anyhow!("state has no usable '{}' field", fields::SESSION))
}

/// Writes the session into a stage's output delta.
pub(crate) fn write_session(
    delta: &mut StateDelta,
    session: &ResearchSession,
) -> anyhow::Result<()> {
    delta.insert(fields::SESSION.to_string(), serde_json::to_value(session)?);
    Ok(())
}

/// Assembles the canonical research pipeline.
///
/// design → code → experiment → analyze, with a guarded edge looping back
/// to code while the analysis asks for a revision and the budget allows,
/// then select-best → writeup → persist → done.
pub fn research_pipeline(
    deps: &ResearchDeps,
    config: &ResearchConfig,
) -> Result<PipelineDefinition, DefinitionError> {
    let design: Arc<dyn Step> = Arc::new(DesignStage::new(deps.text.clone(), config));
    let code: Arc<dyn Step> = Arc::new(CodeStage::new(deps.text.clone(), config));
    let experiment: Arc<dyn Step> = Arc::new(ExperimentStage::new(deps.jobs.clone(), config));
    let analyze: Arc<dyn Step> = Arc::new(AnalyzeStage::new(deps.text.clone(), config));
    let select: Arc<dyn Step> = Arc::new(SelectBestStage::new(config));
    let writeup: Arc<dyn Step> = Arc::new(WriteupStage::new(deps.text.clone()));
    let persist: Arc<dyn Step> = Arc::new(PersistStage::new(deps.store.clone()));

    let max_revisions = config.max_revisions;
    PipelineDefinition::builder("research")
        .step(design)
        .step(code)
        .step(experiment)
        .step(analyze)
        .step(select)
        .step(writeup)
        .step(persist)
        .edge("generate_design", "generate_code")
        .edge("generate_code", "run_experiment")
        .edge("run_experiment", "analyze_results")
        .edge_when("analyze_results", "generate_code", move |state| {
            state.get_flag(fields::NEEDS_REVISION)
                && state.get_u64(fields::REVISION_COUNT).unwrap_or(0) <= max_revisions
        })
        .edge("analyze_results", "select_best_iteration")
        .edge("select_best_iteration", "write_manuscript")
        .edge("write_manuscript", "persist_session")
        .edge_to_end("persist_session")
        .recursion_limit(config.recursion_limit)
        .build()
}
