//! # Labflow
//!
//! A control layer for automated research pipelines: design → code → run
//! → analyze → write, with the hard problems handled once —
//!
//! - **Step graphs with bounded feedback loops**: a sequential executor
//!   over declared input/output projections, guarded edges, and a
//!   transition budget.
//! - **Fire-and-forget job correlation**: snapshot-diff discovery of the
//!   run a dispatch produced, then bounded polling to completion.
//! - **Optimistic writes to a shared versioned store**: deep conflict
//!   detection with deterministic branch forking, never silent overwrites.
//! - **An iteration ledger** tracking a hypothesis across iterations and
//!   selecting the best one by metric.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use labflow::prelude::*;
//!
//! let deps = ResearchDeps::new(text_client, job_client, store_client);
//! let runner = ResearchRunner::new(deps, ResearchConfig::default());
//! let final_state = runner.run_hypothesis("does X improve Y", "main").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod errors;
pub mod jobs;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod session;
pub mod stages;
pub mod state;
pub mod store;
pub mod testing;
pub mod textgen;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::{
        DispatchRejectedError, GraphExhaustedError, LabflowError, NoMatchingEdgeError,
        NoResponseError, PollTimeoutError, RunNotFoundError, StepError,
    };
    pub use crate::jobs::{
        CompletedRun, CorrelationConfig, JobApi, JobCorrelator, PollConfig, RunConclusion,
        RunId, RunPoller, RunState, RunStatus,
    };
    pub use crate::pipeline::{
        Edge, EdgeTarget, Executor, FeedbackPolicy, FnStep, LoopOutcome, PipelineBuilder,
        PipelineDefinition, Step, Verdict,
    };
    pub use crate::runner::ResearchRunner;
    pub use crate::session::{
        select_best_iteration, IterationId, JobOutcome, ResearchIteration, ResearchSession,
    };
    pub use crate::stages::{research_pipeline, ResearchConfig, ResearchDeps};
    pub use crate::state::{PipelineState, StateDelta};
    pub use crate::store::{
        merge_documents, Document, SessionStore, StoreAdapter, VersionedStore, WriteOutcome,
        WriteTarget,
    };
    pub use crate::textgen::{ResponseShape, TextRequest, TextResponse, TextService};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
