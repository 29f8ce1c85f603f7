//! Pipeline definitions, sequential execution, and feedback loops.

pub mod definition;
pub mod executor;
pub mod feedback;

pub use definition::{
    Edge, EdgeGuard, EdgeTarget, FnStep, PipelineBuilder, PipelineDefinition, Step,
    DEFAULT_RECURSION_LIMIT,
};
pub use executor::Executor;
pub use feedback::{FeedbackPolicy, LoopOutcome, Verdict};
