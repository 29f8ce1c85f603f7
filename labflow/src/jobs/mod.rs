//! External job dispatch, correlation, and polling.

pub mod api;
pub mod correlate;
pub mod poll;

pub use api::{CompletedRun, JobApi, RunConclusion, RunId, RunState, RunStatus};
pub use correlate::{CorrelationConfig, DispatchHandle, JobCorrelator};
pub use poll::{PollConfig, RunPoller};
