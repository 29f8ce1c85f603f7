//! Shared fixtures for tests.

use crate::jobs::{CompletedRun, RunConclusion, RunState, RunStatus};
use crate::session::{JobOutcome, ResearchSession};
use crate::textgen::TextResponse;

/// A decodable design response.
#[must_use]
pub fn design_response() -> TextResponse {
    TextResponse::new(serde_json::json!({
        "title": "cache ablation",
        "plan": "disable the cache, rerun the benchmark, compare latency",
    }))
}

/// A decodable code-patch response with the given source.
#[must_use]
pub fn code_response(source: &str) -> TextResponse {
    TextResponse::new(serde_json::json!({
        "source": source,
        "language": "python",
    }))
}

/// A decodable analysis response.
#[must_use]
pub fn analysis_response(
    summary: &str,
    metrics: &[(&str, f64)],
    needs_revision: bool,
) -> TextResponse {
    let metrics: serde_json::Map<String, serde_json::Value> = metrics
        .iter()
        .map(|(name, value)| ((*name).to_string(), serde_json::json!(value)))
        .collect();
    TextResponse::new(serde_json::json!({
        "summary": summary,
        "metrics": metrics,
        "needs_revision": needs_revision,
    }))
}

/// A decodable manuscript response.
#[must_use]
pub fn manuscript_response() -> TextResponse {
    TextResponse::new(serde_json::json!({
        "title": "On cache ablation",
        "body": "We measured the effect of the cache on end-to-end latency.",
    }))
}

/// A completed run status.
#[must_use]
pub fn completed_status(run_id: u64, conclusion: RunConclusion) -> RunStatus {
    RunStatus {
        run_id,
        state: RunState::Completed,
        conclusion: Some(conclusion),
    }
}

/// A session with two scored iterations, the second stronger.
#[must_use]
pub fn scored_session() -> ResearchSession {
    let mut session = ResearchSession::new("does the cache help");
    for (ordinal, score) in [(1u64, 0.4f64), (2, 0.8)] {
        let iteration = session.begin_iteration();
        iteration.design = Some(format!("design v{ordinal}"));
        iteration.code = Some(format!("code v{ordinal}"));
        iteration.runs = vec![JobOutcome::completed(CompletedRun {
            run_id: ordinal * 10,
            conclusion: Some(RunConclusion::Success),
        })];
        iteration.analysis = Some(format!("analysis v{ordinal}"));
        iteration.metrics.insert("score".to_string(), score);
    }
    session
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_responses_decode() {
        assert!(design_response().as_design().is_some());
        assert!(code_response("x = 1").as_code_patch().is_some());
        assert!(analysis_response("s", &[("score", 1.0)], false)
            .as_analysis()
            .is_some());
        assert!(manuscript_response().as_manuscript().is_some());
    }

    #[test]
    fn test_scored_session_shape() {
        let session = scored_session();
        assert_eq!(session.iterations.len(), 2);
        assert_eq!(session.iterations[1].metric("score"), Some(0.8));
    }
}
