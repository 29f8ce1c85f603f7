//! End-to-end tests for the canonical research pipeline.

#[cfg(test)]
mod tests {
    use crate::jobs::{CorrelationConfig, PollConfig, RunConclusion};
    use crate::pipeline::Executor;
    use crate::session::ResearchSession;
    use crate::stages::{fields, research_pipeline, ResearchConfig, ResearchDeps};
    use crate::state::PipelineState;
    use crate::store::api::VersionedStore;
    use crate::store::SESSION_DOCUMENT_PATH;
    use crate::testing::fixtures::{
        analysis_response, code_response, completed_status, design_response, manuscript_response,
    };
    use crate::testing::mocks::{InMemoryStore, MockTextService, ScriptedJobApi};
    use crate::textgen::TextResponse;
    use std::sync::Arc;

    fn fast_config() -> ResearchConfig {
        ResearchConfig::default()
            .with_correlation(
                CorrelationConfig::new()
                    .with_max_attempts(3)
                    .with_interval_ms(0),
            )
            .with_poll(PollConfig::new().with_max_attempts(3).with_interval_ms(0))
    }

    fn initial_state() -> PipelineState {
        let mut state = PipelineState::new();
        state.insert(fields::HYPOTHESIS, serde_json::json!("does the cache help"));
        state.insert(
            fields::SESSION,
            serde_json::to_value(ResearchSession::new("does the cache help")).expect("session"),
        );
        state.insert(fields::BRANCH_REF, serde_json::json!("main"));
        state.insert(fields::REVISION_COUNT, serde_json::json!(0));
        state
    }

    fn deps(
        text: MockTextService,
        jobs: ScriptedJobApi,
    ) -> (ResearchDeps, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (
            ResearchDeps::new(Arc::new(text), Arc::new(jobs), store.clone()),
            store,
        )
    }

    #[tokio::test]
    async fn test_full_pipeline_happy_path() {
        let text = MockTextService::new().with_responses(vec![
            Some(design_response()),
            Some(code_response("run()")),
            Some(analysis_response("strong effect", &[("score", 0.9)], false)),
            Some(manuscript_response()),
        ]);
        let jobs = ScriptedJobApi::new()
            .with_constant_run_list(vec![1])
            .with_dispatched_runs(vec![2])
            .with_statuses(2, vec![completed_status(2, RunConclusion::Success)]);
        let (deps, store) = deps(text, jobs);

        let definition = research_pipeline(&deps, &fast_config()).expect("definition");
        let final_state = Executor::new()
            .run(&definition, initial_state())
            .await
            .expect("run");

        let session: ResearchSession = final_state
            .get_as(fields::SESSION)
            .expect("session in state");
        assert_eq!(session.iterations.len(), 1);
        assert_eq!(session.iterations[0].metric("score"), Some(0.9));
        assert_eq!(session.best_iteration_id, Some(1));
        assert!(session.iterations[0].runs[0].is_success());
        assert!(final_state.get(fields::MANUSCRIPT).expect("manuscript").is_object());

        // The session landed on the store at the checkpoint.
        let stored = store
            .read_document("main", SESSION_DOCUMENT_PATH)
            .await
            .expect("read");
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_revision_loop_accumulates_iterations() {
        // First analysis asks for a revision, second is satisfied.
        let text = MockTextService::new().with_responses(vec![
            Some(design_response()),
            Some(code_response("v1()")),
            Some(analysis_response("flaky", &[("score", 0.2)], true)),
            Some(code_response("v2()")),
            Some(analysis_response("stable", &[("score", 0.8)], false)),
            Some(manuscript_response()),
        ]);
        let jobs = ScriptedJobApi::new()
            .with_constant_run_list(vec![1])
            .with_dispatched_runs(vec![2, 3])
            .with_statuses(2, vec![completed_status(2, RunConclusion::Failure)])
            .with_statuses(3, vec![completed_status(3, RunConclusion::Success)]);
        let (deps, _store) = deps(text, jobs);

        let definition = research_pipeline(&deps, &fast_config()).expect("definition");
        let final_state = Executor::new()
            .run(&definition, initial_state())
            .await
            .expect("run");

        let session: ResearchSession = final_state
            .get_as(fields::SESSION)
            .expect("session in state");
        assert_eq!(session.iterations.len(), 2);
        assert_eq!(session.iterations[0].code.as_deref(), Some("v1()"));
        assert_eq!(session.iterations[1].code.as_deref(), Some("v2()"));
        // The design is carried into the revision iteration.
        assert_eq!(session.iterations[0].design, session.iterations[1].design);
        // The stronger revision wins selection.
        assert_eq!(session.best_iteration_id, Some(2));
    }

    #[tokio::test]
    async fn test_code_fix_loop_passes_on_third_attempt() {
        // Validation rejects the first two code attempts; the third passes,
        // after exactly three produce/validate pairs.
        let text = MockTextService::new().with_responses(vec![
            Some(design_response()),
            Some(TextResponse::new(serde_json::json!("prose without code"))),
            Some(TextResponse::new(serde_json::json!("more prose"))),
            Some(code_response("fixed()")),
            Some(analysis_response("fine", &[("score", 0.5)], false)),
            Some(manuscript_response()),
        ]);
        let jobs = ScriptedJobApi::new()
            .with_constant_run_list(vec![1])
            .with_dispatched_runs(vec![2])
            .with_statuses(2, vec![completed_status(2, RunConclusion::Success)]);
        let store = Arc::new(InMemoryStore::new());
        let text = Arc::new(text);
        let deps = ResearchDeps::new(text.clone(), Arc::new(jobs), store);

        let config = ResearchConfig {
            code_fix_attempts: 3,
            ..fast_config()
        };
        let definition = research_pipeline(&deps, &config).expect("definition");
        let final_state = Executor::new()
            .run(&definition, initial_state())
            .await
            .expect("run");

        assert_eq!(final_state.get_str(fields::CODE), Some("fixed()"));
        // 1 design + 3 code attempts + 1 analysis + 1 manuscript.
        assert_eq!(text.call_count(), 6);
    }

    #[tokio::test]
    async fn test_unobservable_run_degrades_and_session_continues() {
        // Dispatch accepted, but no new run ever appears in the listing.
        let text = MockTextService::new().with_responses(vec![
            Some(design_response()),
            Some(code_response("run()")),
            Some(analysis_response("no data", &[], false)),
            Some(manuscript_response()),
        ]);
        let jobs = ScriptedJobApi::new().with_constant_run_list(vec![1]);
        let (deps, _store) = deps(text, jobs);

        let definition = research_pipeline(&deps, &fast_config()).expect("definition");
        let final_state = Executor::new()
            .run(&definition, initial_state())
            .await
            .expect("run survives the soft failure");

        let session: ResearchSession = final_state
            .get_as(fields::SESSION)
            .expect("session in state");
        assert_eq!(session.iterations[0].runs.len(), 1);
        assert_eq!(session.iterations[0].runs[0].run_id, None);
        // Downstream stages still ran.
        assert!(final_state.contains(fields::MANUSCRIPT));
    }

    #[tokio::test]
    async fn test_revision_budget_bounds_the_loop() {
        // Every analysis asks for another revision; the guarded edge stops
        // honoring it once the budget is spent.
        let deps = ResearchDeps::new(
            Arc::new(ScriptedForEndlessRevision),
            Arc::new(ScriptedJobApi::new().with_constant_run_list(vec![1])),
            Arc::new(InMemoryStore::new()),
        );

        let config = ResearchConfig {
            max_revisions: 1,
            ..fast_config()
        };
        let definition = research_pipeline(&deps, &config).expect("definition");
        let final_state = Executor::new()
            .run(&definition, initial_state())
            .await
            .expect("run terminates");

        let session: ResearchSession = final_state
            .get_as(fields::SESSION)
            .expect("session in state");
        // Initial pass plus exactly one revision.
        assert_eq!(session.iterations.len(), 2);
    }

    /// A text service whose analyses always ask for another revision.
    #[derive(Default)]
    struct ScriptedForEndlessRevision;

    #[async_trait::async_trait]
    impl crate::textgen::TextService for ScriptedForEndlessRevision {
        async fn invoke(
            &self,
            request: &crate::textgen::TextRequest,
        ) -> Result<Option<crate::textgen::TextResponse>, crate::errors::LabflowError> {
            use crate::textgen::ResponseShape;
            let response = match request.shape {
                ResponseShape::Design => design_response(),
                ResponseShape::CodePatch => code_response("again()"),
                ResponseShape::Analysis { .. } => {
                    analysis_response("still flaky", &[("score", 0.1)], true)
                }
                ResponseShape::Manuscript => manuscript_response(),
            };
            Ok(Some(response))
        }
    }
}
