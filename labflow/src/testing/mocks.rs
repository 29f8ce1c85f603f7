//! Scripted test doubles for the external collaborators.
//!
//! Each double is driven by an explicit script and records its calls, so
//! tests can assert both outcomes and interaction counts without a mocking
//! framework.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::LabflowError;
use crate::jobs::api::{JobApi, RunId, RunState, RunStatus};
use crate::store::api::VersionedStore;
use crate::textgen::{TextRequest, TextResponse, TextService};

/// A text service that replays a scripted sequence of responses.
///
/// When the script drains, further calls return the configured default
/// (initially `None`, the "no usable answer" response).
#[derive(Default)]
pub struct MockTextService {
    responses: Mutex<VecDeque<Option<TextResponse>>>,
    default: Mutex<Option<TextResponse>>,
    requests: Mutex<Vec<TextRequest>>,
    fail: Mutex<bool>,
}

impl MockTextService {
    /// Creates a new mock with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends responses to the script, in order.
    #[must_use]
    pub fn with_responses(self, responses: Vec<Option<TextResponse>>) -> Self {
        self.responses.lock().extend(responses);
        self
    }

    /// Sets the response returned once the script drains.
    #[must_use]
    pub fn with_default(self, response: TextResponse) -> Self {
        *self.default.lock() = Some(response);
        self
    }

    /// Makes every call fail with an internal error.
    #[must_use]
    pub fn failing(self) -> Self {
        *self.fail.lock() = true;
        self
    }

    /// Returns the recorded requests.
    #[must_use]
    pub fn requests(&self) -> Vec<TextRequest> {
        self.requests.lock().clone()
    }

    /// Returns how many times the service was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl TextService for MockTextService {
    async fn invoke(&self, request: &TextRequest) -> Result<Option<TextResponse>, LabflowError> {
        self.requests.lock().push(request.clone());
        if *self.fail.lock() {
            return Err(LabflowError::Internal("text service unavailable".to_string()));
        }
        if let Some(next) = self.responses.lock().pop_front() {
            return Ok(next);
        }
        Ok(self.default.lock().clone())
    }
}

/// A job API that replays scripted run lists and statuses.
#[derive(Default)]
pub struct ScriptedJobApi {
    run_lists: Mutex<VecDeque<Vec<RunId>>>,
    last_run_list: Mutex<Vec<RunId>>,
    dispatch_run_ids: Mutex<VecDeque<RunId>>,
    statuses: Mutex<HashMap<RunId, VecDeque<RunStatus>>>,
    final_statuses: Mutex<HashMap<RunId, RunStatus>>,
    accept_dispatch: Mutex<bool>,
    list_calls: AtomicUsize,
    dispatch_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl ScriptedJobApi {
    /// Creates a new scripted API that accepts dispatches and lists no
    /// runs.
    #[must_use]
    pub fn new() -> Self {
        let api = Self::default();
        *api.accept_dispatch.lock() = true;
        api
    }

    /// Scripts the run lists returned by successive `list_runs` calls.
    /// Once the script drains, the final list repeats.
    #[must_use]
    pub fn with_run_lists(self, lists: Vec<Vec<RunId>>) -> Self {
        self.run_lists.lock().extend(lists);
        self
    }

    /// Makes every `list_runs` call return the same list.
    #[must_use]
    pub fn with_constant_run_list(self, list: Vec<RunId>) -> Self {
        *self.last_run_list.lock() = list;
        self
    }

    /// Makes each dispatch create a new run: the given id appears in all
    /// later run lists.
    #[must_use]
    pub fn with_dispatched_runs(self, run_ids: Vec<RunId>) -> Self {
        self.dispatch_run_ids.lock().extend(run_ids);
        self
    }

    /// Scripts the statuses of one run, in poll order. Once the script
    /// drains, the final status repeats.
    #[must_use]
    pub fn with_statuses(self, run_id: RunId, statuses: Vec<RunStatus>) -> Self {
        self.statuses.lock().insert(run_id, statuses.into());
        self
    }

    /// Makes the trigger endpoint reject dispatches.
    #[must_use]
    pub fn rejecting_dispatch(self) -> Self {
        *self.accept_dispatch.lock() = false;
        self
    }

    /// Number of `list_runs` calls.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `dispatch` calls.
    #[must_use]
    pub fn dispatch_calls(&self) -> usize {
        self.dispatch_calls.load(Ordering::SeqCst)
    }

    /// Number of `run_status` calls.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for ScriptedJobApi {
    async fn list_runs(&self, _job: &str, _git_ref: &str) -> Result<Vec<RunId>, LabflowError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(list) = self.run_lists.lock().pop_front() {
            *self.last_run_list.lock() = list.clone();
            return Ok(list);
        }
        Ok(self.last_run_list.lock().clone())
    }

    async fn dispatch(
        &self,
        _job: &str,
        _git_ref: &str,
        _inputs: &HashMap<String, serde_json::Value>,
    ) -> Result<bool, LabflowError> {
        self.dispatch_calls.fetch_add(1, Ordering::SeqCst);
        if !*self.accept_dispatch.lock() {
            return Ok(false);
        }
        if let Some(run_id) = self.dispatch_run_ids.lock().pop_front() {
            self.last_run_list.lock().push(run_id);
        }
        Ok(true)
    }

    async fn run_status(&self, run_id: RunId) -> Result<RunStatus, LabflowError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock();
        if let Some(queue) = statuses.get_mut(&run_id) {
            if let Some(status) = queue.pop_front() {
                if queue.is_empty() {
                    self.final_statuses.lock().insert(run_id, status);
                }
                return Ok(status);
            }
        }
        if let Some(status) = self.final_statuses.lock().get(&run_id) {
            return Ok(*status);
        }
        Ok(RunStatus {
            run_id,
            state: RunState::Pending,
            conclusion: None,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct BranchData {
    tip: String,
    root: Option<String>,
    documents: HashMap<String, Vec<u8>>,
}

/// An in-memory branch-addressable store.
#[derive(Default)]
pub struct InMemoryStore {
    branches: Mutex<HashMap<String, BranchData>>,
    revision_counter: AtomicUsize,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the tip revision of a branch, creating the branch if needed.
    pub fn set_branch_tip(&self, git_ref: &str, revision: &str) {
        let mut branches = self.branches.lock();
        branches.entry(git_ref.to_string()).or_default().tip = revision.to_string();
    }

    /// Returns the revision a branch was forked from, when it was created
    /// via `create_branch`.
    #[must_use]
    pub fn branch_root(&self, git_ref: &str) -> Option<String> {
        self.branches.lock().get(git_ref).and_then(|b| b.root.clone())
    }

    /// Returns all branch names.
    #[must_use]
    pub fn branch_names(&self) -> Vec<String> {
        self.branches.lock().keys().cloned().collect()
    }

    fn next_revision(&self) -> String {
        let n = self.revision_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("rev-{n}")
    }
}

#[async_trait]
impl VersionedStore for InMemoryStore {
    async fn branch_tip(&self, git_ref: &str) -> Result<String, LabflowError> {
        let mut branches = self.branches.lock();
        let branch = branches.entry(git_ref.to_string()).or_insert_with(|| BranchData {
            tip: "rev-0".to_string(),
            root: None,
            documents: HashMap::new(),
        });
        Ok(branch.tip.clone())
    }

    async fn create_branch(
        &self,
        git_ref: &str,
        from_revision: &str,
    ) -> Result<bool, LabflowError> {
        let mut branches = self.branches.lock();
        if branches.contains_key(git_ref) {
            return Ok(false);
        }
        // Root the fork at the branch currently holding that revision.
        let documents = branches
            .values()
            .find(|b| b.tip == from_revision)
            .map(|b| b.documents.clone())
            .unwrap_or_default();
        branches.insert(
            git_ref.to_string(),
            BranchData {
                tip: from_revision.to_string(),
                root: Some(from_revision.to_string()),
                documents,
            },
        );
        Ok(true)
    }

    async fn read_document(
        &self,
        git_ref: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, LabflowError> {
        Ok(self
            .branches
            .lock()
            .get(git_ref)
            .and_then(|b| b.documents.get(path).cloned()))
    }

    async fn write_document(
        &self,
        git_ref: &str,
        path: &str,
        bytes: &[u8],
        _message: &str,
    ) -> Result<bool, LabflowError> {
        let revision = self.next_revision();
        let mut branches = self.branches.lock();
        let branch = branches.entry(git_ref.to_string()).or_default();
        branch.documents.insert(path.to_string(), bytes.to_vec());
        branch.tip = revision;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::textgen::ResponseShape;

    #[tokio::test]
    async fn test_mock_text_service_replays_script() {
        let service = MockTextService::new().with_responses(vec![
            Some(TextResponse::new(serde_json::json!("first"))),
            None,
        ]);
        let request = TextRequest::new("p", ResponseShape::Design);

        let first = service.invoke(&request).await.expect("ok");
        assert_eq!(first, Some(TextResponse::new(serde_json::json!("first"))));

        let second = service.invoke(&request).await.expect("ok");
        assert_eq!(second, None);

        // Script drained, default is None.
        let third = service.invoke(&request).await.expect("ok");
        assert_eq!(third, None);
        assert_eq!(service.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_job_api_repeats_final_list() {
        let api = ScriptedJobApi::new().with_run_lists(vec![vec![1], vec![1, 2]]);

        assert_eq!(api.list_runs("ci", "main").await.expect("ok"), vec![1]);
        assert_eq!(api.list_runs("ci", "main").await.expect("ok"), vec![1, 2]);
        assert_eq!(api.list_runs("ci", "main").await.expect("ok"), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_dispatch_appends_scripted_run() {
        let api = ScriptedJobApi::new()
            .with_constant_run_list(vec![1])
            .with_dispatched_runs(vec![7]);

        api.dispatch("ci", "main", &HashMap::new()).await.expect("ok");
        assert_eq!(api.list_runs("ci", "main").await.expect("ok"), vec![1, 7]);
    }

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let store = InMemoryStore::new();
        store
            .write_document("main", "a.json", b"{}", "msg")
            .await
            .expect("write");

        let read = store.read_document("main", "a.json").await.expect("read");
        assert_eq!(read, Some(b"{}".to_vec()));

        let missing = store.read_document("main", "b.json").await.expect("read");
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_in_memory_store_fork_copies_documents() {
        let store = InMemoryStore::new();
        store
            .write_document("main", "a.json", b"{\"x\":1}", "msg")
            .await
            .expect("write");
        let tip = store.branch_tip("main").await.expect("tip");

        assert!(store.create_branch("fork", &tip).await.expect("create"));
        assert_eq!(store.branch_root("fork").as_deref(), Some(tip.as_str()));

        let read = store.read_document("fork", "a.json").await.expect("read");
        assert_eq!(read, Some(b"{\"x\":1}".to_vec()));
    }
}
