//! In-memory remote API used by unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::api::{
    ApiError, ApiResult, AutotestModel, AutotestPost, AutotestPut, RemoteApi, TestResultPost,
};

/// Records every call and answers from in-memory state
#[derive(Default)]
pub(crate) struct RecordingApi {
    pub existing: Mutex<HashMap<String, AutotestModel>>,
    pub linked: Mutex<HashMap<String, Vec<String>>>,
    pub calls: Mutex<Vec<String>>,
    pub bulk_created: Mutex<Vec<Vec<AutotestPost>>>,
    pub bulk_updated: Mutex<Vec<Vec<AutotestPut>>>,
    pub updated: Mutex<Vec<AutotestPut>>,
    pub submitted: Mutex<Vec<(String, Vec<TestResultPost>)>>,
    /// Status codes returned by link calls for a work item before it succeeds
    pub link_failures: Mutex<HashMap<String, VecDeque<u16>>>,
    pub resolved_external_ids: Mutex<Vec<String>>,
    pub fail_submit: Mutex<bool>,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(self, external_id: &str, id: &str, name: &str) -> Self {
        self.existing.lock().insert(
            external_id.to_string(),
            AutotestModel {
                id: id.to_string(),
                external_id: external_id.to_string(),
                project_id: "project".to_string(),
                name: name.to_string(),
                ..Default::default()
            },
        );
        self
    }

    pub fn with_linked(self, autotest_id: &str, work_items: &[&str]) -> Self {
        self.linked.lock().insert(
            autotest_id.to_string(),
            work_items.iter().map(|w| w.to_string()).collect(),
        );
        self
    }

    pub fn failing_link(self, work_item_id: &str, statuses: &[u16]) -> Self {
        self.link_failures
            .lock()
            .insert(work_item_id.to_string(), statuses.iter().copied().collect());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls whose name starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn remember(&self, external_id: &str) -> String {
        let id = format!("id-{external_id}");
        self.existing
            .lock()
            .entry(external_id.to_string())
            .or_insert_with(|| AutotestModel {
                id: id.clone(),
                external_id: external_id.to_string(),
                ..Default::default()
            });
        id
    }
}

#[async_trait]
impl RemoteApi for RecordingApi {
    async fn get_autotest_by_external_id(
        &self,
        _project_id: &str,
        external_id: &str,
    ) -> ApiResult<Option<AutotestModel>> {
        self.record(format!("get:{external_id}"));
        Ok(self.existing.lock().get(external_id).cloned())
    }

    async fn create_autotest(&self, payload: &AutotestPost) -> ApiResult<String> {
        self.record(format!("create:{}", payload.external_id));
        Ok(self.remember(&payload.external_id))
    }

    async fn update_autotest(&self, payload: &AutotestPut) -> ApiResult<()> {
        self.record(format!("update:{}", payload.external_id));
        self.updated.lock().push(payload.clone());
        Ok(())
    }

    async fn bulk_create_autotests(&self, payloads: &[AutotestPost]) -> ApiResult<()> {
        self.record(format!("bulk_create:{}", payloads.len()));
        for payload in payloads {
            self.remember(&payload.external_id);
        }
        self.bulk_created.lock().push(payloads.to_vec());
        Ok(())
    }

    async fn bulk_update_autotests(&self, payloads: &[AutotestPut]) -> ApiResult<()> {
        self.record(format!("bulk_update:{}", payloads.len()));
        self.bulk_updated.lock().push(payloads.to_vec());
        Ok(())
    }

    async fn link_autotest_to_work_item(
        &self,
        autotest_id: &str,
        work_item_id: &str,
    ) -> ApiResult<()> {
        self.record(format!("link:{autotest_id}:{work_item_id}"));
        let failure = self
            .link_failures
            .lock()
            .get_mut(work_item_id)
            .and_then(VecDeque::pop_front);
        if let Some(code) = failure {
            return Err(ApiError::Status {
                code,
                message: "link failed".to_string(),
            });
        }
        self.linked
            .lock()
            .entry(autotest_id.to_string())
            .or_default()
            .push(work_item_id.to_string());
        Ok(())
    }

    async fn unlink_autotest_from_work_item(
        &self,
        autotest_id: &str,
        work_item_id: &str,
    ) -> ApiResult<()> {
        self.record(format!("unlink:{autotest_id}:{work_item_id}"));
        if let Some(items) = self.linked.lock().get_mut(autotest_id) {
            items.retain(|w| w != work_item_id);
        }
        Ok(())
    }

    async fn get_work_items_linked_to_autotest(
        &self,
        autotest_id: &str,
    ) -> ApiResult<Vec<String>> {
        self.record(format!("linked:{autotest_id}"));
        Ok(self
            .linked
            .lock()
            .get(autotest_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn submit_results_for_run(
        &self,
        run_id: &str,
        results: &[TestResultPost],
    ) -> ApiResult<()> {
        self.record(format!("submit:{run_id}:{}", results.len()));
        if *self.fail_submit.lock() {
            return Err(ApiError::Status {
                code: 500,
                message: "submit failed".to_string(),
            });
        }
        self.submitted
            .lock()
            .push((run_id.to_string(), results.to_vec()));
        Ok(())
    }

    async fn create_test_run(&self, _project_id: &str, name: &str) -> ApiResult<String> {
        self.record(format!("create_run:{name}"));
        Ok("run-new".to_string())
    }

    async fn start_test_run(&self, run_id: &str) -> ApiResult<()> {
        self.record(format!("start_run:{run_id}"));
        Ok(())
    }

    async fn get_test_run_resolved_external_ids(
        &self,
        run_id: &str,
        _configuration_id: &str,
    ) -> ApiResult<Vec<String>> {
        self.record(format!("resolved:{run_id}"));
        Ok(self.resolved_external_ids.lock().clone())
    }
}
