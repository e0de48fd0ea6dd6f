//! Adapter manager
//!
//! Delivers finished test results to the remote service, one test at a time
//! in realtime mode or batched into slots in bulk mode.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::bulk::{BulkSlots, CreateEntry, UpdateEntry, WorkItemDiff};
use super::retry::RetryPolicy;
use crate::api::{ApiError, ApiResult, AutotestPost, AutotestPut, RemoteApi, TestResultPost};
use crate::config::{AdapterConfig, AdapterMode};
use crate::models::TestResult;
use crate::sync::SyncStorageRunner;

struct BulkState {
    creates: BulkSlots<CreateEntry>,
    updates: BulkSlots<UpdateEntry>,
}

/// Delivery pipeline for one run
pub struct AdapterManager {
    api: Arc<dyn RemoteApi>,
    config: AdapterConfig,
    retry: RetryPolicy,
    test_run_id: Option<String>,
    bulk: Mutex<BulkState>,
    sync: Option<Arc<SyncStorageRunner>>,
}

impl AdapterManager {
    pub fn new(config: AdapterConfig, api: Arc<dyn RemoteApi>) -> Self {
        let capacity = config.bulk_capacity;
        Self {
            api,
            retry: RetryPolicy::from_config(&config.retry),
            test_run_id: config.test_run_id.clone(),
            bulk: Mutex::new(BulkState {
                creates: BulkSlots::new(capacity),
                updates: BulkSlots::new(capacity),
            }),
            sync: None,
            config,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Forward in-progress snapshots through the coordination service
    pub fn with_sync(mut self, sync: Arc<SyncStorageRunner>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn test_run_id(&self) -> Option<&str> {
        self.test_run_id.as_deref()
    }

    pub fn is_realtime(&self) -> bool {
        self.config.import_realtime
    }

    /// Prepare the test run for the configured mode.
    ///
    /// Returns the external ids to report in filtered mode, `None` when
    /// every test is reported.
    pub async fn prepare_run(&mut self) -> ApiResult<Option<HashSet<String>>> {
        match self.config.adapter_mode {
            AdapterMode::NewRun => {
                let name = self.config.test_run_name.clone().unwrap_or_else(|| {
                    format!("TestRun_{}", Utc::now().format("%Y-%m-%dT%H:%M:%S"))
                });
                let run_id = self
                    .api
                    .create_test_run(&self.config.project_id, &name)
                    .await?;
                self.api.start_test_run(&run_id).await?;
                info!("Created test run {} ({})", name, run_id);
                self.test_run_id = Some(run_id);
                Ok(None)
            }
            AdapterMode::Filtered => {
                let run_id = self.run_id()?.to_string();
                let ids = self
                    .api
                    .get_test_run_resolved_external_ids(&run_id, &self.config.configuration_id)
                    .await?;
                info!("Test run {} selects {} autotests", run_id, ids.len());
                Ok(Some(ids.into_iter().collect()))
            }
            AdapterMode::RunAll => Ok(None),
        }
    }

    fn run_id(&self) -> ApiResult<&str> {
        self.test_run_id
            .as_deref()
            .ok_or_else(|| ApiError::Config("test run is not prepared".to_string()))
    }

    /// Deliver one finished test
    pub async fn write_test(&self, result: &TestResult) -> ApiResult<()> {
        if let Some(sync) = &self.sync {
            let snapshot = TestResultPost::from_result(result, &self.config.configuration_id);
            if sync.send_in_progress_test_result(&snapshot).await {
                debug!("Sent in-progress result for {}", result.external_id);
            }
        }

        let written = if self.config.import_realtime {
            self.write_realtime(result).await
        } else {
            self.enqueue(result).await
        };

        if let Some(sync) = &self.sync {
            sync.reset_in_progress_flag();
        }
        written
    }

    async fn write_realtime(&self, result: &TestResult) -> ApiResult<()> {
        let run_id = self.run_id()?;
        let project_id = &self.config.project_id;

        let existing = self
            .api
            .get_autotest_by_external_id(project_id, &result.external_id)
            .await?;

        let autotest_id = match existing {
            None => {
                let payload = AutotestPost::from_result(result, project_id);
                let id = self.api.create_autotest(&payload).await?;
                debug!("Created autotest {} ({})", result.external_id, id);
                id
            }
            Some(existing) => {
                let payload = AutotestPut::for_outcome(result, &existing, project_id);
                self.api.update_autotest(&payload).await?;
                debug!("Updated autotest {} ({})", result.external_id, existing.id);
                existing.id
            }
        };

        self.link_work_items(&autotest_id, &result.work_item_ids)
            .await;

        let post = TestResultPost::from_result(result, &self.config.configuration_id);
        self.api.submit_results_for_run(run_id, &[post]).await
    }

    async fn enqueue(&self, result: &TestResult) -> ApiResult<()> {
        let run_id = self.run_id()?;
        let project_id = &self.config.project_id;
        let post = TestResultPost::from_result(result, &self.config.configuration_id);

        let existing = self
            .api
            .get_autotest_by_external_id(project_id, &result.external_id)
            .await?;

        match existing {
            None => {
                let entry = CreateEntry {
                    autotest: AutotestPost::from_result(result, project_id)
                        .with_work_items(&result.work_item_ids),
                    result: post,
                };
                let full = {
                    let mut state = self.bulk.lock().await;
                    state.creates.push(result.external_id.clone(), entry)
                };
                if let Some(batch) = full {
                    self.flush_creates(run_id, batch).await?;
                }
            }
            Some(existing) => {
                let current = self
                    .api
                    .get_work_items_linked_to_autotest(&existing.id)
                    .await?;
                let entry = UpdateEntry {
                    autotest: AutotestPut::for_outcome(result, &existing, project_id),
                    result: post,
                    work_items: WorkItemDiff::compute(
                        existing.id.clone(),
                        &current,
                        &result.work_item_ids,
                        self.config.automatic_link_updates,
                    ),
                };
                let full = {
                    let mut state = self.bulk.lock().await;
                    state.updates.push(result.external_id.clone(), entry)
                };
                if let Some(batch) = full {
                    self.flush_updates(run_id, batch).await?;
                }
            }
        }

        Ok(())
    }

    async fn flush_creates(&self, run_id: &str, batch: Vec<CreateEntry>) -> ApiResult<()> {
        info!("Flushing {} new autotests", batch.len());
        let (autotests, results): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|entry| (entry.autotest, entry.result))
            .unzip();

        self.api.bulk_create_autotests(&autotests).await?;
        self.api.submit_results_for_run(run_id, &results).await
    }

    async fn flush_updates(&self, run_id: &str, batch: Vec<UpdateEntry>) -> ApiResult<()> {
        info!("Flushing {} updated autotests", batch.len());
        let mut autotests = Vec::with_capacity(batch.len());
        let mut results = Vec::with_capacity(batch.len());
        let mut diffs = Vec::new();
        for entry in batch {
            autotests.push(entry.autotest);
            results.push(entry.result);
            if !entry.work_items.is_empty() {
                diffs.push(entry.work_items);
            }
        }

        self.api.bulk_update_autotests(&autotests).await?;
        self.api.submit_results_for_run(run_id, &results).await?;

        for diff in &diffs {
            self.apply_work_item_diff(diff).await;
        }
        Ok(())
    }

    async fn link_work_items(&self, autotest_id: &str, work_item_ids: &[String]) {
        let api = &self.api;
        let links = work_item_ids.iter().map(|work_item_id| {
            self.retry.run("link work item", move || {
                api.link_autotest_to_work_item(autotest_id, work_item_id)
            })
        });

        let failed = join_all(links)
            .await
            .into_iter()
            .filter(Option::is_none)
            .count();
        if failed > 0 {
            debug!(
                "{} of {} work items not linked to {}",
                failed,
                work_item_ids.len(),
                autotest_id
            );
        }
    }

    async fn apply_work_item_diff(&self, diff: &WorkItemDiff) {
        let api = &self.api;
        let autotest_id = diff.autotest_id.as_str();
        for work_item_id in &diff.unlink {
            self.retry
                .run("unlink work item", move || {
                    api.unlink_autotest_from_work_item(autotest_id, work_item_id)
                })
                .await;
        }
        self.link_work_items(autotest_id, &diff.link).await;
    }

    /// Flush every pending slot. Failed batches are logged and the first
    /// error is returned after all batches were attempted.
    pub async fn teardown(&self) -> ApiResult<()> {
        let (creates, updates) = {
            let mut state = self.bulk.lock().await;
            (state.creates.drain_all(), state.updates.drain_all())
        };
        if creates.is_empty() && updates.is_empty() {
            return Ok(());
        }

        let run_id = self.run_id()?;
        let mut first_error = None;

        for batch in creates {
            if let Err(e) = self.flush_creates(run_id, batch).await {
                error!("Bulk create failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        for batch in updates {
            if let Err(e) = self.flush_updates(run_id, batch).await {
                error!("Bulk update failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
