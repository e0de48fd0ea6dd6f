//! HTTP client for the test management service
//!
//! [`RemoteApi`] is the seam the delivery pipeline talks to. [`HttpApiClient`]
//! implements it over the service's REST API.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client, Method, RequestBuilder,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::error::{ApiError, ApiResult};
use super::models::{
    AutotestModel, AutotestPost, AutotestPut, IdModel, TestResultPost, TestRunModel, TestRunPost,
};
use crate::config::AdapterConfig;

/// Operations of the test management service used by the adapter
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn get_autotest_by_external_id(
        &self,
        project_id: &str,
        external_id: &str,
    ) -> ApiResult<Option<AutotestModel>>;

    /// Returns the id of the created autotest
    async fn create_autotest(&self, payload: &AutotestPost) -> ApiResult<String>;

    async fn update_autotest(&self, payload: &AutotestPut) -> ApiResult<()>;

    async fn bulk_create_autotests(&self, payloads: &[AutotestPost]) -> ApiResult<()>;

    async fn bulk_update_autotests(&self, payloads: &[AutotestPut]) -> ApiResult<()>;

    async fn link_autotest_to_work_item(
        &self,
        autotest_id: &str,
        work_item_id: &str,
    ) -> ApiResult<()>;

    async fn unlink_autotest_from_work_item(
        &self,
        autotest_id: &str,
        work_item_id: &str,
    ) -> ApiResult<()>;

    async fn get_work_items_linked_to_autotest(&self, autotest_id: &str)
        -> ApiResult<Vec<String>>;

    async fn submit_results_for_run(
        &self,
        run_id: &str,
        results: &[TestResultPost],
    ) -> ApiResult<()>;

    /// Returns the id of the created run
    async fn create_test_run(&self, project_id: &str, name: &str) -> ApiResult<String>;

    async fn start_test_run(&self, run_id: &str) -> ApiResult<()>;

    async fn get_test_run_resolved_external_ids(
        &self,
        run_id: &str,
        configuration_id: &str,
    ) -> ApiResult<Vec<String>>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkItemIdentifier {
    id: String,
    #[serde(default)]
    global_id: Option<u64>,
}

/// REST client for the test management service
#[derive(Clone)]
pub struct HttpApiClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl HttpApiClient {
    /// Create a client from adapter configuration
    pub fn new(config: &AdapterConfig) -> ApiResult<Self> {
        Self::with_options(
            &config.url,
            &config.private_token,
            config.request_timeout_secs,
            config.cert_validation,
        )
    }

    pub fn with_options(
        base_url: &str,
        private_token: &str,
        timeout_secs: u64,
        cert_validation: bool,
    ) -> ApiResult<Self> {
        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(&format!("PrivateToken {private_token}"))
            .map_err(|e| ApiError::Config(format!("invalid token: {e}")))?;
        headers.insert(AUTHORIZATION, token);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(!cert_validation)
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v2{}", self.base_url, path);
        debug!("Sending {} request to {}", method, url);
        self.client.request(method, url)
    }

    async fn execute(&self, builder: RequestBuilder) -> ApiResult<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout_secs)
            } else {
                ApiError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(
            "Response: {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        );

        if status.is_success() {
            Ok(response)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ApiError::Status {
                code: status.as_u16(),
                message,
            })
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ApiResult<T> {
        let response = self.execute(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send_empty(&self, builder: RequestBuilder) -> ApiResult<()> {
        self.execute(builder).await.map(|_| ())
    }
}

#[async_trait]
impl RemoteApi for HttpApiClient {
    async fn get_autotest_by_external_id(
        &self,
        project_id: &str,
        external_id: &str,
    ) -> ApiResult<Option<AutotestModel>> {
        let body = json!({
            "filter": {
                "projectIds": [project_id],
                "externalIds": [external_id],
                "isDeleted": false,
            }
        });
        let found: Vec<AutotestModel> = self
            .send_json(self.request(Method::POST, "/autoTests/search").json(&body))
            .await?;
        Ok(found.into_iter().find(|a| a.external_id == external_id))
    }

    async fn create_autotest(&self, payload: &AutotestPost) -> ApiResult<String> {
        let created: IdModel = self
            .send_json(self.request(Method::POST, "/autoTests").json(payload))
            .await?;
        Ok(created.id)
    }

    async fn update_autotest(&self, payload: &AutotestPut) -> ApiResult<()> {
        self.send_empty(self.request(Method::PUT, "/autoTests").json(payload))
            .await
    }

    async fn bulk_create_autotests(&self, payloads: &[AutotestPost]) -> ApiResult<()> {
        self.send_empty(self.request(Method::POST, "/autoTests/bulk").json(payloads))
            .await
    }

    async fn bulk_update_autotests(&self, payloads: &[AutotestPut]) -> ApiResult<()> {
        self.send_empty(self.request(Method::PUT, "/autoTests/bulk").json(payloads))
            .await
    }

    async fn link_autotest_to_work_item(
        &self,
        autotest_id: &str,
        work_item_id: &str,
    ) -> ApiResult<()> {
        let path = format!("/autoTests/{autotest_id}/workItems");
        self.send_empty(
            self.request(Method::POST, &path)
                .json(&json!({ "id": work_item_id })),
        )
        .await
    }

    async fn unlink_autotest_from_work_item(
        &self,
        autotest_id: &str,
        work_item_id: &str,
    ) -> ApiResult<()> {
        let path = format!("/autoTests/{autotest_id}/workItems");
        self.send_empty(
            self.request(Method::DELETE, &path)
                .query(&[("workItemId", work_item_id)]),
        )
        .await
    }

    async fn get_work_items_linked_to_autotest(
        &self,
        autotest_id: &str,
    ) -> ApiResult<Vec<String>> {
        let path = format!("/autoTests/{autotest_id}/workItems");
        let items: Vec<WorkItemIdentifier> =
            self.send_json(self.request(Method::GET, &path)).await?;
        Ok(items
            .into_iter()
            .map(|item| item.global_id.map(|g| g.to_string()).unwrap_or(item.id))
            .collect())
    }

    async fn submit_results_for_run(
        &self,
        run_id: &str,
        results: &[TestResultPost],
    ) -> ApiResult<()> {
        let path = format!("/testRuns/{run_id}/testResults");
        self.send_empty(self.request(Method::POST, &path).json(results))
            .await
    }

    async fn create_test_run(&self, project_id: &str, name: &str) -> ApiResult<String> {
        let body = TestRunPost {
            project_id: project_id.to_string(),
            name: name.to_string(),
        };
        let created: IdModel = self
            .send_json(self.request(Method::POST, "/testRuns").json(&body))
            .await?;
        Ok(created.id)
    }

    async fn start_test_run(&self, run_id: &str) -> ApiResult<()> {
        let path = format!("/testRuns/{run_id}/start");
        self.send_empty(self.request(Method::POST, &path)).await
    }

    async fn get_test_run_resolved_external_ids(
        &self,
        run_id: &str,
        configuration_id: &str,
    ) -> ApiResult<Vec<String>> {
        let path = format!("/testRuns/{run_id}");
        let run: TestRunModel = self.send_json(self.request(Method::GET, &path)).await?;
        Ok(run
            .test_results
            .into_iter()
            .filter(|r| r.configuration_id == configuration_id)
            .filter_map(|r| r.auto_test.map(|a| a.external_id))
            .collect())
    }
}
