//! Coordination service client
//!
//! Finds or starts the shared coordination service, registers this worker
//! and forwards in-progress snapshots when elected master. Every failure
//! here is logged and reported as `false`; callers fall back to normal
//! per-test reporting.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::api::TestResultPost;
use crate::config::SyncStorageConfig;

use super::error::{SyncError, SyncResult};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    pid: &'a str,
    test_run_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    #[serde(default)]
    is_master: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InProgressRequest<'a> {
    test_run_id: &'a str,
    result_payload: &'a TestResultPost,
}

/// Worker-side handle on the coordination service
pub struct SyncStorageRunner {
    config: SyncStorageConfig,
    test_run_id: String,
    pid: String,
    base_url: String,
    client: reqwest::Client,
    running: AtomicBool,
    is_master: AtomicBool,
    already_in_progress: AtomicBool,
    child: tokio::sync::Mutex<Option<Child>>,
    workdir: Mutex<Option<TempDir>>,
}

impl SyncStorageRunner {
    pub fn new(test_run_id: impl Into<String>, config: SyncStorageConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.health_timeout_ms.max(1) * 5))
            .build()
            .unwrap_or_default();

        Self {
            base_url: config.base_url(),
            config,
            test_run_id: test_run_id.into(),
            pid: worker_pid(),
            client,
            running: AtomicBool::new(false),
            is_master: AtomicBool::new(false),
            already_in_progress: AtomicBool::new(false),
            child: tokio::sync::Mutex::new(None),
            workdir: Mutex::new(None),
        }
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::SeqCst)
    }

    pub fn is_already_in_progress(&self) -> bool {
        self.already_in_progress.load(Ordering::SeqCst)
    }

    /// Connect to the service, starting it if needed, and register.
    pub async fn start(&self) -> bool {
        match self.try_start().await {
            Ok(is_master) => {
                self.is_master.store(is_master, Ordering::SeqCst);
                self.running.store(true, Ordering::SeqCst);
                info!(
                    "Registered worker {} with coordination service (master: {})",
                    self.pid, is_master
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "coordination service unavailable, reporting per test");
                self.shutdown().await;
                false
            }
        }
    }

    async fn try_start(&self) -> SyncResult<bool> {
        if !self.check_health().await {
            if !self.config.launch {
                return Err(SyncError::Unavailable(self.base_url.clone()));
            }
            self.launch().await?;
            if !self.wait_healthy().await {
                return Err(SyncError::StartupTimeout(self.config.startup_timeout_secs));
            }
        }
        self.register().await
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        let request = self
            .client
            .get(&url)
            .timeout(Duration::from_millis(self.config.health_timeout_ms))
            .send()
            .await;
        match request {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check of {} failed: {}", url, e);
                false
            }
        }
    }

    async fn wait_healthy(&self) -> bool {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.startup_timeout_secs);
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if self.check_health().await {
                debug!("Coordination service healthy after {:?}", start.elapsed());
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            sleep(interval).await;
        }
    }

    fn command(&self) -> SyncResult<Vec<String>> {
        if let Some(command) = self.config.command.clone().filter(|c| !c.is_empty()) {
            return Ok(command);
        }
        let exe = std::env::current_exe().map_err(|e| SyncError::Launch(e.to_string()))?;
        Ok(vec![
            exe.display().to_string(),
            "sync-storage".to_string(),
            "--port".to_string(),
            self.config.port.clone(),
        ])
    }

    async fn launch(&self) -> SyncResult<()> {
        let command = self.command()?;
        let workdir = tempfile::Builder::new()
            .prefix("tms-sync-storage")
            .tempdir()
            .map_err(|e| SyncError::Launch(e.to_string()))?;

        let stdout = std::fs::File::create(workdir.path().join("service.log"))
            .map_err(|e| SyncError::Launch(e.to_string()))?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| SyncError::Launch(e.to_string()))?;

        info!("Starting coordination service: {}", command.join(" "));
        let child = Command::new(&command[0])
            .args(&command[1..])
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SyncError::Launch(e.to_string()))?;

        *self.child.lock().await = Some(child);
        *self.workdir.lock() = Some(workdir);
        Ok(())
    }

    async fn register(&self) -> SyncResult<bool> {
        let url = format!("{}/register", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RegisterRequest {
                pid: &self.pid,
                test_run_id: &self.test_run_id,
            })
            .send()
            .await
            .map_err(|e| SyncError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Status(response.status().as_u16()));
        }
        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Request(e.to_string()))?;
        Ok(body.is_master)
    }

    /// Forward an early snapshot of a test result, at most once per test and
    /// only from the master worker.
    pub async fn send_in_progress_test_result(&self, result: &TestResultPost) -> bool {
        if !self.is_running() || !self.is_master() {
            return false;
        }
        if self
            .already_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        match self.post_in_progress(result).await {
            Ok(()) => true,
            Err(e) => {
                self.already_in_progress.store(false, Ordering::SeqCst);
                warn!(error = %e, "failed to send in-progress result");
                false
            }
        }
    }

    async fn post_in_progress(&self, result: &TestResultPost) -> SyncResult<()> {
        let url = format!("{}/results/in-progress", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&InProgressRequest {
                test_run_id: &self.test_run_id,
                result_payload: result,
            })
            .send()
            .await
            .map_err(|e| SyncError::Request(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::Status(response.status().as_u16()))
        }
    }

    /// Allow the next test to send its snapshot
    pub fn reset_in_progress_flag(&self) {
        self.already_in_progress.store(false, Ordering::SeqCst);
    }

    /// Stop a service started by this worker and remove its directory
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!("Coordination service already stopped: {}", e);
            }
        }
        if let Some(workdir) = self.workdir.lock().take() {
            if let Err(e) = workdir.close() {
                debug!("Failed to remove coordination directory: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Identifier unique per process instance
fn worker_pid() -> String {
    let thread = format!("{:?}", std::thread::current().id());
    let thread: String = thread.chars().filter(char::is_ascii_digit).collect();
    format!(
        "worker-{}-{}-{}",
        Utc::now().timestamp_micros(),
        thread,
        std::process::id()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestResult;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> SyncStorageConfig {
        SyncStorageConfig {
            enabled: true,
            port: server.address().port().to_string(),
            startup_timeout_secs: 1,
            health_timeout_ms: 200,
            poll_interval_ms: 50,
            launch: false,
            command: None,
        }
    }

    async fn mount_service(server: &MockServer, is_master: bool) {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .and(body_partial_json(json!({"testRunId": "run-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"isMaster": is_master})))
            .mount(server)
            .await;
    }

    fn snapshot() -> TestResultPost {
        TestResultPost::from_result(&TestResult::new("ext-1", "Login"), "conf")
    }

    #[test]
    fn test_worker_pid_is_unique_per_instance() {
        let a = worker_pid();
        std::thread::sleep(Duration::from_millis(2));
        let b = worker_pid();
        assert!(a.starts_with("worker-"));
        assert!(a.ends_with(&std::process::id().to_string()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_start_registers_master() {
        let server = MockServer::start().await;
        mount_service(&server, true).await;

        let runner = SyncStorageRunner::new("run-1", config_for(&server));
        assert!(runner.start().await);
        assert!(runner.is_running());
        assert!(runner.is_master());
    }

    async fn mount_unhealthy(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/results/in-progress"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_start_fails_without_service_when_launch_disabled() {
        let server = MockServer::start().await;
        mount_unhealthy(&server).await;

        let runner = SyncStorageRunner::new("run-1", config_for(&server));
        assert!(!runner.start().await);
        assert!(!runner.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_times_out_when_launched_service_stays_unhealthy() {
        let server = MockServer::start().await;
        mount_unhealthy(&server).await;

        let config = SyncStorageConfig {
            launch: true,
            command: Some(vec!["sleep".to_string(), "5".to_string()]),
            ..config_for(&server)
        };
        let runner = SyncStorageRunner::new("run-1", config);

        let started = Instant::now();
        assert!(!runner.start().await);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(!runner.is_running());
        assert!(!runner.is_master());

        // the launched process and its directory are gone
        assert!(runner.child.lock().await.is_none());
        assert!(runner.workdir.lock().is_none());

        assert!(!runner.send_in_progress_test_result(&snapshot()).await);
        assert!(!runner.is_already_in_progress());
    }

    #[tokio::test]
    async fn test_in_progress_latch() {
        let server = MockServer::start().await;
        mount_service(&server, true).await;
        Mock::given(method("POST"))
            .and(path("/results/in-progress"))
            .and(body_partial_json(json!({"testRunId": "run-1"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let runner = SyncStorageRunner::new("run-1", config_for(&server));
        assert!(runner.start().await);

        assert!(runner.send_in_progress_test_result(&snapshot()).await);
        assert!(runner.is_already_in_progress());
        assert!(!runner.send_in_progress_test_result(&snapshot()).await);

        runner.reset_in_progress_flag();
        assert!(runner.send_in_progress_test_result(&snapshot()).await);
    }

    #[tokio::test]
    async fn test_non_master_never_sends() {
        let server = MockServer::start().await;
        mount_service(&server, false).await;
        Mock::given(method("POST"))
            .and(path("/results/in-progress"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let runner = SyncStorageRunner::new("run-1", config_for(&server));
        assert!(runner.start().await);
        assert!(!runner.is_master());
        assert!(!runner.send_in_progress_test_result(&snapshot()).await);
    }

    #[tokio::test]
    async fn test_failed_send_releases_latch() {
        let server = MockServer::start().await;
        mount_service(&server, true).await;
        Mock::given(method("POST"))
            .and(path("/results/in-progress"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let runner = SyncStorageRunner::new("run-1", config_for(&server));
        assert!(runner.start().await);
        assert!(!runner.send_in_progress_test_result(&snapshot()).await);
        assert!(!runner.is_already_in_progress());
    }

    #[tokio::test]
    async fn test_shutdown_without_child() {
        let server = MockServer::start().await;
        mount_service(&server, true).await;

        let runner = SyncStorageRunner::new("run-1", config_for(&server));
        assert!(runner.start().await);
        runner.shutdown().await;
        assert!(!runner.is_running());
        assert!(!runner.send_in_progress_test_result(&snapshot()).await);
    }
}
