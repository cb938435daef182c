//! In-memory provider, store, and log source fakes plus a disposable
//! git workspace, shared by the integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use buildgrid_core::config::GridConfig;
use buildgrid_core::types::{JobId, JobOutcome, JobStatusReport};
use buildgrid_provider::job::{
    JobHandle, JobProvider, ProjectSpec, ProviderError, StartJobRequest, MAX_STATUS_BATCH,
};
use buildgrid_provider::logs::{LogError, LogPage, LogSource};
use buildgrid_provider::store::{ArchiveStore, StoreError};
use tokio::sync::Mutex;

#[derive(Default)]
struct ProviderState {
    ensure_calls: u32,
    started: Vec<StartJobRequest>,
    next_job: u32,
    statuses: HashMap<JobId, JobStatusReport>,
    reject_next_start: Option<String>,
    failing_batch_jobs: HashSet<JobId>,
    batch_sizes: Vec<usize>,
}

/// In-memory [`JobProvider`] with scriptable statuses and failures.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    pub async fn ensure_calls(&self) -> u32 {
        self.state.lock().await.ensure_calls
    }

    pub async fn started_ids(&self) -> Vec<JobId> {
        let state = self.state.lock().await;
        (0..state.started.len() as u32)
            .map(|n| job_id_for(n))
            .collect()
    }

    pub async fn started_count(&self) -> usize {
        self.state.lock().await.started.len()
    }

    pub async fn started_requests(&self) -> Vec<StartJobRequest> {
        self.state.lock().await.started.clone()
    }

    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().await.batch_sizes.clone()
    }

    /// Mark a job terminal with the given outcome.
    pub async fn complete(&self, job_id: &str, outcome: JobOutcome) {
        self.state.lock().await.statuses.insert(
            job_id.to_string(),
            JobStatusReport {
                job_id: job_id.to_string(),
                terminal: true,
                outcome: Some(outcome),
            },
        );
    }

    /// Reject the next `start_job` call with the given message.
    pub async fn reject_next_start(&self, message: &str) {
        self.state.lock().await.reject_next_start = Some(message.to_string());
    }

    /// Fail the next status batch that contains `job_id`, once.
    pub async fn fail_batch_containing(&self, job_id: &str) {
        self.state
            .lock()
            .await
            .failing_batch_jobs
            .insert(job_id.to_string());
    }
}

fn job_id_for(n: u32) -> JobId {
    format!("fake-project:stream-{n:04}")
}

#[async_trait]
impl JobProvider for FakeProvider {
    async fn ensure_project(&self, spec: &ProjectSpec) -> Result<String, ProviderError> {
        let mut state = self.state.lock().await;
        state.ensure_calls += 1;
        Ok(spec.name.clone())
    }

    async fn start_job(&self, request: &StartJobRequest) -> Result<JobHandle, ProviderError> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.reject_next_start.take() {
            return Err(ProviderError::Rejected(message));
        }
        let id = job_id_for(state.next_job);
        state.next_job += 1;
        state.started.push(request.clone());
        state.statuses.insert(
            id.clone(),
            JobStatusReport {
                job_id: id.clone(),
                terminal: false,
                outcome: None,
            },
        );
        Ok(JobHandle {
            id,
            project: request.project.clone(),
        })
    }

    async fn batch_get_status(
        &self,
        ids: &[JobId],
    ) -> Result<Vec<JobStatusReport>, ProviderError> {
        let mut state = self.state.lock().await;
        if ids.len() > MAX_STATUS_BATCH {
            return Err(ProviderError::BatchTooLarge(ids.len()));
        }
        state.batch_sizes.push(ids.len());

        if let Some(poisoned) = ids
            .iter()
            .find(|id| state.failing_batch_jobs.contains(*id))
            .cloned()
        {
            state.failing_batch_jobs.remove(&poisoned);
            return Err(ProviderError::Api {
                status: 500,
                body: "internal error".to_string(),
            });
        }

        Ok(ids
            .iter()
            .filter_map(|id| state.statuses.get(id).cloned())
            .collect())
    }
}

#[derive(Default)]
struct StoreState {
    uploads: Vec<String>,
    attempts: u32,
    fail_uploads: bool,
}

/// In-memory [`ArchiveStore`] recording uploaded keys.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn failing() -> Self {
        Self {
            state: Mutex::new(StoreState {
                uploads: Vec::new(),
                attempts: 0,
                fail_uploads: true,
            }),
        }
    }

    pub async fn uploads(&self) -> Vec<String> {
        self.state.lock().await.uploads.clone()
    }

    pub async fn attempts(&self) -> u32 {
        self.state.lock().await.attempts
    }
}

#[async_trait]
impl ArchiveStore for FakeStore {
    async fn put_archive(&self, key: &str, _path: &Path) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.attempts += 1;
        if state.fail_uploads {
            return Err(StoreError::Upload("access denied".to_string()));
        }
        state.uploads.push(key.to_string());
        Ok(())
    }
}

/// [`LogSource`] serving one fixed sequence of pages per stream.
#[derive(Default)]
pub struct FakeLogs {
    streams: HashMap<String, Vec<LogPage>>,
}

impl FakeLogs {
    /// Serve `lines` for `stream` as a single page.
    pub fn with_stream(mut self, stream: &str, lines: &[&str]) -> Self {
        self.streams.insert(
            stream.to_string(),
            vec![LogPage {
                lines: lines.iter().map(|s| s.to_string()).collect(),
                next_token: None,
            }],
        );
        self
    }
}

#[async_trait]
impl LogSource for FakeLogs {
    async fn fetch_page(
        &self,
        stream_name: &str,
        token: Option<&str>,
    ) -> Result<LogPage, LogError> {
        let pages = self
            .streams
            .get(stream_name)
            .ok_or_else(|| LogError::Fetch(format!("no such stream: {stream_name}")))?;
        let index: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
        Ok(pages[index].clone())
    }
}

/// Install the test log subscriber once per binary; `RUST_LOG` selects
/// verbosity.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// A committed single-file git working tree.
pub fn git_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/lib.rs"), "pub fn probe() {}\n").unwrap();
    std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"probe\"\n").unwrap();

    for args in [
        vec!["init"],
        vec!["config", "user.email", "ci@example.com"],
        vec!["config", "user.name", "ci"],
        vec!["add", "."],
        vec!["commit", "-m", "initial"],
    ] {
        let status = Command::new("git")
            .args(&args)
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert!(status.status.success(), "git {args:?} failed");
    }
    dir
}

/// Caller-mode configuration with fast polling for tests.
pub fn test_config(concurrency: usize) -> GridConfig {
    GridConfig {
        concurrency,
        enabled: true,
        bucket: Some("test-bucket".to_string()),
        service_role: Some("arn:aws:iam::000000000000:role/test".to_string()),
        log_group: Some("/test/builds".to_string()),
        test_host: "testhost".to_string(),
        archive_paths: vec!["src".to_string(), "Cargo.toml".to_string()],
        poll_initial_delay: Duration::from_millis(40),
        poll_period: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Poll `probe` until it returns true or the deadline passes.
pub async fn wait_until<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !probe().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
