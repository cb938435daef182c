//! Remote job provider boundary.

use async_trait::async_trait;
use buildgrid_core::types::{JobId, JobStatusReport, ProjectRef};

/// Provider-imposed maximum number of job ids per status query.
pub const MAX_STATUS_BATCH: usize = 100;

/// Everything needed to provision (or recognise) a remote build project.
#[derive(Debug, Clone)]
pub struct ProjectSpec {
    /// Project name, already sanitized for the provider.
    pub name: String,
    /// Default pipeline script (full-suite run, no target).
    pub buildspec: String,
    /// Role the provider assumes while running jobs.
    pub service_role: String,
    /// Object-storage location for the provider's build cache.
    pub cache_location: String,
    /// Log group remote jobs write to.
    pub log_group: String,
}

/// Request to start one remote job.
#[derive(Debug, Clone)]
pub struct StartJobRequest {
    /// Project to run under.
    pub project: ProjectRef,
    /// Object-storage location of the workspace archive.
    pub source_location: String,
    /// Pipeline script override targeting one unit of work.
    pub buildspec: String,
    /// Remote-side maximum duration for this job.
    pub timeout_minutes: u32,
    /// Whether the job container needs privileged mode (compose-in-build).
    pub privileged: bool,
}

/// Handle to a started remote job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    /// Provider-assigned job identifier.
    pub id: JobId,
    /// Project the job runs under.
    pub project: ProjectRef,
}

/// Errors from the remote job provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The provider rejected a job submission.
    #[error("Job submission rejected: {0}")]
    Rejected(String),

    /// More ids than [`MAX_STATUS_BATCH`] were passed to one status query.
    #[error("Status query of {0} ids exceeds the batch limit of {MAX_STATUS_BATCH}")]
    BatchTooLarge(usize),
}

/// Remote build/job provider.
///
/// One implementation exists per remote backend; the coordinator holds
/// it as `Arc<dyn JobProvider>` so tests can substitute an in-memory
/// fake.
#[async_trait]
pub trait JobProvider: Send + Sync {
    /// Provision the project if it does not exist, reusing it when it
    /// does. Returns the project reference jobs are started under.
    async fn ensure_project(&self, spec: &ProjectSpec) -> Result<ProjectRef, ProviderError>;

    /// Submit one job for execution.
    async fn start_job(&self, request: &StartJobRequest) -> Result<JobHandle, ProviderError>;

    /// Query current status for up to [`MAX_STATUS_BATCH`] jobs.
    ///
    /// No ordering is implied across the returned reports.
    async fn batch_get_status(
        &self,
        ids: &[JobId],
    ) -> Result<Vec<JobStatusReport>, ProviderError>;
}
