//! REST implementation of the job provider boundary.
//!
//! Wraps a generic build-service HTTP API (project provisioning, job
//! submission, batch status) using [`reqwest`]. The coordinator never
//! sees these wire shapes; it talks to the [`JobProvider`] trait.

use async_trait::async_trait;
use buildgrid_core::types::{JobId, JobStatusReport, ProjectRef};
use serde::{Deserialize, Serialize};

use crate::job::{JobHandle, JobProvider, ProjectSpec, ProviderError, StartJobRequest, MAX_STATUS_BATCH};

/// HTTP client for a build service.
pub struct RestJobProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CreateProjectBody<'a> {
    name: &'a str,
    buildspec: &'a str,
    service_role: &'a str,
    cache_location: &'a str,
    log_group: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    name: ProjectRef,
}

#[derive(Debug, Serialize)]
struct StartJobBody<'a> {
    source_location: &'a str,
    buildspec: &'a str,
    timeout_minutes: u32,
    privileged: bool,
}

#[derive(Debug, Deserialize)]
struct StartJobResponse {
    job_id: JobId,
}

#[derive(Debug, Serialize)]
struct BatchStatusBody<'a> {
    ids: &'a [JobId],
}

#[derive(Debug, Deserialize)]
struct BatchStatusResponse {
    jobs: Vec<JobStatusReport>,
}

impl RestJobProvider {
    /// Create a provider client.
    ///
    /// * `base_url` - Base HTTP URL of the build service, e.g.
    ///   `https://build.internal`.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Create a provider client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling).
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ProviderError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobProvider for RestJobProvider {
    /// `GET /projects/{name}`, falling back to `POST /projects` when the
    /// project does not exist yet.
    async fn ensure_project(&self, spec: &ProjectSpec) -> Result<ProjectRef, ProviderError> {
        let response = self
            .client
            .get(format!("{}/projects/{}", self.base_url, spec.name))
            .send()
            .await?;

        if response.status().is_success() {
            let existing: ProjectResponse = response.json().await?;
            tracing::info!(project = %existing.name, "Reusing existing remote project");
            return Ok(existing.name);
        }
        if response.status() != reqwest::StatusCode::NOT_FOUND {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = CreateProjectBody {
            name: &spec.name,
            buildspec: &spec.buildspec,
            service_role: &spec.service_role,
            cache_location: &spec.cache_location,
            log_group: &spec.log_group,
        };
        let response = self
            .client
            .post(format!("{}/projects", self.base_url))
            .json(&body)
            .send()
            .await?;
        let created: ProjectResponse = Self::parse_response(response).await?;
        tracing::info!(project = %created.name, "Created remote project");
        Ok(created.name)
    }

    /// `POST /projects/{project}/jobs`.
    async fn start_job(&self, request: &StartJobRequest) -> Result<JobHandle, ProviderError> {
        let body = StartJobBody {
            source_location: &request.source_location,
            buildspec: &request.buildspec,
            timeout_minutes: request.timeout_minutes,
            privileged: request.privileged,
        };

        let response = self
            .client
            .post(format!("{}/projects/{}/jobs", self.base_url, request.project))
            .json(&body)
            .send()
            .await?;

        let started: StartJobResponse = Self::parse_response(response).await?;
        Ok(JobHandle {
            id: started.job_id,
            project: request.project.clone(),
        })
    }

    /// `POST /jobs/status` with up to [`MAX_STATUS_BATCH`] ids.
    async fn batch_get_status(
        &self,
        ids: &[JobId],
    ) -> Result<Vec<JobStatusReport>, ProviderError> {
        if ids.len() > MAX_STATUS_BATCH {
            return Err(ProviderError::BatchTooLarge(ids.len()));
        }

        let response = self
            .client
            .post(format!("{}/jobs/status", self.base_url))
            .json(&BatchStatusBody { ids })
            .send()
            .await?;

        let batch: BatchStatusResponse = Self::parse_response(response).await?;
        Ok(batch.jobs)
    }
}
