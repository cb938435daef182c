//! One-time environment bootstrap.
//!
//! Before the first remote job can run, the workspace must be archived
//! and published, and the remote build project provisioned. That work
//! happens exactly once per coordinator, no matter how many dispatch
//! requests race on first use: the first caller performs it, everyone
//! else awaits the same attempt, and the outcome, success or failure,
//! is shared and sticky. A failed bootstrap is fatal to the whole
//! dispatch subsystem; there is no second attempt and no silent
//! fallback to local execution.

use std::path::PathBuf;
use std::sync::Arc;

use buildgrid_core::buildspec::{project_name, render_buildspec};
use buildgrid_core::config::GridConfig;
use buildgrid_core::error::ConfigError;
use buildgrid_core::types::ProjectRef;
use buildgrid_provider::archive::{create_workspace_archive, ArchiveError};
use buildgrid_provider::git::{head_revision, GitError};
use buildgrid_provider::job::{JobProvider, ProjectSpec, ProviderError};
use buildgrid_provider::store::{archive_key, ArchiveStore, StoreError};
use tokio::sync::OnceCell;

/// Why the environment could not be brought up.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Remote settings missing from the configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Source revision discovery failed.
    #[error("Could not resolve source revision: {0}")]
    Revision(#[from] GitError),

    /// Archiving the working tree failed.
    #[error("Could not archive workspace: {0}")]
    Archive(#[from] ArchiveError),

    /// Publishing the archive failed.
    #[error("Could not upload workspace archive: {0}")]
    Upload(#[from] StoreError),

    /// Provisioning the remote project failed.
    #[error("Could not provision remote project: {0}")]
    Provision(#[from] ProviderError),
}

/// The bootstrapped remote environment jobs run against.
#[derive(Debug, Clone)]
pub struct ReadyEnvironment {
    /// Provisioned (or reused) remote build project.
    pub project: ProjectRef,
    /// Object-storage location of the workspace archive.
    pub source_location: String,
}

/// Outcome of the single bootstrap attempt, shared by every caller.
pub type BootstrapOutcome = Result<Arc<ReadyEnvironment>, Arc<BootstrapError>>;

/// Lazily-initialized, once-only environment bootstrap.
pub struct EnvironmentBootstrap {
    config: GridConfig,
    provider: Arc<dyn JobProvider>,
    store: Arc<dyn ArchiveStore>,
    workdir: PathBuf,
    outcome: OnceCell<BootstrapOutcome>,
}

impl EnvironmentBootstrap {
    pub fn new(
        config: GridConfig,
        provider: Arc<dyn JobProvider>,
        store: Arc<dyn ArchiveStore>,
        workdir: PathBuf,
    ) -> Self {
        Self {
            config,
            provider,
            store,
            workdir,
            outcome: OnceCell::new(),
        }
    }

    /// Whether a bootstrap attempt has completed (either way).
    pub fn attempted(&self) -> bool {
        self.outcome.initialized()
    }

    /// Ensure the environment is ready, initializing it on first use.
    ///
    /// Safe under arbitrary concurrency: exactly one caller runs the
    /// initialization; concurrent callers wait for that same attempt
    /// rather than starting their own, and later callers get the cached
    /// outcome. Failure is sticky: one attempt per coordinator
    /// lifetime.
    pub async fn ensure_ready(&self) -> BootstrapOutcome {
        self.outcome
            .get_or_init(|| async {
                match self.initialize().await {
                    Ok(env) => {
                        tracing::info!(
                            project = %env.project,
                            source = %env.source_location,
                            "Remote environment ready",
                        );
                        Ok(Arc::new(env))
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "Environment bootstrap failed; refusing all dispatch requests",
                        );
                        Err(Arc::new(e))
                    }
                }
            })
            .await
            .clone()
    }

    /// The real initialization: revision -> project name -> archive ->
    /// upload -> provision.
    async fn initialize(&self) -> Result<ReadyEnvironment, BootstrapError> {
        let remote = self.config.remote()?;

        let revision = head_revision(&self.workdir).await?;
        let project = project_name(&self.config.test_host, &revision);
        tracing::info!(project = %project, revision = %revision, "Bootstrapping remote project");

        let archive =
            create_workspace_archive(&self.workdir, &self.config.archive_paths, &project).await?;
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{project}.zip"));
        let key = archive_key(&file_name);
        self.store.put_archive(&key, &archive).await?;

        let spec = ProjectSpec {
            name: project.clone(),
            buildspec: render_buildspec(&self.config.test_host, None),
            service_role: remote.service_role.clone(),
            cache_location: format!("{}/cache", remote.bucket),
            log_group: remote.log_group.clone(),
        };
        let project = self.provider.ensure_project(&spec).await?;

        Ok(ReadyEnvironment {
            project,
            source_location: format!("{}/{}", remote.bucket, key),
        })
    }
}
