//! Top-level wiring for the dispatch subsystem.
//!
//! [`GridCoordinator`] owns everything dispatch needs (the admission
//! semaphore, the one-time environment bootstrap, the dispatcher, the
//! role-specific router, and the poller's cancellation token) and
//! tears it all down in one place.

use std::path::PathBuf;
use std::sync::Arc;

use buildgrid_core::config::{GridConfig, GridMode};
use buildgrid_provider::job::JobProvider;
use buildgrid_provider::logs::LogSource;
use buildgrid_provider::store::ArchiveStore;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::EnvironmentBootstrap;
use crate::dispatcher::{GridDispatcher, PendingSet};
use crate::router::InvocationRouter;
use crate::semaphore::AsyncSemaphore;

/// Owns and wires the dispatch subsystem for one process.
pub struct GridCoordinator {
    config: GridConfig,
    semaphore: Arc<AsyncSemaphore>,
    pending: Arc<PendingSet>,
    dispatcher: Arc<GridDispatcher>,
    router: Arc<InvocationRouter>,
    cancel: CancellationToken,
}

impl GridCoordinator {
    /// Build the subsystem for the role the configuration selects.
    ///
    /// `workdir` is the workspace root that gets archived for remote
    /// jobs; it must be inside a git working tree when dispatch is
    /// enabled.
    pub fn new(
        config: GridConfig,
        provider: Arc<dyn JobProvider>,
        store: Arc<dyn ArchiveStore>,
        logs: Arc<dyn LogSource>,
        workdir: PathBuf,
    ) -> Self {
        let semaphore = Arc::new(AsyncSemaphore::new(config.concurrency));
        let pending = Arc::new(PendingSet::default());
        let cancel = CancellationToken::new();
        let bootstrap = Arc::new(EnvironmentBootstrap::new(
            config.clone(),
            Arc::clone(&provider),
            store,
            workdir,
        ));
        let dispatcher = Arc::new(GridDispatcher::new(
            config.clone(),
            Arc::clone(&provider),
            Arc::clone(&semaphore),
            bootstrap,
            Arc::clone(&pending),
            cancel.clone(),
        ));

        let mode = config.mode();
        tracing::info!(mode = ?mode, concurrency = config.concurrency, "Grid coordinator starting");
        let router = Arc::new(match mode {
            GridMode::Local => InvocationRouter::local(),
            GridMode::Caller => {
                InvocationRouter::caller(Arc::clone(&dispatcher), logs, config.max_log_pages)
            }
            GridMode::Worker { target } => InvocationRouter::worker(target),
        });

        Self {
            config,
            semaphore,
            pending,
            dispatcher,
            router,
            cancel,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Role-specific step router.
    pub fn router(&self) -> Arc<InvocationRouter> {
        Arc::clone(&self.router)
    }

    /// Direct access to the dispatcher, for callers that manage their
    /// own step routing.
    pub fn dispatcher(&self) -> Arc<GridDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Shut the subsystem down.
    ///
    /// Stops the completion poller and abandons every in-flight job:
    /// their submitters resolve with a shutdown error and their
    /// admission tokens are returned. Remote jobs already running are
    /// left to the provider's own duration cap.
    pub async fn close(&self) {
        self.cancel.cancel();

        let abandoned = self.pending.drain().await;
        if abandoned.is_empty() {
            tracing::info!("Grid coordinator closed");
            return;
        }

        tracing::warn!(
            abandoned = abandoned.len(),
            "Grid coordinator closed with jobs still in flight",
        );
        for (job_id, job) in abandoned {
            tracing::warn!(
                job_id = %job_id,
                invocation = job.invocation_id.as_deref().unwrap_or("-"),
                "Abandoning in-flight job",
            );
            if let Err(violation) = self.semaphore.release().await {
                tracing::error!(job_id = %job_id, error = %violation, "Token release failed during close");
            }
            // Dropping the sender resolves the submitter with Shutdown.
            drop(job.completion);
        }
    }
}
