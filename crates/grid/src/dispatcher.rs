//! Remote job dispatch.
//!
//! [`GridDispatcher::submit`] is the one entry point for sending a unit
//! of work to the grid: it takes an admission token, triggers the
//! one-time environment bootstrap, submits the job, registers a pending
//! completion, and suspends the caller until the completion poller
//! observes the job's terminal state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use buildgrid_core::buildspec::{render_buildspec, JobTarget};
use buildgrid_core::config::GridConfig;
use buildgrid_core::types::{JobId, JobOutcome, Timestamp};
use buildgrid_provider::job::{JobProvider, StartJobRequest};
use rand::Rng;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::bootstrap::EnvironmentBootstrap;
use crate::error::GridError;
use crate::poller::CompletionPoller;
use crate::semaphore::AsyncSemaphore;

/// Upper bound on the random pre-submission delay. Spreads a burst of
/// simultaneous dispatches out so the provider is not hit in lockstep.
const ANTI_HERD_MAX_MS: u64 = 500;

/// Terminal result of one dispatched job.
#[derive(Debug, Clone)]
pub struct JobResolution {
    /// Remote job that ran the work.
    pub job_id: JobId,
    /// Outcome the provider reported.
    pub outcome: JobOutcome,
}

/// One dispatched unit of work awaiting resolution.
pub(crate) struct PendingJob {
    /// Invocation the remote job was assigned, for logging.
    pub invocation_id: Option<String>,
    /// Resolved by the poller with the job's terminal outcome.
    pub completion: oneshot::Sender<JobOutcome>,
    /// When the job was submitted.
    pub submitted_at: Timestamp,
}

/// The live set of dispatched, unresolved jobs.
///
/// The dispatcher is the only writer that adds; the poller is the only
/// writer that removes. Both go through the one lock here, so a job can
/// never be half-registered while a reconcile pass scans the set.
#[derive(Default)]
pub(crate) struct PendingSet {
    jobs: Mutex<HashMap<JobId, PendingJob>>,
    submitted_total: AtomicU64,
    resolved_total: AtomicU64,
}

impl PendingSet {
    pub(crate) async fn insert(&self, job_id: JobId, job: PendingJob) {
        self.submitted_total.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().await.insert(job_id, job);
    }

    /// Ids of every job still awaiting a terminal status.
    pub(crate) async fn pending_ids(&self) -> Vec<JobId> {
        self.jobs.lock().await.keys().cloned().collect()
    }

    /// Remove one job for resolution. Removal precedes resolution, so a
    /// job can never be resolved twice.
    pub(crate) async fn take(&self, job_id: &str) -> Option<PendingJob> {
        let taken = self.jobs.lock().await.remove(job_id);
        if taken.is_some() {
            self.resolved_total.fetch_add(1, Ordering::SeqCst);
        }
        taken
    }

    /// Remove every pending job (coordinator shutdown).
    pub(crate) async fn drain(&self) -> Vec<(JobId, PendingJob)> {
        self.jobs.lock().await.drain().collect()
    }

    /// (submitted ever, resolved ever, currently in flight).
    pub(crate) async fn stats(&self) -> (u64, u64, usize) {
        let in_flight = self.jobs.lock().await.len();
        (
            self.submitted_total.load(Ordering::SeqCst),
            self.resolved_total.load(Ordering::SeqCst),
            in_flight,
        )
    }
}

/// Accepts units of work and dispatches them as remote jobs.
pub struct GridDispatcher {
    config: GridConfig,
    provider: Arc<dyn JobProvider>,
    semaphore: Arc<AsyncSemaphore>,
    bootstrap: Arc<EnvironmentBootstrap>,
    pending: Arc<PendingSet>,
    poller_started: AtomicBool,
    poller_cancel: CancellationToken,
}

impl GridDispatcher {
    pub(crate) fn new(
        config: GridConfig,
        provider: Arc<dyn JobProvider>,
        semaphore: Arc<AsyncSemaphore>,
        bootstrap: Arc<EnvironmentBootstrap>,
        pending: Arc<PendingSet>,
        poller_cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            provider,
            semaphore,
            bootstrap,
            pending,
            poller_started: AtomicBool::new(false),
            poller_cancel,
        }
    }

    /// Dispatch one unit of work and wait for its remote outcome.
    ///
    /// Suspends while waiting for an admission token, again during the
    /// first-use environment bootstrap, and finally until the poller
    /// resolves the job, which may take the job's full execution
    /// duration. There is no client-side timeout beyond the remote
    /// provider's maximum-duration override.
    pub async fn submit(&self, target: &JobTarget) -> Result<JobResolution, GridError> {
        self.semaphore.acquire().await?;

        let env = match self.bootstrap.ensure_ready().await {
            Ok(env) => env,
            Err(e) => {
                // Fatal either way; hand the token back so concurrent
                // callers fail at the same point instead of hanging.
                let _ = self.semaphore.release().await;
                return Err(GridError::Bootstrap(e));
            }
        };

        // Anti-herding: spread simultaneous submissions out a little.
        let jitter = rand::rng().random_range(0..ANTI_HERD_MAX_MS);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let request = StartJobRequest {
            project: env.project.clone(),
            source_location: env.source_location.clone(),
            buildspec: render_buildspec(&self.config.test_host, Some(target)),
            timeout_minutes: self.config.max_job_duration_minutes,
            privileged: true,
        };

        let handle = match self.provider.start_job(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    selector = %target.selector,
                    error = %e,
                    "Remote job submission rejected",
                );
                if let Err(violation) = self.semaphore.release().await {
                    return Err(GridError::Bookkeeping(violation));
                }
                return Err(GridError::Submission(e));
            }
        };

        let (completion, resolved) = oneshot::channel();
        self.pending
            .insert(
                handle.id.clone(),
                PendingJob {
                    invocation_id: target.invocation_id.clone(),
                    completion,
                    submitted_at: chrono::Utc::now(),
                },
            )
            .await;
        self.ensure_poller();

        tracing::info!(
            job_id = %handle.id,
            selector = %target.selector,
            invocation = target.invocation_id.as_deref().unwrap_or("-"),
            "Remote job submitted",
        );

        // Resolution happens out-of-band in the poller. A dropped
        // sender means the coordinator shut down underneath us.
        let outcome = resolved.await.map_err(|_| GridError::Shutdown)?;
        Ok(JobResolution {
            job_id: handle.id,
            outcome,
        })
    }

    /// Start the completion poller on first use, at most once.
    fn ensure_poller(&self) {
        if self
            .poller_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let poller = CompletionPoller::new(
                Arc::clone(&self.provider),
                Arc::clone(&self.pending),
                Arc::clone(&self.semaphore),
                self.config.poll_initial_delay,
                self.config.poll_period,
            );
            let cancel = self.poller_cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await });
        }
    }
}
