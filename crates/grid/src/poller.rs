//! Batched completion polling.
//!
//! One background task resolves every in-flight job. Each cycle it
//! snapshots the pending set, queries the provider in batches, and for
//! every job that reached a terminal state: removes it from the set,
//! returns its admission token, and resolves the submitter's future.
//! That ordering keeps the set, the token count, and the waiting
//! futures consistent even when a submitter has already gone away.

use std::sync::Arc;
use std::time::Duration;

use buildgrid_core::types::{JobOutcome, JobStatusReport};
use buildgrid_provider::job::{JobProvider, MAX_STATUS_BATCH};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::PendingSet;
use crate::semaphore::AsyncSemaphore;

/// Background task that resolves dispatched jobs as they finish.
pub(crate) struct CompletionPoller {
    provider: Arc<dyn JobProvider>,
    pending: Arc<PendingSet>,
    semaphore: Arc<AsyncSemaphore>,
    initial_delay: Duration,
    period: Duration,
}

impl CompletionPoller {
    pub(crate) fn new(
        provider: Arc<dyn JobProvider>,
        pending: Arc<PendingSet>,
        semaphore: Arc<AsyncSemaphore>,
        initial_delay: Duration,
        period: Duration,
    ) -> Self {
        Self {
            provider,
            pending,
            semaphore,
            initial_delay,
            period,
        }
    }

    /// Poll until cancelled.
    ///
    /// The first cycle waits the full initial delay; remote jobs spend
    /// that long on provisioning, so polling earlier is wasted traffic.
    pub(crate) async fn run(self, cancel: CancellationToken) {
        tracing::debug!(
            initial_delay_secs = self.initial_delay.as_secs(),
            period_secs = self.period.as_secs(),
            "Completion poller started",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Completion poller cancelled before first cycle");
                return;
            }
            _ = tokio::time::sleep(self.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Completion poller cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// One reconcile cycle over the current pending set.
    async fn poll_once(&self) {
        let ids = self.pending.pending_ids().await;
        if ids.is_empty() {
            return;
        }

        let mut terminal = Vec::new();
        for batch in ids.chunks(MAX_STATUS_BATCH) {
            match self.provider.batch_get_status(batch).await {
                Ok(reports) => {
                    terminal.extend(reports.into_iter().filter(|r| r.terminal));
                }
                // A failed batch leaves its jobs pending; they are
                // re-queried next cycle.
                Err(e) => {
                    tracing::error!(
                        batch_size = batch.len(),
                        error = %e,
                        "Status query failed; batch retried next cycle",
                    );
                }
            }
        }

        let completed_this_poll = terminal.len();
        for report in terminal {
            self.resolve(report).await;
        }

        let (submitted, resolved, in_flight) = self.pending.stats().await;
        tracing::info!(
            total = submitted,
            completed = resolved,
            in_progress = in_flight,
            completed_this_poll,
            "Job status poll",
        );
    }

    /// Resolve one terminal job: remove, return the token, wake the
    /// submitter.
    async fn resolve(&self, report: JobStatusReport) {
        let Some(job) = self.pending.take(&report.job_id).await else {
            // Already resolved by an earlier cycle; providers may
            // report a terminal job more than once.
            return;
        };

        if let Err(violation) = self.semaphore.release().await {
            tracing::error!(
                job_id = %report.job_id,
                error = %violation,
                "Token release failed while resolving job",
            );
        }

        let outcome = report.outcome.unwrap_or(JobOutcome::Fault);
        tracing::info!(
            job_id = %report.job_id,
            invocation = job.invocation_id.as_deref().unwrap_or("-"),
            outcome = %outcome,
            elapsed_secs = (chrono::Utc::now() - job.submitted_at).num_seconds(),
            "Remote job finished",
        );

        // The submitter may have been dropped; the token was already
        // returned, so nothing leaks.
        let _ = job.completion.send(outcome);
    }
}
