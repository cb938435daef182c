//! Remote job log retrieval.
//!
//! Logs are the failure diagnostic for a dispatched unit of work: where
//! a local failure yields a stack trace, a remote one yields the build
//! segment of the job's log stream. Fetching is paginated and bounded;
//! filtering (markers, skipped-sibling lines) is delegated to
//! [`buildgrid_core::logfilter`].

use async_trait::async_trait;
use buildgrid_core::logfilter::BuildLogFilter;

/// One page of log lines plus the token for the next page, if any.
#[derive(Debug, Clone)]
pub struct LogPage {
    /// Log lines in order.
    pub lines: Vec<String>,
    /// Token for the following page; `None` when the stream is exhausted.
    pub next_token: Option<String>,
}

/// Errors from the log source.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The fetch request failed.
    #[error("Log fetch failed: {0}")]
    Fetch(String),
}

/// Paginated source of remote job log lines.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetch one page of the named stream, from the start when `token`
    /// is `None`.
    async fn fetch_page(
        &self,
        stream_name: &str,
        token: Option<&str>,
    ) -> Result<LogPage, LogError>;
}

/// Log stream name for a job: the segment after the last `:` of its id.
pub fn stream_name_for(job_id: &str) -> &str {
    job_id.rsplit(':').next().unwrap_or(job_id)
}

/// Fetch and filter the build-segment logs for one job.
///
/// Pages forward up to `max_pages`, stopping early once the build-end
/// marker is seen or the stream is exhausted. A page fetch error ends
/// fetching with whatever was collected; truncated diagnostics beat no
/// diagnostics.
pub async fn fetch_job_logs(source: &dyn LogSource, job_id: &str, max_pages: u32) -> String {
    let stream = stream_name_for(job_id);
    let mut filter = BuildLogFilter::new();
    let mut collected: Vec<String> = Vec::new();
    let mut token: Option<String> = None;

    for page in 1..=max_pages {
        tracing::info!(job_id, page, "Fetching log page");
        let result = source.fetch_page(stream, token.as_deref()).await;
        let log_page = match result {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(job_id, page, error = %e, "Log page fetch failed");
                break;
            }
        };

        for line in &log_page.lines {
            if filter.offer(line) {
                collected.push(line.clone());
            }
        }

        if filter.finished() || log_page.lines.is_empty() || log_page.next_token.is_none() {
            break;
        }
        token = log_page.next_token;
    }

    tracing::debug!(job_id, lines = collected.len(), "Done fetching job logs");
    collected.join("\n")
}
