//! Shared identifier and status types.

use serde::{Deserialize, Serialize};

/// Provider-assigned identifier for one remote job.
pub type JobId = String;

/// Name of a provisioned remote build project.
pub type ProjectRef = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Terminal outcome of a remote job.
///
/// A job in any of these states will not change further; the poller
/// resolves its completion handle with this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobOutcome {
    /// The job ran and every step succeeded.
    Succeeded,
    /// The job ran and at least one step failed.
    Failed,
    /// The provider could not run the job (infrastructure fault).
    Fault,
    /// The job was stopped externally before finishing.
    Stopped,
    /// The job exceeded its maximum duration.
    TimedOut,
}

impl JobOutcome {
    /// Whether the remote job succeeded.
    pub fn is_success(self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobOutcome::Succeeded => "SUCCEEDED",
            JobOutcome::Failed => "FAILED",
            JobOutcome::Fault => "FAULT",
            JobOutcome::Stopped => "STOPPED",
            JobOutcome::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// One element of a batch status response from the remote provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusReport {
    /// Provider-assigned job identifier this report refers to.
    pub job_id: JobId,
    /// Whether the job has reached a terminal state.
    pub terminal: bool,
    /// Terminal outcome; `None` while the job is still in progress.
    pub outcome: Option<JobOutcome>,
}
