//! Error taxonomy for the dispatch subsystem.

use std::sync::Arc;

use buildgrid_core::error::ConfigError;
use buildgrid_provider::job::ProviderError;

use crate::bootstrap::BootstrapError;
use crate::semaphore::SemaphoreError;

/// Exit status for an irrecoverable bootstrap failure.
pub const BOOTSTRAP_EXIT_CODE: i32 = 2;

/// Exit status for a configuration error.
pub const CONFIG_EXIT_CODE: i32 = 3;

/// Errors surfaced by the dispatch coordinator.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// Broken configuration; fails fast and is never retried.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The one-time environment bootstrap failed. Fatal to the whole
    /// dispatch subsystem: every pending and future dispatch request
    /// fails with this, and the process should stop accepting work.
    #[error("Environment bootstrap failed: {0}")]
    Bootstrap(Arc<BootstrapError>),

    /// The remote provider rejected this job submission. Scoped to the
    /// individual caller; other in-flight jobs are unaffected.
    #[error("Remote job submission failed: {0}")]
    Submission(#[source] ProviderError),

    /// Admission bookkeeping violation; a defect, never silently
    /// corrected.
    #[error(transparent)]
    Bookkeeping(#[from] SemaphoreError),

    /// The coordinator was closed while this job was still in flight.
    #[error("Dispatch coordinator shut down with the job still in flight")]
    Shutdown,
}

impl GridError {
    /// Exit status an embedding process should terminate with.
    ///
    /// Bootstrap failure gets a distinct code so wrappers can tell
    /// "environment never came up" apart from ordinary test failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            GridError::Bootstrap(_) => BOOTSTRAP_EXIT_CODE,
            GridError::Config(_) => CONFIG_EXIT_CODE,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_failures_get_a_distinct_exit_code() {
        let err = GridError::Shutdown;
        assert_eq!(err.exit_code(), 1);

        let err = GridError::Config(ConfigError::MissingSetting("BUILDGRID_S3_BUCKET"));
        assert_eq!(err.exit_code(), CONFIG_EXIT_CODE);
    }
}
