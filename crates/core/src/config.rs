//! Grid configuration loaded from environment variables.

use std::time::Duration;

use crate::error::ConfigError;

/// Default number of remote jobs allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Default delay before the completion poller's first cycle.
pub const DEFAULT_POLL_INITIAL_DELAY: Duration = Duration::from_secs(90);

/// Default period between completion poller cycles.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(10);

/// Default remote-side cap on a single job's duration.
pub const DEFAULT_MAX_JOB_DURATION_MINUTES: u32 = 20;

/// Default bound on log pages fetched for one job's diagnostics.
pub const DEFAULT_MAX_LOG_PAGES: u32 = 5;

/// Which role this process plays in grid execution.
///
/// Read once at startup; every [`InvocationRouter`] decision derives
/// from it.
///
/// [`InvocationRouter`]: https://docs.rs/buildgrid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridMode {
    /// No grid in use; every step runs exactly as requested.
    Local,
    /// This process orchestrates remote dispatch of units of work.
    Caller,
    /// This process *is* a remote execution instance, assigned exactly
    /// one target invocation identifier.
    Worker {
        /// The one invocation this instance is responsible for.
        target: String,
    },
}

/// Remote provider settings required in caller mode.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Object-storage bucket holding workspace archives.
    pub bucket: String,
    /// Role the remote provider assumes to run jobs.
    pub service_role: String,
    /// Log group where remote jobs write their output.
    pub log_group: String,
}

/// Grid configuration loaded from environment variables.
///
/// All fields have defaults suitable for local runs; caller mode
/// additionally requires the remote settings (see
/// [`GridConfig::remote`]).
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Maximum concurrent in-flight remote jobs (default: `1`).
    pub concurrency: usize,
    /// Whether this process should dispatch units of work remotely.
    pub enabled: bool,
    /// Target invocation identifier, set only inside a remote worker.
    pub target_invocation: Option<String>,
    /// Object-storage bucket for workspace archives.
    pub bucket: Option<String>,
    /// Remote provider service role.
    pub service_role: Option<String>,
    /// Log group for remote job output.
    pub log_group: Option<String>,
    /// Host identity folded into the remote project name (default:
    /// `localhost`).
    pub test_host: String,
    /// Workspace entries packed into the archive each job fetches.
    pub archive_paths: Vec<String>,
    /// Bound on log pages fetched per job (default: `5`).
    pub max_log_pages: u32,
    /// Delay before the poller's first status query (default: 90 s).
    pub poll_initial_delay: Duration,
    /// Period between poller cycles (default: 10 s).
    pub poll_period: Duration,
    /// Remote-side maximum job duration in minutes (default: `20`).
    pub max_job_duration_minutes: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            enabled: false,
            target_invocation: None,
            bucket: None,
            service_role: None,
            log_group: None,
            test_host: "localhost".to_string(),
            archive_paths: default_archive_paths(),
            max_log_pages: DEFAULT_MAX_LOG_PAGES,
            poll_initial_delay: DEFAULT_POLL_INITIAL_DELAY,
            poll_period: DEFAULT_POLL_PERIOD,
            max_job_duration_minutes: DEFAULT_MAX_JOB_DURATION_MINUTES,
        }
    }
}

impl GridConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default     |
    /// |-------------------------------|-------------|
    /// | `BUILDGRID_CONCURRENCY`       | `1`         |
    /// | `BUILDGRID_ENABLED`           | unset (off) |
    /// | `BUILDGRID_TARGET_INVOCATION` | unset       |
    /// | `BUILDGRID_S3_BUCKET`         | unset       |
    /// | `BUILDGRID_SERVICE_ROLE`      | unset       |
    /// | `BUILDGRID_LOG_GROUP`         | unset       |
    /// | `BUILDGRID_TEST_HOST`         | `localhost` |
    /// | `BUILDGRID_ARCHIVE_PATHS`     | `src,tests,Cargo.toml,Cargo.lock,docker-compose.yml` |
    /// | `BUILDGRID_MAX_LOG_PAGES`     | `5`         |
    ///
    /// An unparsable concurrency or page bound falls back to its default
    /// with a reported warning; it is not a hard error.
    pub fn from_env() -> Self {
        let concurrency = parse_or_default(
            "BUILDGRID_CONCURRENCY",
            std::env::var("BUILDGRID_CONCURRENCY").ok(),
            DEFAULT_CONCURRENCY,
        );

        let enabled = parse_or_default(
            "BUILDGRID_ENABLED",
            std::env::var("BUILDGRID_ENABLED").ok(),
            0u8,
        ) == 1;

        let max_log_pages = parse_or_default(
            "BUILDGRID_MAX_LOG_PAGES",
            std::env::var("BUILDGRID_MAX_LOG_PAGES").ok(),
            DEFAULT_MAX_LOG_PAGES,
        );

        let archive_paths = match std::env::var("BUILDGRID_ARCHIVE_PATHS") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => default_archive_paths(),
        };

        Self {
            concurrency,
            enabled,
            target_invocation: std::env::var("BUILDGRID_TARGET_INVOCATION").ok(),
            bucket: std::env::var("BUILDGRID_S3_BUCKET").ok(),
            service_role: std::env::var("BUILDGRID_SERVICE_ROLE").ok(),
            log_group: std::env::var("BUILDGRID_LOG_GROUP").ok(),
            test_host: std::env::var("BUILDGRID_TEST_HOST")
                .unwrap_or_else(|_| "localhost".to_string()),
            archive_paths,
            max_log_pages,
            poll_initial_delay: DEFAULT_POLL_INITIAL_DELAY,
            poll_period: DEFAULT_POLL_PERIOD,
            max_job_duration_minutes: DEFAULT_MAX_JOB_DURATION_MINUTES,
        }
    }

    /// Role this process plays, derived from the routing inputs.
    ///
    /// A target invocation identifier marks a remote worker regardless
    /// of the enabled flag (the dispatching side sets the target when it
    /// templates the worker's pipeline script). Enabled without a target
    /// is the dispatching caller; neither means fully local execution.
    pub fn mode(&self) -> GridMode {
        if let Some(target) = &self.target_invocation {
            GridMode::Worker {
                target: target.clone(),
            }
        } else if self.enabled {
            GridMode::Caller
        } else {
            GridMode::Local
        }
    }

    /// Remote provider settings, required once dispatch is enabled.
    ///
    /// Missing values are a configuration error: the process must fail
    /// fast rather than submit jobs it cannot run.
    pub fn remote(&self) -> Result<RemoteSettings, ConfigError> {
        Ok(RemoteSettings {
            bucket: self
                .bucket
                .clone()
                .ok_or(ConfigError::MissingSetting("BUILDGRID_S3_BUCKET"))?,
            service_role: self
                .service_role
                .clone()
                .ok_or(ConfigError::MissingSetting("BUILDGRID_SERVICE_ROLE"))?,
            log_group: self
                .log_group
                .clone()
                .ok_or(ConfigError::MissingSetting("BUILDGRID_LOG_GROUP"))?,
        })
    }
}

/// Workspace entries archived by default.
fn default_archive_paths() -> Vec<String> {
    ["src", "tests", "Cargo.toml", "Cargo.lock", "docker-compose.yml"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Parse an optional env value, falling back to `default` with a
/// reported warning when the value is present but unparsable.
fn parse_or_default<T: std::str::FromStr + Copy>(
    setting: &'static str,
    raw: Option<String>,
    default: T,
) -> T {
    match raw {
        None => default,
        Some(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(setting, value = %value, "Unparsable setting, using default");
                default
            }
        },
    }
}
