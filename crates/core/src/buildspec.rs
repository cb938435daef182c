//! Remote pipeline-script templating and project naming.
//!
//! Each remote job runs a declarative build pipeline: bring up the
//! compose environment, then run exactly one unit of work selected by
//! filter, with the target invocation identifier exported so the worker
//! process routes itself (see `buildgrid::router`).

/// Remote job parameterization: which unit of work to run.
#[derive(Debug, Clone)]
pub struct JobTarget {
    /// Test filter selecting the step, e.g. `websites::smoke::title_contains`.
    pub selector: String,
    /// Invocation identifier distinguishing this parameterization from
    /// its siblings under the same selector.
    pub invocation_id: Option<String>,
}

/// Render the pipeline script for a remote job.
///
/// With a [`JobTarget`], the build phase runs only the selected unit,
/// exporting `BUILDGRID_TARGET_INVOCATION` so that of the sibling
/// parameterizations sharing one selector, only the targeted one
/// executes; the compose environment is force-recreated so the unit
/// never sees state from image caches or half-torn-down containers.
/// Without a target (project provisioning), the build phase runs the
/// full suite.
pub fn render_buildspec(test_host: &str, target: Option<&JobTarget>) -> String {
    let compose_up = match target {
        None => "docker-compose --no-ansi up --detach",
        Some(_) => {
            "docker-compose --no-ansi up --detach --force-recreate --always-recreate-deps"
        }
    };
    let build_command = match target {
        None => "cargo test --release".to_string(),
        Some(JobTarget {
            selector,
            invocation_id: None,
        }) => format!("cargo test --release '{selector}'"),
        Some(JobTarget {
            selector,
            invocation_id: Some(id),
        }) => format!(
            "BUILDGRID_TARGET_INVOCATION='{id}' cargo test --release '{selector}'"
        ),
    };

    format!(
        "version: 0.2\n\
         env:\n\
         \x20 variables:\n\
         \x20   BUILDGRID_TEST_HOST: {test_host}\n\
         \x20   CARGO_TERM_COLOR: never\n\
         phases:\n\
         \x20 install:\n\
         \x20   runtime-versions:\n\
         \x20     rust: stable\n\
         \x20 pre_build:\n\
         \x20   commands:\n\
         \x20     - cargo --version\n\
         \x20     - {compose_up}\n\
         \x20     - sleep 5\n\
         \x20 build:\n\
         \x20   commands:\n\
         \x20     - {build_command}\n\
         \x20 post_build:\n\
         \x20   commands:\n\
         \x20     - docker-compose --no-ansi down --remove-orphans\n\
         cache:\n\
         \x20 paths:\n\
         \x20 - 'target/**/*'\n"
    )
}

/// Restrict a project name to characters the remote provider accepts.
///
/// Anything outside `[A-Za-z0-9_-]` becomes `_`.
pub fn sanitize_project_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Derive the remote project name from host identity and source revision.
pub fn project_name(test_host: &str, revision: &str) -> String {
    sanitize_project_name(&format!("{test_host}-tests-{revision}"))
}
