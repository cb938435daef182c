//! Step routing across execution roles.
//!
//! Every step of a run flows through [`InvocationRouter::run_step`],
//! which decides what happens based on the process role:
//!
//! - **Local**: no grid involved; every step runs in-process.
//! - **Caller**: units of work are dispatched to the grid and awaited;
//!   setup and teardown steps are skipped because they will run on the
//!   worker alongside the unit they belong to.
//! - **Worker**: the process exists to run exactly one target unit.
//!   Setup steps seen before the target are buffered and replayed
//!   immediately before it, sibling units are skipped, and teardown
//!   runs only if the target actually executed in this process.

use std::collections::HashMap;
use std::sync::Arc;

use buildgrid_core::buildspec::JobTarget;
use buildgrid_core::error::ConfigError;
use buildgrid_core::invocation::{InvocationId, StepParam};
use buildgrid_core::types::{JobId, JobOutcome};
use buildgrid_provider::logs::{fetch_job_logs, LogSource};
use tokio::sync::Mutex;

use crate::dispatcher::GridDispatcher;
use crate::error::GridError;

/// What kind of step an invocation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Runs once before any unit in its scope.
    SetupAll,
    /// Runs before each unit in its scope.
    SetupEach,
    /// A dispatchable unit of work.
    UnitOfWork,
    /// Runs after each unit in its scope.
    TeardownEach,
    /// Runs once after every unit in its scope.
    TeardownAll,
}

impl StepKind {
    fn is_setup(self) -> bool {
        matches!(self, StepKind::SetupAll | StepKind::SetupEach)
    }

    fn is_teardown(self) -> bool {
        matches!(self, StepKind::TeardownAll | StepKind::TeardownEach)
    }
}

/// One step about to be executed.
#[derive(Debug, Clone)]
pub struct StepInvocation {
    /// Enclosing scope, typically a module or suite path.
    pub scope: String,
    /// Step name within the scope.
    pub name: String,
    /// Parameters of this invocation, in declaration order.
    pub params: Vec<StepParam>,
    /// What kind of step this is.
    pub kind: StepKind,
}

impl StepInvocation {
    /// Canonical identity of this invocation, stable across processes.
    pub fn invocation_id(&self) -> Result<InvocationId, ConfigError> {
        InvocationId::compute(&self.scope, &self.name, &self.params)
    }

    /// Filter selecting this step's unit on a worker.
    pub fn selector(&self) -> String {
        format!("{}::{}", self.scope, self.name)
    }
}

/// The routing decision for a step, before any body runs.
///
/// Separated from execution so tests (and logs) can observe routing
/// without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterDecision {
    /// Run the body in this process, now.
    RunLocally,
    /// Do not run the body here, ever.
    Skip,
    /// Ship the unit to the grid and await its outcome.
    DispatchAndWait,
    /// Worker only: hold the setup body for replay before the target.
    ReplayAsSetup,
}

/// What the router decided to do with a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDisposition {
    /// The step body ran in this process.
    Executed,
    /// The step did not run here and never will.
    Skipped,
    /// Worker only: a setup step buffered for replay before the target.
    Buffered,
    /// Caller only: the step ran remotely and succeeded.
    Dispatched,
}

/// A step body, run at most once.
pub type StepBody = Box<dyn FnOnce() -> Result<(), StepError> + Send>;

/// Step execution failures.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The step body itself failed.
    #[error("{0}")]
    Failed(String),

    /// The step ran remotely and did not succeed. Carries whatever
    /// remote log output could be recovered.
    #[error("Remote job {job_id} finished with outcome {outcome}")]
    Remote {
        /// Terminal outcome reported by the provider.
        outcome: JobOutcome,
        /// Remote job that ran the step.
        job_id: JobId,
        /// Filtered remote log output, possibly empty.
        logs: String,
    },

    /// Dispatch machinery failure.
    #[error(transparent)]
    Grid(#[from] GridError),
}

struct BufferedStep {
    name: String,
    body: StepBody,
}

#[derive(Default)]
struct ScopeState {
    buffered: Vec<BufferedStep>,
    unit_ran: bool,
}

enum Role {
    Local,
    Caller {
        dispatcher: Arc<GridDispatcher>,
        logs: Arc<dyn LogSource>,
        max_log_pages: u32,
    },
    Worker {
        target: String,
        scopes: Mutex<HashMap<String, ScopeState>>,
    },
}

/// Routes steps to local execution, remote dispatch, buffering, or a
/// skip, depending on the process role.
pub struct InvocationRouter {
    role: Role,
}

impl InvocationRouter {
    /// Router for a process with the grid disabled.
    pub fn local() -> Self {
        Self { role: Role::Local }
    }

    /// Router for the dispatching side of the grid.
    pub fn caller(
        dispatcher: Arc<GridDispatcher>,
        logs: Arc<dyn LogSource>,
        max_log_pages: u32,
    ) -> Self {
        Self {
            role: Role::Caller {
                dispatcher,
                logs,
                max_log_pages,
            },
        }
    }

    /// Router for a worker assigned one target invocation.
    pub fn worker(target: impl Into<String>) -> Self {
        Self {
            role: Role::Worker {
                target: target.into(),
                scopes: Mutex::new(HashMap::new()),
            },
        }
    }

    /// Decide what to do with a step, without executing anything.
    pub async fn decide(&self, step: &StepInvocation) -> Result<RouterDecision, StepError> {
        match &self.role {
            Role::Local => Ok(RouterDecision::RunLocally),
            Role::Caller { .. } => {
                if step.kind == StepKind::UnitOfWork {
                    Ok(RouterDecision::DispatchAndWait)
                } else {
                    // Setup and teardown run on the worker alongside
                    // the unit they belong to.
                    Ok(RouterDecision::Skip)
                }
            }
            Role::Worker { target, scopes } => {
                let id = step.invocation_id().map_err(GridError::Config)?;
                if id.as_str() == target {
                    return Ok(RouterDecision::RunLocally);
                }
                match step.kind {
                    StepKind::UnitOfWork => Ok(RouterDecision::Skip),
                    kind if kind.is_setup() => {
                        let scopes = scopes.lock().await;
                        let unit_ran =
                            scopes.get(&step.scope).is_some_and(|s| s.unit_ran);
                        if unit_ran {
                            // Late setup belongs to sibling units this
                            // worker skips anyway.
                            Ok(RouterDecision::Skip)
                        } else {
                            Ok(RouterDecision::ReplayAsSetup)
                        }
                    }
                    kind => {
                        debug_assert!(kind.is_teardown());
                        let scopes = scopes.lock().await;
                        let unit_ran =
                            scopes.get(&step.scope).is_some_and(|s| s.unit_ran);
                        if unit_ran {
                            Ok(RouterDecision::RunLocally)
                        } else {
                            Ok(RouterDecision::Skip)
                        }
                    }
                }
            }
        }
    }

    /// Route one step and carry out the decision.
    pub async fn run_step(
        &self,
        step: &StepInvocation,
        body: StepBody,
    ) -> Result<StepDisposition, StepError> {
        let decision = self.decide(step).await?;
        tracing::debug!(step = %step.selector(), kind = ?step.kind, decision = ?decision, "Routing step");
        match decision {
            RouterDecision::Skip => Ok(StepDisposition::Skipped),
            RouterDecision::DispatchAndWait => {
                let Role::Caller {
                    dispatcher,
                    logs,
                    max_log_pages,
                } = &self.role
                else {
                    return Err(StepError::Failed(
                        "dispatch decided outside caller role".to_string(),
                    ));
                };
                self.dispatch(step, dispatcher, logs.as_ref(), *max_log_pages)
                    .await
            }
            RouterDecision::ReplayAsSetup => {
                let Role::Worker { scopes, .. } = &self.role else {
                    return Err(StepError::Failed(
                        "replay decided outside worker role".to_string(),
                    ));
                };
                let mut scopes = scopes.lock().await;
                scopes
                    .entry(step.scope.clone())
                    .or_default()
                    .buffered
                    .push(BufferedStep {
                        name: step.name.clone(),
                        body,
                    });
                Ok(StepDisposition::Buffered)
            }
            RouterDecision::RunLocally => {
                if let (StepKind::UnitOfWork, Role::Worker { scopes, .. }) =
                    (step.kind, &self.role)
                {
                    // Replay buffered setup in arrival order, then run
                    // the target itself.
                    let buffered = {
                        let mut scopes = scopes.lock().await;
                        let state = scopes.entry(step.scope.clone()).or_default();
                        state.unit_ran = true;
                        std::mem::take(&mut state.buffered)
                    };
                    for setup in buffered {
                        tracing::debug!(
                            scope = %step.scope,
                            step = %setup.name,
                            "Replaying buffered setup",
                        );
                        (setup.body)()?;
                    }
                    tracing::info!(step = %step.selector(), "Running target unit");
                }
                body()?;
                Ok(StepDisposition::Executed)
            }
        }
    }

    /// Caller side: ship the unit to the grid and await its outcome.
    async fn dispatch(
        &self,
        step: &StepInvocation,
        dispatcher: &GridDispatcher,
        logs: &dyn LogSource,
        max_log_pages: u32,
    ) -> Result<StepDisposition, StepError> {
        let id = step.invocation_id().map_err(GridError::Config)?;
        let target = JobTarget {
            selector: step.selector(),
            invocation_id: Some(id.to_string()),
        };

        let resolution = dispatcher.submit(&target).await?;
        if resolution.outcome.is_success() {
            return Ok(StepDisposition::Dispatched);
        }

        let remote_logs = fetch_job_logs(logs, &resolution.job_id, max_log_pages).await;
        Err(StepError::Remote {
            outcome: resolution.outcome,
            job_id: resolution.job_id,
            logs: remote_logs,
        })
    }
}
