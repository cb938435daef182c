//! Remote job dispatch coordination.
//!
//! This crate turns units of work into remote provider jobs and awaits
//! their outcomes:
//!
//! - [`semaphore::AsyncSemaphore`] caps how many jobs are in flight.
//! - [`bootstrap::EnvironmentBootstrap`] archives the workspace,
//!   publishes it, and provisions the remote project exactly once.
//! - [`dispatcher::GridDispatcher`] submits jobs and suspends callers;
//!   a background completion poller resolves finished jobs in batches.
//! - [`router::InvocationRouter`] decides, per process role, whether a
//!   step runs locally, is dispatched, is buffered for replay, or is
//!   skipped.
//! - [`coordinator::GridCoordinator`] wires it all together.

pub mod bootstrap;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
mod poller;
pub mod router;
pub mod semaphore;

pub use bootstrap::{BootstrapError, EnvironmentBootstrap, ReadyEnvironment};
pub use coordinator::GridCoordinator;
pub use dispatcher::{GridDispatcher, JobResolution};
pub use error::GridError;
pub use router::{
    InvocationRouter, RouterDecision, StepDisposition, StepError, StepInvocation, StepKind,
};
pub use semaphore::{AsyncSemaphore, SemaphoreError};
