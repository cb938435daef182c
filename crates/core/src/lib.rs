//! Core types and pure logic for the buildgrid dispatch coordinator.
//!
//! Everything here is side-effect free: shared type aliases, environment
//! configuration, invocation identifiers, pipeline-script templating, and
//! log filtering. The provider boundary lives in `buildgrid-provider`;
//! the coordination engine lives in `buildgrid`.

pub mod buildspec;
pub mod config;
pub mod error;
pub mod invocation;
pub mod logfilter;
pub mod types;
