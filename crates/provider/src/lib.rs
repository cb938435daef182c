//! Collaborator boundary for the buildgrid dispatch coordinator.
//!
//! The coordinator in `buildgrid` only ever talks to traits defined
//! here: a remote job provider ([`job::JobProvider`]), an object store
//! for workspace archives ([`store::ArchiveStore`]), and a log source
//! ([`logs::LogSource`]). Concrete implementations (a REST build
//! service client, an S3 store) live alongside, together with the
//! local-side I/O the bootstrap needs (workspace archiving, git
//! revision discovery).

pub mod archive;
pub mod git;
pub mod job;
pub mod logs;
pub mod rest;
pub mod store;
