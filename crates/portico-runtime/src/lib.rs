//! Container tool integration for Portico.
//!
//! This crate implements the execution layer: a pluggable `CommandBackend`
//! trait with a subprocess backend (explicit timeouts, streamed or captured
//! output) and a recording mock, the pure compose command builder, a typed
//! `ComposeClient` over the compose verbs the orchestrator needs, parsing of
//! `compose ps` output into runtime status snapshots, and prerequisite checks
//! with platform-specific remediation.

pub mod backend;
pub mod compose;
pub mod mock;
pub mod prereq;
pub mod process;
pub mod status;

pub use backend::{select_backend, CommandBackend, CommandOutcome, Invocation, OutputMode};
pub use compose::{
    build_compose_command, ComposeClient, ComposeExecutable, ComposeFileSet, PruneTarget,
    UpOptions,
};
pub use mock::MockBackend;
pub use prereq::{
    check_compose_prereqs, check_compose_prereqs_with, detect_compose_executable,
    detect_compose_executable_with, format_missing, MissingPrereq, PREREQ_CHECK_TIMEOUT,
};
pub use process::ProcessBackend;
pub use status::{parse_ps_output, ContainerState, HealthState, PortMapping, ServiceRuntimeStatus};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available")]
    BackendUnavailable(String),
    #[error("'{0}' not found on PATH")]
    ToolNotFound(String),
    #[error("empty command line")]
    EmptyCommand,
    #[error("'{command}' timed out after {after:?}")]
    Timeout { command: String, after: Duration },
    #[error("failed to parse compose status output: {0}")]
    StatusParse(String),
}
