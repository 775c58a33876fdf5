//! Orchestrator error types

use thiserror::Error;

/// Errors surfaced by the session pool and its components.
///
/// Only `ConfigInvalid` is fatal to a run; everything else is accumulated
/// per-session into the run report.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Launch failed: {0}")]
    LaunchFailure(String),

    #[error("Wrapper loop detected: {0}")]
    WrapperLoopDetected(String),

    #[error("Session already active: {0}")]
    AlreadyActive(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Resource monitor error: {0}")]
    ResourceMonitor(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<OrchestratorError> for String {
    fn from(err: OrchestratorError) -> String {
        err.to_string()
    }
}
