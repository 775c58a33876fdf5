//! External launch collaborator interface
//!
//! The orchestrator never talks to a browser directly. Everything that
//! touches flags, profiles, pages or CAPTCHAs lives behind this trait and is
//! injected at pool construction time.

use async_trait::async_trait;
use thiserror::Error;

use crate::{ProfileId, TargetRef};

/// Opaque handle to one launched viewer session.
///
/// The collaborator fills in whatever it needs to tear the session down
/// later; the orchestrator only forwards it and reads the session marker for
/// process discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Profile the session was launched with.
    pub profile: ProfileId,
    /// Unique string present on the command line of every OS process
    /// belonging to this session (typically the profile data directory).
    pub session_marker: String,
    /// Root browser process id, when the collaborator knows it.
    pub pid: Option<u32>,
}

/// Result of the natural-navigation sequence, reported back once per session.
///
/// Opaque to the orchestrator beyond success/failure; the fields are carried
/// for the reporting layer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationContext {
    pub navigation_type: String,
    pub history_length: u32,
    pub video_present: bool,
}

/// Per-launch options forwarded to the collaborator untouched.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    /// Launch without a visible window.
    pub hidden: bool,
    /// Ask the collaborator for its reduced-memory launch profile.
    pub low_memory: bool,
}

/// Typed errors the collaborator may return.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Launch failure: {0}")]
    Failure(String),

    #[error("Profile already has an active session")]
    AlreadyActive,

    #[error("Collaborator timed out: {0}")]
    Timeout(String),

    /// The collaborator's wrapper called back into itself. Known defect of
    /// the underlying automation layer; never retried.
    #[error("Wrapper loop: {0}")]
    WrapperLoop(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),
}

impl LaunchError {
    /// Whether another launch attempt can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LaunchError::Failure(_) | LaunchError::Timeout(_))
    }
}

/// Contract the orchestrator consumes from the browser-automation layer.
#[async_trait]
pub trait LaunchCollaborator: Send + Sync {
    /// Open one automated session bound to `profile`, navigating toward
    /// `target`. Returns an opaque handle or a typed error.
    async fn launch_session(
        &self,
        profile: &ProfileId,
        target: &TargetRef,
        options: &LaunchOptions,
    ) -> Result<SessionHandle, LaunchError>;

    /// Whether some part of the system already has this profile open.
    async fn is_session_active(&self, profile: &ProfileId) -> bool;

    /// Best-effort teardown. Failures are logged by the caller, never fatal.
    async fn close_session(&self, handle: &SessionHandle) -> Result<(), LaunchError>;

    /// Report the navigation context established during the trust window.
    async fn report_navigation_context(
        &self,
        handle: &SessionHandle,
    ) -> Result<NavigationContext, LaunchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LaunchError::Failure("boom".into()).is_retryable());
        assert!(LaunchError::Timeout("slow".into()).is_retryable());
        assert!(!LaunchError::WrapperLoop("loop".into()).is_retryable());
        assert!(!LaunchError::AlreadyActive.is_retryable());
        assert!(!LaunchError::NavigationFailed("nav".into()).is_retryable());
    }
}
