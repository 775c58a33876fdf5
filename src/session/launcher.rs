//! Launch worker
//!
//! Drives exactly one profile through acquisition of the external launch
//! collaborator with bounded retries, then walks the fresh session through
//! its lifecycle until it reaches the steady viewing state.

use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborator::{LaunchCollaborator, LaunchError, LaunchOptions};
use crate::session::{LifecycleEvent, Session};
use crate::{PoolConfig, ProfileId, TargetRef};

/// How often the bootstrap phase polls the collaborator for handle
/// confirmation.
const BOOTSTRAP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Timing knobs for one launch, derived from [`PoolConfig`].
#[derive(Debug, Clone)]
pub struct LaunchWorkerConfig {
    /// Launch attempts; at least one attempt is always made.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Upper bound on a single collaborator launch call.
    pub launch_timeout: Duration,
    /// Window for the collaborator to confirm the process/page handle.
    pub bootstrap_timeout: Duration,
    /// Dwell before the session is considered steady.
    pub stabilize_dwell: Duration,
}

impl Default for LaunchWorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            launch_timeout: Duration::from_secs(120),
            bootstrap_timeout: Duration::from_secs(30),
            stabilize_dwell: Duration::from_secs(8),
        }
    }
}

impl LaunchWorkerConfig {
    pub fn from_pool_config(cfg: &PoolConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            retry_delay: Duration::from_secs(cfg.retry_delay_seconds),
            launch_timeout: Duration::from_secs(cfg.launch_timeout_seconds),
            bootstrap_timeout: Duration::from_secs(cfg.bootstrap_timeout_seconds),
            stabilize_dwell: Duration::from_secs(cfg.stabilize_seconds),
        }
    }
}

/// Result of one launch-and-stabilize pass.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// Session launched; lifecycle reached `Idle` (or an earlier live phase
    /// if cancellation arrived mid-flight — the pool closes it on shutdown).
    Ready(Session),
    /// Profile skipped; another part of the system already has it open.
    Skipped { profile: ProfileId, reason: String },
    /// All attempts exhausted, or a non-retryable collaborator defect.
    Failed { profile: ProfileId, message: String },
    /// Cancelled before a session handle was acquired.
    Cancelled(ProfileId),
}

/// Drives one profile id through launch, retry and lifecycle.
pub struct LaunchWorker {
    config: LaunchWorkerConfig,
}

impl LaunchWorker {
    pub fn new(config: LaunchWorkerConfig) -> Self {
        Self { config }
    }

    /// Launch `profile` toward `target`, retrying up to the configured bound.
    ///
    /// Returns on the first success; a wrapper-loop defect aborts the retry
    /// loop immediately. The cancellation token interrupts inter-attempt
    /// delays and lifecycle waits, never an in-flight collaborator call.
    pub async fn launch(
        &self,
        collaborator: &dyn LaunchCollaborator,
        profile: &ProfileId,
        target: &TargetRef,
        options: &LaunchOptions,
        cancel: &CancellationToken,
    ) -> LaunchOutcome {
        if cancel.is_cancelled() {
            return LaunchOutcome::Cancelled(profile.clone());
        }

        if collaborator.is_session_active(profile).await {
            debug!("[Launch] Profile {} already active, skipping", profile);
            return LaunchOutcome::Skipped {
                profile: profile.clone(),
                reason: "already active".to_string(),
            };
        }

        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!("[Launch] Profile {} attempt {}/{}", profile, attempt, attempts);

            let call = collaborator.launch_session(profile, target, options);
            match timeout(self.config.launch_timeout, call).await {
                Ok(Ok(handle)) => {
                    info!(
                        "[Launch] Profile {} launched on attempt {}/{}",
                        profile, attempt, attempts
                    );
                    let session = Session::new(handle, target.clone(), attempt - 1, Instant::now());
                    return self.drive_lifecycle(collaborator, session, cancel).await;
                }
                Ok(Err(LaunchError::AlreadyActive)) => {
                    debug!("[Launch] Profile {} reported already active", profile);
                    return LaunchOutcome::Skipped {
                        profile: profile.clone(),
                        reason: "already active".to_string(),
                    };
                }
                Ok(Err(err @ LaunchError::WrapperLoop(_))) => {
                    // Known collaborator defect; retrying only re-enters the loop.
                    warn!("[Launch] Profile {} hit wrapper loop: {}", profile, err);
                    return LaunchOutcome::Failed {
                        profile: profile.clone(),
                        message: err.to_string(),
                    };
                }
                Ok(Err(err)) => {
                    warn!(
                        "[Launch] Profile {} attempt {}/{} failed: {}",
                        profile, attempt, attempts, err
                    );
                    last_error = err.to_string();
                    if !err.is_retryable() {
                        break;
                    }
                }
                Err(_) => {
                    warn!(
                        "[Launch] Profile {} attempt {}/{} timed out after {:?}",
                        profile, attempt, attempts, self.config.launch_timeout
                    );
                    last_error = format!(
                        "launch timed out after {}s",
                        self.config.launch_timeout.as_secs()
                    );
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return LaunchOutcome::Cancelled(profile.clone()),
                    _ = sleep(self.config.retry_delay) => {}
                }
            }
        }

        LaunchOutcome::Failed {
            profile: profile.clone(),
            message: last_error,
        }
    }

    /// Walk a freshly launched session to `Idle`.
    ///
    /// Bootstrap waits for handle confirmation, the trust window waits for
    /// the navigation-context report, stabilize is a pure dwell. Cancellation
    /// mid-flight returns the session as-is so the pool can close it.
    async fn drive_lifecycle(
        &self,
        collaborator: &dyn LaunchCollaborator,
        mut session: Session,
        cancel: &CancellationToken,
    ) -> LaunchOutcome {
        // Bootstrap: poll until the collaborator sees the handle.
        let deadline = Instant::now() + self.config.bootstrap_timeout;
        loop {
            if collaborator.is_session_active(&session.id).await {
                session.apply(LifecycleEvent::HandleConfirmed, Instant::now());
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "[Launch] Profile {} handle not confirmed within {:?}",
                    session.id, self.config.bootstrap_timeout
                );
                session.apply(LifecycleEvent::BootstrapTimedOut, Instant::now());
                self.close_best_effort(collaborator, &session).await;
                return LaunchOutcome::Failed {
                    profile: session.id.clone(),
                    message: "handle not confirmed before bootstrap timeout".to_string(),
                };
            }
            tokio::select! {
                _ = cancel.cancelled() => return LaunchOutcome::Ready(session),
                _ = sleep(BOOTSTRAP_POLL_INTERVAL) => {}
            }
        }

        // Trust window: the collaborator runs its natural-navigation sequence
        // and reports back an opaque context.
        match collaborator.report_navigation_context(&session.handle).await {
            Ok(ctx) => {
                debug!(
                    "[Launch] Profile {} navigation context: {} (history {})",
                    session.id, ctx.navigation_type, ctx.history_length
                );
                session.apply(LifecycleEvent::NavigationSucceeded, Instant::now());
            }
            Err(err) => {
                warn!("[Launch] Profile {} navigation failed: {}", session.id, err);
                session.apply(LifecycleEvent::NavigationFailed, Instant::now());
                self.close_best_effort(collaborator, &session).await;
                return LaunchOutcome::Failed {
                    profile: session.id.clone(),
                    message: format!("navigation failed: {}", err),
                };
            }
        }

        // Stabilize: timer-driven only.
        tokio::select! {
            _ = cancel.cancelled() => return LaunchOutcome::Ready(session),
            _ = sleep(self.config.stabilize_dwell) => {}
        }
        session.apply(LifecycleEvent::DwellElapsed, Instant::now());
        info!("[Launch] Profile {} is idle (viewing)", session.id);

        LaunchOutcome::Ready(session)
    }

    async fn close_best_effort(&self, collaborator: &dyn LaunchCollaborator, session: &Session) {
        if let Err(err) = collaborator.close_session(&session.handle).await {
            warn!(
                "[Launch] Closing failed session {} returned error: {}",
                session.id, err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{NavigationContext, SessionHandle};
    use crate::session::LifecyclePhase;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted collaborator: fails the first `fail_first` launches, then
    /// succeeds. Tracks attempt counts and closed handles.
    struct ScriptedCollaborator {
        fail_first: u32,
        wrapper_loop: bool,
        navigation_ok: bool,
        attempts: AtomicU32,
        closed: Mutex<Vec<ProfileId>>,
        launched: Mutex<Vec<ProfileId>>,
    }

    impl ScriptedCollaborator {
        fn succeeding() -> Self {
            Self {
                fail_first: 0,
                wrapper_loop: false,
                navigation_ok: true,
                attempts: AtomicU32::new(0),
                closed: Mutex::new(Vec::new()),
                launched: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail_first: u32::MAX,
                ..Self::succeeding()
            }
        }

        fn attempt_count(&self) -> u32 {
            self.attempts.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl LaunchCollaborator for ScriptedCollaborator {
        async fn launch_session(
            &self,
            profile: &ProfileId,
            _target: &TargetRef,
            _options: &LaunchOptions,
        ) -> Result<SessionHandle, LaunchError> {
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if self.wrapper_loop {
                return Err(LaunchError::WrapperLoop("wrapper called wrapper".into()));
            }
            if attempt <= self.fail_first {
                return Err(LaunchError::Failure(format!("attempt {} refused", attempt)));
            }
            self.launched.lock().unwrap().push(profile.clone());
            Ok(SessionHandle {
                profile: profile.clone(),
                session_marker: format!("viewer_data/{}", profile),
                pid: Some(4321),
            })
        }

        async fn is_session_active(&self, profile: &ProfileId) -> bool {
            // Active only once launched, so the pre-check passes and the
            // bootstrap confirmation succeeds.
            self.launched.lock().unwrap().contains(profile)
        }

        async fn close_session(&self, handle: &SessionHandle) -> Result<(), LaunchError> {
            self.closed.lock().unwrap().push(handle.profile.clone());
            Ok(())
        }

        async fn report_navigation_context(
            &self,
            _handle: &SessionHandle,
        ) -> Result<NavigationContext, LaunchError> {
            if self.navigation_ok {
                Ok(NavigationContext {
                    navigation_type: "natural".into(),
                    history_length: 3,
                    video_present: true,
                })
            } else {
                Err(LaunchError::NavigationFailed("no live badge".into()))
            }
        }
    }

    fn fast_config(max_retries: u32) -> LaunchWorkerConfig {
        LaunchWorkerConfig {
            max_retries,
            retry_delay: Duration::from_millis(10),
            launch_timeout: Duration::from_secs(5),
            bootstrap_timeout: Duration::from_secs(5),
            stabilize_dwell: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_success_reaches_idle() {
        let collab = ScriptedCollaborator::succeeding();
        let worker = LaunchWorker::new(fast_config(3));
        let cancel = CancellationToken::new();

        let outcome = worker
            .launch(
                &collab,
                &"p1".to_string(),
                &"live:creator".to_string(),
                &LaunchOptions::default(),
                &cancel,
            )
            .await;

        match outcome {
            LaunchOutcome::Ready(session) => {
                assert_eq!(session.phase(), LifecyclePhase::Idle);
                assert_eq!(session.retry_count, 0);
            }
            other => panic!("expected Ready, got {:?}", other),
        }
        assert_eq!(collab.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_is_exact() {
        let collab = ScriptedCollaborator::failing();
        let worker = LaunchWorker::new(fast_config(3));
        let cancel = CancellationToken::new();

        let outcome = worker
            .launch(
                &collab,
                &"p1".to_string(),
                &"live:creator".to_string(),
                &LaunchOptions::default(),
                &cancel,
            )
            .await;

        assert!(matches!(outcome, LaunchOutcome::Failed { .. }));
        assert_eq!(collab.attempt_count(), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let collab = ScriptedCollaborator::failing();
        let worker = LaunchWorker::new(fast_config(0));
        let cancel = CancellationToken::new();

        let outcome = worker
            .launch(
                &collab,
                &"p1".to_string(),
                &"live:creator".to_string(),
                &LaunchOptions::default(),
                &cancel,
            )
            .await;

        assert!(matches!(outcome, LaunchOutcome::Failed { .. }));
        assert_eq!(collab.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let collab = ScriptedCollaborator {
            fail_first: 2,
            ..ScriptedCollaborator::succeeding()
        };
        let worker = LaunchWorker::new(fast_config(5));
        let cancel = CancellationToken::new();

        let outcome = worker
            .launch(
                &collab,
                &"p1".to_string(),
                &"live:creator".to_string(),
                &LaunchOptions::default(),
                &cancel,
            )
            .await;

        match outcome {
            LaunchOutcome::Ready(session) => assert_eq!(session.retry_count, 2),
            other => panic!("expected Ready, got {:?}", other),
        }
        assert_eq!(collab.attempt_count(), 3);
    }

    #[tokio::test]
    async fn test_wrapper_loop_is_never_retried() {
        let collab = ScriptedCollaborator {
            wrapper_loop: true,
            ..ScriptedCollaborator::succeeding()
        };
        let worker = LaunchWorker::new(fast_config(5));
        let cancel = CancellationToken::new();

        let outcome = worker
            .launch(
                &collab,
                &"p1".to_string(),
                &"live:creator".to_string(),
                &LaunchOptions::default(),
                &cancel,
            )
            .await;

        match outcome {
            LaunchOutcome::Failed { message, .. } => {
                assert!(message.contains("Wrapper loop"), "message: {}", message);
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(collab.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_already_active_profile_is_skipped() {
        let collab = ScriptedCollaborator::succeeding();
        collab.launched.lock().unwrap().push("p1".to_string());
        let worker = LaunchWorker::new(fast_config(3));
        let cancel = CancellationToken::new();

        let outcome = worker
            .launch(
                &collab,
                &"p1".to_string(),
                &"live:creator".to_string(),
                &LaunchOptions::default(),
                &cancel,
            )
            .await;

        assert!(matches!(outcome, LaunchOutcome::Skipped { .. }));
        assert_eq!(collab.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_navigation_failure_closes_session() {
        let collab = ScriptedCollaborator {
            navigation_ok: false,
            ..ScriptedCollaborator::succeeding()
        };
        let worker = LaunchWorker::new(fast_config(1));
        let cancel = CancellationToken::new();

        let outcome = worker
            .launch(
                &collab,
                &"p1".to_string(),
                &"live:creator".to_string(),
                &LaunchOptions::default(),
                &cancel,
            )
            .await;

        match outcome {
            LaunchOutcome::Failed { message, .. } => {
                assert!(message.contains("navigation failed"), "message: {}", message);
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(collab.closed.lock().unwrap().as_slice(), ["p1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let collab = ScriptedCollaborator::succeeding();
        let worker = LaunchWorker::new(fast_config(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = worker
            .launch(
                &collab,
                &"p1".to_string(),
                &"live:creator".to_string(),
                &LaunchOptions::default(),
                &cancel,
            )
            .await;

        assert!(matches!(outcome, LaunchOutcome::Cancelled(_)));
        assert_eq!(collab.attempt_count(), 0);
    }
}
