//! Per-session lifecycle state machine
//!
//! Tracks one viewer session through
//! Bootstrap → TrustWindow → Stabilize → Idle → (Evicting) → Closed, with
//! `Failed` as a sink reachable from any non-terminal phase. Transitions are a
//! pure function of (phase, event); timeouts are computed from the
//! `entered_at` stamp against a caller-supplied instant so they stay testable.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::warn;

use crate::collaborator::SessionHandle;
use crate::{ProfileId, TargetRef};

/// Phase of a viewer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecyclePhase {
    /// Launched, process/page handle not yet confirmed.
    Bootstrap,
    /// Natural-navigation sequence in progress.
    TrustWindow,
    /// Fixed dwell before steady viewing; passive monitoring only.
    Stabilize,
    /// Steady viewing state.
    Idle,
    /// Selected for retirement, handle close pending.
    Evicting,
    /// Handle released. Terminal.
    Closed,
    /// Terminal sink for any fault.
    Failed,
}

impl LifecyclePhase {
    /// Terminal phases accept no further events.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecyclePhase::Closed | LifecyclePhase::Failed)
    }
}

/// Events that drive phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Collaborator confirmed the underlying process/page handle exists.
    HandleConfirmed,
    /// Handle confirmation did not arrive within the bootstrap window.
    BootstrapTimedOut,
    /// Navigation context reported successfully.
    NavigationSucceeded,
    /// Navigation context reported as failed.
    NavigationFailed,
    /// Stabilize dwell elapsed.
    DwellElapsed,
    /// Replacement scheduler selected this session for retirement.
    EvictionRequested,
    /// External handle released.
    HandleClosed,
    /// Any other fault.
    Fault,
}

/// Pure transition function. Returns the next phase, or `None` when the event
/// is not valid in the current phase.
pub fn next_phase(current: LifecyclePhase, event: LifecycleEvent) -> Option<LifecyclePhase> {
    use LifecycleEvent::*;
    use LifecyclePhase::*;

    if current.is_terminal() {
        return None;
    }

    match (current, event) {
        (Bootstrap, HandleConfirmed) => Some(TrustWindow),
        (Bootstrap, BootstrapTimedOut) => Some(Failed),
        (TrustWindow, NavigationSucceeded) => Some(Stabilize),
        (TrustWindow, NavigationFailed) => Some(Failed),
        (Stabilize, DwellElapsed) => Some(Idle),
        (Idle, EvictionRequested) => Some(Evicting),
        (_, HandleClosed) => Some(Closed),
        (_, Fault) => Some(Failed),
        _ => None,
    }
}

/// Current phase plus the instant it was entered.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleState {
    phase: LifecyclePhase,
    entered_at: Instant,
}

impl LifecycleState {
    /// Fresh state machine in `Bootstrap`, entered at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            phase: LifecyclePhase::Bootstrap,
            entered_at: now,
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// How long the session has been in the current phase.
    pub fn time_in_phase(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.entered_at)
    }

    /// Apply `event`. Returns true when the transition was accepted; an
    /// accepted transition re-stamps `entered_at` with `now`.
    pub fn advance(&mut self, event: LifecycleEvent, now: Instant) -> bool {
        match next_phase(self.phase, event) {
            Some(next) => {
                self.phase = next;
                self.entered_at = now;
                true
            }
            None => false,
        }
    }
}

/// One viewer session owned by the pool's active map.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: ProfileId,
    pub lifecycle: LifecycleState,
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
    pub retry_count: u32,
    pub target: TargetRef,
    pub last_error: Option<String>,
    pub handle: SessionHandle,
}

impl Session {
    /// New session in `Bootstrap` with the start timestamp recorded.
    pub fn new(handle: SessionHandle, target: TargetRef, retry_count: u32, now: Instant) -> Self {
        Self {
            id: handle.profile.clone(),
            lifecycle: LifecycleState::new(now),
            started_at: now,
            started_at_utc: Utc::now(),
            retry_count,
            target,
            last_error: None,
            handle,
        }
    }

    /// Age of the session since launch.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.lifecycle.phase()
    }

    /// Apply a lifecycle event, warning on a rejected transition.
    pub fn apply(&mut self, event: LifecycleEvent, now: Instant) -> bool {
        let accepted = self.lifecycle.advance(event, now);
        if !accepted {
            warn!(
                "[Lifecycle] Session {} rejected {:?} in phase {:?}",
                self.id,
                event,
                self.phase()
            );
        }
        accepted
    }

    /// Move to `Failed` recording the error message.
    pub fn fail(&mut self, error: impl Into<String>, now: Instant) {
        self.last_error = Some(error.into());
        self.lifecycle.advance(LifecycleEvent::Fault, now);
    }
}
