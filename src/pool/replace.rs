//! Replacement scheduler
//!
//! Decides when and which active sessions must be retired. The pool performs
//! the actual evict/relaunch; events emitted here are consumed within the
//! same tick and never persisted.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::session::{LifecyclePhase, Session};
use crate::ProfileId;

/// Why a session was selected for retirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplacementReason {
    MaxAgeExceeded,
    LaunchHealthCheckFailed,
    ManualEvict,
}

/// One retirement decision, consumed by the pool on the tick it was made.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementEvent {
    pub session_id: ProfileId,
    pub reason: ReplacementReason,
    pub timestamp: DateTime<Utc>,
}

impl ReplacementEvent {
    fn new(session_id: ProfileId, reason: ReplacementReason) -> Self {
        Self {
            session_id,
            reason,
            timestamp: Utc::now(),
        }
    }
}

/// Scans the active map for age and health violations.
pub struct ReplacementScheduler {
    max_age: Duration,
}

impl ReplacementScheduler {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Sessions due for retirement at `now`.
    ///
    /// Idle sessions whose age reached the maximum come first, oldest first
    /// so worst-case staleness stays bounded; sessions stuck in `Failed` are
    /// swept afterwards as health violations.
    pub fn due_for_replacement(
        &self,
        active: &HashMap<ProfileId, Session>,
        now: Instant,
    ) -> Vec<ReplacementEvent> {
        let mut aged: Vec<&Session> = active
            .values()
            .filter(|s| s.phase() == LifecyclePhase::Idle && s.age(now) >= self.max_age)
            .collect();
        aged.sort_by_key(|s| s.started_at);

        let mut failed: Vec<&Session> = active
            .values()
            .filter(|s| s.phase() == LifecyclePhase::Failed)
            .collect();
        failed.sort_by_key(|s| s.started_at);

        aged.iter()
            .map(|s| ReplacementEvent::new(s.id.clone(), ReplacementReason::MaxAgeExceeded))
            .chain(
                failed.iter().map(|s| {
                    ReplacementEvent::new(s.id.clone(), ReplacementReason::LaunchHealthCheckFailed)
                }),
            )
            .collect()
    }

    /// Pass caller-requested evictions through, dropping ids that are no
    /// longer active.
    pub fn manual_events(
        &self,
        requested: Vec<ProfileId>,
        active: &HashMap<ProfileId, Session>,
    ) -> Vec<ReplacementEvent> {
        requested
            .into_iter()
            .filter(|id| active.contains_key(id))
            .map(|id| ReplacementEvent::new(id, ReplacementReason::ManualEvict))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::SessionHandle;
    use crate::session::LifecycleEvent;

    fn idle_session(id: &str, started_at: Instant) -> Session {
        let handle = SessionHandle {
            profile: id.to_string(),
            session_marker: format!("viewer_data/{}", id),
            pid: None,
        };
        let mut session = Session::new(handle, "live:creator".to_string(), 0, started_at);
        session.apply(LifecycleEvent::HandleConfirmed, started_at);
        session.apply(LifecycleEvent::NavigationSucceeded, started_at);
        session.apply(LifecycleEvent::DwellElapsed, started_at);
        session
    }

    fn active_map(sessions: Vec<Session>) -> HashMap<ProfileId, Session> {
        sessions.into_iter().map(|s| (s.id.clone(), s)).collect()
    }

    #[test]
    fn test_exactly_one_event_for_over_age_session() {
        let scheduler = ReplacementScheduler::new(Duration::from_secs(30 * 60));
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(31 * 60);
        // "old" exceeds the age cap, "young" is 10 minutes in.
        let active = active_map(vec![
            idle_session("old", t0),
            idle_session("young", t0 + Duration::from_secs(21 * 60)),
        ]);

        let events = scheduler.due_for_replacement(&active, now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id, "old");
        assert_eq!(events[0].reason, ReplacementReason::MaxAgeExceeded);
    }

    #[test]
    fn test_age_boundary_is_inclusive() {
        let scheduler = ReplacementScheduler::new(Duration::from_secs(60));
        let t0 = Instant::now();
        let active = active_map(vec![idle_session("edge", t0)]);
        let events = scheduler.due_for_replacement(&active, t0 + Duration::from_secs(60));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_oldest_first_ordering() {
        let scheduler = ReplacementScheduler::new(Duration::from_secs(60));
        let t0 = Instant::now();
        let active = active_map(vec![
            idle_session("b", t0 + Duration::from_secs(10)),
            idle_session("a", t0),
            idle_session("c", t0 + Duration::from_secs(20)),
        ]);

        let events = scheduler.due_for_replacement(&active, t0 + Duration::from_secs(3600));
        let order: Vec<&str> = events.iter().map(|e| e.session_id.as_str()).collect();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn test_non_idle_sessions_are_not_age_evicted() {
        let scheduler = ReplacementScheduler::new(Duration::from_secs(60));
        let t0 = Instant::now();
        let handle = SessionHandle {
            profile: "boot".to_string(),
            session_marker: "viewer_data/boot".to_string(),
            pid: None,
        };
        // Still in Bootstrap, never selected no matter the age.
        let session = Session::new(handle, "live:creator".to_string(), 0, t0);
        let active = active_map(vec![session]);

        let events = scheduler.due_for_replacement(&active, t0 + Duration::from_secs(3600));
        assert!(events.is_empty());
    }

    #[test]
    fn test_failed_sessions_swept_as_health_violations() {
        let scheduler = ReplacementScheduler::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        let mut broken = idle_session("broken", t0);
        broken.fail("renderer gone", t0 + Duration::from_secs(5));
        let active = active_map(vec![broken, idle_session("fine", t0)]);

        let events = scheduler.due_for_replacement(&active, t0 + Duration::from_secs(10));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id, "broken");
        assert_eq!(events[0].reason, ReplacementReason::LaunchHealthCheckFailed);
    }

    #[test]
    fn test_manual_events_filter_unknown_ids() {
        let scheduler = ReplacementScheduler::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        let active = active_map(vec![idle_session("known", t0)]);

        let events = scheduler.manual_events(
            vec!["known".to_string(), "ghost".to_string()],
            &active,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id, "known");
        assert_eq!(events[0].reason, ReplacementReason::ManualEvict);
    }
}
