//! Last-value metrics cache
//!
//! Thread-safe, TTL-bounded map from session id to the latest metrics
//! snapshot. History lives in the resource monitor's rings, never here; an
//! external reporting layer polls `snapshot()` on its own schedule.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;

use crate::monitor::MemoryBreakdown;
use crate::session::LifecyclePhase;
use crate::ProfileId;

/// Latest metrics for one session. Overwritten on every update.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub session_id: ProfileId,
    pub phase: LifecyclePhase,
    pub total_mb: f64,
    pub breakdown: MemoryBreakdown,
    /// Reported by the external layer when it knows the target's viewer
    /// count; the orchestrator never fills this in itself.
    pub viewer_count: Option<u64>,
    pub last_updated: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Snapshot with memory fields zeroed, for sessions that have not been
    /// sampled yet.
    pub fn empty(session_id: ProfileId, phase: LifecyclePhase) -> Self {
        Self {
            session_id,
            phase,
            total_mb: 0.0,
            breakdown: MemoryBreakdown::default(),
            viewer_count: None,
            last_updated: Utc::now(),
        }
    }
}

/// Concurrent last-value store, entries expire after the configured TTL.
pub struct MetricsStore {
    cache: Cache<ProfileId, MetricsSnapshot>,
}

impl MetricsStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Overwrite the snapshot for a session.
    pub fn update(&self, snapshot: MetricsSnapshot) {
        self.cache.insert(snapshot.session_id.clone(), snapshot);
    }

    /// Drop a session's entry. Called once when the session closes.
    pub fn remove(&self, session_id: &ProfileId) {
        self.cache.invalidate(session_id);
    }

    /// Latest snapshot for one session.
    pub fn get(&self, session_id: &ProfileId) -> Option<MetricsSnapshot> {
        self.cache.get(session_id)
    }

    /// Point-in-time copy of all live entries. Never exposes the internal
    /// map.
    pub fn snapshot(&self) -> HashMap<ProfileId, MetricsSnapshot> {
        self.cache
            .iter()
            .map(|(id, snap)| ((*id).clone(), snap))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: &str, total_mb: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            total_mb,
            ..MetricsSnapshot::empty(id.to_string(), LifecyclePhase::Idle)
        }
    }

    #[test]
    fn test_update_overwrites() {
        let store = MetricsStore::new(Duration::from_secs(60));
        store.update(snap("X-001", 100.0));
        store.update(snap("X-001", 250.0));
        assert_eq!(store.get(&"X-001".to_string()).unwrap().total_mb, 250.0);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_remove_purges_entry() {
        let store = MetricsStore::new(Duration::from_secs(60));
        store.update(snap("X-001", 100.0));
        store.remove(&"X-001".to_string());
        assert!(store.get(&"X-001".to_string()).is_none());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = MetricsStore::new(Duration::from_secs(60));
        store.update(snap("X-001", 100.0));
        let copy = store.snapshot();
        store.update(snap("X-002", 50.0));
        // The earlier copy does not observe later writes.
        assert_eq!(copy.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let store = MetricsStore::new(Duration::from_millis(50));
        store.update(snap("X-001", 100.0));
        assert!(store.get(&"X-001".to_string()).is_some());
        std::thread::sleep(Duration::from_millis(120));
        assert!(store.get(&"X-001".to_string()).is_none());
    }
}
