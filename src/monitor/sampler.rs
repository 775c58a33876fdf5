//! Resource monitor
//!
//! Read-only observation of the OS processes belonging to each session.
//! Discovers processes by executable name plus a per-session command-line
//! marker, sums RSS per classification bucket, and feeds the per-session
//! history rings. Never mutates session, browser, or page state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

use super::history::{MemoryHistory, MemoryTrend, SpikeWarning, TrendClass};
use super::process::{
    classify_cmdline, matches_browser_executable, MemoryBreakdown, ProcessMemorySample,
};
use crate::errors::OrchestratorError;
use crate::ProfileId;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Monitor settings, derived from the pool configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Executable-name substrings identifying the automated browser.
    pub browser_executables: Vec<String>,
    /// Sliding window for the per-session history rings.
    pub history_window: Duration,
    /// Delta between consecutive samples that triggers a spike warning.
    pub spike_threshold_mb: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            browser_executables: vec!["chrome".to_string(), "chromium".to_string()],
            history_window: super::history::DEFAULT_HISTORY_WINDOW,
            spike_threshold_mb: 300.0,
        }
    }
}

/// One OS process matched to a session during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredProcess {
    pub pid: u32,
    pub process_type: super::process::ProcessType,
    pub rss_mb: f64,
    pub vms_mb: f64,
    pub cpu_percent: f64,
    pub thread_count: usize,
}

/// Point-in-time memory measurement for one session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub session_id: ProfileId,
    pub total_mb: f64,
    pub breakdown: MemoryBreakdown,
    pub process_count: usize,
    pub details: Vec<ProcessMemorySample>,
    pub sampled_at: DateTime<Utc>,
}

/// Samples session process trees and keeps their memory histories.
pub struct ResourceMonitor {
    config: MonitorConfig,
    system: Mutex<System>,
    histories: DashMap<ProfileId, MemoryHistory>,
}

impl ResourceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            system: Mutex::new(System::new()),
            histories: DashMap::new(),
        }
    }

    /// Enumerate the OS processes belonging to a session: executable name
    /// matches the automated browser and the command line carries `marker`.
    ///
    /// Processes that vanish between enumeration and read simply drop out of
    /// the refreshed table and are never observed.
    pub fn discover_processes(&self, marker: &str) -> Vec<DiscoveredProcess> {
        let mut sys = self.system.lock();
        let refresh = ProcessRefreshKind::nothing()
            .with_memory()
            .with_cpu()
            .with_cmd(UpdateKind::Always);
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);

        let mut discovered = Vec::new();
        for (pid, process) in sys.processes() {
            let name = process.name().to_string_lossy();
            if !matches_browser_executable(&name, &self.config.browser_executables) {
                continue;
            }

            let cmdline = process
                .cmd()
                .iter()
                .map(|part| part.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            if !cmdline.contains(marker) {
                continue;
            }

            discovered.push(DiscoveredProcess {
                pid: pid.as_u32(),
                process_type: classify_cmdline(&cmdline),
                rss_mb: process.memory() as f64 / BYTES_PER_MB,
                vms_mb: process.virtual_memory() as f64 / BYTES_PER_MB,
                cpu_percent: process.cpu_usage() as f64,
                thread_count: thread_count(process),
            });
        }
        discovered
    }

    /// Measure total memory of every process carrying `marker` on its
    /// command line, append the total to the session's history ring, and
    /// return the snapshot.
    pub fn measure_total(
        &self,
        session_id: &ProfileId,
        marker: &str,
    ) -> Result<MemorySnapshot, OrchestratorError> {
        if marker.is_empty() {
            return Err(OrchestratorError::ResourceMonitor(
                "empty session marker".to_string(),
            ));
        }

        let mut breakdown = MemoryBreakdown::default();
        let mut details = Vec::new();

        for proc in self.discover_processes(marker) {
            breakdown.add(proc.process_type, proc.rss_mb);
            details.push(ProcessMemorySample {
                pid: proc.pid,
                session_id: session_id.clone(),
                process_type: proc.process_type,
                rss_mb: proc.rss_mb,
                vms_mb: proc.vms_mb,
                cpu_percent: proc.cpu_percent,
                thread_count: proc.thread_count,
            });
        }

        let total_mb = breakdown.total();
        self.histories
            .entry(session_id.clone())
            .or_insert_with(|| MemoryHistory::new(self.config.history_window))
            .record(total_mb);

        Ok(MemorySnapshot {
            session_id: session_id.clone(),
            total_mb,
            breakdown,
            process_count: details.len(),
            details,
            sampled_at: Utc::now(),
        })
    }

    /// Trend over the session's recent samples; `Unknown` when the session
    /// has no history yet.
    pub fn trend(&self, session_id: &ProfileId) -> MemoryTrend {
        self.histories
            .get(session_id)
            .map(|history| history.trend())
            .unwrap_or(MemoryTrend {
                classification: TrendClass::Unknown,
                slope_mb_per_min: 0.0,
                min_mb: 0.0,
                max_mb: 0.0,
                avg_mb: 0.0,
                sample_count: 0,
            })
    }

    /// Compare the session's two most recent samples against the configured
    /// spike threshold.
    pub fn check_spike(&self, session_id: &ProfileId) -> Option<SpikeWarning> {
        let history = self.histories.get(session_id)?;
        let (previous, current) = history.last_pair()?;
        super::history::detect_spike(current, previous, self.config.spike_threshold_mb)
    }

    /// Number of recorded samples for a session.
    pub fn sample_count(&self, session_id: &ProfileId) -> usize {
        self.histories
            .get(session_id)
            .map(|history| history.len())
            .unwrap_or(0)
    }

    /// Drop a closed session's history.
    pub fn forget(&self, session_id: &ProfileId) {
        self.histories.remove(session_id);
    }

    /// Trim every ring to its window and drop empty entries. Used as the
    /// coarse-interval cleanup hint when memory optimization is enabled.
    pub fn compact(&self) {
        let now = std::time::SystemTime::now();
        for mut entry in self.histories.iter_mut() {
            entry.value_mut().trim(now);
        }
        self.histories.retain(|_, history| !history.is_empty());
        debug!("[Monitor] Compacted {} history ring(s)", self.histories.len());
    }

    /// Human-readable per-session report for the out-of-band diagnostic pass.
    pub fn format_report(snapshot: &MemorySnapshot, trend: &MemoryTrend) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "session {}: {:.1} MB across {} process(es)",
            snapshot.session_id, snapshot.total_mb, snapshot.process_count
        ));
        let b = &snapshot.breakdown;
        lines.push(format!(
            "  browser {:.1} | renderer {:.1} | gpu {:.1} | network {:.1} | utility {:.1} | other {:.1}",
            b.browser, b.renderer, b.gpu, b.network, b.utility, b.other
        ));
        if trend.classification != TrendClass::Unknown {
            lines.push(format!(
                "  trend {:?} ({:+.2} MB/min, range {:.1}-{:.1} MB over {} samples)",
                trend.classification,
                trend.slope_mb_per_min,
                trend.min_mb,
                trend.max_mb,
                trend.sample_count
            ));
        }
        lines.join("\n")
    }
}

#[cfg(target_os = "linux")]
fn thread_count(process: &sysinfo::Process) -> usize {
    process.tasks().map_or(0, |tasks| tasks.len())
}

#[cfg(not(target_os = "linux"))]
fn thread_count(_process: &sysinfo::Process) -> usize {
    0
}
