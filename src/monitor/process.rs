//! Browser process classification
//!
//! Maps OS processes to the session they belong to and to a coarse process
//! type, using command-line substring matching on the automation browser's
//! own flags.

use crate::ProfileId;

/// Coarse classification of one browser OS process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessType {
    Browser,
    Renderer,
    Gpu,
    Network,
    Utility,
    Other,
}

/// Classify a process from its full command line.
///
/// The network service ships as a utility subprocess, so the network check
/// runs before the generic utility match. A command line with no `--type=`
/// flag is the main browser process.
pub fn classify_cmdline(cmdline: &str) -> ProcessType {
    if cmdline.contains("--type=renderer") {
        ProcessType::Renderer
    } else if cmdline.contains("--type=gpu-process") {
        ProcessType::Gpu
    } else if cmdline.contains("--type=network") || cmdline.contains("NetworkService") {
        ProcessType::Network
    } else if cmdline.contains("--type=utility") {
        ProcessType::Utility
    } else if !cmdline.contains("--type=") {
        ProcessType::Browser
    } else {
        ProcessType::Other
    }
}

/// Whether an executable name belongs to the automated browser.
pub fn matches_browser_executable(name: &str, executables: &[String]) -> bool {
    let lowered = name.to_lowercase();
    executables.iter().any(|exe| lowered.contains(&exe.to_lowercase()))
}

/// One sampled process, immutable once created.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMemorySample {
    pub pid: u32,
    pub session_id: ProfileId,
    pub process_type: ProcessType,
    pub rss_mb: f64,
    pub vms_mb: f64,
    pub cpu_percent: f64,
    pub thread_count: usize,
}

/// RSS sums per process type, in MB.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryBreakdown {
    pub browser: f64,
    pub renderer: f64,
    pub gpu: f64,
    pub network: f64,
    pub utility: f64,
    pub other: f64,
}

impl MemoryBreakdown {
    /// Add `rss_mb` to the bucket for `process_type`.
    pub fn add(&mut self, process_type: ProcessType, rss_mb: f64) {
        match process_type {
            ProcessType::Browser => self.browser += rss_mb,
            ProcessType::Renderer => self.renderer += rss_mb,
            ProcessType::Gpu => self.gpu += rss_mb,
            ProcessType::Network => self.network += rss_mb,
            ProcessType::Utility => self.utility += rss_mb,
            ProcessType::Other => self.other += rss_mb,
        }
    }

    /// Total RSS across all buckets.
    pub fn total(&self) -> f64 {
        self.browser + self.renderer + self.gpu + self.network + self.utility + self.other
    }
}
