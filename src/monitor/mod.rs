//! Resource monitoring module
//!
//! Samples the OS process trees belonging to viewer sessions, classifies and
//! aggregates their memory, and analyzes trends over a sliding window.

mod history;
mod process;
mod sampler;

pub use history::{
    detect_spike, MemoryHistory, MemoryTrend, SpikeWarning, TrendClass, DEFAULT_HISTORY_WINDOW,
    TREND_MIN_SAMPLES,
};
pub use process::{
    classify_cmdline, matches_browser_executable, MemoryBreakdown, ProcessMemorySample,
    ProcessType,
};
pub use sampler::{DiscoveredProcess, MemorySnapshot, MonitorConfig, ResourceMonitor};
