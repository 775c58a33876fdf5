//! liveflock
//!
//! Orchestrates many long-running browser viewer sessions against a single
//! livestream target: bounded-concurrency launching, a per-session lifecycle
//! state machine, age-based replacement from a backlog, and continuous
//! per-session process-memory monitoring. The actual browser automation is
//! injected as a [`collaborator::LaunchCollaborator`].

pub mod collaborator;
pub mod errors;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod session;

use std::path::PathBuf;

use tracing::{error, info, warn};

use errors::OrchestratorError;

pub use collaborator::{
    LaunchCollaborator, LaunchError, LaunchOptions, NavigationContext, SessionHandle,
};
pub use metrics::{MetricsSnapshot, MetricsStore};
pub use monitor::{MemorySnapshot, MemoryTrend, ResourceMonitor, TrendClass};
pub use pool::{ReplacementEvent, ReplacementReason, RunReport, SeedSummary, SessionPool};
pub use session::{LaunchOutcome, LifecyclePhase, Session};

/// Persistent profile identity a session is launched with.
pub type ProfileId = String;

/// Opaque reference to the livestream target (creator handle or room URL).
pub type TargetRef = String;

/// Pool configuration, passed explicitly into [`SessionPool::new`].
///
/// No process-wide config state exists; every component reads the copy the
/// pool was built with.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Concurrent viewer sessions to maintain.
    #[serde(default = "default_max_viewers")]
    pub max_viewers: usize,
    /// Launches allowed in flight during the seed burst.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Session age at which replacement kicks in.
    #[serde(default = "default_max_age_minutes")]
    pub max_age_minutes: u64,
    /// Pause between consecutive replacement launches.
    #[serde(default = "default_replace_delay")]
    pub replace_delay_seconds: u64,
    /// Run-loop tick interval.
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    /// Launch attempts per profile (at least one attempt is always made).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Enable periodic history compaction and low-memory launch options.
    #[serde(default = "default_true")]
    pub memory_optimization: bool,
    /// Relaunch the same profile when the backlog is empty at eviction time.
    #[serde(default = "default_true")]
    pub continuous_reuse: bool,
    /// Launch sessions without a visible window.
    #[serde(default)]
    pub hidden: bool,

    /// Upper bound on a single collaborator launch call.
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_seconds: u64,
    /// Fixed delay between launch attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    /// Window for the collaborator to confirm the process/page handle.
    #[serde(default = "default_bootstrap_timeout")]
    pub bootstrap_timeout_seconds: u64,
    /// Dwell between the trust window and steady viewing.
    #[serde(default = "default_stabilize")]
    pub stabilize_seconds: u64,
    /// Per-interval memory delta that triggers a spike diagnostic.
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold_mb: f64,
    /// Time-to-live of entries in the metrics store.
    #[serde(default = "default_metrics_ttl")]
    pub metrics_ttl_seconds: u64,
    /// Executable-name substrings identifying the automated browser.
    #[serde(default = "default_browser_executables")]
    pub browser_executables: Vec<String>,
}

fn default_max_viewers() -> usize {
    5
}
fn default_max_concurrency() -> usize {
    6
}
fn default_max_age_minutes() -> u64 {
    30
}
fn default_replace_delay() -> u64 {
    5
}
fn default_check_interval() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_launch_timeout() -> u64 {
    120
}
fn default_retry_delay() -> u64 {
    2
}
fn default_bootstrap_timeout() -> u64 {
    30
}
fn default_stabilize() -> u64 {
    8
}
fn default_spike_threshold() -> f64 {
    300.0
}
fn default_metrics_ttl() -> u64 {
    300
}
fn default_browser_executables() -> Vec<String> {
    vec!["chrome".to_string(), "chromium".to_string()]
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_viewers: default_max_viewers(),
            max_concurrency: default_max_concurrency(),
            max_age_minutes: default_max_age_minutes(),
            replace_delay_seconds: default_replace_delay(),
            check_interval_seconds: default_check_interval(),
            max_retries: default_max_retries(),
            memory_optimization: true,
            continuous_reuse: true,
            hidden: false,
            launch_timeout_seconds: default_launch_timeout(),
            retry_delay_seconds: default_retry_delay(),
            bootstrap_timeout_seconds: default_bootstrap_timeout(),
            stabilize_seconds: default_stabilize(),
            spike_threshold_mb: default_spike_threshold(),
            metrics_ttl_seconds: default_metrics_ttl(),
            browser_executables: default_browser_executables(),
        }
    }
}

impl PoolConfig {
    /// Reject out-of-range values instead of silently clamping them.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        fn positive(name: &str, value: u64) -> Result<(), OrchestratorError> {
            if value == 0 {
                Err(OrchestratorError::ConfigInvalid(format!(
                    "{} must be at least 1",
                    name
                )))
            } else {
                Ok(())
            }
        }

        positive("maxViewers", self.max_viewers as u64)?;
        positive("maxConcurrency", self.max_concurrency as u64)?;
        positive("maxAgeMinutes", self.max_age_minutes)?;
        positive("checkIntervalSeconds", self.check_interval_seconds)?;
        positive("launchTimeoutSeconds", self.launch_timeout_seconds)?;
        positive("bootstrapTimeoutSeconds", self.bootstrap_timeout_seconds)?;
        positive("metricsTtlSeconds", self.metrics_ttl_seconds)?;
        if self.spike_threshold_mb <= 0.0 {
            return Err(OrchestratorError::ConfigInvalid(
                "spikeThresholdMb must be positive".to_string(),
            ));
        }
        if self.browser_executables.is_empty() {
            return Err(OrchestratorError::ConfigInvalid(
                "browserExecutables must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Config file path under the platform config directory.
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("liveflock").join("config.json"))
    }

    /// Load config from the default location, falling back to defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => {
                    info!("Loaded config from {:?}", path);
                    config
                }
                Err(err) => {
                    warn!("Failed to load config from {:?}: {:#}", path, err);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save config to the default location.
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("liveflock").join("logs"))
}

/// Initialize logging with a console layer and a daily-rolling file layer.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "liveflock.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
