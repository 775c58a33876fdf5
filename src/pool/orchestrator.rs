//! Session pool orchestrator
//!
//! Single source of truth for which profiles are queued vs. active.
//! Seeds the initial viewer burst with bounded concurrency, then runs the
//! steady-state tick loop: replace aged sessions, top up from the backlog,
//! sample memory, and wind everything down on cancellation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::replace::{ReplacementEvent, ReplacementReason, ReplacementScheduler};
use crate::collaborator::{LaunchCollaborator, LaunchOptions};
use crate::errors::OrchestratorError;
use crate::metrics::{MetricsSnapshot, MetricsStore};
use crate::monitor::{MonitorConfig, ResourceMonitor};
use crate::session::{LaunchOutcome, LaunchWorker, LaunchWorkerConfig, LifecycleEvent, LifecyclePhase, Session};
use crate::{PoolConfig, ProfileId, TargetRef};

/// Seed-burst stagger, matching the collaborator's tolerance for
/// near-simultaneous profile launches.
const STAGGER_MS_RANGE: std::ops::Range<u64> = 300..1000;

/// How many ticks pass between history compaction passes when memory
/// optimization is on.
const COMPACT_EVERY_TICKS: u64 = 4;

/// Outcome counts of the initial seed burst.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedSummary {
    pub launched: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Final accounting for one orchestrated run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub successful: Vec<ProfileId>,
    pub failed: Vec<(ProfileId, String)>,
    pub skipped: Vec<ProfileId>,
    pub replacements: u64,
    pub total_launched: u64,
}

/// Owns the backlog and active maps and arbitrates every launch and
/// eviction. All pool mutations happen on the task driving
/// [`SessionPool::run_loop`]; workers hand results back as return values.
pub struct SessionPool {
    config: PoolConfig,
    collaborator: Arc<dyn LaunchCollaborator>,
    monitor: Arc<ResourceMonitor>,
    metrics: Arc<MetricsStore>,
    scheduler: ReplacementScheduler,
    worker_config: LaunchWorkerConfig,
    options: LaunchOptions,
    cancel: CancellationToken,
    run_id: String,
    target: TargetRef,
    backlog: VecDeque<ProfileId>,
    active: HashMap<ProfileId, Session>,
    manual_evictions: Arc<StdMutex<Vec<ProfileId>>>,
    successful: Vec<ProfileId>,
    failed: Vec<(ProfileId, String)>,
    skipped: Vec<ProfileId>,
    replacements: u64,
    total_launched: u64,
    tick_counter: u64,
}

impl SessionPool {
    /// Build a pool around an injected collaborator. Fails with
    /// `ConfigInvalid` before anything starts when the configuration is out
    /// of range.
    pub fn new(
        config: PoolConfig,
        collaborator: Arc<dyn LaunchCollaborator>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let monitor = Arc::new(ResourceMonitor::new(MonitorConfig {
            browser_executables: config.browser_executables.clone(),
            history_window: crate::monitor::DEFAULT_HISTORY_WINDOW,
            spike_threshold_mb: config.spike_threshold_mb,
        }));
        let metrics = Arc::new(MetricsStore::new(Duration::from_secs(
            config.metrics_ttl_seconds,
        )));
        let scheduler = ReplacementScheduler::new(Duration::from_secs(config.max_age_minutes * 60));
        let worker_config = LaunchWorkerConfig::from_pool_config(&config);
        let options = LaunchOptions {
            hidden: config.hidden,
            low_memory: config.memory_optimization,
        };

        Ok(Self {
            config,
            collaborator,
            monitor,
            metrics,
            scheduler,
            worker_config,
            options,
            cancel: CancellationToken::new(),
            run_id: Uuid::new_v4().to_string(),
            target: String::new(),
            backlog: VecDeque::new(),
            active: HashMap::new(),
            manual_evictions: Arc::new(StdMutex::new(Vec::new())),
            successful: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            replacements: 0,
            total_launched: 0,
            tick_counter: 0,
        })
    }

    /// Token that interrupts the run. Clone it before handing the pool to
    /// the run-loop task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a graceful stop. The run loop observes this within one check
    /// interval, awaits in-flight launches and closes every active session.
    pub fn stop(&self) {
        info!("[Pool] Stop requested (run {})", self.run_id);
        self.cancel.cancel();
    }

    /// Queue a manual eviction, picked up on the next tick.
    pub fn request_evict(&self, profile: ProfileId) {
        if let Ok(mut pending) = self.manual_evictions.lock() {
            pending.push(profile);
        }
    }

    pub fn metrics(&self) -> Arc<MetricsStore> {
        self.metrics.clone()
    }

    pub fn monitor(&self) -> Arc<ResourceMonitor> {
        self.monitor.clone()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Profile ids currently in the active map.
    pub fn active_ids(&self) -> Vec<ProfileId> {
        self.active.keys().cloned().collect()
    }

    /// Seed the backlog and launch the initial viewer burst.
    ///
    /// Launches `min(max_viewers, profiles)` sessions concurrently, bounded
    /// by a semaphore of `max_concurrency` permits with a short stagger per
    /// launch. This is the only phase where launches overlap.
    pub async fn start(
        &mut self,
        profiles: Vec<ProfileId>,
        target: TargetRef,
    ) -> Result<SeedSummary, OrchestratorError> {
        if target.trim().is_empty() {
            return Err(OrchestratorError::ConfigInvalid(
                "target reference is required".to_string(),
            ));
        }
        if profiles.is_empty() {
            return Err(OrchestratorError::ConfigInvalid(
                "no eligible profiles supplied".to_string(),
            ));
        }

        self.target = target;

        let mut seen = HashSet::new();
        for profile in profiles {
            if seen.insert(profile.clone()) {
                self.backlog.push_back(profile);
            } else {
                warn!("[Pool] Duplicate profile {} dropped from backlog", profile);
            }
        }

        let seed_count = self.config.max_viewers.min(self.backlog.len());
        let initial: Vec<ProfileId> = self.backlog.drain(..seed_count).collect();
        info!(
            "[Pool] Run {} seeding {} session(s) (max_concurrency: {})",
            self.run_id,
            initial.len(),
            self.config.max_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks = Vec::with_capacity(initial.len());

        for profile in initial {
            let semaphore = semaphore.clone();
            let collaborator = self.collaborator.clone();
            let worker_config = self.worker_config.clone();
            let target = self.target.clone();
            let options = self.options.clone();
            let cancel = self.cancel.clone();

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return LaunchOutcome::Cancelled(profile);
                };
                let stagger_ms = rand::thread_rng().gen_range(STAGGER_MS_RANGE);
                tokio::select! {
                    _ = cancel.cancelled() => return LaunchOutcome::Cancelled(profile),
                    _ = sleep(Duration::from_millis(stagger_ms)) => {}
                }
                let worker = LaunchWorker::new(worker_config);
                worker
                    .launch(collaborator.as_ref(), &profile, &target, &options, &cancel)
                    .await
            }));
        }

        let mut summary = SeedSummary {
            launched: 0,
            failed: 0,
            skipped: 0,
        };
        for result in join_all(tasks).await {
            match result {
                Ok(outcome) => match self.apply_outcome(outcome) {
                    Some(true) => summary.launched += 1,
                    Some(false) => summary.failed += 1,
                    None => summary.skipped += 1,
                },
                Err(err) => {
                    warn!("[Pool] Seed launch task panicked: {}", err);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "[Pool] Seed complete: {} launched, {} failed, {} skipped",
            summary.launched, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// Steady-state coordinator loop.
    ///
    /// Runs until both backlog and active are empty or the run is cancelled,
    /// then closes every remaining session and returns the report.
    pub async fn run_loop(&mut self) -> RunReport {
        let interval = Duration::from_secs(self.config.check_interval_seconds);

        loop {
            if self.cancel.is_cancelled() {
                debug!("[Pool] Cancellation observed, leaving run loop");
                break;
            }
            if self.active.is_empty() && self.backlog.is_empty() {
                info!("[Pool] Backlog and active set drained, run complete");
                break;
            }

            self.tick_counter += 1;
            self.process_replacements().await;
            self.top_up_from_backlog().await;
            self.sample_active_sessions().await;

            if self.config.memory_optimization && self.tick_counter % COMPACT_EVERY_TICKS == 0 {
                self.monitor.compact();
            }

            if self.active.is_empty() && self.backlog.is_empty() {
                info!("[Pool] Backlog and active set drained, run complete");
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }

        self.shutdown().await;
        self.report()
    }

    /// Evict every session due for replacement and launch substitutes,
    /// strictly serialized with the configured delay between replacements.
    async fn process_replacements(&mut self) {
        let manual = self
            .manual_evictions
            .lock()
            .map(|mut pending| pending.drain(..).collect::<Vec<_>>())
            .unwrap_or_default();

        let mut events = self
            .scheduler
            .due_for_replacement(&self.active, Instant::now());
        events.extend(self.scheduler.manual_events(manual, &self.active));

        if events.is_empty() {
            return;
        }
        info!("[Replace] {} session(s) due for replacement", events.len());

        let replace_delay = Duration::from_secs(self.config.replace_delay_seconds);
        for event in events {
            if self.cancel.is_cancelled() {
                return;
            }
            self.replace_one(event).await;
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(replace_delay) => {}
            }
        }
    }

    /// Evict one session, then attempt exactly one replacement launch.
    async fn replace_one(&mut self, event: ReplacementEvent) {
        let evicted = match self.close_active_session(&event.session_id, Some(event.reason)).await {
            Some(session) => session,
            None => return,
        };
        info!(
            "[Replace] Evicted {} ({:?}, age {}s)",
            evicted.id,
            event.reason,
            evicted.age(Instant::now()).as_secs()
        );

        // Evicted ids do not rejoin the backlog; fresh profiles take
        // priority, the same id is relaunched only when the backlog is dry
        // and continuous reuse is on.
        let next = match self.backlog.pop_front() {
            Some(profile) => Some(profile),
            None if self.config.continuous_reuse => Some(evicted.id.clone()),
            None => {
                info!(
                    "[Replace] Backlog empty and continuous reuse off, slot for {} stays empty",
                    evicted.id
                );
                None
            }
        };

        if let Some(profile) = next {
            if self.launch_into_active(profile).await {
                self.replacements += 1;
            }
        }
    }

    /// Top up the active set from the backlog, one launch at a time.
    async fn top_up_from_backlog(&mut self) {
        while self.active.len() < self.config.max_viewers && !self.backlog.is_empty() {
            if self.cancel.is_cancelled() {
                return;
            }
            let Some(profile) = self.backlog.pop_front() else {
                return;
            };
            self.launch_into_active(profile).await;
        }
    }

    /// Run one launch worker to completion and fold its outcome into the
    /// pool state. Returns true when a session entered the active map.
    async fn launch_into_active(&mut self, profile: ProfileId) -> bool {
        let worker = LaunchWorker::new(self.worker_config.clone());
        let outcome = worker
            .launch(
                self.collaborator.as_ref(),
                &profile,
                &self.target,
                &self.options,
                &self.cancel,
            )
            .await;
        self.apply_outcome(outcome) == Some(true)
    }

    /// Fold a launch outcome into pool state on the coordinator task.
    ///
    /// Returns `Some(true)` on a live session, `Some(false)` on failure,
    /// `None` for skips and cancellations.
    fn apply_outcome(&mut self, outcome: LaunchOutcome) -> Option<bool> {
        match outcome {
            LaunchOutcome::Ready(session) => {
                self.total_launched += 1;
                if !self.successful.contains(&session.id) {
                    self.successful.push(session.id.clone());
                }
                self.metrics.update(MetricsSnapshot::empty(
                    session.id.clone(),
                    session.phase(),
                ));
                debug_assert!(self.active.len() < self.config.max_viewers);
                self.active.insert(session.id.clone(), session);
                Some(true)
            }
            LaunchOutcome::Failed { profile, message } => {
                warn!("[Pool] Profile {} failed: {}", profile, message);
                self.failed.push((profile, message));
                Some(false)
            }
            LaunchOutcome::Skipped { profile, reason } => {
                info!("[Pool] Profile {} skipped: {}", profile, reason);
                self.skipped.push(profile);
                None
            }
            LaunchOutcome::Cancelled(profile) => {
                debug!("[Pool] Launch of {} cancelled", profile);
                None
            }
        }
    }

    /// Sample memory for every live session off the coordinator task and
    /// refresh the metrics store. Strictly best-effort: a failed read skips
    /// that session for the tick and never evicts it.
    async fn sample_active_sessions(&self) {
        let targets: Vec<(ProfileId, String, LifecyclePhase)> = self
            .active
            .values()
            .filter(|s| !s.phase().is_terminal())
            .map(|s| (s.id.clone(), s.handle.session_marker.clone(), s.phase()))
            .collect();
        if targets.is_empty() {
            return;
        }

        let monitor = self.monitor.clone();
        let metrics = self.metrics.clone();
        let sampling = tokio::task::spawn_blocking(move || {
            for (session_id, marker, phase) in targets {
                match monitor.measure_total(&session_id, &marker) {
                    Ok(snapshot) => {
                        let viewer_count = metrics.get(&session_id).and_then(|s| s.viewer_count);
                        metrics.update(MetricsSnapshot {
                            session_id: session_id.clone(),
                            phase,
                            total_mb: snapshot.total_mb,
                            breakdown: snapshot.breakdown.clone(),
                            viewer_count,
                            last_updated: chrono::Utc::now(),
                        });

                        if let Some(spike) = monitor.check_spike(&session_id) {
                            warn!(
                                "[Monitor] Session {} memory spiked +{:.1} MB ({:.1} -> {:.1})",
                                session_id, spike.delta_mb, spike.previous_mb, spike.current_mb
                            );
                            // Out-of-band diagnostic pass: full per-process
                            // breakdown plus the current trend.
                            let trend = monitor.trend(&session_id);
                            debug!("{}", ResourceMonitor::format_report(&snapshot, &trend));
                        }
                    }
                    Err(err) => {
                        warn!(
                            "[Monitor] Sampling skipped for {} this tick: {}",
                            session_id, err
                        );
                    }
                }
            }
        });

        if let Err(err) = sampling.await {
            warn!("[Monitor] Sampling task failed: {}", err);
        }
    }

    /// Remove a session from the active map and release its handle.
    ///
    /// Close failures are logged, never fatal. The metrics entry and memory
    /// history are purged with the session.
    async fn close_active_session(
        &mut self,
        profile: &ProfileId,
        reason: Option<ReplacementReason>,
    ) -> Option<Session> {
        let mut session = self.active.remove(profile)?;
        let now = Instant::now();

        if reason.is_some() && session.phase() == LifecyclePhase::Idle {
            session.apply(LifecycleEvent::EvictionRequested, now);
        }
        if let Err(err) = self.collaborator.close_session(&session.handle).await {
            warn!("[Pool] Closing {} returned error: {}", session.id, err);
        }
        if !session.phase().is_terminal() {
            session.apply(LifecycleEvent::HandleClosed, now);
        }

        self.metrics.remove(&session.id);
        self.monitor.forget(&session.id);
        Some(session)
    }

    /// Close every remaining session best-effort.
    async fn shutdown(&mut self) {
        let remaining: Vec<ProfileId> = self.active.keys().cloned().collect();
        if !remaining.is_empty() {
            info!("[Pool] Shutting down {} active session(s)", remaining.len());
        }
        for profile in remaining {
            self.close_active_session(&profile, None).await;
        }
    }

    fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id.clone(),
            successful: self.successful.clone(),
            failed: self.failed.clone(),
            skipped: self.skipped.clone(),
            replacements: self.replacements,
            total_launched: self.total_launched,
        }
    }
}
