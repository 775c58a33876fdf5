//! Per-session memory history and trend analysis
//!
//! A bounded ring of `(timestamp, total_mb)` samples per session, trimmed to
//! a sliding time window on insert. Trends are derived on demand, never
//! stored.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

/// Sliding window retained per session.
pub const DEFAULT_HISTORY_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Minimum samples before a trend can be classified.
pub const TREND_MIN_SAMPLES: usize = 10;

/// Slope magnitude, in MB per minute, separating stable from a real trend.
const TREND_SLOPE_MB_PER_MIN: f64 = 5.0;

/// Trend classification over the recent sample window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrendClass {
    Increasing,
    Decreasing,
    Stable,
    Unknown,
}

/// Derived memory trend. Computed from the most recent
/// [`TREND_MIN_SAMPLES`] samples.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryTrend {
    pub classification: TrendClass,
    pub slope_mb_per_min: f64,
    pub min_mb: f64,
    pub max_mb: f64,
    pub avg_mb: f64,
    pub sample_count: usize,
}

impl MemoryTrend {
    fn unknown(sample_count: usize) -> Self {
        Self {
            classification: TrendClass::Unknown,
            slope_mb_per_min: 0.0,
            min_mb: 0.0,
            max_mb: 0.0,
            avg_mb: 0.0,
            sample_count,
        }
    }
}

/// Warning emitted when total memory jumps within one sampling interval.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpikeWarning {
    pub previous_mb: f64,
    pub current_mb: f64,
    pub delta_mb: f64,
}

/// Returns a warning if memory grew by at least `threshold_mb` between two
/// consecutive samples.
pub fn detect_spike(current_mb: f64, previous_mb: f64, threshold_mb: f64) -> Option<SpikeWarning> {
    let delta_mb = current_mb - previous_mb;
    if delta_mb >= threshold_mb {
        Some(SpikeWarning {
            previous_mb,
            current_mb,
            delta_mb,
        })
    } else {
        None
    }
}

/// Time-bounded ring of memory totals for one session.
#[derive(Debug)]
pub struct MemoryHistory {
    samples: VecDeque<(SystemTime, f64)>,
    window: Duration,
}

impl MemoryHistory {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Record a sample stamped now.
    pub fn record(&mut self, total_mb: f64) {
        self.record_at(SystemTime::now(), total_mb);
    }

    /// Record a sample with an explicit timestamp. Oldest samples falling
    /// outside the window are evicted on insert.
    pub fn record_at(&mut self, at: SystemTime, total_mb: f64) {
        self.samples.push_back((at, total_mb));
        self.trim(at);
    }

    /// Drop samples older than the window relative to `now`.
    pub fn trim(&mut self, now: SystemTime) {
        while let Some(&(t, _)) = self.samples.front() {
            match now.duration_since(t) {
                Ok(age) if age > self.window => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent total, if any.
    pub fn latest(&self) -> Option<f64> {
        self.samples.back().map(|&(_, mb)| mb)
    }

    /// The two most recent totals as (previous, current), for spike checks.
    pub fn last_pair(&self) -> Option<(f64, f64)> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }
        Some((self.samples[n - 2].1, self.samples[n - 1].1))
    }

    /// Trend over the most recent [`TREND_MIN_SAMPLES`] samples.
    ///
    /// Slope is endpoint-to-endpoint: `(last - first) / minutes`. Below the
    /// sample minimum the classification is `Unknown`.
    pub fn trend(&self) -> MemoryTrend {
        if self.samples.len() < TREND_MIN_SAMPLES {
            return MemoryTrend::unknown(self.samples.len());
        }

        let recent: Vec<&(SystemTime, f64)> = self
            .samples
            .iter()
            .skip(self.samples.len() - TREND_MIN_SAMPLES)
            .collect();

        let (t_first, first_mb) = *recent[0];
        let (t_last, last_mb) = *recent[recent.len() - 1];

        let span_secs = t_last
            .duration_since(t_first)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let mbs: Vec<f64> = recent.iter().map(|&&(_, mb)| mb).collect();
        let min_mb = mbs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_mb = mbs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg_mb = mbs.iter().sum::<f64>() / mbs.len() as f64;

        if span_secs == 0.0 {
            return MemoryTrend {
                classification: TrendClass::Stable,
                slope_mb_per_min: 0.0,
                min_mb,
                max_mb,
                avg_mb,
                sample_count: recent.len(),
            };
        }

        let slope_mb_per_min = (last_mb - first_mb) / (span_secs / 60.0);
        let classification = if slope_mb_per_min >= TREND_SLOPE_MB_PER_MIN {
            TrendClass::Increasing
        } else if slope_mb_per_min <= -TREND_SLOPE_MB_PER_MIN {
            TrendClass::Decreasing
        } else {
            TrendClass::Stable
        };

        MemoryTrend {
            classification,
            slope_mb_per_min,
            min_mb,
            max_mb,
            avg_mb,
            sample_count: recent.len(),
        }
    }
}
