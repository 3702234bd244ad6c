//! Durable per-endpoint performance statistics.
//!
//! Each endpoint gets an exponential moving average of its observed latency. Failures are
//! folded into that same number as a multiplicative penalty, and the failure rate adds a
//! stability penalty on top when predicting how an endpoint will perform.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::{storage, util};

/// File name of the persisted statistics table.
pub const LEARNING_DATA_FILE: &str = "ccn_node_learning_data.json";

/// Weight of the newest latency sample in the moving average.
pub const EMA_ALPHA: f64 = 0.3;
/// Multiplier applied to the latency estimate on every failure.
pub const FAILURE_PENALTY: f64 = 1.5;
/// Floor of every measured latency sample, so the estimate never collapses to zero.
pub const MIN_LATENCY_MS: f64 = 1.0;
/// Latency estimate of an endpoint whose first observation was a failure.
pub const FAILURE_SEED_LATENCY_MS: f64 = 2000.0;
/// Prediction for an official endpoint that has never been observed.
pub const UNKNOWN_OFFICIAL_PREDICTION: f64 = 500.0;
/// Prediction for a community endpoint that has never been observed.
pub const UNKNOWN_COMMUNITY_PREDICTION: f64 = 800.0;
/// How strongly the failure rate inflates the prediction.
pub const FAIL_RATE_WEIGHT: f64 = 2.0;
/// Discount applied to official endpoints.
pub const OFFICIAL_BIAS: f64 = 0.9;

const PERFORMANCE_MEMORY: &str = "PerformanceMemory";
const DEFAULT_STAT_NAME: &str = "Unknown";

/// What has been learned about one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStat {
    /// Display label, last seen wins.
    #[serde(default = "default_stat_name")]
    pub name: String,
    /// Smoothed latency estimate in milliseconds. Never reset once set.
    #[serde(rename = "ema_latency")]
    pub ema_latency_ms: f64,
    /// Number of successful observations.
    #[serde(default)]
    pub success_count: u64,
    /// Number of failed observations.
    #[serde(default)]
    pub fail_count: u64,
    /// `success_count + fail_count`.
    #[serde(default)]
    pub total_samples: u64,
    /// Unix timestamp (seconds) of the latest observation.
    #[serde(
        rename = "last_seen",
        default,
        deserialize_with = "deserialize_unix_seconds"
    )]
    pub last_seen_unix: i64,
}

// Older tables stored fractional seconds.
fn deserialize_unix_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    f64::deserialize(deserializer).map(|secs| secs as i64)
}

fn default_stat_name() -> String {
    DEFAULT_STAT_NAME.to_string()
}

impl EndpointStat {
    fn new(latency_ms: f64, success: bool) -> Self {
        Self {
            name: default_stat_name(),
            ema_latency_ms: if success {
                latency_ms
            } else {
                FAILURE_SEED_LATENCY_MS
            },
            success_count: 0,
            fail_count: 0,
            total_samples: 0,
            last_seen_unix: 0,
        }
    }

    fn observe(&mut self, latency_ms: f64, success: bool, now_unix: i64) {
        self.last_seen_unix = now_unix;
        self.total_samples += 1;
        if success {
            self.success_count += 1;
            self.ema_latency_ms = self.ema_latency_ms * (1.0 - EMA_ALPHA) + latency_ms * EMA_ALPHA;
        } else {
            self.fail_count += 1;
            self.ema_latency_ms *= FAILURE_PENALTY;
        }
    }

    /// Share of failed observations, `0.0` without samples.
    pub fn fail_rate(&self) -> f64 {
        if self.total_samples == 0 {
            0.0
        } else {
            self.fail_count as f64 / self.total_samples as f64
        }
    }

    /// Predicted performance of the endpoint, lower is better.
    pub fn predicted(&self, is_official: bool) -> f64 {
        let stability_penalty = 1.0 + self.fail_rate() * FAIL_RATE_WEIGHT;
        let official_bias = if is_official { OFFICIAL_BIAS } else { 1.0 };
        self.ema_latency_ms * stability_penalty * official_bias
    }
}

/// The statistics table, keyed by endpoint URL (or `"default"` for the built-in target).
///
/// Shared between the optimizer and the request router. Every mutation rewrites the
/// backing file while the table lock is held; write failures are logged and swallowed.
#[derive(Debug, Default)]
pub struct PerformanceMemory {
    path: Option<PathBuf>,
    stats: Mutex<BTreeMap<String, EndpointStat>>,
}

impl PerformanceMemory {
    /// Creates a memory which is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the table stored in `dir`. A missing or unreadable file yields an empty table.
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(LEARNING_DATA_FILE);
        let stats = match storage::load_json(&path) {
            Ok(stats) => stats.unwrap_or_default(),
            Err(err) => {
                warn!("{PERFORMANCE_MEMORY}: starting with empty statistics: {err}");
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path),
            stats: Mutex::new(stats),
        }
    }

    /// Records one observation of `url` and persists the whole table.
    pub fn record_observation(&self, url: &str, latency_ms: f64, success: bool, name: Option<&str>) {
        let mut stats = self.lock();
        let stat = stats
            .entry(url.to_string())
            .or_insert_with(|| EndpointStat::new(latency_ms, success));
        if let Some(name) = name {
            stat.name = name.to_string();
        }
        stat.observe(latency_ms, success, util::unix_now());
        debug!(
            "{PERFORMANCE_MEMORY}: {url} success={success} latency={latency_ms:.0}ms ema={:.1}ms",
            stat.ema_latency_ms
        );
        self.persist(&stats);
    }

    /// Predicted performance of `url`, lower is better.
    pub fn predicted_performance(&self, url: &str, is_official: bool) -> f64 {
        match self.lock().get(url) {
            Some(stat) => stat.predicted(is_official),
            None if is_official => UNKNOWN_OFFICIAL_PREDICTION,
            None => UNKNOWN_COMMUNITY_PREDICTION,
        }
    }

    /// Returns a copy of the statistics of `url`.
    pub fn stat(&self, url: &str) -> Option<EndpointStat> {
        self.lock().get(url).cloned()
    }

    /// Returns a copy of the whole table.
    pub fn snapshot(&self) -> BTreeMap<String, EndpointStat> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, EndpointStat>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, stats: &BTreeMap<String, EndpointStat>) {
        if let Some(path) = &self.path {
            if let Err(err) = storage::store_json(path, stats) {
                warn!("{PERFORMANCE_MEMORY}: {err}");
            }
        }
    }
}
