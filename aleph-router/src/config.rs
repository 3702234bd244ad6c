use std::{env, path::PathBuf, time::Duration};

use crate::dynamic_routing::{
    node::{official_endpoints, Endpoint},
    nodes_fetch::{CCN_SERVICE_PORT, MIN_REPORTED_SCORE, TOPOLOGY_ADDRESS},
    optimizer::{OPTIMIZE_PERIOD, PROBE_TARGETS, RUNNERS_UP, SWITCH_THRESHOLD},
};

/// Environment variable naming the configuration directory.
pub const ALEPH_HOME_ENV: &str = "ALEPH_HOME";
/// Fallback environment variable naming the configuration directory.
pub const ALEPH_CONFIG_HOME_ENV: &str = "ALEPH_CONFIG_HOME";
/// Directory created next to the executable when no environment variable is set.
pub const DEFAULT_CONFIG_DIR_NAME: &str = ".aleph-im";

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const ENDPOINT_BACKOFF: Duration = Duration::from_secs(1);
const ROUND_BACKOFF: Duration = Duration::from_secs(1);
const ROUNDS: usize = 2;

/// A configuration for a router.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Where learning data and router state are persisted. `None` keeps everything in memory.
    pub config_dir: Option<PathBuf>,
    /// The trusted fallback tier, also used as topology sources.
    pub official_endpoints: Vec<Endpoint>,
    /// Aggregate address holding the node registry.
    pub topology_address: String,
    /// Port on which discovered nodes serve the API.
    pub service_port: u16,
    /// Timeout of one topology request.
    pub discovery_timeout: Duration,
    /// Timeout of one health probe.
    pub probe_timeout: Duration,
    /// Pause between two optimization cycles.
    pub optimize_period: Duration,
    /// How many pre-ranked candidates are probed per cycle.
    pub probe_targets: usize,
    /// How many probed runners-up follow the winner in the routing table.
    pub runners_up: usize,
    /// A challenger must rank below `incumbent * switch_threshold` to take over.
    pub switch_threshold: f64,
    /// Discovered nodes reporting a lower score are ignored.
    pub min_reported_score: f64,
    /// Pause between two endpoints of one round.
    pub endpoint_backoff: Duration,
    /// Pause between two rounds.
    pub round_backoff: Duration,
    /// How many times the whole endpoint list is tried.
    pub rounds: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            config_dir: None,
            official_endpoints: official_endpoints(),
            topology_address: TOPOLOGY_ADDRESS.to_string(),
            service_port: CCN_SERVICE_PORT,
            discovery_timeout: DISCOVERY_TIMEOUT,
            probe_timeout: PROBE_TIMEOUT,
            optimize_period: OPTIMIZE_PERIOD,
            probe_targets: PROBE_TARGETS,
            runners_up: RUNNERS_UP,
            switch_threshold: SWITCH_THRESHOLD,
            min_reported_score: MIN_REPORTED_SCORE,
            endpoint_backoff: ENDPOINT_BACKOFF,
            round_backoff: ROUND_BACKOFF,
            rounds: ROUNDS,
        }
    }
}

/// Resolves the configuration directory: `$ALEPH_HOME`, then `$ALEPH_CONFIG_HOME`, then
/// `.aleph-im` next to the running executable. Returns `None` if none of these is available.
pub fn default_config_dir() -> Option<PathBuf> {
    [ALEPH_HOME_ENV, ALEPH_CONFIG_HOME_ENV]
        .iter()
        .filter_map(|var| env::var_os(var))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            let exe = env::current_exe().ok()?;
            Some(exe.parent()?.join(DEFAULT_CONFIG_DIR_NAME))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let config = RouterConfig::default();
        assert_eq!(config.config_dir, None);
        assert_eq!(config.official_endpoints.len(), 4);
        assert_eq!(config.service_port, 4024);
        assert_eq!(config.discovery_timeout, Duration::from_secs(10));
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.optimize_period, Duration::from_secs(300));
        assert_eq!(config.probe_targets, 8);
        assert_eq!(config.runners_up, 3);
        assert_eq!(config.switch_threshold, 0.85);
        assert_eq!(config.min_reported_score, 0.80);
        assert_eq!(config.rounds, 2);
    }
}
