//! Failover of real calls across the routing table.

use std::{
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
    config::RouterConfig,
    dynamic_routing::{
        node::{Endpoint, OFFICIAL_NAME},
        snapshot::RoutingTable,
        type_aliases::GlobalShared,
    },
    memory::{PerformanceMemory, MIN_LATENCY_MS},
    request_router::{
        call::{Call, CallOutput},
        classify::shorten_error,
        state::{RouterState, DEFAULT_TARGET, ROUTER_STATE_FILE},
    },
    util,
};

/// Delegated call seam and the process collaborator.
pub mod call;
/// Failure classification.
pub mod classify;
/// Persisted router state.
pub mod state;

/// Name recorded for observations of the collaborator's own default endpoint.
pub const DEFAULT_NAME: &str = "Default";

const REQUEST_ROUTER: &str = "RequestRouter";

/// One entry of the attempt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// An endpoint of the routing table.
    Endpoint(Endpoint),
    /// No explicit endpoint: the collaborator falls back to its built-in default.
    Default,
}

impl Target {
    /// The endpoint to hand to the call, `None` for the default.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            Target::Endpoint(endpoint) => Some(endpoint),
            Target::Default => None,
        }
    }

    /// Key under which observations and the last success are stored.
    pub fn key(&self) -> &str {
        match self {
            Target::Endpoint(endpoint) => endpoint.as_str(),
            Target::Default => DEFAULT_TARGET,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Runs calls against the routing table, one endpoint after the other, until one of them
/// gives a definitive answer.
#[derive(Debug)]
pub struct RequestRouter {
    memory: Arc<PerformanceMemory>,
    routing: GlobalShared<RoutingTable>,
    state: Mutex<RouterState>,
    state_path: Option<PathBuf>,
    officials: Vec<Endpoint>,
    rounds: usize,
    endpoint_backoff: Duration,
    round_backoff: Duration,
}

impl RequestRouter {
    /// Creates a router reading `routing`, recording into `memory` and restoring its state from
    /// the configuration directory.
    pub fn new(
        memory: Arc<PerformanceMemory>,
        routing: GlobalShared<RoutingTable>,
        config: &RouterConfig,
    ) -> Self {
        let state_path = config
            .config_dir
            .as_ref()
            .map(|dir| dir.join(ROUTER_STATE_FILE));
        let state = state_path
            .as_deref()
            .map(RouterState::load)
            .unwrap_or_default();
        Self {
            memory,
            routing,
            state: Mutex::new(state),
            state_path,
            officials: config.official_endpoints.clone(),
            rounds: config.rounds,
            endpoint_backoff: config.endpoint_backoff,
            round_backoff: config.round_backoff,
        }
    }

    /// The URL (or `"default"`) of the latest successful call.
    pub fn last_success(&self) -> Option<String> {
        self.lock_state().last_success_endpoint.clone()
    }

    /// The routing table with the latest success moved to the front, followed by the default.
    pub fn attempt_order(&self) -> Vec<Target> {
        let table = self.routing.load();
        let mut order: Vec<Target> = table
            .ordered_endpoints()
            .iter()
            .cloned()
            .map(Target::Endpoint)
            .collect();
        if let Some(last) = self.lock_state().last_success_endpoint.as_deref() {
            if let Some(pos) = order.iter().position(|target| target.key() == last) {
                let target = order.remove(pos);
                order.insert(0, target);
            }
        }
        order.push(Target::Default);
        order
    }

    /// Executes `call`, failing over on network-class failures.
    ///
    /// Success and non-network failures are returned at once. Otherwise every target is tried
    /// in turn, for a bounded number of rounds, and the last failure is returned. Every attempt
    /// is recorded into the performance memory.
    pub async fn execute(&self, call: &dyn Call) -> CallOutput {
        let order = self.attempt_order();
        let mut last_failure = None;

        for round in 1..=self.rounds {
            for (idx, target) in order.iter().enumerate() {
                let start = Instant::now();
                let output = call.invoke(target.endpoint()).await;
                let latency_ms = util::elapsed_ms(start).max(MIN_LATENCY_MS);
                let success = output.is_success();
                self.memory.record_observation(
                    target.key(),
                    latency_ms,
                    success,
                    self.observation_name(target),
                );

                if success {
                    self.remember_success(target);
                    info!("{REQUEST_ROUTER}: call succeeded on {target}");
                    return output;
                }
                if !output.is_network_failure() {
                    debug!(
                        "{REQUEST_ROUTER}: {target} answered with exit code {}: {}",
                        output.exit_code,
                        shorten_error(&output.stderr)
                    );
                    return output;
                }

                let reason = match shorten_error(&output.stderr) {
                    "" => "no error output",
                    reason => reason,
                };
                warn!(
                    "{REQUEST_ROUTER}: round {round}, [{}/{}] {target} failed: {reason}",
                    idx + 1,
                    order.len()
                );
                last_failure = Some(output);

                if idx + 1 < order.len() {
                    util::sleep(self.endpoint_backoff).await;
                } else if round < self.rounds {
                    util::sleep(self.round_backoff).await;
                }
            }
        }

        let last_failure =
            last_failure.unwrap_or_else(|| CallOutput::new("", "No endpoint was attempted", 1));
        error!(
            "{REQUEST_ROUTER}: all endpoints failed, last error: {}",
            shorten_error(&last_failure.stderr)
        );
        last_failure
    }

    fn observation_name(&self, target: &Target) -> Option<&'static str> {
        match target {
            Target::Default => Some(DEFAULT_NAME),
            Target::Endpoint(endpoint) if self.officials.contains(endpoint) => Some(OFFICIAL_NAME),
            Target::Endpoint(_) => None,
        }
    }

    fn remember_success(&self, target: &Target) {
        let mut state = self.lock_state();
        state.last_success_endpoint = Some(target.key().to_string());
        if let Some(path) = &self.state_path {
            if let Err(err) = state.store(path) {
                warn!("{REQUEST_ROUTER}: {err}");
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
