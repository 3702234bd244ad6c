//! Periodic re-selection of the active endpoint.
//!
//! One cycle discovers candidates, pre-ranks them from what [`PerformanceMemory`] already
//! knows, probes the most promising ones, ranks the survivors and, subject to hysteresis,
//! publishes a new [`RoutingTable`].

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::RouterConfig,
    dynamic_routing::{
        health_check::HealthCheck,
        node::{Candidate, Endpoint},
        nodes_fetch::{discover, discovery_sources, Fetch},
        snapshot::RoutingTable,
        type_aliases::GlobalShared,
    },
    memory::{PerformanceMemory, MIN_LATENCY_MS},
};

/// Pause between two optimization cycles.
pub const OPTIMIZE_PERIOD: Duration = Duration::from_secs(300);
/// How many pre-ranked candidates are probed per cycle.
pub const PROBE_TARGETS: usize = 8;
/// How many probed runners-up follow the winner in the routing table.
pub const RUNNERS_UP: usize = 3;
/// A challenger must rank below `incumbent * SWITCH_THRESHOLD` to take over.
pub const SWITCH_THRESHOLD: f64 = 0.85;

const NODE_OPTIMIZER: &str = "NodeOptimizer";

/// Whether the optimizer has completed a cycle yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerPhase {
    /// No cycle has completed: the first winner is adopted unconditionally.
    Bootstrapping,
    /// Switches are subject to hysteresis.
    Steady,
}

/// A candidate which answered its probe this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// The probed candidate.
    pub candidate: Candidate,
    /// Measured probe latency.
    pub latency: Duration,
    /// Final rank, lower is better.
    pub rank: f64,
}

/// What one cycle decided.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A new routing table with `winner` in front was published.
    Switched {
        /// The new active endpoint.
        winner: Endpoint,
        /// Its final rank.
        rank: f64,
    },
    /// The best challenger was not good enough; the routing table is untouched.
    Kept {
        /// The endpoint that stays in front.
        incumbent: Option<Endpoint>,
        /// The best endpoint of the cycle.
        best: Endpoint,
    },
    /// Every probe failed; the routing table is untouched.
    NoHealthyCandidates,
}

/// Ordering key used to choose probe targets: prediction over the squared reported score.
pub fn pre_rank(memory: &PerformanceMemory, candidate: &Candidate) -> f64 {
    let predicted = memory.predicted_performance(candidate.endpoint.as_str(), candidate.is_official);
    predicted / candidate.reported_score.powi(2)
}

/// Ordering key of probed candidates: fresh prediction over the reported score.
pub fn final_rank(memory: &PerformanceMemory, candidate: &Candidate) -> f64 {
    let predicted = memory.predicted_performance(candidate.endpoint.as_str(), candidate.is_official);
    predicted / candidate.reported_score
}

/// Decides whether `winner` replaces `incumbent`.
///
/// While bootstrapping the winner always takes over. Afterwards the incumbent stays unless
/// it failed its probe (`incumbent_rank` is `None`) or the winner ranks below
/// `incumbent_rank * threshold`.
pub fn should_switch(
    phase: OptimizerPhase,
    winner: &Endpoint,
    winner_rank: f64,
    incumbent: Option<&Endpoint>,
    incumbent_rank: Option<f64>,
    threshold: f64,
) -> bool {
    if phase == OptimizerPhase::Bootstrapping {
        return true;
    }
    if incumbent == Some(winner) {
        return false;
    }
    match incumbent_rank {
        Some(current) => winner_rank < current * threshold,
        None => true,
    }
}

/// Periodically re-selects the active endpoint and publishes it into the shared [`RoutingTable`].
#[derive(Debug)]
pub struct NodeOptimizer {
    fetcher: Arc<dyn Fetch>,
    checker: Arc<dyn HealthCheck>,
    memory: Arc<PerformanceMemory>,
    routing: GlobalShared<RoutingTable>,
    officials: Vec<Endpoint>,
    service_port: u16,
    min_reported_score: f64,
    probe_timeout: Duration,
    period: Duration,
    probe_targets: usize,
    runners_up: usize,
    switch_threshold: f64,
    phase: OptimizerPhase,
}

impl NodeOptimizer {
    /// Creates an optimizer in the bootstrapping phase.
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        checker: Arc<dyn HealthCheck>,
        memory: Arc<PerformanceMemory>,
        routing: GlobalShared<RoutingTable>,
        config: &RouterConfig,
    ) -> Self {
        Self {
            fetcher,
            checker,
            memory,
            routing,
            officials: config.official_endpoints.clone(),
            service_port: config.service_port,
            min_reported_score: config.min_reported_score,
            probe_timeout: config.probe_timeout,
            period: config.optimize_period,
            probe_targets: config.probe_targets,
            runners_up: config.runners_up,
            switch_threshold: config.switch_threshold,
            phase: OptimizerPhase::Bootstrapping,
        }
    }

    /// The current phase.
    pub fn phase(&self) -> OptimizerPhase {
        self.phase
    }

    /// Runs one discovery, probe and selection pass.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let table = self.routing.load_full();
        let incumbent = table.incumbent().cloned();

        let sources = discovery_sources(table.active_endpoint(), &self.officials);
        let candidates = discover(
            self.fetcher.as_ref(),
            &sources,
            &self.officials,
            self.service_port,
            self.min_reported_score,
        )
        .await;

        let targets = self.select_targets(candidates, incumbent.as_ref());
        debug!(
            "{NODE_OPTIMIZER}: probing {} targets: {:?}",
            targets.len(),
            targets.iter().map(|c| c.endpoint.as_str()).collect::<Vec<_>>()
        );
        let mut results = self.probe(targets).await;
        results.sort_by(|a, b| a.rank.total_cmp(&b.rank));

        let outcome = self.decide(incumbent, &results);
        self.phase = OptimizerPhase::Steady;
        outcome
    }

    /// Runs cycles until `token` is cancelled: one right away, then one per period.
    /// A panicking cycle is logged and skipped.
    pub async fn run(mut self, token: CancellationToken) {
        info!("{NODE_OPTIMIZER}: started, period {:?}", self.period);
        loop {
            let cycle = AssertUnwindSafe(self.run_cycle()).catch_unwind();
            tokio::select! {
                result = cycle => match result {
                    Ok(outcome) => debug!("{NODE_OPTIMIZER}: cycle finished: {outcome:?}"),
                    Err(_) => error!("{NODE_OPTIMIZER}: optimization cycle panicked, waiting for the next one"),
                },
                _ = token.cancelled() => {
                    warn!("{NODE_OPTIMIZER}: was gracefully cancelled during a cycle");
                    break;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = token.cancelled() => {
                    warn!("{NODE_OPTIMIZER}: was gracefully cancelled");
                    break;
                }
            }
        }
    }

    // Orders candidates by pre-rank (ties keep discovery order), drops repeated endpoints,
    // keeps the best `probe_targets` and makes sure the incumbent is among them.
    fn select_targets(&self, candidates: Vec<Candidate>, incumbent: Option<&Endpoint>) -> Vec<Candidate> {
        let mut ranked: Vec<(f64, Candidate)> = candidates
            .into_iter()
            .map(|candidate| (pre_rank(&self.memory, &candidate), candidate))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut targets: Vec<Candidate> = Vec::with_capacity(self.probe_targets + 1);
        for (_, candidate) in ranked {
            if targets.len() == self.probe_targets {
                break;
            }
            if !targets.iter().any(|t| t.endpoint == candidate.endpoint) {
                targets.push(candidate);
            }
        }

        if let Some(incumbent) = incumbent {
            if !targets.iter().any(|t| &t.endpoint == incumbent) {
                let is_official = self.officials.contains(incumbent);
                targets.push(Candidate::incumbent(incumbent.clone(), is_official));
            }
        }
        targets
    }

    async fn probe(&self, targets: Vec<Candidate>) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(targets.len());
        for candidate in targets {
            let url = candidate.endpoint.as_str();
            let latency = match self.checker.check(&candidate.endpoint).await {
                Ok(status) => status.latency(),
                Err(err) => {
                    debug!("{NODE_OPTIMIZER}: {err}");
                    None
                }
            };
            match latency {
                Some(latency) => {
                    let latency_ms = (latency.as_secs_f64() * 1000.0).max(MIN_LATENCY_MS);
                    self.memory
                        .record_observation(url, latency_ms, true, Some(&candidate.name));
                    let rank = final_rank(&self.memory, &candidate);
                    results.push(ProbeResult {
                        candidate,
                        latency,
                        rank,
                    });
                }
                None => {
                    let timeout_ms = self.probe_timeout.as_secs_f64() * 1000.0;
                    self.memory
                        .record_observation(url, timeout_ms, false, Some(&candidate.name));
                }
            }
        }
        results
    }

    fn decide(&self, incumbent: Option<Endpoint>, results: &[ProbeResult]) -> CycleOutcome {
        let Some(winner) = results.first() else {
            warn!("{NODE_OPTIMIZER}: no candidate answered its probe, keeping the current routing");
            return CycleOutcome::NoHealthyCandidates;
        };
        let incumbent_rank = incumbent.as_ref().and_then(|incumbent| {
            results
                .iter()
                .find(|r| &r.candidate.endpoint == incumbent)
                .map(|r| r.rank)
        });

        if !should_switch(
            self.phase,
            &winner.candidate.endpoint,
            winner.rank,
            incumbent.as_ref(),
            incumbent_rank,
            self.switch_threshold,
        ) {
            debug!(
                "{NODE_OPTIMIZER}: keeping {incumbent:?} (rank {incumbent_rank:?}), best was {} (rank {:.1})",
                winner.candidate.endpoint, winner.rank
            );
            return CycleOutcome::Kept {
                incumbent,
                best: winner.candidate.endpoint.clone(),
            };
        }

        let runners_up = results
            .iter()
            .skip(1)
            .take(self.runners_up)
            .map(|r| &r.candidate.endpoint);
        let table = RoutingTable::rebuild(&winner.candidate.endpoint, runners_up, &self.officials);
        self.routing.store(Arc::new(table));

        let reputation = if winner.candidate.reported_score >= 1.0 {
            "Official".to_string()
        } else {
            format!("{:.1}%", winner.candidate.reported_score * 100.0)
        };
        info!(
            "{NODE_OPTIMIZER}: switched to {} ({}), latency {}ms, reputation {reputation}",
            winner.candidate.name,
            winner.candidate.endpoint,
            winner.latency.as_millis()
        );
        CycleOutcome::Switched {
            winner: winner.candidate.endpoint.clone(),
            rank: winner.rank,
        }
    }
}
