use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::{
    dynamic_routing::{
        health_check::{HealthCheck, HealthCheckStatus},
        node::Endpoint,
        nodes_fetch::{Fetch, TopologyNode},
        type_aliases::GlobalShared,
    },
    RouterError,
};

static TRACING_INIT: Once = Once::new();

pub fn setup_tracing() {
    TRACING_INIT.call_once(|| {
        FmtSubscriber::builder().with_max_level(Level::TRACE).init();
    });
}

pub fn endpoint(url: &str) -> Endpoint {
    Endpoint::new(url).unwrap()
}

pub fn topology_node(ip: &str, score: f64, name: &str) -> TopologyNode {
    TopologyNode {
        status: Some("active".to_string()),
        score: Some(score),
        multiaddress: Some(format!("/ip4/{ip}/tcp/4025/p2p/Qm{name}")),
        name: Some(name.to_string()),
    }
}

#[derive(Debug)]
pub struct NodesFetcherMock {
    // A set of nodes, existing in the topology.
    nodes: GlobalShared<Vec<TopologyNode>>,
    failing: Mutex<HashSet<Endpoint>>,
    fail_all: Mutex<bool>,
    asked: Mutex<Vec<Endpoint>>,
}

#[async_trait]
impl Fetch for NodesFetcherMock {
    async fn fetch(&self, source: &Endpoint) -> Result<Vec<TopologyNode>, RouterError> {
        self.asked.lock().unwrap().push(source.clone());
        if *self.fail_all.lock().unwrap() || self.failing.lock().unwrap().contains(source) {
            return Err(RouterError::DiscoveryError(format!("{source} unreachable")));
        }
        Ok((*self.nodes.load_full()).clone())
    }
}

impl Default for NodesFetcherMock {
    fn default() -> Self {
        Self::new()
    }
}

impl NodesFetcherMock {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(ArcSwap::from_pointee(vec![])),
            failing: Mutex::new(HashSet::new()),
            fail_all: Mutex::new(false),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn overwrite_nodes(&self, nodes: Vec<TopologyNode>) {
        self.nodes.store(Arc::new(nodes));
    }

    pub fn fail_source(&self, source: &Endpoint) {
        self.failing.lock().unwrap().insert(source.clone());
    }

    pub fn fail_all(&self) {
        *self.fail_all.lock().unwrap() = true;
    }

    pub fn asked_sources(&self) -> Vec<Endpoint> {
        self.asked.lock().unwrap().clone()
    }
}

/// Answers probes from a table of latencies; endpoints missing from the table are down.
#[derive(Debug)]
pub struct NodeHealthCheckerMock {
    latencies: GlobalShared<HashMap<Endpoint, Duration>>,
    checked: Mutex<Vec<Endpoint>>,
}

impl Default for NodeHealthCheckerMock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthCheck for NodeHealthCheckerMock {
    async fn check(&self, endpoint: &Endpoint) -> Result<HealthCheckStatus, RouterError> {
        self.checked.lock().unwrap().push(endpoint.clone());
        match self.latencies.load().get(endpoint) {
            Some(latency) => Ok(HealthCheckStatus::new(Some(*latency))),
            None => Err(RouterError::ProbeError(format!("{endpoint} is down"))),
        }
    }
}

impl NodeHealthCheckerMock {
    pub fn new() -> Self {
        Self {
            latencies: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            checked: Mutex::new(Vec::new()),
        }
    }

    pub fn overwrite_latencies(&self, latencies: Vec<(Endpoint, u64)>) {
        let latencies = latencies
            .into_iter()
            .map(|(endpoint, ms)| (endpoint, Duration::from_millis(ms)))
            .collect();
        self.latencies.store(Arc::new(latencies));
    }

    pub fn checked_endpoints(&self) -> Vec<Endpoint> {
        self.checked.lock().unwrap().clone()
    }

    pub fn clear_checked(&self) {
        self.checked.lock().unwrap().clear();
    }
}
