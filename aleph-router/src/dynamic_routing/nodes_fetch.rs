use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{fmt::Debug, net::Ipv4Addr, str::FromStr, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    dynamic_routing::node::{Candidate, Endpoint, UNKNOWN_NAME},
    RouterError,
};

/// Address of the aggregate holding the core channel node registry.
pub const TOPOLOGY_ADDRESS: &str = "0xa1B3bb7d2332383D96b7796B908fB7f7F3c2Be10";
/// Port on which core channel nodes serve the API.
pub const CCN_SERVICE_PORT: u16 = 4024;
/// Nodes reporting a lower score are never considered.
pub const MIN_REPORTED_SCORE: f64 = 0.80;

const ACTIVE_STATUS: &str = "active";
const NODES_FETCHER: &str = "NodesFetcher";

/// One node entry of the topology registry, as announced by the network.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TopologyNode {
    /// Node status, `"active"` for nodes serving traffic.
    #[serde(default)]
    pub status: Option<String>,
    /// Network-reported health score in `[0, 1]`. Nodes without one are never candidates.
    #[serde(default)]
    pub score: Option<f64>,
    /// libp2p multiaddress, e.g. `/ip4/46.4.1.2/tcp/4025/p2p/Qm...`.
    #[serde(default)]
    pub multiaddress: Option<String>,
    /// Display name chosen by the operator.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    data: AggregateData,
}

#[derive(Debug, Default, Deserialize)]
struct AggregateData {
    #[serde(default)]
    corechannel: CoreChannel,
}

#[derive(Debug, Default, Deserialize)]
struct CoreChannel {
    #[serde(default)]
    nodes: Vec<TopologyNode>,
}

/// Fetcher of nodes in the topology.
#[async_trait]
pub trait Fetch: Sync + Send + Debug {
    /// Fetches the registered nodes, asking `source` for the registry.
    async fn fetch(&self, source: &Endpoint) -> Result<Vec<TopologyNode>, RouterError>;
}

/// Reads the node registry aggregate over HTTP.
#[derive(Debug)]
pub struct NodesFetcher {
    http_client: Client,
    timeout: Duration,
    topology_address: String,
}

impl NodesFetcher {
    /// Creates a new `NodesFetcher` reading the well-known registry aggregate.
    pub fn new(http_client: Client, timeout: Duration) -> Self {
        Self {
            http_client,
            timeout,
            topology_address: TOPOLOGY_ADDRESS.to_string(),
        }
    }

    /// Reads the registry from another aggregate address.
    pub fn with_topology_address(mut self, address: impl Into<String>) -> Self {
        self.topology_address = address.into();
        self
    }

    fn topology_url(&self, source: &Endpoint) -> String {
        source.join(&format!(
            "/api/v0/aggregates/{}.json?keys=corechannel&limit=50",
            self.topology_address
        ))
    }
}

#[async_trait]
impl Fetch for NodesFetcher {
    async fn fetch(&self, source: &Endpoint) -> Result<Vec<TopologyNode>, RouterError> {
        let url = self.topology_url(source);
        let response = self
            .http_client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                RouterError::DiscoveryError(format!("Failed to execute GET request to {url}: {err}"))
            })?;
        if response.status() != StatusCode::OK {
            return Err(RouterError::DiscoveryError(format!(
                "Unexpected http status code {} for url={url} received",
                response.status()
            )));
        }
        let body: AggregateResponse = response.json().await.map_err(|err| {
            RouterError::DiscoveryError(format!("Failed to decode topology from {url}: {err}"))
        })?;
        Ok(body.data.corechannel.nodes)
    }
}

/// Orders topology sources: the active endpoint first, then the official pool, without repeats.
pub fn discovery_sources(active: Option<&Endpoint>, officials: &[Endpoint]) -> Vec<Endpoint> {
    let mut sources: Vec<Endpoint> = active.into_iter().cloned().collect();
    for official in officials {
        if !sources.contains(official) {
            sources.push(official.clone());
        }
    }
    sources
}

/// Extracts the IPv4 host of a multiaddress such as `/ip4/1.2.3.4/tcp/4025/p2p/Qm...`.
pub fn ipv4_host(multiaddress: &str) -> Option<Ipv4Addr> {
    let mut parts = multiaddress.split('/').skip_while(|part| *part != "ip4");
    parts.next()?;
    Ipv4Addr::from_str(parts.next()?).ok()
}

/// Keeps active nodes with a reported score of at least `min_score` and an IPv4 address, and
/// turns them into candidates served on `port`.
pub fn filter_candidates(nodes: &[TopologyNode], port: u16, min_score: f64) -> Vec<Candidate> {
    nodes
        .iter()
        .filter(|node| node.status.as_deref() == Some(ACTIVE_STATUS))
        .filter_map(|node| {
            let score = node.score.filter(|score| *score >= min_score)?;
            let ip = ipv4_host(node.multiaddress.as_deref()?)?;
            Some(Candidate::community(
                node.name.clone().unwrap_or_else(|| UNKNOWN_NAME.to_string()),
                Endpoint::from_ipv4(ip, port),
                score,
            ))
        })
        .collect()
}

/// Collects this cycle's candidates.
///
/// Sources are asked in order until one answers; its healthy nodes become candidates. The
/// official pool is always appended, so the result is never empty as long as the pool is not.
pub async fn discover(
    fetcher: &dyn Fetch,
    sources: &[Endpoint],
    officials: &[Endpoint],
    port: u16,
    min_score: f64,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut discovered = false;
    for source in sources {
        match fetcher.fetch(source).await {
            Ok(nodes) => {
                info!(
                    "{NODES_FETCHER}: fetched {} nodes from {source}",
                    nodes.len()
                );
                candidates = filter_candidates(&nodes, port, min_score);
                discovered = true;
                break;
            }
            Err(err) => debug!("{NODES_FETCHER}: {err}"),
        }
    }
    if !discovered {
        warn!("{NODES_FETCHER}: no topology source answered, using the official pool only");
    }
    candidates.extend(officials.iter().cloned().map(Candidate::official));
    candidates
}
