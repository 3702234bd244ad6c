//! The assembled router: shared state, the background optimizer and the call path.

use std::sync::Arc;

use reqwest::Client;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use crate::{
    builder::AlephRouterBuilder,
    config::RouterConfig,
    dynamic_routing::{
        health_check::{HealthCheck, HealthChecker},
        nodes_fetch::{Fetch, NodesFetcher},
        optimizer::NodeOptimizer,
        snapshot::RoutingTable,
        type_aliases::GlobalShared,
    },
    memory::PerformanceMemory,
    request_router::{
        call::{Call, CallOutput},
        RequestRouter,
    },
    RouterError,
};

const ALEPH_ROUTER: &str = "AlephRouter";

/// Collaborators that replace the HTTP-backed defaults.
#[derive(Debug, Default, Clone)]
pub(crate) struct Overrides {
    pub(crate) http_client: Option<Client>,
    pub(crate) fetcher: Option<Arc<dyn Fetch>>,
    pub(crate) checker: Option<Arc<dyn HealthCheck>>,
}

/// Picks and keeps picking the best API endpoint, and runs calls against it with failover.
///
/// Build one with [`AlephRouter::builder`]. The optimizer only runs in the background after
/// [`start`](Self::start); without it the routing table stays at the official pool unless
/// cycles are driven by hand through [`optimizer`](Self::optimizer).
#[derive(Debug)]
pub struct AlephRouter {
    config: RouterConfig,
    fetcher: Arc<dyn Fetch>,
    checker: Arc<dyn HealthCheck>,
    memory: Arc<PerformanceMemory>,
    routing: GlobalShared<RoutingTable>,
    router: RequestRouter,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl AlephRouter {
    /// Creates an [`AlephRouterBuilder`] with the default configuration.
    pub fn builder() -> AlephRouterBuilder {
        AlephRouterBuilder::default()
    }

    pub(crate) fn new(config: RouterConfig, overrides: Overrides) -> Result<Self, RouterError> {
        if config.official_endpoints.is_empty() {
            return Err(RouterError::InvalidConfig(
                "at least one official endpoint is required".to_string(),
            ));
        }
        if config.rounds == 0 {
            return Err(RouterError::InvalidConfig(
                "at least one round of attempts is required".to_string(),
            ));
        }

        let http_client = match overrides.http_client {
            Some(client) => client,
            None => Client::builder()
                .build()
                .map_err(|err| RouterError::HttpClientError(err.to_string()))?,
        };
        let fetcher = overrides.fetcher.unwrap_or_else(|| {
            Arc::new(
                NodesFetcher::new(http_client.clone(), config.discovery_timeout)
                    .with_topology_address(config.topology_address.clone()),
            )
        });
        let checker = overrides
            .checker
            .unwrap_or_else(|| Arc::new(HealthChecker::new(http_client, config.probe_timeout)));

        let memory = Arc::new(match &config.config_dir {
            Some(dir) => PerformanceMemory::open(dir),
            None => PerformanceMemory::in_memory(),
        });
        let routing: GlobalShared<RoutingTable> = Arc::new(arc_swap::ArcSwap::from_pointee(
            RoutingTable::bootstrap(&config.official_endpoints),
        ));
        let router = RequestRouter::new(Arc::clone(&memory), Arc::clone(&routing), &config);

        Ok(Self {
            config,
            fetcher,
            checker,
            memory,
            routing,
            router,
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        })
    }

    /// A fresh optimizer in the bootstrapping phase, sharing this router's state.
    pub fn optimizer(&self) -> NodeOptimizer {
        NodeOptimizer::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.checker),
            Arc::clone(&self.memory),
            Arc::clone(&self.routing),
            &self.config,
        )
    }

    /// Spawns the background optimizer. Calling it again while it runs does nothing.
    pub fn start(&self) {
        if !self.tracker.is_empty() {
            warn!("{ALEPH_ROUTER}: optimizer is already running");
            return;
        }
        let optimizer = self.optimizer();
        let token = self.token.clone();
        self.tracker.spawn(async move { optimizer.run(token).await });
        info!("{ALEPH_ROUTER}: optimizer started");
    }

    /// Stops the background optimizer and waits for it to finish.
    pub async fn stop(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        warn!("{ALEPH_ROUTER}: gracefully stopped");
    }

    /// Executes `call` through the request router.
    pub async fn execute(&self, call: &dyn Call) -> CallOutput {
        self.router.execute(call).await
    }

    /// The routing table currently in effect.
    pub fn routing_table(&self) -> Arc<RoutingTable> {
        self.routing.load_full()
    }

    /// The learned endpoint statistics.
    pub fn memory(&self) -> &Arc<PerformanceMemory> {
        &self.memory
    }

    /// The request router.
    pub fn request_router(&self) -> &RequestRouter {
        &self.router
    }

    /// The configuration this router was built with.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}
