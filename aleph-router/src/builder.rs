use std::{path::PathBuf, sync::Arc, time::Duration};

use reqwest::Client;

use crate::{
    config::RouterConfig,
    dynamic_routing::{health_check::HealthCheck, node::Endpoint, nodes_fetch::Fetch},
    router::{AlephRouter, Overrides},
    RouterError,
};

/// A builder for an [`AlephRouter`].
#[derive(Debug, Default, Clone)]
pub struct AlephRouterBuilder {
    config: RouterConfig,
    overrides: Overrides,
}

impl AlephRouterBuilder {
    /// Create an instance of [`AlephRouter`] with the information from this builder.
    pub fn build(self) -> Result<AlephRouter, RouterError> {
        AlephRouter::new(self.config, self.overrides)
    }

    /// Replace the whole configuration.
    pub fn with_config(self, config: RouterConfig) -> Self {
        AlephRouterBuilder { config, ..self }
    }

    /// Persist learning data and router state in `dir`.
    pub fn with_config_dir<P: Into<PathBuf>>(self, dir: P) -> Self {
        AlephRouterBuilder {
            config: RouterConfig {
                config_dir: Some(dir.into()),
                ..self.config
            },
            ..self
        }
    }

    /// Set the official pool. It must not be empty.
    pub fn with_official_endpoints(self, official_endpoints: Vec<Endpoint>) -> Self {
        AlephRouterBuilder {
            config: RouterConfig {
                official_endpoints,
                ..self.config
            },
            ..self
        }
    }

    /// Set the pause between two optimization cycles.
    pub fn with_optimize_period(self, optimize_period: Duration) -> Self {
        AlephRouterBuilder {
            config: RouterConfig {
                optimize_period,
                ..self.config
            },
            ..self
        }
    }

    /// Set the timeout of one health probe.
    pub fn with_probe_timeout(self, probe_timeout: Duration) -> Self {
        AlephRouterBuilder {
            config: RouterConfig {
                probe_timeout,
                ..self.config
            },
            ..self
        }
    }

    /// Set the timeout of one topology request.
    pub fn with_discovery_timeout(self, discovery_timeout: Duration) -> Self {
        AlephRouterBuilder {
            config: RouterConfig {
                discovery_timeout,
                ..self.config
            },
            ..self
        }
    }

    /// Set the pause between two endpoints of one round of attempts.
    pub fn with_endpoint_backoff(self, endpoint_backoff: Duration) -> Self {
        AlephRouterBuilder {
            config: RouterConfig {
                endpoint_backoff,
                ..self.config
            },
            ..self
        }
    }

    /// Set the pause between two rounds of attempts.
    pub fn with_round_backoff(self, round_backoff: Duration) -> Self {
        AlephRouterBuilder {
            config: RouterConfig {
                round_backoff,
                ..self.config
            },
            ..self
        }
    }

    /// Use a preconfigured HTTP client for discovery and probes.
    pub fn with_http_client(mut self, http_client: Client) -> Self {
        self.overrides.http_client = Some(http_client);
        self
    }

    /// Replace the topology fetcher.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.overrides.fetcher = Some(fetcher);
        self
    }

    /// Replace the health checker.
    pub fn with_checker(mut self, checker: Arc<dyn HealthCheck>) -> Self {
        self.overrides.checker = Some(checker);
        self
    }
}
