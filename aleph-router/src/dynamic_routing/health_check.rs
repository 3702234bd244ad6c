use async_trait::async_trait;
use reqwest::{Client, Method, Request, StatusCode};
use std::{
    fmt::Debug,
    time::{Duration, Instant},
};
use tracing::debug;
use url::Url;

use crate::{dynamic_routing::node::Endpoint, RouterError};

/// Path of the lightweight public info document every API node serves.
pub const PROBE_PATH: &str = "/api/v0/info/public.json";

/// Measures liveness and latency of an endpoint.
#[async_trait]
pub trait HealthCheck: Send + Sync + Debug {
    /// Probes `endpoint` once.
    async fn check(&self, endpoint: &Endpoint) -> Result<HealthCheckStatus, RouterError>;
}

/// A struct representing the health check status of the endpoint.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct HealthCheckStatus {
    latency: Option<Duration>,
}

impl HealthCheckStatus {
    /// Creates a new `HealthCheckStatus` instance.
    pub fn new(latency: Option<Duration>) -> Self {
        Self { latency }
    }

    /// Checks if the endpoint is healthy.
    pub fn is_healthy(&self) -> bool {
        self.latency.is_some()
    }

    /// Get the latency of the health check.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}

/// Probes endpoints with a bounded `GET` of [`PROBE_PATH`]; only `200 OK` counts as healthy.
#[derive(Debug)]
pub struct HealthChecker {
    http_client: Client,
    timeout: Duration,
}

impl HealthChecker {
    /// Creates a new `HealthChecker` with the given per-probe timeout.
    pub fn new(http_client: Client, timeout: Duration) -> Self {
        Self {
            http_client,
            timeout,
        }
    }
}

const HEALTH_CHECKER: &str = "HealthChecker";

#[async_trait]
impl HealthCheck for HealthChecker {
    async fn check(&self, endpoint: &Endpoint) -> Result<HealthCheckStatus, RouterError> {
        let url = Url::parse(&endpoint.join(PROBE_PATH))
            .map_err(|err| RouterError::InvalidEndpoint(format!("{endpoint}: {err}")))?;

        let mut request = Request::new(Method::GET, url.clone());
        *request.timeout_mut() = Some(self.timeout);

        let start = Instant::now();
        let response = self.http_client.execute(request).await.map_err(|err| {
            RouterError::ProbeError(format!("Failed to execute GET request to {url}: {err}"))
        })?;
        let latency = start.elapsed();

        if response.status() != StatusCode::OK {
            let err_msg = format!(
                "{HEALTH_CHECKER}: Unexpected http status code {} for url={url} received",
                response.status()
            );
            debug!(err_msg);
            return Err(RouterError::ProbeError(err_msg));
        }

        Ok(HealthCheckStatus::new(Some(latency)))
    }
}
