use std::{fmt, net::Ipv4Addr};

use url::Url;

use crate::RouterError;

/// The compiled-in official endpoints, always kept as the terminal fallback tier.
/// The load-balanced official gateway comes first.
pub const OFFICIAL_ENDPOINTS: [&str; 4] = [
    "https://official.aleph.cloud",
    "https://api2.aleph.im",
    "https://api1.aleph.im",
    "https://public-api.aleph.sh",
];

/// Name given to candidates from the official pool.
pub const OFFICIAL_NAME: &str = "Official";
/// Name given to the incumbent when it is appended to the probe targets.
pub const INCUMBENT_NAME: &str = "Current";
/// Name given to discovered nodes which do not announce one.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Represents an API endpoint base URL, e.g. `https://api2.aleph.im` or `http://1.2.3.4:4024`.
///
/// The textual form is the identity of the endpoint: it keys the learned statistics and it
/// is handed verbatim to the delegated call. A trailing `/` is dropped on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    url: String,
}

impl Endpoint {
    /// Creates a new `Endpoint` from an absolute `http(s)` URL.
    pub fn new(url: impl Into<String>) -> Result<Self, RouterError> {
        let url = url.into();
        let trimmed = url.trim().trim_end_matches('/');
        let parsed = Url::parse(trimmed)
            .map_err(|err| RouterError::InvalidEndpoint(format!("{url}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(RouterError::InvalidEndpoint(format!(
                "{url}: expected an http(s) url with a host"
            )));
        }
        Ok(Self {
            url: trimmed.to_string(),
        })
    }

    /// Builds the endpoint of a node reachable on `ip:port` over plain http.
    pub fn from_ipv4(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            url: format!("http://{ip}:{port}"),
        }
    }

    /// Returns the base URL of the endpoint.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Appends an absolute path (and query) to the base URL.
    pub fn join(&self, path_and_query: &str) -> String {
        format!("{}{}", self.url, path_and_query)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Returns the official pool as endpoints.
pub fn official_endpoints() -> Vec<Endpoint> {
    OFFICIAL_ENDPOINTS
        .iter()
        .filter_map(|url| Endpoint::new(*url).ok())
        .collect()
}

/// An endpoint under consideration for becoming the active routing target during one
/// optimization cycle. Candidates are rebuilt every cycle and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Display label.
    pub name: String,
    /// Base URL of the node.
    pub endpoint: Endpoint,
    /// Whether the node belongs to the official pool.
    pub is_official: bool,
    /// Network-reported health score in `[0, 1]`. Officials get `1.0`.
    pub reported_score: f64,
}

impl Candidate {
    /// A candidate from the official pool.
    pub fn official(endpoint: Endpoint) -> Self {
        Self {
            name: OFFICIAL_NAME.to_string(),
            endpoint,
            is_official: true,
            reported_score: 1.0,
        }
    }

    /// A candidate discovered through the topology.
    pub fn community(name: impl Into<String>, endpoint: Endpoint, reported_score: f64) -> Self {
        Self {
            name: name.into(),
            endpoint,
            is_official: false,
            reported_score,
        }
    }

    /// The currently active endpoint, re-measured even when it did not make the pre-ranking cut.
    pub fn incumbent(endpoint: Endpoint, is_official: bool) -> Self {
        Self {
            name: INCUMBENT_NAME.to_string(),
            endpoint,
            is_official,
            reported_score: 1.0,
        }
    }
}
