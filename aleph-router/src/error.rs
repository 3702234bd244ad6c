//! Errors that can occur while discovering, probing or persisting routing data.

use std::path::PathBuf;

use thiserror::Error;

/// An error that occurred while the router or its background optimizer was running.
///
/// None of these errors reach the caller of
/// [`execute`](crate::request_router::RequestRouter::execute): discovery and probe errors
/// are turned into observations, persistence errors are logged and the in-memory state
/// keeps working.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// None of the topology sources answered with a usable payload.
    #[error("An error when fetching the node topology: {0}")]
    DiscoveryError(String),
    /// A health probe timed out, failed to connect or returned a non-200 status.
    #[error("An error when probing node health: {0}")]
    ProbeError(String),
    /// Reading or writing a persisted routing file failed.
    #[error("Failed to persist routing data at {}: {reason}", .path.display())]
    PersistenceError {
        /// The file that could not be read or written.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// An endpoint URL could not be parsed.
    #[error("Provided endpoint url is invalid: {0}")]
    InvalidEndpoint(String),
    /// The router was configured in a way it cannot work with.
    #[error("Invalid router configuration: {0}")]
    InvalidConfig(String),
    /// The HTTP client could not be created.
    #[error("Failed to create the HTTP client: {0}")]
    HttpClientError(String),
}

impl RouterError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::PersistenceError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
