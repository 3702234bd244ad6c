//! Discovery, probing and selection of the preferred API endpoint.

/// Health check implementation.
pub mod health_check;
/// Endpoints and per-cycle candidates.
pub mod node;
/// Nodes fetch implementation.
pub mod nodes_fetch;
/// The periodic optimizer.
pub mod optimizer;
/// The published routing decision.
pub mod snapshot;
#[cfg(test)]
pub(crate) mod test_utils;
/// Type aliases used in dynamic routing.
pub mod type_aliases;
