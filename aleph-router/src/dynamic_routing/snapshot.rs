use crate::dynamic_routing::node::Endpoint;

/// The routing decision published by the optimizer and consumed by every outgoing call.
///
/// A table is never mutated in place: the optimizer builds a new one and swaps it in, so
/// readers always see the ordered list and the active endpoint of the same cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    ordered_endpoints: Vec<Endpoint>,
    active_endpoint: Option<Endpoint>,
}

impl RoutingTable {
    /// The table in effect before the first optimization: the official pool, no active endpoint.
    pub fn bootstrap(officials: &[Endpoint]) -> Self {
        Self {
            ordered_endpoints: dedup(officials.iter().cloned()),
            active_endpoint: None,
        }
    }

    /// Builds the table after a switch: the winner, then the runners-up, then the official pool.
    /// Duplicates keep their first position.
    pub fn rebuild<'a>(
        winner: &'a Endpoint,
        runners_up: impl IntoIterator<Item = &'a Endpoint>,
        officials: &'a [Endpoint],
    ) -> Self {
        let ordered = std::iter::once(winner)
            .chain(runners_up)
            .chain(officials)
            .cloned();
        Self {
            ordered_endpoints: dedup(ordered),
            active_endpoint: Some(winner.clone()),
        }
    }

    /// The ranked endpoint pool, winner first.
    pub fn ordered_endpoints(&self) -> &[Endpoint] {
        &self.ordered_endpoints
    }

    /// The endpoint currently preferred, `None` until the first switch.
    pub fn active_endpoint(&self) -> Option<&Endpoint> {
        self.active_endpoint.as_ref()
    }

    /// The endpoint the optimizer compares challengers against: the active endpoint, or the
    /// head of the pool while nothing has been promoted yet.
    pub fn incumbent(&self) -> Option<&Endpoint> {
        self.active_endpoint
            .as_ref()
            .or_else(|| self.ordered_endpoints.first())
    }
}

fn dedup(endpoints: impl Iterator<Item = Endpoint>) -> Vec<Endpoint> {
    let mut ordered: Vec<Endpoint> = Vec::new();
    for endpoint in endpoints {
        if !ordered.contains(&endpoint) {
            ordered.push(endpoint);
        }
    }
    ordered
}
