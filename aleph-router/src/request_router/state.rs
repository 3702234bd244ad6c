use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{storage, RouterError};

/// File name of the persisted router state.
pub const ROUTER_STATE_FILE: &str = "router_state.json";
/// Stored in place of a URL when the collaborator's own default endpoint succeeded.
pub const DEFAULT_TARGET: &str = "default";

/// What the router remembers between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterState {
    /// URL (or [`DEFAULT_TARGET`]) of the latest successful real call.
    #[serde(default)]
    pub last_success_endpoint: Option<String>,
}

impl RouterState {
    /// Reads the state at `path`; a missing or unreadable file yields the empty state.
    pub fn load(path: &Path) -> Self {
        match storage::load_json(path) {
            Ok(state) => state.unwrap_or_default(),
            Err(err) => {
                warn!("RequestRouter: starting without router state: {err}");
                Self::default()
            }
        }
    }

    /// Overwrites the state at `path`.
    pub fn store(&self, path: &Path) -> Result<(), RouterError> {
        storage::store_json(path, self)
    }
}
