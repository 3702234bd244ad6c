//! The `aleph-router` crate picks which Aleph API node to talk to, and keeps picking.
//!
//! ## Overview
//! An application talking to the Aleph network can reach the same API through a handful of
//! official gateways and through many community-run core channel nodes. Their latency and
//! reliability vary a lot over time. This crate combines four components:
//!
//! - **Performance memory** ([`memory`]): a persisted, per-endpoint exponential moving
//!   average of latency with failure penalties, used to predict how an endpoint will behave.
//! - **Candidate discovery** ([`dynamic_routing::nodes_fetch`]): reads the node registry and
//!   keeps healthy, well-scored nodes, always adding the official pool.
//! - **Node optimizer** ([`dynamic_routing::optimizer`]): a background task which every five
//!   minutes probes the most promising candidates and, with hysteresis, publishes a new
//!   routing table.
//! - **Request router** ([`request_router`]): runs every real call against the routing table
//!   with ordered failover, and feeds the outcome back into the performance memory.
//!
//! ## Example
//! ```no_run
//! use aleph_router::{request_router::call::ProcessCall, AlephRouter};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), aleph_router::RouterError> {
//! let router = AlephRouter::builder()
//!     .with_config_dir("/var/lib/my-app/.aleph-im")
//!     .build()?;
//! // Measure once before the first call, then keep optimizing in the background.
//! router.optimizer().run_cycle().await;
//! router.start();
//!
//! let call = ProcessCall::new("aleph", ["file", "list", "--json"])
//!     .with_timeout(Duration::from_secs(60));
//! let output = router.execute(&call).await;
//! println!("{} (exit {})", output.stdout, output.exit_code);
//!
//! router.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links
)]
#![warn(clippy::future_not_send)]

/// The router builder.
pub mod builder;
/// Tunables and the configuration directory.
pub mod config;
pub mod dynamic_routing;
mod error;
pub mod memory;
pub mod request_router;
pub mod router;
mod storage;
mod util;

pub use builder::AlephRouterBuilder;
pub use config::{default_config_dir, RouterConfig};
pub use dynamic_routing::{
    node::{Candidate, Endpoint},
    snapshot::RoutingTable,
};
pub use error::RouterError;
pub use memory::{EndpointStat, PerformanceMemory};
pub use request_router::{
    call::{Call, CallOutput, ProcessCall},
    classify::{classify, FailureClass},
};
pub use router::AlephRouter;
