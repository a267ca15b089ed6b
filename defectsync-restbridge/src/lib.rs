//! Connector for REST issue trackers reached through an out-of-process
//! bridge.
//!
//! The tracker's REST API is driven by a helper process; this connector
//! speaks the framed bridge protocol to it and implements the normalized
//! connector surface on top: session liveness with transparent reopen,
//! project binding (bridge-side project handles go stale across
//! reconnects and are re-bound by generation), segmentation filters
//! compiled in the quoted token dialect and shipped to the helper, and
//! record fetch/create/save flows.

mod connector;
mod dialect;
mod session;

pub use connector::{RestProject, RestRecord, RestTracker};
pub use dialect::RestDialect;
pub use session::BridgeSession;
