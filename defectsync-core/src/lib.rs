//! Generic connector core for defectsync.
//!
//! Every backend connector re-implements the same four-part pattern; this
//! crate holds the shared machinery so a connector only supplies its
//! backend specifics:
//!
//! - **Session** (`session`): liveness, reconnection with backoff, and the
//!   single-shot retry contract around backend calls.
//! - **Field virtualization** (`virtual_field`): synthesizing composite
//!   pseudo-fields from catalog fields and inverting the synthesis on write.
//! - **Segment filters** (`filter`): compiling user-selected field values
//!   into a backend query predicate through a per-backend dialect.
//! - **Record state** (`record`): fetched field values plus a changed-field
//!   overlay with dirty tracking, so saves only transmit what changed.
//!
//! The connector trait surface (`connector`) ties these together into the
//! capability contract the host engine consumes. Connectors are strictly
//! synchronous and single-threaded; the engine drives one connector instance
//! per replication mapping and never shares a session across callers.

pub mod connector;
pub mod filter;
pub mod message;
pub mod record;
pub mod session;
pub mod testing;
pub mod virtual_field;

pub use connector::{ChangedQuery, ConnectParams, Connector, Project, Record};
pub use filter::{FilterSelection, QueryDialect, SegmentFilter, compile_filter};
pub use message::{MessageLevel, MessageSlot, OperatorMessage};
pub use record::RecordState;
pub use session::{OfflineWait, Session, WaitTime, retry_once};
pub use virtual_field::{ComposeRule, FieldVirtualizer, VirtualField};
