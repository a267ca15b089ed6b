//! Core type definitions for defectsync.
//!
//! This crate defines the backend-agnostic vocabulary shared by every
//! connector:
//! - The error signal (`TrackError`) with its continuable/fatal distinction
//! - Field descriptors and the ordered, name-indexed field catalog
//! - Connector attribute specifications (pre-connect configuration surface)
//! - The fixed sentinels used by the conformance testing mode
//!
//! Anything backend-specific (SQL column maps, bridge command names, job
//! specification forms) belongs in the connector crates, not here.

mod attr;
mod error;
mod field;

pub mod testing;

pub use attr::{AttributeSpec, Attributes, looks_like_integer};
pub use error::{TrackError, TrackResult};
pub use field::{FieldAccess, FieldCatalog, FieldDescriptor, FieldKind};

/// Universal sentinel id for a record that the backend has not created yet.
/// Saving a record with this id runs the backend's creation flow, and the
/// freshly assigned identifier replaces it.
pub const NEW_RECORD_ID: &str = "new";
