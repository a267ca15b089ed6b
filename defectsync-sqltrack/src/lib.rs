//! Connector for a SQL-backed bug database.
//!
//! The backend is an embedded SQLite bug database in the classic
//! status/resolution shape: a `defects` table, option tables for the
//! select fields, numeric user ids mapped through a `profiles` table, and
//! a `comments` table whose rows are assembled into a synthetic
//! `Description` field.
//!
//! The connector derives its field catalog from the live schema, prepends
//! the `Status/Resolution` and `Product/Component` virtual fields, compiles
//! segmentation filters in the SQL dialect (doubled-quote escaping, quoted
//! identifiers), and enforces row-count checks on every write. Record
//! creation is not supported by this backend.

mod catalog;
mod connector;
mod dialect;
mod store;

pub mod fixture;

pub use connector::{SqlProject, SqlRecord, SqlTracker};
pub use dialect::SqlDialect;
pub use store::SqlStore;
