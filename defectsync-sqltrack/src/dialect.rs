//! SQL query dialect: quoted identifiers, doubled-quote literal escaping,
//! and the user-facing-name to column mapping.
//!
//! Segmentation predicates are the one place this connector builds SQL
//! from strings (field names come from the engine's own catalog, values
//! from select lists), so every literal goes through [`escape`] without
//! exception.
//!
//! [`escape`]: SqlDialect::escape

use defectsync_core::QueryDialect;
use std::collections::BTreeMap;

/// Dialect instance carrying the label→column map for one project.
#[derive(Debug, Clone, Default)]
pub struct SqlDialect {
    columns: BTreeMap<String, String>,
}

impl SqlDialect {
    pub fn new(columns: BTreeMap<String, String>) -> Self {
        Self { columns }
    }

    /// The physical column for a user-facing field name. Unknown names map
    /// to themselves so the database, not this layer, reports them.
    pub fn column<'a>(&'a self, field: &'a str) -> &'a str {
        self.columns.get(field).map(String::as_str).unwrap_or(field)
    }
}

impl QueryDialect for SqlDialect {
    fn escape(&self, literal: &str) -> String {
        literal.replace('\'', "''")
    }

    fn equality(&self, field: &str, value: &str) -> String {
        format!("\"{}\" = '{}'", self.column(field), self.escape(value))
    }

    fn pseudo_prefix(&self) -> &str {
        "DSYNC"
    }
}
