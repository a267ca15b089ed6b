//! Field catalog derived from the live bug-database schema.
//!
//! Columns of the `defects` table become descriptors under their
//! user-facing labels from `field_defs`; select fields pull their allowed
//! values from the option tables. Two synthetic fields are prepended: the
//! assembled `Description` text and the composite virtual fields
//! (`Status/Resolution` gated by the closed-state set, `Product/Component`
//! keyed by the component table).

use crate::dialect::SqlDialect;
use crate::store::SqlStore;
use defectsync_core::{FieldVirtualizer, VirtualField};
use defectsync_types::{FieldAccess, FieldCatalog, FieldDescriptor, FieldKind, TrackResult};
use std::collections::BTreeMap;

/// Label of the synthetic assembled-comments field.
pub const DESCRIPTION_FIELD: &str = "Description";
/// Name of the Status/Resolution composite.
pub const STATUS_RESOLUTION: &str = "Status/Resolution";
/// Name of the Product/Component composite.
pub const PRODUCT_COMPONENT: &str = "Product/Component";

/// Everything derived from one schema read: the raw catalog, the catalog
/// with composites prepended, the dialect's column map, and the
/// virtualizer used to split composite writes.
#[derive(Debug)]
pub struct ProjectSchema {
    pub raw: FieldCatalog,
    pub synthesized: FieldCatalog,
    pub dialect: SqlDialect,
    pub virtualizer: FieldVirtualizer,
    pub fix_label: String,
    /// Column name → user-facing label.
    pub labels: BTreeMap<String, String>,
}

impl ProjectSchema {
    /// The physical column for a user-facing label.
    pub fn column<'a>(&'a self, label: &'a str) -> &'a str {
        self.dialect.column(label)
    }

    /// The user-facing label for a physical column. Unlabeled columns keep
    /// their own name.
    pub fn label<'a>(&'a self, column: &'a str) -> &'a str {
        self.labels.get(column).map(String::as_str).unwrap_or(column)
    }
}

/// Reads the schema and option tables and assembles the project schema.
pub fn load_schema(
    store: &mut SqlStore,
    closed_states: &[String],
    fix_column: &str,
) -> TrackResult<ProjectSchema> {
    let labels: BTreeMap<String, String> = store
        .two_cols("SELECT column_name, label FROM field_defs", &[])?
        .into_iter()
        .collect();
    let columns: BTreeMap<String, String> = labels
        .iter()
        .map(|(column, label)| (label.clone(), column.clone()))
        .collect();

    let statuses = options(store, "status_values")?;
    let resolutions = options(store, "resolution_values")?;
    let severities = options(store, "severity_values")?;
    let priorities = options(store, "priority_values")?;
    let products = store.single_col("SELECT name FROM products ORDER BY id", &[])?;
    let component_pairs = store.two_cols(
        "SELECT products.name, components.name FROM components \
         JOIN products ON components.product_id = products.id \
         ORDER BY products.id, components.id",
        &[],
    )?;

    let mut catalog = FieldCatalog::new();
    catalog.push(FieldDescriptor::text(DESCRIPTION_FIELD, FieldAccess::ReadOnly));

    let fix_label = labels.get(fix_column).cloned().unwrap_or_else(|| "Fixes".into());

    for (column, decl) in store.table_columns("defects")? {
        let label = labels.get(&column).cloned().unwrap_or_else(|| column.clone());
        let descriptor = if column == fix_column {
            FieldDescriptor::new(&fix_label, FieldKind::Fix, FieldAccess::ReadWrite)
        } else {
            match column.as_str() {
                "defect_id" => FieldDescriptor::word(label, FieldAccess::Identifier),
                "created_ts" => FieldDescriptor::date(label, FieldAccess::ReadOnly),
                "delta_ts" => FieldDescriptor::date(label, FieldAccess::ModDate),
                "status" => {
                    FieldDescriptor::select(label, FieldAccess::ReadWrite, statuses.clone())
                }
                "resolution" => {
                    FieldDescriptor::select(label, FieldAccess::ReadWrite, resolutions.clone())
                }
                "severity" => {
                    FieldDescriptor::select(label, FieldAccess::ReadWrite, severities.clone())
                }
                "priority" => {
                    FieldDescriptor::select(label, FieldAccess::ReadWrite, priorities.clone())
                }
                "product" => {
                    FieldDescriptor::select(label, FieldAccess::ReadOnly, products.clone())
                }
                // Segmentation on components alone is unsupported, so the
                // raw column is a plain line.
                "component" => FieldDescriptor::line(label, FieldAccess::ReadOnly),
                "summary" => FieldDescriptor::line(label, FieldAccess::ReadWrite),
                "assigned_to" | "reporter" => {
                    FieldDescriptor::word(label, FieldAccess::ReadOnly)
                }
                _ => fallback_descriptor(label, &decl),
            }
        };
        catalog.push(descriptor);
    }

    let pairs = group_components(component_pairs);
    let virtualizer = FieldVirtualizer::new()
        .with(VirtualField::gated(
            STATUS_RESOLUTION,
            '/',
            "Status",
            "Resolution",
            closed_states.to_vec(),
        ))
        .with(VirtualField::keyed(
            PRODUCT_COMPONENT,
            '/',
            "Product",
            "Component",
            pairs,
        ));
    let synthesized = virtualizer.synthesize(&catalog);

    Ok(ProjectSchema {
        raw: catalog,
        synthesized,
        dialect: SqlDialect::new(columns),
        virtualizer,
        fix_label,
        labels,
    })
}

/// Values of one option table, in sort order.
fn options(store: &mut SqlStore, table: &str) -> TrackResult<Vec<String>> {
    store.single_col(&format!("SELECT value FROM {table} ORDER BY sortkey"), &[])
}

/// Unrecognized columns get a kind from their declared type and stay
/// writable, like any other free-form backend field.
fn fallback_descriptor(label: String, decl: &str) -> FieldDescriptor {
    let kind = match decl.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT" | "REAL" | "NUMERIC" => FieldKind::Word,
        "TEXT" => FieldKind::Line,
        _ => FieldKind::Line,
    };
    FieldDescriptor::new(label, kind, FieldAccess::ReadWrite)
}

fn group_components(pairs: Vec<(String, String)>) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (product, component) in pairs {
        match grouped.last_mut() {
            Some((last, components)) if *last == product => components.push(component),
            _ => grouped.push((product, vec![component])),
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_grouping_preserves_order() {
        let grouped = group_components(vec![
            ("Core".into(), "Engine".into()),
            ("Core".into(), "Parser".into()),
            ("Docs".into(), "Manual".into()),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "Core");
        assert_eq!(grouped[0].1, ["Engine", "Parser"]);
        assert_eq!(grouped[1].1, ["Manual"]);
    }

    #[test]
    fn fallback_kinds_follow_declared_type() {
        assert_eq!(
            fallback_descriptor("Votes".into(), "INTEGER").kind,
            FieldKind::Word
        );
        assert_eq!(
            fallback_descriptor("Whiteboard".into(), "TEXT").kind,
            FieldKind::Line
        );
    }
}
