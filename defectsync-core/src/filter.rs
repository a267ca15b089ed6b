//! Segmentation filters: user-selected field values compiled into a
//! backend query predicate.
//!
//! Semantics are fixed: AND across fields, OR across one field's selected
//! values. How an equality clause is spelled, how literals are escaped, and
//! which field names are pseudo-fields are per-backend concerns supplied by
//! a [`QueryDialect`]. Clause order follows selection order and, within a
//! field, value order, so the same input always compiles to byte-identical
//! predicate text.

use crate::virtual_field::FieldVirtualizer;
use defectsync_types::{TrackError, TrackResult};
use tracing::debug;

/// Backend-specific query syntax.
///
/// Every literal inserted into a predicate goes through [`escape`]
/// (inside [`equality`]) — never bypassed, even for values that look safe.
///
/// [`escape`]: QueryDialect::escape
/// [`equality`]: QueryDialect::equality
pub trait QueryDialect {
    /// Escapes a literal for safe embedding. Re-parsing the emitted clause
    /// must recover the literal exactly.
    fn escape(&self, literal: &str) -> String;

    /// One `field = value` clause, with `value` escaped and quoted as the
    /// backend requires. `field` is the user-facing name; dialects that
    /// query physical columns map it here.
    fn equality(&self, field: &str, value: &str) -> String;

    /// Joiner between per-field clause groups.
    fn and_separator(&self) -> &str {
        " AND "
    }

    /// Joiner between one field's value clauses.
    fn or_separator(&self) -> &str {
        " OR "
    }

    /// Wraps one field's OR'd clauses.
    fn group(&self, clause: &str) -> String {
        format!("({clause})")
    }

    /// Field-name prefix marking pseudo-fields that exist only for
    /// meta-selection and never compile into the predicate.
    fn pseudo_prefix(&self) -> &str;
}

/// A compiled predicate in the backend's query dialect. Empty text means
/// no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentFilter {
    text: String,
}

impl SegmentFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// One field restriction: the values the engine selected for this field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSelection {
    pub field: String,
    pub values: Vec<String>,
}

impl FilterSelection {
    pub fn new(field: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            field: field.into(),
            values,
        }
    }
}

/// Compiles `selections` into a predicate.
///
/// A selection without values is a hard error: a field whose allowed values
/// are unknown cannot be segmented. Composite fields are split per selected
/// value into a conjunction of component equalities. Pseudo-fields are
/// skipped entirely.
pub fn compile_filter(
    dialect: &dyn QueryDialect,
    virtualizer: &FieldVirtualizer,
    selections: &[FilterSelection],
) -> TrackResult<SegmentFilter> {
    let mut groups: Vec<String> = Vec::new();

    for selection in selections {
        if selection.field.starts_with(dialect.pseudo_prefix()) {
            continue;
        }
        if selection.values.is_empty() {
            return Err(TrackError::Query(format!(
                "cannot segment on field '{}': no selectable values",
                selection.field
            )));
        }

        let mut clauses: Vec<String> = Vec::with_capacity(selection.values.len());
        match virtualizer.find(&selection.field) {
            Some(spec) => {
                for value in &selection.values {
                    let parts: Vec<String> = spec
                        .split(value)
                        .into_iter()
                        .map(|(component, component_value)| {
                            dialect.equality(&component, &component_value)
                        })
                        .collect();
                    clauses.push(parts.join(dialect.and_separator()));
                }
            }
            None => {
                for value in &selection.values {
                    clauses.push(dialect.equality(&selection.field, value));
                }
            }
        }
        groups.push(dialect.group(&clauses.join(dialect.or_separator())));
    }

    let filter = SegmentFilter {
        text: groups.join(dialect.and_separator()),
    };
    debug!(filter = %filter.as_str(), "compiled segment filter");
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_field::VirtualField;

    /// Quoted-equality dialect used by the SQL-flavored backends.
    struct Quoted;

    impl QueryDialect for Quoted {
        fn escape(&self, literal: &str) -> String {
            literal.replace('\'', "''")
        }

        fn equality(&self, field: &str, value: &str) -> String {
            format!("{field}='{}'", self.escape(value))
        }

        fn pseudo_prefix(&self) -> &str {
            "DSYNC"
        }
    }

    fn severity_selection() -> Vec<FilterSelection> {
        vec![
            FilterSelection::new("Product", vec!["Core".into(), "UI".into()]),
            FilterSelection::new("Severity", vec!["high".into()]),
        ]
    }

    #[test]
    fn and_across_fields_or_within() {
        let filter =
            compile_filter(&Quoted, &FieldVirtualizer::new(), &severity_selection()).unwrap();
        assert_eq!(
            filter.as_str(),
            "(Product='Core' OR Product='UI') AND (Severity='high')"
        );
    }

    #[test]
    fn compilation_is_deterministic() {
        let virtualizer = FieldVirtualizer::new();
        let a = compile_filter(&Quoted, &virtualizer, &severity_selection()).unwrap();
        let b = compile_filter(&Quoted, &virtualizer, &severity_selection()).unwrap();
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn composite_values_expand_to_conjunctions() {
        let virtualizer = FieldVirtualizer::new().with(VirtualField::gated(
            "Status/Resolution",
            '/',
            "Status",
            "Resolution",
            vec!["Fixed".into()],
        ));
        let selections = vec![FilterSelection::new(
            "Status/Resolution",
            vec!["New".into(), "Fixed/WontFix".into()],
        )];
        let filter = compile_filter(&Quoted, &virtualizer, &selections).unwrap();
        assert_eq!(
            filter.as_str(),
            "(Status='New' AND Resolution='' OR Status='Fixed' AND Resolution='WontFix')"
        );
    }

    #[test]
    fn pseudo_fields_are_skipped() {
        let selections = vec![
            FilterSelection::new("DSYNC-User", vec!["replicator".into()]),
            FilterSelection::new("Severity", vec!["high".into()]),
        ];
        let filter = compile_filter(&Quoted, &FieldVirtualizer::new(), &selections).unwrap();
        assert_eq!(filter.as_str(), "(Severity='high')");
    }

    #[test]
    fn only_pseudo_fields_compiles_to_empty() {
        let selections = vec![FilterSelection::new("DSYNC-User", vec!["x".into()])];
        let filter = compile_filter(&Quoted, &FieldVirtualizer::new(), &selections).unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn valueless_selection_is_an_error() {
        let selections = vec![FilterSelection::new("Severity", Vec::new())];
        let err = compile_filter(&Quoted, &FieldVirtualizer::new(), &selections).unwrap_err();
        assert!(matches!(err, TrackError::Query(_)));
        assert!(err.continuable());
    }

    #[test]
    fn literals_pass_through_escaping() {
        let selections = vec![FilterSelection::new("Summary", vec!["it's broken".into()])];
        let filter = compile_filter(&Quoted, &FieldVirtualizer::new(), &selections).unwrap();
        assert_eq!(filter.as_str(), "(Summary='it''s broken')");
    }
}
