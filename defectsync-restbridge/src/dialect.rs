//! Query dialect for the bridge's filter language.
//!
//! Filters travel to the helper as text in a quoted token syntax —
//! `(Field='a' OR Field='b') AND (Other='c')` — which the helper translates
//! into the tracker's own query language. Pseudo-fields are starred names
//! (`*Project*` and friends) that configure the helper rather than
//! restricting records.

use defectsync_core::QueryDialect;

pub struct RestDialect;

impl QueryDialect for RestDialect {
    fn escape(&self, literal: &str) -> String {
        // Backslash-escape so the helper's parser recovers the literal
        // exactly; backslash first, then the quote.
        literal.replace('\\', "\\\\").replace('\'', "\\'")
    }

    fn equality(&self, field: &str, value: &str) -> String {
        format!("{field}='{}'", self.escape(value))
    }

    fn pseudo_prefix(&self) -> &str {
        "*"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(
            RestDialect.equality("Summary", "it's a trap"),
            r"Summary='it\'s a trap'"
        );
    }

    #[test]
    fn backslashes_survive_reparsing() {
        let clause = RestDialect.equality("Path", r"C:\temp");
        assert_eq!(clause, r"Path='C:\\temp'");
    }
}
