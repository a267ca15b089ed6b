//! The job store's token query dialect.
//!
//! Whitespace between groups is a low-precedence AND; `|` separates a
//! field's alternatives inside a group: `(status=open|status=closed)
//! (user=alice)`. Values are bare tokens, so the metacharacters are
//! backslash-escaped rather than quoted.

use defectsync_core::QueryDialect;

pub struct TokenDialect;

/// Characters that would change the query's structure if left bare.
const META: [char; 6] = ['\\', '|', '(', ')', '=', ' '];

impl QueryDialect for TokenDialect {
    fn escape(&self, literal: &str) -> String {
        let mut escaped = String::with_capacity(literal.len());
        for ch in literal.chars() {
            if META.contains(&ch) {
                escaped.push('\\');
            }
            escaped.push(ch);
        }
        escaped
    }

    fn equality(&self, field: &str, value: &str) -> String {
        format!("{field}={}", self.escape(value))
    }

    fn and_separator(&self) -> &str {
        " "
    }

    fn or_separator(&self) -> &str {
        "|"
    }

    fn pseudo_prefix(&self) -> &str {
        "DSYNC"
    }
}
