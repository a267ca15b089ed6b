//! Connector attribute specifications and values.
//!
//! Attributes are the pre-connect configuration surface: each connector
//! publishes an ordered list of [`AttributeSpec`]s for the configuration
//! tool, and receives the chosen values as an [`Attributes`] map at connect
//! time. Validation happens per attribute, before any session exists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes one configurable attribute of a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    /// Key used in the attributes map.
    pub name: String,
    /// Short label shown by the configuration tool.
    pub label: String,
    /// Help text shown by the configuration tool.
    pub help: String,
    /// Default value; `None` means no default.
    pub default: Option<String>,
    pub required: bool,
}

impl AttributeSpec {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            help: help.into(),
            default: None,
            required: false,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Attribute values chosen for one connector instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style insert for test and host setup code.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// The value for `name`, or `default` when unset.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Parses an integer attribute, falling back to `default` when the
    /// attribute is unset or not a number. Validation rejects bad values
    /// before connect; this is the lenient runtime read.
    pub fn get_int_or(&self, name: &str, default: i64) -> i64 {
        self.get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Whether a y/n attribute is enabled. Unset falls back to `default`.
    pub fn get_flag_or(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some("y") => true,
            Some("n") => false,
            _ => default,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Whether `s` looks like a whole number, optionally negative.
/// Used by attribute validators; stricter than `str::parse` in that it
/// rejects signs without digits and embedded whitespace.
pub fn looks_like_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder() {
        let spec = AttributeSpec::new("wait_time", "Wait time", "Seconds between retries")
            .with_default("10");
        assert_eq!(spec.default.as_deref(), Some("10"));
        assert!(!spec.required);
        assert!(AttributeSpec::new("x", "X", "").required().required);
    }

    #[test]
    fn typed_reads() {
        let attrs = Attributes::new()
            .with("wait_time", "30")
            .with("unicode", "y")
            .with("junk", "abc");
        assert_eq!(attrs.get_int_or("wait_time", 10), 30);
        assert_eq!(attrs.get_int_or("junk", 10), 10);
        assert_eq!(attrs.get_int_or("missing", -1), -1);
        assert!(attrs.get_flag_or("unicode", false));
        assert!(!attrs.get_flag_or("missing", false));
        assert_eq!(attrs.get_or("missing", "dflt"), "dflt");
    }

    #[test]
    fn integer_shapes() {
        assert!(looks_like_integer("0"));
        assert!(looks_like_integer("-1"));
        assert!(looks_like_integer("7200"));
        assert!(!looks_like_integer(""));
        assert!(!looks_like_integer("-"));
        assert!(!looks_like_integer("1.5"));
        assert!(!looks_like_integer("ten"));
        assert!(!looks_like_integer(" 1"));
    }
}
