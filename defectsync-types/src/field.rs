//! Field descriptors and the ordered field catalog.
//!
//! A catalog describes a backend's field surface: name, semantic kind,
//! access class, and for select fields the ordered set of allowed values.
//! Catalogs preserve insertion order (virtual fields are prepended so they
//! stand apart from raw backend fields) while providing O(1) name lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Semantic kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Single token, no whitespace.
    Word,
    /// One line of free text.
    Line,
    /// Multi-line free text.
    Text,
    /// Timestamp in the backend's string format.
    Date,
    /// One of an enumerated set of values.
    Select,
    /// Text field that may only receive fix details; reads return the value
    /// together with a continuable error stating that restriction.
    Fix,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Word => "word",
            Self::Line => "line",
            Self::Text => "text",
            Self::Date => "date",
            Self::Select => "select",
            Self::Fix => "fix",
        }
    }

    /// Parses the lowercase wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "word" => Some(Self::Word),
            "line" => Some(Self::Line),
            "text" => Some(Self::Text),
            "date" => Some(Self::Date),
            "select" => Some(Self::Select),
            "fix" => Some(Self::Fix),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access class of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldAccess {
    /// Engine may read and write.
    ReadWrite,
    /// Engine may only read.
    ReadOnly,
    /// System-maintained last-modification timestamp.
    ModDate,
    /// System-maintained last-modifying user.
    ModBy,
    /// The backend-assigned record identifier; immutable once assigned.
    Identifier,
}

impl FieldAccess {
    /// Numeric wire code, matching the bridge protocol's access attribute.
    pub fn code(&self) -> u8 {
        match self {
            Self::ReadWrite => 0,
            Self::ReadOnly => 1,
            Self::ModDate => 2,
            Self::ModBy => 3,
            Self::Identifier => 4,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::ReadWrite),
            1 => Some(Self::ReadOnly),
            2 => Some(Self::ModDate),
            3 => Some(Self::ModBy),
            4 => Some(Self::Identifier),
            _ => None,
        }
    }
}

/// Describes one field of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub access: FieldAccess,
    /// Allowed values, in backend order. Only populated for select fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_values: Vec<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind, access: FieldAccess) -> Self {
        Self {
            name: name.into(),
            kind,
            access,
            select_values: Vec::new(),
        }
    }

    /// Select field with its allowed values.
    pub fn select(
        name: impl Into<String>,
        access: FieldAccess,
        values: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Select,
            access,
            select_values: values,
        }
    }

    /// Single-token field.
    pub fn word(name: impl Into<String>, access: FieldAccess) -> Self {
        Self::new(name, FieldKind::Word, access)
    }

    /// One-line text field.
    pub fn line(name: impl Into<String>, access: FieldAccess) -> Self {
        Self::new(name, FieldKind::Line, access)
    }

    /// Multi-line text field.
    pub fn text(name: impl Into<String>, access: FieldAccess) -> Self {
        Self::new(name, FieldKind::Text, access)
    }

    /// Date field.
    pub fn date(name: impl Into<String>, access: FieldAccess) -> Self {
        Self::new(name, FieldKind::Date, access)
    }

    pub fn is_select(&self) -> bool {
        self.kind == FieldKind::Select
    }

    pub fn is_writable(&self) -> bool {
        self.access == FieldAccess::ReadWrite
    }
}

/// An ordered collection of field descriptors with O(1) name lookup.
///
/// Order is meaningful: synthesized virtual fields are prepended so callers
/// can distinguish them positionally from raw backend fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<FieldDescriptor>", into = "Vec<FieldDescriptor>")]
pub struct FieldCatalog {
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field. A later field with the same name replaces the
    /// earlier one in the index but keeps the earlier position.
    pub fn push(&mut self, field: FieldDescriptor) {
        match self.index.get(&field.name) {
            Some(&pos) => self.fields[pos] = field,
            None => {
                self.index.insert(field.name.clone(), self.fields.len());
                self.fields.push(field);
            }
        }
    }

    /// Inserts a field at the front, shifting existing positions.
    pub fn prepend(&mut self, field: FieldDescriptor) {
        if let Some(pos) = self.index.remove(&field.name) {
            self.fields.remove(pos);
        }
        self.fields.insert(0, field);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The field marked as the backend-assigned identifier, if any.
    pub fn identifier(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.access == FieldAccess::Identifier)
    }

    /// The field carrying the system-maintained modification timestamp.
    pub fn mod_date_field(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.access == FieldAccess::ModDate)
    }
}

impl From<Vec<FieldDescriptor>> for FieldCatalog {
    fn from(fields: Vec<FieldDescriptor>) -> Self {
        let mut catalog = Self::new();
        for field in fields {
            catalog.push(field);
        }
        catalog
    }
}

impl From<FieldCatalog> for Vec<FieldDescriptor> {
    fn from(catalog: FieldCatalog) -> Self {
        catalog.fields
    }
}

impl FromIterator<FieldDescriptor> for FieldCatalog {
    fn from_iter<I: IntoIterator<Item = FieldDescriptor>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for field in iter {
            catalog.push(field);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FieldCatalog {
        vec![
            FieldDescriptor::word("Id", FieldAccess::Identifier),
            FieldDescriptor::select(
                "Status",
                FieldAccess::ReadWrite,
                vec!["open".into(), "closed".into()],
            ),
            FieldDescriptor::date("Modified", FieldAccess::ModDate),
        ]
        .into()
    }

    #[test]
    fn push_preserves_order_and_lookup() {
        let catalog = sample();
        let names: Vec<_> = catalog.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Id", "Status", "Modified"]);
        assert_eq!(catalog.get("Status").unwrap().select_values.len(), 2);
        assert!(catalog.get("Severity").is_none());
    }

    #[test]
    fn prepend_puts_field_first() {
        let mut catalog = sample();
        catalog.prepend(FieldDescriptor::select(
            "Status/Resolution",
            FieldAccess::ReadWrite,
            vec!["open".into()],
        ));
        assert_eq!(catalog.iter().next().unwrap().name, "Status/Resolution");
        assert_eq!(catalog.len(), 4);
        assert!(catalog.contains("Status"));
    }

    #[test]
    fn push_replaces_duplicate_in_place() {
        let mut catalog = sample();
        catalog.push(FieldDescriptor::line("Status", FieldAccess::ReadOnly));
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.get("Status").unwrap().kind, FieldKind::Line);
    }

    #[test]
    fn special_field_accessors() {
        let catalog = sample();
        assert_eq!(catalog.identifier().unwrap().name, "Id");
        assert_eq!(catalog.mod_date_field().unwrap().name, "Modified");
    }

    #[test]
    fn serde_roundtrip_keeps_order() {
        let catalog = sample();
        let json = serde_json::to_string(&catalog).unwrap();
        let back: FieldCatalog = serde_json::from_str(&json).unwrap();
        let names: Vec<_> = back.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Id", "Status", "Modified"]);
        assert!(back.contains("Modified"));
    }

    #[test]
    fn access_code_roundtrip() {
        for access in [
            FieldAccess::ReadWrite,
            FieldAccess::ReadOnly,
            FieldAccess::ModDate,
            FieldAccess::ModBy,
            FieldAccess::Identifier,
        ] {
            assert_eq!(FieldAccess::from_code(access.code()), Some(access));
        }
        assert_eq!(FieldAccess::from_code(9), None);
    }
}
