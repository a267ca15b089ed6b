//! Composite pseudo-fields synthesized from real backend fields.
//!
//! A virtual field combines two or more select fields into one user-facing
//! select field (e.g. `Status` + `Resolution` into `Status/Resolution`).
//! Synthesis builds the combined allowed-value list from the component
//! descriptors; splitting inverts it when a composite value is written back.
//!
//! How component values pair up is explicit configuration, not runtime
//! guesswork: see [`ComposeRule`]. In particular, positional pairing cycles
//! the shorter list — aligned value lists are the operator's contract, and
//! mismatches are not detected here.

use defectsync_types::{FieldAccess, FieldCatalog, FieldDescriptor, FieldKind};
use tracing::debug;

/// How a composite's allowed values are built from its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeRule {
    /// Every combination of component values, in component order.
    Cartesian,
    /// Pair the second component only when the first component's value is
    /// in the gate set; other first-component values stand alone.
    Gated { gate: Vec<String> },
    /// Explicit pairing: each first-component value maps to the partner
    /// values it pairs with. A value absent from the map (or mapped to an
    /// empty list) stands alone.
    Keyed { pairs: Vec<(String, Vec<String>)> },
    /// Pair by position. When the lists differ in length the shorter one
    /// wraps around cyclically; keeping the lists aligned is an operator
    /// contract documented to configuration authors.
    Positional,
}

/// Specification of one composite pseudo-field.
#[derive(Debug, Clone)]
pub struct VirtualField {
    name: String,
    separator: char,
    components: Vec<String>,
    rule: ComposeRule,
}

impl VirtualField {
    /// Composite over any number of independent components.
    pub fn cartesian(
        name: impl Into<String>,
        separator: char,
        components: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            separator,
            components,
            rule: ComposeRule::Cartesian,
        }
    }

    /// Two-component composite pairing `second` only for gated `first`
    /// values.
    pub fn gated(
        name: impl Into<String>,
        separator: char,
        first: impl Into<String>,
        second: impl Into<String>,
        gate: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            separator,
            components: vec![first.into(), second.into()],
            rule: ComposeRule::Gated { gate },
        }
    }

    /// Two-component composite with an explicit pairing table.
    pub fn keyed(
        name: impl Into<String>,
        separator: char,
        first: impl Into<String>,
        second: impl Into<String>,
        pairs: Vec<(String, Vec<String>)>,
    ) -> Self {
        Self {
            name: name.into(),
            separator,
            components: vec![first.into(), second.into()],
            rule: ComposeRule::Keyed { pairs },
        }
    }

    /// Two-component composite paired by list position.
    pub fn positional(
        name: impl Into<String>,
        separator: char,
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            separator,
            components: vec![first.into(), second.into()],
            rule: ComposeRule::Positional,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Builds the composite descriptor from `catalog`, or `None` when any
    /// component is missing — an absent component means the virtual field
    /// does not apply to this backend configuration, not an error.
    pub fn synthesize(&self, catalog: &FieldCatalog) -> Option<FieldDescriptor> {
        let mut descriptors = Vec::with_capacity(self.components.len());
        for component in &self.components {
            descriptors.push(catalog.get(component)?);
        }

        let values = self.compose_values(&descriptors);
        // Writable only when every component is writable.
        let access = if descriptors.iter().all(|d| d.is_writable()) {
            FieldAccess::ReadWrite
        } else {
            FieldAccess::ReadOnly
        };

        Some(FieldDescriptor {
            name: self.name.clone(),
            kind: FieldKind::Select,
            access,
            select_values: values,
        })
    }

    fn compose_values(&self, descriptors: &[&FieldDescriptor]) -> Vec<String> {
        match &self.rule {
            ComposeRule::Cartesian => {
                let mut combos = vec![String::new()];
                for descriptor in descriptors {
                    let mut next = Vec::new();
                    for prefix in &combos {
                        for value in non_empty(&descriptor.select_values) {
                            if prefix.is_empty() {
                                next.push(value.to_string());
                            } else {
                                next.push(format!("{prefix}{}{value}", self.separator));
                            }
                        }
                    }
                    combos = next;
                }
                combos
            }
            ComposeRule::Gated { gate } => {
                let (first, second) = (descriptors[0], descriptors[1]);
                let mut values = Vec::new();
                for lead in non_empty(&first.select_values) {
                    if gate.iter().any(|g| g == lead) {
                        for partner in non_empty(&second.select_values) {
                            values.push(format!("{lead}{}{partner}", self.separator));
                        }
                    } else {
                        values.push(lead.to_string());
                    }
                }
                values
            }
            ComposeRule::Keyed { pairs } => {
                let first = descriptors[0];
                let mut values = Vec::new();
                for lead in non_empty(&first.select_values) {
                    let partners = pairs
                        .iter()
                        .find(|(key, _)| key == lead)
                        .map(|(_, p)| p.as_slice())
                        .unwrap_or(&[]);
                    if partners.is_empty() {
                        values.push(lead.to_string());
                    } else {
                        for partner in partners.iter().filter(|p| !p.is_empty()) {
                            values.push(format!("{lead}{}{partner}", self.separator));
                        }
                    }
                }
                values
            }
            ComposeRule::Positional => {
                let (first, second) = (descriptors[0], descriptors[1]);
                let leads: Vec<_> = non_empty(&first.select_values).collect();
                let partners: Vec<_> = non_empty(&second.select_values).collect();
                if partners.is_empty() {
                    return leads.iter().map(|s| s.to_string()).collect();
                }
                leads
                    .iter()
                    .enumerate()
                    .map(|(i, lead)| {
                        // Wraps around when the partner list is shorter.
                        let partner = partners[i % partners.len()];
                        format!("{lead}{}{partner}", self.separator)
                    })
                    .collect()
            }
        }
    }

    /// Splits a composite value back into `(component, value)` pairs.
    ///
    /// A value with no separator belongs entirely to the first component;
    /// the remaining components come back as empty strings, which a save
    /// then clears on the backend. This is the common case of a status
    /// chosen without a resolution.
    pub fn split(&self, value: &str) -> Vec<(String, String)> {
        let mut parts = value.splitn(self.components.len(), self.separator);
        self.components
            .iter()
            .map(|component| {
                let part = parts.next().unwrap_or("");
                (component.clone(), part.to_string())
            })
            .collect()
    }

    /// Composes the live component values of a record into the composite's
    /// read value. Trailing empty components are omitted, so a status with
    /// no resolution reads as just the status.
    pub fn compose_current<'a>(
        &self,
        mut component_value: impl FnMut(&str) -> Option<&'a str>,
    ) -> Option<String> {
        let mut parts: Vec<&str> = Vec::with_capacity(self.components.len());
        for component in &self.components {
            parts.push(component_value(component)?);
        }
        while parts.last().is_some_and(|p| p.is_empty()) {
            parts.pop();
        }
        let mut sep = [0u8; 4];
        Some(parts.join(self.separator.encode_utf8(&mut sep)))
    }
}

/// The configured set of virtual fields for one connector.
#[derive(Debug, Clone, Default)]
pub struct FieldVirtualizer {
    specs: Vec<VirtualField>,
}

impl FieldVirtualizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, spec: VirtualField) {
        self.specs.push(spec);
    }

    pub fn with(mut self, spec: VirtualField) -> Self {
        self.push(spec);
        self
    }

    /// The spec for a composite field name, if configured.
    pub fn find(&self, name: &str) -> Option<&VirtualField> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn is_composite(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn specs(&self) -> &[VirtualField] {
        &self.specs
    }

    /// Returns a new catalog with every applicable composite prepended, in
    /// spec order (the first configured spec ends up first). Raw fields are
    /// left in place for read-only access; specs whose components are
    /// missing are skipped.
    pub fn synthesize(&self, catalog: &FieldCatalog) -> FieldCatalog {
        let mut result = catalog.clone();
        for spec in self.specs.iter().rev() {
            match spec.synthesize(catalog) {
                Some(descriptor) => result.prepend(descriptor),
                None => {
                    debug!(field = %spec.name, "virtual field skipped, component missing");
                }
            }
        }
        result
    }
}

fn non_empty(values: &[String]) -> impl Iterator<Item = &str> {
    values.iter().map(String::as_str).filter(|v| !v.is_empty())
}
