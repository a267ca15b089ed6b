//! Parsing the job specification form into a field catalog.
//!
//! The store describes its jobs with a form like:
//!
//! ```text
//! Fields:
//!         101 Job word 32 required
//!         102 Status select 10 required
//!         104 Date date 20 always
//!         105 Description text 0 required
//!
//! Values:
//!         Status open/suspended/closed
//!
//! Presets:
//!         Status open
//!         User $user
//!         Date $now
//! ```
//!
//! Field lines carry code, name, datatype, length, and disposition. The
//! `always` disposition on a date field marks the system-maintained
//! modification stamp; `once` dates are set at creation and read-only
//! after. The job name field (code 101) is the record identifier.

use defectsync_types::{
    FieldAccess, FieldCatalog, FieldDescriptor, FieldKind, TrackError, TrackResult,
};
use std::collections::BTreeMap;

/// Field code conventionally assigned to the job name.
const JOB_NAME_CODE: u32 = 101;

/// One parsed field line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecField {
    pub code: u32,
    pub name: String,
    pub datatype: String,
    pub disposition: String,
}

/// A parsed job specification.
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    pub fields: Vec<SpecField>,
    /// Select-field name → allowed values.
    pub values: BTreeMap<String, Vec<String>>,
    /// Field name → preset applied to new jobs (`$user`, `$now`, or a
    /// literal).
    pub presets: BTreeMap<String, String>,
}

impl JobSpec {
    /// Parses the form text. Unknown sections are skipped; a missing
    /// `Fields:` section is an error since nothing can be described
    /// without it.
    pub fn parse(text: &str) -> TrackResult<Self> {
        let mut spec = Self::default();
        let mut section = "";

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if !line.starts_with(char::is_whitespace) {
                section = trimmed.trim_end_matches(':');
                continue;
            }
            match section {
                "Fields" => {
                    let parts: Vec<&str> = trimmed.split_whitespace().collect();
                    let [code, name, datatype, _len, disposition] = parts.as_slice() else {
                        return Err(TrackError::Data(format!(
                            "malformed job specification field line: {trimmed}"
                        )));
                    };
                    let code = code.parse().map_err(|_| {
                        TrackError::Data(format!(
                            "malformed job specification field code: {trimmed}"
                        ))
                    })?;
                    spec.fields.push(SpecField {
                        code,
                        name: name.to_string(),
                        datatype: datatype.to_string(),
                        disposition: disposition.to_string(),
                    });
                }
                "Values" => {
                    if let Some((name, values)) = trimmed.split_once(char::is_whitespace) {
                        spec.values.insert(
                            name.to_string(),
                            values.trim().split('/').map(str::to_string).collect(),
                        );
                    }
                }
                "Presets" => {
                    if let Some((name, value)) = trimmed.split_once(char::is_whitespace) {
                        spec.presets.insert(name.to_string(), value.trim().to_string());
                    }
                }
                _ => {}
            }
        }

        if spec.fields.is_empty() {
            return Err(TrackError::Data(
                "job specification has no Fields section".into(),
            ));
        }
        Ok(spec)
    }

    /// The catalog this specification describes.
    pub fn to_catalog(&self) -> FieldCatalog {
        let mut catalog = FieldCatalog::new();
        for field in &self.fields {
            let select_values = self.values.get(&field.name).cloned().unwrap_or_default();
            let kind = match field.datatype.as_str() {
                "word" => FieldKind::Word,
                "line" => FieldKind::Line,
                "select" => FieldKind::Select,
                "date" => FieldKind::Date,
                // `bulk` is free text entered without prompting.
                "text" | "bulk" => FieldKind::Text,
                _ => FieldKind::Line,
            };
            let access = if field.code == JOB_NAME_CODE {
                FieldAccess::Identifier
            } else {
                match (kind, field.disposition.as_str()) {
                    (FieldKind::Date, "always") => FieldAccess::ModDate,
                    (FieldKind::Date, "once") => FieldAccess::ReadOnly,
                    // A word field stamped on every save carries the
                    // last modifying user.
                    (FieldKind::Word, "always") => FieldAccess::ModBy,
                    _ => FieldAccess::ReadWrite,
                }
            };
            catalog.push(FieldDescriptor {
                name: field.name.clone(),
                kind,
                access,
                select_values,
            });
        }
        catalog
    }

    /// Default field values for a new job. `$user` and `$now` expand to
    /// the acting user and the supplied timestamp.
    pub fn defaults(&self, user: &str, now: &str) -> BTreeMap<String, String> {
        self.presets
            .iter()
            .map(|(name, preset)| {
                let value = match preset.as_str() {
                    "$user" => user.to_string(),
                    "$now" => now.to_string(),
                    literal => literal.to_string(),
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// The system-maintained modification-date field, if the spec has one.
    pub fn mod_date_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.datatype == "date" && f.disposition == "always")
            .map(|f| f.name.as_str())
    }
}
