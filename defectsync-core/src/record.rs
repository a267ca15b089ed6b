//! Record state: fetched base fields plus a changed-field overlay.
//!
//! A record handle holds the values fetched from the backend and an overlay
//! of fields the engine has set since load (or since the last save). Saves
//! transmit only the overlay — unchanged fields are never re-sent — then
//! merge it into the base and clear the dirty flag.

use defectsync_types::NEW_RECORD_ID;
use std::collections::BTreeMap;

/// Base values, overlay, and dirty flag for one record.
#[derive(Debug, Clone)]
pub struct RecordState {
    id: String,
    base: BTreeMap<String, String>,
    overlay: BTreeMap<String, String>,
    dirty: bool,
}

impl RecordState {
    /// State for an existing record with its fetched field values.
    pub fn existing(id: impl Into<String>, base: BTreeMap<String, String>) -> Self {
        Self {
            id: id.into(),
            base,
            overlay: BTreeMap::new(),
            dirty: false,
        }
    }

    /// State for a record the backend has not created yet. Starts dirty so
    /// the first save runs the creation flow even if nothing else was set.
    pub fn created(defaults: BTreeMap<String, String>) -> Self {
        Self {
            id: NEW_RECORD_ID.to_string(),
            base: defaults,
            overlay: BTreeMap::new(),
            dirty: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this record awaits backend creation.
    pub fn is_new(&self) -> bool {
        self.id == NEW_RECORD_ID
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The current value of a field: overlay first, then base.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.overlay
            .get(name)
            .or_else(|| self.base.get(name))
            .map(String::as_str)
    }

    /// Sets a field in the overlay and marks the record dirty.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.overlay.insert(name.into(), value.into());
        self.dirty = true;
    }

    /// Snapshot of the effective field values (base merged with overlay).
    pub fn fields(&self) -> BTreeMap<String, String> {
        let mut merged = self.base.clone();
        for (name, value) in &self.overlay {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }

    /// The pending changes a save must transmit. Empty when clean.
    pub fn pending(&self) -> &BTreeMap<String, String> {
        &self.overlay
    }

    /// Merges the overlay into the base after a successful save, adopting
    /// the backend-assigned id when the backend returned one. Clears the
    /// dirty flag.
    pub fn commit_save(&mut self, assigned_id: Option<String>) {
        let overlay = std::mem::take(&mut self.overlay);
        for (name, value) in overlay {
            self.base.insert(name, value);
        }
        if let Some(id) = assigned_id {
            self.id = id;
        }
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BTreeMap<String, String> {
        [("Status".to_string(), "open".to_string())].into()
    }

    #[test]
    fn overlay_shadows_base() {
        let mut record = RecordState::existing("42", base());
        assert_eq!(record.get("Status"), Some("open"));
        record.set("Status", "closed");
        assert_eq!(record.get("Status"), Some("closed"));
        assert!(record.is_dirty());
        assert_eq!(record.pending().len(), 1);
    }

    #[test]
    fn commit_merges_and_cleans() {
        let mut record = RecordState::existing("42", base());
        record.set("Status", "closed");
        record.set("Severity", "high");
        record.commit_save(None);
        assert!(!record.is_dirty());
        assert!(record.pending().is_empty());
        assert_eq!(record.get("Status"), Some("closed"));
        assert_eq!(record.get("Severity"), Some("high"));
        assert_eq!(record.id(), "42");
    }

    #[test]
    fn new_record_adopts_assigned_id() {
        let mut record = RecordState::created(BTreeMap::new());
        assert!(record.is_new());
        assert!(record.is_dirty());
        record.set("Summary", "crash on save");
        record.commit_save(Some("1007".into()));
        assert_eq!(record.id(), "1007");
        assert!(!record.is_new());
        assert!(!record.is_dirty());
    }

    #[test]
    fn fields_snapshot_is_defensive() {
        let mut record = RecordState::existing("42", base());
        let mut snapshot = record.fields();
        snapshot.insert("Status".into(), "mangled".into());
        assert_eq!(record.get("Status"), Some("open"));
        record.set("Status", "closed");
        assert_eq!(record.fields().get("Status").unwrap(), "closed");
    }
}
