//! Canned behavior for the conformance testing mode.
//!
//! Every connector answers testing-mode calls with exactly these values so
//! the host can validate the plugin contract without a backend. Connectors
//! check [`ConnectParams::is_test_login`] at connect and route through this
//! module from then on.
//!
//! [`ConnectParams::is_test_login`]: crate::connector::ConnectParams::is_test_login

use defectsync_types::{FieldAccess, FieldCatalog, FieldDescriptor, TrackError, TrackResult};
use std::collections::BTreeMap;

pub use defectsync_types::testing::{
    TEST_FIELD, TEST_MESSAGE, TEST_PASS, TEST_PROJECT, TEST_RECORD, TEST_SERVER,
    TEST_USER, TEST_VALUE, canned_server_date, is_test_login,
};

/// The single canned project.
pub fn canned_projects() -> Vec<String> {
    vec![TEST_PROJECT.to_string()]
}

/// Validates a project name against the canned project list.
pub fn require_canned_project(name: &str) -> TrackResult<()> {
    if name == TEST_PROJECT {
        Ok(())
    } else {
        Err(TrackError::Query("Unknown project".into()))
    }
}

/// The canned single-field catalog.
pub fn canned_catalog() -> FieldCatalog {
    vec![FieldDescriptor::word("JobID", FieldAccess::ReadOnly)].into()
}

/// The canned changed-record list.
pub fn canned_changed_records() -> Vec<String> {
    vec![TEST_RECORD.to_string()]
}

/// The canned record's field values.
pub fn canned_record_fields() -> BTreeMap<String, String> {
    [(TEST_FIELD.to_string(), TEST_VALUE.to_string())].into()
}

/// Reads a canned record field; only [`TEST_FIELD`] exists.
pub fn canned_get_field(name: &str) -> TrackResult<Option<String>> {
    if name == TEST_FIELD {
        Ok(Some(TEST_VALUE.to_string()))
    } else {
        Err(TrackError::Query("Field not defined".into()))
    }
}

/// Accepts a canned record write; only [`TEST_FIELD`] is writable.
pub fn canned_set_field(name: &str) -> TrackResult<()> {
    if name == TEST_FIELD {
        Ok(())
    } else {
        Err(TrackError::Query("Field not defined".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_surface_is_consistent() {
        assert_eq!(canned_projects(), [TEST_PROJECT]);
        assert!(require_canned_project(TEST_PROJECT).is_ok());
        assert!(require_canned_project("other").is_err());
        assert_eq!(canned_changed_records(), [TEST_RECORD]);
        assert_eq!(canned_catalog().iter().next().unwrap().name, "JobID");
        assert_eq!(
            canned_get_field(TEST_FIELD).unwrap().as_deref(),
            Some(TEST_VALUE)
        );
        assert!(canned_get_field("other").is_err());
        assert!(canned_set_field(TEST_FIELD).is_ok());
        assert!(canned_set_field("other").is_err());
    }
}
