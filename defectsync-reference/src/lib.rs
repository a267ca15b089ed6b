//! The do-nothing reference connector.
//!
//! Demonstrates the full connector contract without touching any backend:
//! every operation answers with the canned conformance values, in or out
//! of testing mode. New connector authors start from this crate; the host
//! uses it to validate its own side of the contract.

use defectsync_core::{
    ChangedQuery, ConnectParams, Connector, MessageLevel, OfflineWait, OperatorMessage, Project,
    Record, RecordState, WaitTime, testing,
};
use defectsync_types::{
    AttributeSpec, FieldCatalog, TrackError, TrackResult, looks_like_integer,
};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

const MODULE_VERSION: &str = concat!("reference ", env!("CARGO_PKG_VERSION"));
const CANNED_SERVER_VERSION: &str = "Reference x.y";

/// The reference connector. There is no backend to hold a session to, so
/// the tracker itself is stateless.
pub struct ReferenceTracker;

impl Connector for ReferenceTracker {
    type Project = ReferenceProject;

    fn list_attributes() -> Vec<AttributeSpec> {
        vec![
            AttributeSpec::new(
                "color",
                "Color",
                "This attribute controls the color of the sun. Please be \
                 careful about changing it to odd colors as it may start a \
                 panic. The default is Yellow and should never be Purple.",
            )
            .with_default("Yellow"),
            AttributeSpec::new(
                "explode",
                "Explode",
                "This attribute controls whether the sun goes super-nova at \
                 the end of the year. Once it has been set and the time \
                 passes, it cannot be undone. This is a required field with \
                 no defaults, you must choose.",
            )
            .required(),
            AttributeSpec::new(
                "flare",
                "Flare",
                "This attribute controls the frequency with which the sun \
                 emits solar flares. The value is the number of hours \
                 between flares. This is an optional field with an empty \
                 default value.",
            )
            .with_default(""),
            AttributeSpec::new(
                "wait_time",
                "Wait time",
                "Number of seconds the replication engine waits after a \
                 connection error before it retries. Use -1 to default to \
                 the General Wait Duration of the replication map.",
            )
            .with_default("10"),
        ]
    }

    fn validate_attribute(name: &str, value: &str) -> Option<String> {
        match name {
            "color" => {
                (value == "Purple").then(|| "Color: Purple is for prose.".to_string())
            }
            "explode" => {
                if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
                    None
                } else {
                    Some("Explode: True or false question.".to_string())
                }
            }
            "flare" => {
                if looks_like_integer(value) && value.parse::<i64>().is_ok_and(|n| n > 0) {
                    None
                } else {
                    Some("Flare: Must be a positive integer.".to_string())
                }
            }
            "wait_time" => WaitTime::validate(Some(value)),
            _ => Some(format!("Unknown attribute: {name}")),
        }
    }

    fn connect(_params: ConnectParams) -> TrackResult<Self> {
        // There is no backend; testing sentinels and real parameters get
        // the same canned behavior.
        Ok(Self)
    }

    fn name(&self) -> &'static str {
        "Reference"
    }

    fn module_version(&self) -> &'static str {
        MODULE_VERSION
    }

    fn server_version(&mut self) -> TrackResult<String> {
        Ok(CANNED_SERVER_VERSION.to_string())
    }

    fn server_warnings(&mut self) -> TrackResult<Option<String>> {
        Ok(Some(format!("No warnings for {CANNED_SERVER_VERSION}")))
    }

    fn server_date(&mut self) -> TrackResult<NaiveDateTime> {
        Ok(testing::canned_server_date())
    }

    fn offline_wait(&mut self) -> OfflineWait {
        OfflineWait::Online
    }

    fn take_message(&mut self) -> Option<OperatorMessage> {
        Some(OperatorMessage {
            text: testing::TEST_MESSAGE.to_string(),
            level: MessageLevel::Error,
        })
    }

    fn list_projects(&mut self) -> TrackResult<Vec<String>> {
        Ok(testing::canned_projects())
    }

    fn open_project(&mut self, name: &str) -> TrackResult<ReferenceProject> {
        if name.is_empty() {
            return Err(TrackError::Query("Undefined project".into()));
        }
        testing::require_canned_project(name)?;
        Ok(ReferenceProject {
            name: name.to_string(),
        })
    }
}

/// The reference project.
pub struct ReferenceProject {
    name: String,
}

impl Project for ReferenceProject {
    type Record = ReferenceRecord;

    fn name(&self) -> &str {
        &self.name
    }

    fn list_fields(&mut self) -> TrackResult<FieldCatalog> {
        Ok(testing::canned_catalog())
    }

    fn set_segment_filters(
        &mut self,
        _selections: &[defectsync_core::FilterSelection],
    ) -> TrackResult<()> {
        Ok(())
    }

    fn set_referenced_fields(&mut self, _fields: &[String]) {}

    fn list_changed_records(&mut self, _query: &ChangedQuery) -> TrackResult<Vec<String>> {
        Ok(testing::canned_changed_records())
    }

    fn get_record(&mut self, _id: &str) -> TrackResult<ReferenceRecord> {
        Ok(ReferenceRecord {
            state: RecordState::existing(testing::TEST_RECORD, testing::canned_record_fields()),
        })
    }

    fn new_record(&mut self) -> TrackResult<ReferenceRecord> {
        Ok(ReferenceRecord {
            state: RecordState::created(testing::canned_record_fields()),
        })
    }
}

/// The reference record.
pub struct ReferenceRecord {
    state: RecordState,
}

impl Record for ReferenceRecord {
    fn id(&self) -> &str {
        self.state.id()
    }

    fn fields(&mut self) -> TrackResult<BTreeMap<String, String>> {
        Ok(self.state.fields())
    }

    fn get_field(&mut self, name: &str) -> TrackResult<Option<String>> {
        testing::canned_get_field(name)
    }

    fn set_field(&mut self, name: &str, value: &str) -> TrackResult<()> {
        testing::canned_set_field(name)?;
        self.state.set(name, value);
        Ok(())
    }

    fn save(&mut self) -> TrackResult<String> {
        self.state.commit_save(Some(testing::TEST_RECORD.to_string()));
        Ok(testing::TEST_RECORD.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_contract_walkthrough() {
        let mut tracker = ReferenceTracker::connect(ConnectParams::test_login()).unwrap();
        assert_eq!(tracker.name(), "Reference");
        assert_eq!(tracker.server_version().unwrap(), CANNED_SERVER_VERSION);
        assert!(tracker.server_warnings().unwrap().unwrap().contains("No warnings"));
        assert_eq!(tracker.server_date().unwrap(), testing::canned_server_date());
        assert_eq!(tracker.offline_wait(), OfflineWait::Online);
        assert_eq!(tracker.take_message().unwrap().text, testing::TEST_MESSAGE);

        let projects = tracker.list_projects().unwrap();
        assert_eq!(projects, [testing::TEST_PROJECT]);
        assert!(tracker.open_project("wrong").is_err());
        assert!(tracker.open_project("").is_err());

        let mut project = tracker.open_project(testing::TEST_PROJECT).unwrap();
        let catalog = project.list_fields().unwrap();
        assert_eq!(catalog.len(), 1);

        let query = ChangedQuery::since(testing::canned_server_date(), "Modified");
        assert_eq!(
            project.list_changed_records(&query).unwrap(),
            [testing::TEST_RECORD]
        );

        let mut record = project.get_record(testing::TEST_RECORD).unwrap();
        assert_eq!(
            record.get_field(testing::TEST_FIELD).unwrap().as_deref(),
            Some(testing::TEST_VALUE)
        );
        assert!(record.get_field("other").is_err());
        record.set_field(testing::TEST_FIELD, "updated").unwrap();
        assert_eq!(record.save().unwrap(), testing::TEST_RECORD);
    }

    #[test]
    fn attribute_validation_matches_help_text() {
        assert!(ReferenceTracker::validate_attribute("color", "Yellow").is_none());
        assert!(ReferenceTracker::validate_attribute("color", "Purple").is_some());
        assert!(ReferenceTracker::validate_attribute("explode", "TRUE").is_none());
        assert!(ReferenceTracker::validate_attribute("explode", "maybe").is_some());
        assert!(ReferenceTracker::validate_attribute("flare", "12").is_none());
        assert!(ReferenceTracker::validate_attribute("flare", "0").is_some());
        assert!(ReferenceTracker::validate_attribute("flare", "twelve").is_some());
        assert!(ReferenceTracker::validate_attribute("wait_time", "-1").is_none());
        assert!(
            ReferenceTracker::validate_attribute("gravity", "9.8")
                .unwrap()
                .contains("Unknown attribute")
        );
    }

    #[test]
    fn attribute_list_is_ordered_and_flagged() {
        let attrs = ReferenceTracker::list_attributes();
        let names: Vec<_> = attrs.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["color", "explode", "flare", "wait_time"]);
        assert!(attrs[1].required);
        assert_eq!(attrs[0].default.as_deref(), Some("Yellow"));
        assert_eq!(attrs[2].default.as_deref(), Some(""));
    }
}
