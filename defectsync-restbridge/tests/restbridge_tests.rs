//! Connector-level tests against the in-process mock bridge.

use defectsync_bridge::mock::{MockBridgeServer, MockTracker};
use defectsync_core::{
    ChangedQuery, ConnectParams, Connector, FilterSelection, Project, Record, testing,
};
use defectsync_restbridge::RestTracker;
use defectsync_types::{Attributes, FieldAccess, FieldDescriptor};
use pretty_assertions::assert_eq;

fn seeded_tracker() -> MockTracker {
    let mut tracker = MockTracker::default();
    tracker.projects = vec!["CORE".into()];
    tracker.catalog = vec![
        FieldDescriptor::word("DefectID", FieldAccess::Identifier),
        FieldDescriptor::select(
            "Status",
            FieldAccess::ReadWrite,
            vec!["Open".into(), "Closed".into()],
        ),
        FieldDescriptor::date("Modified", FieldAccess::ModDate),
    ];
    tracker.seed_defect("1001", &[("Status", "Open"), ("Severity", "high")]);
    tracker
}

fn connect(server: &MockBridgeServer) -> RestTracker {
    let params = ConnectParams::new("https://tracker.example/", "replicator", "secret")
        .with_attributes(
            Attributes::new()
                .with("bridge_address", server.endpoint().to_string())
                .with("allow_creation", "y"),
        );
    RestTracker::connect(params).unwrap()
}

// ── testing mode ──────────────────────────────────────────────────

#[test]
fn testing_mode_is_canned_end_to_end() {
    let mut tracker = RestTracker::connect(ConnectParams::test_login()).unwrap();
    assert_eq!(tracker.list_projects().unwrap(), [testing::TEST_PROJECT]);
    assert_eq!(
        tracker.server_date().unwrap(),
        testing::canned_server_date()
    );

    let mut project = tracker.open_project(testing::TEST_PROJECT).unwrap();
    assert!(tracker.open_project("other").is_err());

    let catalog = project.list_fields().unwrap();
    assert_eq!(catalog.iter().next().unwrap().name, "JobID");

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
    assert!(record.get_field("nope").is_err());
    record.set_field(testing::TEST_FIELD, "x").unwrap();
    assert_eq!(record.save().unwrap(), testing::TEST_RECORD);
}

// ── live flows over the mock bridge ───────────────────────────────

#[test]
fn lists_projects_and_fields() {
    let server = MockBridgeServer::start(seeded_tracker()).unwrap();
    let mut tracker = connect(&server);

    assert_eq!(tracker.list_projects().unwrap(), ["CORE"]);
    assert_eq!(tracker.server_version().unwrap(), "MockTracker 9.1");

    let mut project = tracker.open_project("CORE").unwrap();
    let catalog = project.list_fields().unwrap();
    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.get("Status").unwrap().select_values, ["Open", "Closed"]);

    // Second call serves the cache; mutating the copy is harmless.
    let mut copy = project.list_fields().unwrap();
    copy.push(FieldDescriptor::word("Bogus", FieldAccess::ReadOnly));
    assert_eq!(project.list_fields().unwrap().len(), 3);
}

#[test]
fn unknown_project_is_rejected() {
    let server = MockBridgeServer::start(seeded_tracker()).unwrap();
    let mut tracker = connect(&server);
    let err = tracker.open_project("NOPE").unwrap_err();
    assert!(err.continuable());
}

#[test]
fn segment_filters_reach_the_helper() {
    let server = MockBridgeServer::start(seeded_tracker()).unwrap();
    let mut tracker = connect(&server);
    let mut project = tracker.open_project("CORE").unwrap();

    project
        .set_segment_filters(&[
            FilterSelection::new("*Project*", vec!["CORE".into(), "DOCS".into()]),
            FilterSelection::new("Status", vec!["Open".into(), "Closed".into()]),
        ])
        .unwrap();

    let state = server.state();
    let (filter, projects) = state.lock().unwrap().segment_filter.clone().unwrap();
    assert_eq!(filter, "(Status='Open' OR Status='Closed')");
    assert_eq!(projects, "CORE,DOCS");

    let message = tracker.take_message().unwrap();
    assert!(message.text.contains("Segment filter is:"));
}

#[test]
fn failed_filter_compilation_keeps_previous_filter() {
    let server = MockBridgeServer::start(seeded_tracker()).unwrap();
    let mut tracker = connect(&server);
    let mut project = tracker.open_project("CORE").unwrap();

    project
        .set_segment_filters(&[FilterSelection::new("Status", vec!["Open".into()])])
        .unwrap();
    let err = project
        .set_segment_filters(&[FilterSelection::new("Status", Vec::new())])
        .unwrap_err();
    assert!(err.continuable());

    let state = server.state();
    let (filter, _) = state.lock().unwrap().segment_filter.clone().unwrap();
    assert_eq!(filter, "(Status='Open')");
}

#[test]
fn fetch_edit_save_roundtrip() {
    let server = MockBridgeServer::start(seeded_tracker()).unwrap();
    let mut tracker = connect(&server);
    let mut project = tracker.open_project("CORE").unwrap();
    project.set_referenced_fields(&["Status".into(), "Severity".into()]);

    let mut record = project.get_record("1001").unwrap();
    assert_eq!(record.get_field("Status").unwrap().as_deref(), Some("Open"));

    record.set_field("Status", "Closed").unwrap();
    assert_eq!(record.save().unwrap(), "1001");

    let state = server.state();
    {
        let tracker_state = state.lock().unwrap();
        assert_eq!(tracker_state.referenced_fields, ["Status", "Severity"]);
        assert_eq!(tracker_state.defects["1001"]["Status"], "Closed");
        assert_eq!(tracker_state.saves, 1);
    }

    // Clean save is a no-op: no second write reaches the helper.
    assert_eq!(record.save().unwrap(), "1001");
    assert_eq!(state.lock().unwrap().saves, 1);
}

#[test]
fn creation_flow_adopts_assigned_id() {
    let server = MockBridgeServer::start(seeded_tracker()).unwrap();
    let mut tracker = connect(&server);
    let mut project = tracker.open_project("CORE").unwrap();

    let mut record = project.new_record().unwrap();
    assert_eq!(record.id(), defectsync_types::NEW_RECORD_ID);
    record.set_field("Status", "Open").unwrap();
    let id = record.save().unwrap();
    assert_eq!(id, "1000");
    assert_eq!(record.id(), "1000");

    let state = server.state();
    assert_eq!(state.lock().unwrap().creates, 1);
}

#[test]
fn creation_respects_attribute_gate() {
    let server = MockBridgeServer::start(seeded_tracker()).unwrap();
    let params = ConnectParams::new("https://tracker.example/", "replicator", "secret")
        .with_attributes(Attributes::new().with("bridge_address", server.endpoint().to_string()));
    let mut tracker = RestTracker::connect(params).unwrap();
    let mut project = tracker.open_project("CORE").unwrap();
    let err = project.new_record().unwrap_err();
    assert!(err.continuable());
}

#[test]
fn dead_helper_recovers_on_next_operation() {
    let server = MockBridgeServer::start(seeded_tracker()).unwrap();
    let mut tracker = connect(&server);
    let mut project = tracker.open_project("CORE").unwrap();
    assert_eq!(project.list_fields().unwrap().len(), 3);

    // Helper dies; the next operation re-establishes the session and
    // re-binds the project without any explicit connect call.
    server.disconnect_all();
    let query = ChangedQuery::since(testing::canned_server_date(), "Modified").with_max_rows(10);
    let ids = project.list_changed_records(&query).unwrap();
    assert_eq!(ids, ["1001"]);
}

#[test]
fn attribute_validation() {
    assert!(RestTracker::validate_attribute("bridge_address", "host:51666").is_none());
    assert!(RestTracker::validate_attribute("bridge_address", "nonsense").is_some());
    assert!(RestTracker::validate_attribute("defect_batch", "100").is_none());
    assert!(RestTracker::validate_attribute("defect_batch", "0").is_some());
    assert!(RestTracker::validate_attribute("allow_creation", "y").is_none());
    assert!(RestTracker::validate_attribute("allow_creation", "yes").is_some());
    assert!(RestTracker::validate_attribute("wait_time", "-1").is_none());
    assert!(RestTracker::validate_attribute("wait_time", "0").is_some());
    assert!(
        RestTracker::validate_attribute("sunspots", "11")
            .unwrap()
            .contains("Unknown attribute")
    );
}
