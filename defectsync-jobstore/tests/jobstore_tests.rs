//! Connector-level tests over the in-memory job store.

use defectsync_core::{
    ChangedQuery, ConnectParams, Connector, FilterSelection, Project, Record, testing,
};
use defectsync_jobstore::transport::memory::InMemoryJobStore;
use defectsync_jobstore::{JobSource, JobTracker};
use chrono::NaiveDate;
use pretty_assertions::assert_eq;

fn params() -> ConnectParams {
    ConnectParams::new("jobserver:1666", "replicator", "secret")
}

fn seeded_store() -> InMemoryJobStore {
    let mut store = InMemoryJobStore::default();
    store.seed_job(
        "job000010",
        &[
            ("Status", "open"),
            ("User", "alice"),
            ("Date", "2024/03/01 09:00:00"),
            ("Description", "engine crash"),
        ],
    );
    store.seed_job(
        "job000011",
        &[
            ("Status", "closed"),
            ("User", "replicator"),
            ("Date", "2024/03/02 10:00:00"),
            ("Description", "mirrored edit"),
        ],
    );
    store
}

fn since(y: i32, m: u32, d: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

#[test]
fn testing_mode_is_canned() {
    let mut tracker: JobTracker<InMemoryJobStore> =
        JobTracker::connect(ConnectParams::test_login()).unwrap();
    assert_eq!(tracker.list_projects().unwrap(), [testing::TEST_PROJECT]);
    assert_eq!(tracker.server_version().unwrap(), "JobStoreTest 2024.1");
    let mut project = tracker.open_project(testing::TEST_PROJECT).unwrap();
    let catalog = project.list_fields().unwrap();
    assert_eq!(catalog.iter().next().unwrap().name, "JobID");
    let mut record = project.get_record(testing::TEST_RECORD).unwrap();
    assert_eq!(
        record.get_field(testing::TEST_FIELD).unwrap().as_deref(),
        Some(testing::TEST_VALUE)
    );
}

#[test]
fn catalog_comes_from_the_job_specification() {
    let mut tracker = JobTracker::with_source(seeded_store(), &params()).unwrap();
    let mut project = tracker.open_project("Jobs").unwrap();
    let catalog = project.list_fields().unwrap();

    assert_eq!(catalog.identifier().unwrap().name, "Job");
    assert_eq!(catalog.mod_date_field().unwrap().name, "Date");
    assert_eq!(
        catalog.get("Status").unwrap().select_values,
        ["open", "suspended", "closed"]
    );
}

#[test]
fn changed_jobs_filtered_by_date_segment_and_user() {
    let mut tracker = JobTracker::with_source(seeded_store(), &params()).unwrap();
    let mut project = tracker.open_project("Jobs").unwrap();

    let query = ChangedQuery::since(since(2024, 1, 1), "Date");
    assert_eq!(
        project.list_changed_records(&query).unwrap(),
        ["job000010", "job000011"]
    );

    // Date restriction.
    let query = ChangedQuery::since(since(2024, 3, 2), "Date");
    assert_eq!(project.list_changed_records(&query).unwrap(), ["job000011"]);

    // Excluding the replicator's own writes.
    let query =
        ChangedQuery::since(since(2024, 1, 1), "Date").excluding_user("User", "replicator");
    assert_eq!(project.list_changed_records(&query).unwrap(), ["job000010"]);

    // Segment filter in the token dialect.
    project
        .set_segment_filters(&[FilterSelection::new(
            "Status",
            vec!["open".into(), "suspended".into()],
        )])
        .unwrap();
    let query = ChangedQuery::since(since(2024, 1, 1), "Date");
    assert_eq!(project.list_changed_records(&query).unwrap(), ["job000010"]);

    let message = tracker.take_message().unwrap();
    assert_eq!(
        message.text,
        "Segment filter is: (Status=open|Status=suspended)"
    );
}

#[test]
fn job_edit_and_save_restamps_system_fields() {
    let mut tracker = JobTracker::with_source(seeded_store(), &params()).unwrap();
    let mut project = tracker.open_project("Jobs").unwrap();
    let mut record = project.get_record("job000010").unwrap();

    record.set_field("Status", "closed").unwrap();
    assert_eq!(record.save().unwrap(), "job000010");

    let mut reread = project.get_record("job000010").unwrap();
    assert_eq!(reread.get_field("Status").unwrap().as_deref(), Some("closed"));
    // The store stamps Date and User on save.
    assert_eq!(
        reread.get_field("Date").unwrap().as_deref(),
        Some("2024/03/05 12:00:00")
    );
    assert_eq!(
        reread.get_field("User").unwrap().as_deref(),
        Some("replicator")
    );
}

#[test]
fn clean_save_is_a_no_op() {
    let store = seeded_store();
    let mut tracker = JobTracker::with_source(store, &params()).unwrap();
    let mut project = tracker.open_project("Jobs").unwrap();
    let mut record = project.get_record("job000010").unwrap();
    record.set_field("Description", "updated").unwrap();
    record.save().unwrap();
    record.save().unwrap();

    // One save reached the store; the second was clean.
    let query = ChangedQuery::since(since(2020, 1, 1), "Date").with_max_rows(100);
    assert_eq!(project.list_changed_records(&query).unwrap().len(), 2);
}

#[test]
fn new_job_takes_presets_and_assigned_id() {
    let mut tracker = JobTracker::with_source(seeded_store(), &params()).unwrap();
    let mut project = tracker.open_project("Jobs").unwrap();

    let mut record = project.new_record().unwrap();
    assert_eq!(record.id(), defectsync_types::NEW_RECORD_ID);
    assert_eq!(record.get_field("Status").unwrap().as_deref(), Some("open"));
    record.set_field("Description", "fresh defect").unwrap();

    let id = record.save().unwrap();
    assert_eq!(id, "job000001");
    assert_eq!(record.id(), "job000001");

    let mut reread = project.get_record(&id).unwrap();
    assert_eq!(
        reread.get_field("Description").unwrap().as_deref(),
        Some("fresh defect")
    );
    assert_eq!(reread.get_field("Status").unwrap().as_deref(), Some("open"));
}

#[test]
fn negative_job_ids_are_rejected() {
    let mut tracker = JobTracker::with_source(seeded_store(), &params()).unwrap();
    let mut project = tracker.open_project("Jobs").unwrap();
    assert!(project.get_record("-1").is_err());
}

/// Delegating source that keeps a handle on the store so the test can
/// sever the connection behind the connector's back.
struct SharedStore(std::rc::Rc<std::cell::RefCell<InMemoryJobStore>>);

impl defectsync_jobstore::JobSource for SharedStore {
    fn open(params: &ConnectParams) -> defectsync_types::TrackResult<Self> {
        InMemoryJobStore::open(params).map(|s| Self(std::rc::Rc::new(std::cell::RefCell::new(s))))
    }
    fn is_alive(&mut self) -> bool {
        self.0.borrow_mut().is_alive()
    }
    fn connect(&mut self) -> defectsync_types::TrackResult<()> {
        self.0.borrow_mut().connect()
    }
    fn server_info(&mut self) -> defectsync_types::TrackResult<String> {
        self.0.borrow_mut().server_info()
    }
    fn server_date(&mut self) -> defectsync_types::TrackResult<String> {
        self.0.borrow_mut().server_date()
    }
    fn job_spec(&mut self) -> defectsync_types::TrackResult<String> {
        self.0.borrow_mut().job_spec()
    }
    fn run_query(
        &mut self,
        query: &str,
        max_rows: Option<u32>,
    ) -> defectsync_types::TrackResult<Vec<String>> {
        self.0.borrow_mut().run_query(query, max_rows)
    }
    fn fetch_job(
        &mut self,
        id: &str,
    ) -> defectsync_types::TrackResult<std::collections::BTreeMap<String, String>> {
        self.0.borrow_mut().fetch_job(id)
    }
    fn save_job(
        &mut self,
        id: &str,
        fields: &std::collections::BTreeMap<String, String>,
    ) -> defectsync_types::TrackResult<String> {
        self.0.borrow_mut().save_job(id, fields)
    }
}

#[test]
fn dead_store_recovers_on_next_operation() {
    let handle = std::rc::Rc::new(std::cell::RefCell::new(seeded_store()));
    let mut tracker =
        JobTracker::with_source(SharedStore(std::rc::Rc::clone(&handle)), &params()).unwrap();
    let mut project = tracker.open_project("Jobs").unwrap();
    assert_eq!(project.list_fields().unwrap().len(), 5);
    let connects_before = handle.borrow().connects;

    // The store dies behind the connector's back; the next operation
    // reconnects without an explicit connect call.
    handle.borrow_mut().kill_connection();
    let query = ChangedQuery::since(since(2024, 1, 1), "Date");
    assert_eq!(
        project.list_changed_records(&query).unwrap(),
        ["job000010", "job000011"]
    );
    assert_eq!(handle.borrow().connects, connects_before + 1);
}

#[test]
fn offline_wait_reflects_wait_time_attribute() {
    use defectsync_core::OfflineWait;
    let params = ConnectParams::new("jobserver:1666", "replicator", "secret").with_attributes(
        defectsync_types::Attributes::new().with("wait_time", "-1"),
    );
    let mut store = InMemoryJobStore::default();
    store.refuse_connects = false;
    let mut tracker = JobTracker::with_source(store, &params).unwrap();
    assert_eq!(tracker.offline_wait(), OfflineWait::Online);

    assert!(JobTracker::<InMemoryJobStore>::validate_attribute("wait_time", "10").is_none());
    assert!(
        JobTracker::<InMemoryJobStore>::validate_attribute("color", "red")
            .unwrap()
            .contains("Unknown attribute")
    );
}
