//! The capability contract every connector exposes to the host engine.
//!
//! These traits are the normalized surface over heterogeneous backends:
//! list projects, describe fields, enumerate changed records, fetch and
//! save a record. The engine owns retry pacing and replication state; a
//! connector owns its session and never retries internally beyond the
//! single-shot reconnect contract.

use crate::filter::FilterSelection;
use crate::message::OperatorMessage;
use crate::session::OfflineWait;
use chrono::NaiveDateTime;
use defectsync_types::{AttributeSpec, Attributes, FieldCatalog, TrackResult, testing};
use std::collections::BTreeMap;

/// Parameters for establishing a connector instance.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub server: String,
    pub user: String,
    pub password: String,
    pub attributes: Attributes,
}

impl ConnectParams {
    pub fn new(
        server: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            user: user.into(),
            password: password.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Whether these parameters select the conformance testing mode.
    pub fn is_test_login(&self) -> bool {
        testing::is_test_login(&self.server, &self.user, &self.password)
    }

    /// Canned connect parameters for the testing mode.
    pub fn test_login() -> Self {
        Self::new(testing::TEST_SERVER, testing::TEST_USER, testing::TEST_PASS)
    }
}

/// Changed-record enumeration request.
#[derive(Debug, Clone)]
pub struct ChangedQuery {
    /// Upper bound on returned ids; `None` returns all changed records.
    pub max_rows: Option<u32>,
    /// Records modified at or after this instant qualify.
    pub since: NaiveDateTime,
    /// The field carrying the modification timestamp.
    pub mod_date_field: String,
    /// The field carrying the last modifying user, when the backend has one.
    pub mod_by_field: Option<String>,
    /// Skip records last modified by this user (the replicator's own
    /// account, to avoid echoing its writes).
    pub exclude_user: Option<String>,
}

impl ChangedQuery {
    pub fn since(since: NaiveDateTime, mod_date_field: impl Into<String>) -> Self {
        Self {
            max_rows: None,
            since,
            mod_date_field: mod_date_field.into(),
            mod_by_field: None,
            exclude_user: None,
        }
    }

    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn excluding_user(
        mut self,
        mod_by_field: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        self.mod_by_field = Some(mod_by_field.into());
        self.exclude_user = Some(user.into());
        self
    }
}

/// A connector bound to one backend server.
pub trait Connector: Sized {
    type Project: Project;

    /// Configuration attributes this connector understands, consumed by the
    /// configuration tool before connect.
    fn list_attributes() -> Vec<AttributeSpec>;

    /// `None` when the value is acceptable, otherwise the text to show the
    /// operator. Called before connect, and again before replication
    /// starts.
    fn validate_attribute(name: &str, value: &str) -> Option<String>;

    /// Connects (or, in testing mode, fabricates) a connector instance.
    fn connect(params: ConnectParams) -> TrackResult<Self>;

    /// Short name of the backend this connector adapts.
    fn name(&self) -> &'static str;

    /// Version string of the connector module itself.
    fn module_version(&self) -> &'static str;

    /// Version of the backend server, fetched once and cached.
    fn server_version(&mut self) -> TrackResult<String>;

    /// Operator-facing notes on diminished behavior (unsupported schema
    /// versions and the like); `None` when all is well.
    fn server_warnings(&mut self) -> TrackResult<Option<String>>;

    /// The backend's current clock, used as the basis for changed-record
    /// enumeration.
    fn server_date(&mut self) -> TrackResult<NaiveDateTime>;

    /// Backoff hint while the backend is unreachable.
    fn offline_wait(&mut self) -> OfflineWait;

    /// Drains the pending replication-log message, if any. Must not touch
    /// the backend.
    fn take_message(&mut self) -> Option<OperatorMessage>;

    fn list_projects(&mut self) -> TrackResult<Vec<String>>;

    fn open_project(&mut self, name: &str) -> TrackResult<Self::Project>;
}

/// One project on the backend, with its cached catalog and active filter.
pub trait Project {
    type Record: Record;

    fn name(&self) -> &str;

    /// The project's field catalog with virtual fields synthesized. The
    /// returned catalog is the caller's copy; mutating it never corrupts
    /// the project's cache. Re-fetched only on explicit request, never
    /// silently.
    fn list_fields(&mut self) -> TrackResult<FieldCatalog>;

    /// Compiles and installs the segmentation filter. On compilation
    /// failure the previous filter stays in effect.
    fn set_segment_filters(&mut self, selections: &[FilterSelection]) -> TrackResult<()>;

    /// The engine's hint of which fields its mapping references; backends
    /// that can restrict fetches use it, others ignore it.
    fn set_referenced_fields(&mut self, fields: &[String]);

    /// Ids of records modified since the query's timestamp, restricted by
    /// the active segmentation filter.
    fn list_changed_records(&mut self, query: &ChangedQuery) -> TrackResult<Vec<String>>;

    fn get_record(&mut self, id: &str) -> TrackResult<Self::Record>;

    /// A record pending creation, if the backend allows creating records.
    fn new_record(&mut self) -> TrackResult<Self::Record>;
}

/// One defect record: a field map plus pending changes.
pub trait Record {
    fn id(&self) -> &str;

    /// Snapshot of all current field values (pending changes included).
    fn fields(&mut self) -> TrackResult<BTreeMap<String, String>>;

    fn get_field(&mut self, name: &str) -> TrackResult<Option<String>>;

    fn set_field(&mut self, name: &str, value: &str) -> TrackResult<()>;

    /// Persists pending changes and returns the record id — the
    /// backend-assigned one for creation flows. A clean record saves
    /// nothing and is not an error.
    fn save(&mut self) -> TrackResult<String>;
}
