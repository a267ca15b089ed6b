//! The job-store connector: tracker, project, and record handles.

use crate::dialect::TokenDialect;
use crate::jobspec::JobSpec;
use crate::transport::JobSource;
use defectsync_core::{
    ChangedQuery, ConnectParams, Connector, FieldVirtualizer, FilterSelection, MessageSlot,
    OfflineWait, OperatorMessage, Project, QueryDialect, Record, RecordState, SegmentFilter,
    Session, WaitTime, compile_filter, testing,
};
use defectsync_types::{AttributeSpec, FieldCatalog, TrackError, TrackResult};
use chrono::NaiveDateTime;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";
/// Dates inside queries use colons so the value stays one token.
const QUERY_DATE_FORMAT: &str = "%Y/%m/%d:%H:%M:%S";
const MODULE_VERSION: &str = concat!("jobstore ", env!("CARGO_PKG_VERSION"));
const CANNED_SERVER_VERSION: &str = "JobStoreTest 2024.1";
const PROJECT_NAME: &str = "Jobs";

const ATTR_WAIT_TIME: &str = "wait_time";

struct JobSession<S> {
    source: S,
    wait: WaitTime,
}

impl<S: JobSource> Session for JobSession<S> {
    fn is_connected(&mut self) -> bool {
        self.source.is_alive()
    }

    fn ensure_connected(&mut self) -> TrackResult<()> {
        if self.source.is_alive() {
            return Ok(());
        }
        debug!("job store reconnecting");
        self.source.connect()
    }

    fn offline_wait(&mut self) -> OfflineWait {
        if self.source.is_alive() {
            OfflineWait::Online
        } else {
            self.wait.offline_hint()
        }
    }
}

struct Inner<S> {
    session: JobSession<S>,
    message: MessageSlot,
    server_version: Option<String>,
    acting_user: String,
}

enum Backing<S> {
    Testing,
    Live(Rc<RefCell<Inner<S>>>),
}

/// Connector for a version-control job store.
pub struct JobTracker<S: JobSource> {
    backing: Backing<S>,
}

impl<S: JobSource> JobTracker<S> {
    /// Wraps an already-constructed source. Tests use this to inject a
    /// seeded store; [`Connector::connect`] builds the source from the
    /// parameters instead.
    pub fn with_source(mut source: S, params: &ConnectParams) -> TrackResult<Self> {
        source.connect()?;
        Ok(Self {
            backing: Backing::Live(Rc::new(RefCell::new(Inner {
                session: JobSession {
                    source,
                    wait: WaitTime::from_attributes(&params.attributes),
                },
                message: MessageSlot::new(),
                server_version: None,
                acting_user: params.user.clone(),
            }))),
        })
    }
}

impl<S: JobSource> Connector for JobTracker<S> {
    type Project = JobProject<S>;

    fn list_attributes() -> Vec<AttributeSpec> {
        vec![
            AttributeSpec::new(
                ATTR_WAIT_TIME,
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
            ATTR_WAIT_TIME => WaitTime::validate(Some(value)),
            _ => Some(format!("Unknown attribute: {name}")),
        }
    }

    fn connect(params: ConnectParams) -> TrackResult<Self> {
        if params.is_test_login() {
            return Ok(Self {
                backing: Backing::Testing,
            });
        }
        let source = S::open(&params)?;
        let tracker = Self::with_source(source, &params)?;
        info!(server = %params.server, "job store connected");
        Ok(tracker)
    }

    fn name(&self) -> &'static str {
        "JobStore"
    }

    fn module_version(&self) -> &'static str {
        MODULE_VERSION
    }

    fn server_version(&mut self) -> TrackResult<String> {
        let inner = match &self.backing {
            Backing::Testing => return Ok(CANNED_SERVER_VERSION.to_string()),
            Backing::Live(inner) => inner,
        };
        let mut inner = inner.borrow_mut();
        if let Some(version) = &inner.server_version {
            return Ok(version.clone());
        }
        inner.session.ensure_connected()?;
        let version = inner.session.source.server_info()?;
        inner.server_version = Some(version.clone());
        Ok(version)
    }

    fn server_warnings(&mut self) -> TrackResult<Option<String>> {
        match &self.backing {
            Backing::Testing => Ok(Some(format!("No warnings for {CANNED_SERVER_VERSION}"))),
            Backing::Live(_) => Ok(None),
        }
    }

    fn server_date(&mut self) -> TrackResult<NaiveDateTime> {
        let inner = match &self.backing {
            Backing::Testing => return Ok(testing::canned_server_date()),
            Backing::Live(inner) => inner,
        };
        let mut inner = inner.borrow_mut();
        inner.session.ensure_connected()?;
        let text = inner.session.source.server_date()?;
        NaiveDateTime::parse_from_str(&text, DATE_FORMAT)
            .map_err(|_| TrackError::Data(format!("unparseable server date '{text}'")))
    }

    fn offline_wait(&mut self) -> OfflineWait {
        match &self.backing {
            Backing::Testing => OfflineWait::Online,
            Backing::Live(inner) => inner.borrow_mut().session.offline_wait(),
        }
    }

    fn take_message(&mut self) -> Option<OperatorMessage> {
        match &self.backing {
            Backing::Testing => Some(OperatorMessage::info(testing::TEST_MESSAGE)),
            Backing::Live(inner) => inner.borrow_mut().message.take(),
        }
    }

    fn list_projects(&mut self) -> TrackResult<Vec<String>> {
        let inner = match &self.backing {
            Backing::Testing => return Ok(testing::canned_projects()),
            Backing::Live(inner) => inner,
        };
        inner.borrow_mut().session.ensure_connected()?;
        Ok(vec![PROJECT_NAME.to_string()])
    }

    fn open_project(&mut self, name: &str) -> TrackResult<JobProject<S>> {
        if name.is_empty() {
            return Err(TrackError::Query("Undefined project".into()));
        }
        let inner = match &self.backing {
            Backing::Testing => {
                testing::require_canned_project(name)?;
                return Ok(JobProject {
                    backing: JobProjectBacking::Testing { name: name.to_string() },
                });
            }
            Backing::Live(inner) => inner,
        };
        if name != PROJECT_NAME {
            return Err(TrackError::Query("Unknown project".into()));
        }
        Ok(JobProject {
            backing: JobProjectBacking::Live(LiveJobProject {
                inner: Rc::clone(inner),
                name: name.to_string(),
                spec: None,
                catalog: None,
                filter: SegmentFilter::none(),
            }),
        })
    }
}

struct LiveJobProject<S> {
    inner: Rc<RefCell<Inner<S>>>,
    name: String,
    spec: Option<Rc<JobSpec>>,
    catalog: Option<FieldCatalog>,
    filter: SegmentFilter,
}

impl<S: JobSource> LiveJobProject<S> {
    fn spec(&mut self) -> TrackResult<Rc<JobSpec>> {
        if let Some(spec) = &self.spec {
            return Ok(Rc::clone(spec));
        }
        let mut inner = self.inner.borrow_mut();
        inner.session.ensure_connected()?;
        let text = inner.session.source.job_spec()?;
        drop(inner);
        let spec = Rc::new(JobSpec::parse(&text)?);
        self.spec = Some(Rc::clone(&spec));
        Ok(spec)
    }
}

enum JobProjectBacking<S> {
    Testing { name: String },
    Live(LiveJobProject<S>),
}

/// The job store's single project.
pub struct JobProject<S: JobSource> {
    backing: JobProjectBacking<S>,
}

impl<S: JobSource> Project for JobProject<S> {
    type Record = JobRecord<S>;

    fn name(&self) -> &str {
        match &self.backing {
            JobProjectBacking::Testing { name } => name,
            JobProjectBacking::Live(live) => &live.name,
        }
    }

    fn list_fields(&mut self) -> TrackResult<FieldCatalog> {
        let live = match &mut self.backing {
            JobProjectBacking::Testing { .. } => return Ok(testing::canned_catalog()),
            JobProjectBacking::Live(live) => live,
        };
        if let Some(catalog) = &live.catalog {
            return Ok(catalog.clone());
        }
        let catalog = live.spec()?.to_catalog();
        live.catalog = Some(catalog.clone());
        Ok(catalog)
    }

    fn set_segment_filters(&mut self, selections: &[FilterSelection]) -> TrackResult<()> {
        let live = match &mut self.backing {
            JobProjectBacking::Testing { .. } => return Ok(()),
            JobProjectBacking::Live(live) => live,
        };
        // No composite fields in a job store; the virtualizer stays empty.
        let filter = compile_filter(&TokenDialect, &FieldVirtualizer::new(), selections)?;
        live.inner.borrow_mut().message.set(OperatorMessage::info(format!(
            "Segment filter is: {}",
            filter.as_str()
        )));
        live.filter = filter;
        Ok(())
    }

    fn set_referenced_fields(&mut self, _fields: &[String]) {
        // Jobs travel as whole forms; restricting the field set buys
        // nothing here.
    }

    fn list_changed_records(&mut self, query: &ChangedQuery) -> TrackResult<Vec<String>> {
        let live = match &mut self.backing {
            JobProjectBacking::Testing { .. } => return Ok(testing::canned_changed_records()),
            JobProjectBacking::Live(live) => live,
        };
        let spec = live.spec()?;
        let date_field = if spec.to_catalog().contains(&query.mod_date_field) {
            query.mod_date_field.clone()
        } else {
            spec.mod_date_field().unwrap_or("Date").to_string()
        };

        let mut terms = vec![format!(
            "{date_field}>={}",
            query.since.format(QUERY_DATE_FORMAT)
        )];
        if let (Some(mod_by), Some(user)) = (&query.mod_by_field, &query.exclude_user) {
            terms.push(format!("{mod_by}!={}", TokenDialect.escape(user)));
        }
        if !live.filter.is_empty() {
            terms.push(live.filter.as_str().to_string());
        }
        let token_query = terms.join(" ");
        debug!(query = %token_query, "changed-job query");

        let mut inner = live.inner.borrow_mut();
        inner.session.ensure_connected()?;
        inner.session.source.run_query(&token_query, query.max_rows)
    }

    fn get_record(&mut self, id: &str) -> TrackResult<JobRecord<S>> {
        let live = match &mut self.backing {
            JobProjectBacking::Testing { .. } => {
                return Ok(JobRecord {
                    backing: JobRecordBacking::Testing(RecordState::existing(
                        testing::TEST_RECORD,
                        testing::canned_record_fields(),
                    )),
                });
            }
            JobProjectBacking::Live(live) => live,
        };
        if id.starts_with('-') {
            return Err(TrackError::Query(format!("unsupported job id: {id}")));
        }
        let mut inner = live.inner.borrow_mut();
        inner.session.ensure_connected()?;
        let base = inner.session.source.fetch_job(id)?;
        Ok(JobRecord {
            backing: JobRecordBacking::Live {
                inner: Rc::clone(&live.inner),
                state: RecordState::existing(id, base),
            },
        })
    }

    fn new_record(&mut self) -> TrackResult<JobRecord<S>> {
        let live = match &mut self.backing {
            JobProjectBacking::Testing { .. } => {
                return Ok(JobRecord {
                    backing: JobRecordBacking::Testing(RecordState::created(
                        testing::canned_record_fields(),
                    )),
                });
            }
            JobProjectBacking::Live(live) => live,
        };
        let spec = live.spec()?;
        let mut inner = live.inner.borrow_mut();
        inner.session.ensure_connected()?;
        let now = inner.session.source.server_date()?;
        let defaults = spec.defaults(&inner.acting_user, &now);
        Ok(JobRecord {
            backing: JobRecordBacking::Live {
                inner: Rc::clone(&live.inner),
                state: RecordState::created(defaults),
            },
        })
    }
}

enum JobRecordBacking<S> {
    Testing(RecordState),
    Live {
        inner: Rc<RefCell<Inner<S>>>,
        state: RecordState,
    },
}

/// One job with pending changes.
pub struct JobRecord<S: JobSource> {
    backing: JobRecordBacking<S>,
}

impl<S: JobSource> Record for JobRecord<S> {
    fn id(&self) -> &str {
        match &self.backing {
            JobRecordBacking::Testing(state) => state.id(),
            JobRecordBacking::Live { state, .. } => state.id(),
        }
    }

    fn fields(&mut self) -> TrackResult<BTreeMap<String, String>> {
        match &self.backing {
            JobRecordBacking::Testing(state) => Ok(state.fields()),
            JobRecordBacking::Live { state, .. } => Ok(state.fields()),
        }
    }

    fn get_field(&mut self, name: &str) -> TrackResult<Option<String>> {
        match &self.backing {
            JobRecordBacking::Testing(_) => testing::canned_get_field(name),
            JobRecordBacking::Live { state, .. } => Ok(state.get(name).map(str::to_string)),
        }
    }

    fn set_field(&mut self, name: &str, value: &str) -> TrackResult<()> {
        match &mut self.backing {
            JobRecordBacking::Testing(state) => {
                testing::canned_set_field(name)?;
                state.set(name, value);
                Ok(())
            }
            JobRecordBacking::Live { state, .. } => {
                state.set(name, value);
                Ok(())
            }
        }
    }

    fn save(&mut self) -> TrackResult<String> {
        let (inner, state) = match &mut self.backing {
            JobRecordBacking::Testing(state) => {
                state.commit_save(Some(testing::TEST_RECORD.to_string()));
                return Ok(testing::TEST_RECORD.to_string());
            }
            JobRecordBacking::Live { inner, state } => (inner, state),
        };
        if !state.is_dirty() {
            return Ok(state.id().to_string());
        }
        let mut inner = inner.borrow_mut();
        inner.session.ensure_connected()?;
        // Creation sends the full form (presets included); updates send
        // only the pending changes.
        let id = if state.is_new() {
            inner.session.source.save_job(state.id(), &state.fields())?
        } else {
            inner.session.source.save_job(state.id(), state.pending())?
        };
        state.commit_save(Some(id.clone()));
        debug!(job = %id, "job saved");
        Ok(id)
    }
}
