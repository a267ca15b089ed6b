//! The REST-bridge connector: tracker, project, and record handles.
//!
//! Bridge-side handles (the tracker token from LOGIN, the project token
//! from GET_PROJECT) die with the connection. Project state therefore
//! remembers the session generation it bound against and re-binds — and
//! re-ships its segment filter and referenced-fields hint — after any
//! reconnect.

use crate::dialect::RestDialect;
use crate::session::BridgeSession;
use defectsync_bridge::client::{BridgeClient, BridgeEndpoint, Credentials, list_defects_args};
use defectsync_bridge::proto::{BridgeRequest, commands};
use defectsync_core::{
    ChangedQuery, ConnectParams, Connector, FieldVirtualizer, FilterSelection, MessageSlot,
    OfflineWait, OperatorMessage, Project, Record, RecordState, SegmentFilter, Session, WaitTime,
    compile_filter, retry_once, testing,
};
use defectsync_types::{
    AttributeSpec, FieldCatalog, TrackError, TrackResult,
};
use chrono::NaiveDateTime;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";
const MODULE_VERSION: &str = concat!("restbridge ", env!("CARGO_PKG_VERSION"));
const CANNED_SERVER_VERSION: &str = "RestTracker 2.0";

const ATTR_BRIDGE_ADDRESS: &str = "bridge_address";
const ATTR_DEFECT_BATCH: &str = "defect_batch";
const ATTR_ALLOW_CREATION: &str = "allow_creation";
const ATTR_WAIT_TIME: &str = "wait_time";

const DEFAULT_BRIDGE_ADDRESS: &str = "localhost:51666";
const DEFAULT_DEFECT_BATCH: u32 = 100;

/// The field name the engine uses to choose which projects to mirror; it
/// configures the helper and never compiles into a record predicate.
const PROJECT_PSEUDO_FIELD: &str = "*Project*";

#[derive(Debug)]
struct Inner {
    session: BridgeSession,
    message: MessageSlot,
    server_version: Option<String>,
    allow_creation: bool,
    defect_batch: u32,
}

enum Backing {
    Testing,
    Live(Rc<RefCell<Inner>>),
}

/// Connector for a REST issue tracker reached through the bridge.
pub struct RestTracker {
    backing: Backing,
}

impl Connector for RestTracker {
    type Project = RestProject;

    fn list_attributes() -> Vec<AttributeSpec> {
        vec![
            AttributeSpec::new(
                ATTR_BRIDGE_ADDRESS,
                "Bridge address",
                "host:port where the tracker bridge process listens. The \
                 bridge must be running before replication starts.",
            )
            .with_default(DEFAULT_BRIDGE_ADDRESS),
            AttributeSpec::new(
                ATTR_DEFECT_BATCH,
                "Issue batch size",
                "Upper bound on issues fetched per changed-issue query when \
                 the replication engine does not supply its own limit.",
            )
            .with_default("100"),
            AttributeSpec::new(
                ATTR_ALLOW_CREATION,
                "Allow issue creation",
                "Whether the replication engine may create new issues in \
                 the tracker. Specify either 'y' or 'n'.",
            )
            .with_default("n"),
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
            ATTR_BRIDGE_ADDRESS => BridgeEndpoint::parse(value)
                .err()
                .map(|_| "Bridge address: Must be host:port.".to_string()),
            ATTR_DEFECT_BATCH => {
                match value.parse::<u32>() {
                    Ok(n) if (1..=10_000).contains(&n) => None,
                    _ => Some("Issue batch size: Must be between 1 and 10000.".to_string()),
                }
            }
            ATTR_ALLOW_CREATION => match value {
                "y" | "n" => None,
                _ => Some("Allow issue creation: Must be either 'y' or 'n'.".to_string()),
            },
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

        let endpoint = BridgeEndpoint::parse(
            params
                .attributes
                .get_or(ATTR_BRIDGE_ADDRESS, DEFAULT_BRIDGE_ADDRESS),
        )?;
        let credentials = Credentials {
            url: params.server.clone(),
            user: params.user.clone(),
            password: params.password.clone(),
        };
        let wait = WaitTime::from_attributes(&params.attributes);
        let mut session = BridgeSession::new(BridgeClient::new(endpoint), credentials, wait);
        session.ensure_connected()?;
        info!(server = %params.server, "rest bridge connected");

        Ok(Self {
            backing: Backing::Live(Rc::new(RefCell::new(Inner {
                session,
                message: MessageSlot::new(),
                server_version: None,
                allow_creation: params.attributes.get_flag_or(ATTR_ALLOW_CREATION, false),
                defect_batch: params
                    .attributes
                    .get_int_or(ATTR_DEFECT_BATCH, i64::from(DEFAULT_DEFECT_BATCH))
                    as u32,
            }))),
        })
    }

    fn name(&self) -> &'static str {
        "REST Bridge"
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
        // The request is rebuilt inside the retry so a reconnect's fresh
        // tracker token is picked up.
        let reply = retry_once(&mut inner.session, |session| {
            let request = with_tracker_token(session, commands::GET_SERVER_VERSION)?;
            session.send(request)
        })?;
        let version = reply
            .first_string()
            .ok_or_else(|| TrackError::Data("server version request failed".into()))?
            .to_string();
        inner.server_version = Some(version.clone());
        Ok(version)
    }

    fn server_warnings(&mut self) -> TrackResult<Option<String>> {
        match &self.backing {
            Backing::Testing => Ok(Some(format!(
                "No warnings for {CANNED_SERVER_VERSION}"
            ))),
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
        let reply = retry_once(&mut inner.session, |session| {
            let request = with_tracker_token(session, commands::GET_SERVER_DATE)?;
            session.send(request)
        })?;
        let text = reply
            .first_string()
            .ok_or_else(|| TrackError::Data("server date request failed".into()))?;
        NaiveDateTime::parse_from_str(text, DATE_FORMAT)
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
        let mut inner = inner.borrow_mut();
        inner.session.ensure_connected()?;
        let reply = retry_once(&mut inner.session, |session| {
            let request = with_tracker_token(session, commands::LIST_PROJECTS)?;
            session.send(request)
        })?;
        Ok(reply.strings)
    }

    fn open_project(&mut self, name: &str) -> TrackResult<RestProject> {
        if name.is_empty() {
            return Err(TrackError::Query("Undefined project".into()));
        }
        let inner = match &self.backing {
            Backing::Testing => {
                testing::require_canned_project(name)?;
                return Ok(RestProject {
                    backing: ProjectBacking::Testing { name: name.to_string() },
                });
            }
            Backing::Live(inner) => Rc::clone(inner),
        };

        let known = self.list_projects()?;
        if !known.iter().any(|p| p == name) {
            return Err(TrackError::Query("Unknown project".into()));
        }

        let mut project = RestProject {
            backing: ProjectBacking::Live(LiveProject {
                inner,
                name: name.to_string(),
                proj_token: None,
                bound_generation: 0,
                catalog: None,
                filter: SegmentFilter::none(),
                filter_projects: name.to_string(),
                ref_fields: Vec::new(),
                sent_ref_fields: false,
            }),
        };
        // Bind eagerly so a bad project surfaces here, not on first use.
        if let ProjectBacking::Live(live) = &mut project.backing {
            live.ensure_bound()?;
        }
        Ok(project)
    }
}

/// Builds a per-server request carrying the session's tracker token.
fn with_tracker_token(session: &BridgeSession, command: &str) -> TrackResult<BridgeRequest> {
    let token = session
        .tracker_token()
        .ok_or_else(|| TrackError::severed("no tracker token; session not open"))?;
    Ok(BridgeRequest::new(command).arg("TRACKER", token))
}

#[derive(Debug)]
struct LiveProject {
    inner: Rc<RefCell<Inner>>,
    name: String,
    proj_token: Option<String>,
    bound_generation: u64,
    catalog: Option<FieldCatalog>,
    filter: SegmentFilter,
    filter_projects: String,
    ref_fields: Vec<String>,
    sent_ref_fields: bool,
}

#[derive(Debug)]
enum ProjectBacking {
    Testing { name: String },
    Live(LiveProject),
}

/// One tracker project bound through the bridge.
#[derive(Debug)]
pub struct RestProject {
    backing: ProjectBacking,
}

impl LiveProject {
    /// Ensures the session is open and this project is bound on the
    /// current connection. Re-binding re-ships the active segment filter;
    /// the referenced-fields hint is resent lazily before the next fetch.
    fn ensure_bound(&mut self) -> TrackResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.session.ensure_connected()?;
        let generation = inner.session.generation();
        if self.proj_token.is_some() && self.bound_generation == generation {
            return Ok(());
        }

        let request = with_tracker_token(&inner.session, commands::GET_PROJECT)?
            .arg("PROJECT", &self.name);
        let reply = inner.session.send(request)?;
        let token = reply
            .first_string()
            .ok_or_else(|| TrackError::Query("connect to project request failed".into()))?
            .to_string();
        debug!(project = %self.name, generation, "project bound");
        self.proj_token = Some(token);
        self.bound_generation = generation;
        self.sent_ref_fields = false;

        if !self.filter.is_empty() {
            let request = BridgeRequest::new(commands::SEGMENT_FILTERS)
                .arg("PROJID", self.proj_token.as_deref().unwrap_or_default())
                .arg("SEGMENT_FILTER", self.filter.as_str())
                .arg("PROJECT_LIST", &self.filter_projects);
            inner.session.send(request)?;
        }
        Ok(())
    }

    fn proj_token(&self) -> TrackResult<String> {
        self.proj_token
            .clone()
            .ok_or_else(|| TrackError::severed("project is not bound"))
    }

    /// Forwards the referenced-fields hint once per binding.
    fn forward_ref_fields(&mut self) -> TrackResult<()> {
        if self.ref_fields.is_empty() || self.sent_ref_fields {
            return Ok(());
        }
        let token = self.proj_token()?;
        let mut request = BridgeRequest::new(commands::REFERENCED_FIELDS).arg("PROJID", token);
        for (i, field) in self.ref_fields.iter().enumerate() {
            request = request.arg(format!("F{i}"), field);
        }
        let reply = self.inner.borrow_mut().session.send(request)?;
        if reply.first_string() != Some(commands::OK) {
            return Err(TrackError::Data("referenced fields request failed".into()));
        }
        self.sent_ref_fields = true;
        Ok(())
    }
}

impl Project for RestProject {
    type Record = RestRecord;

    fn name(&self) -> &str {
        match &self.backing {
            ProjectBacking::Testing { name } => name,
            ProjectBacking::Live(live) => &live.name,
        }
    }

    fn list_fields(&mut self) -> TrackResult<FieldCatalog> {
        let live = match &mut self.backing {
            ProjectBacking::Testing { .. } => return Ok(testing::canned_catalog()),
            ProjectBacking::Live(live) => live,
        };
        if let Some(catalog) = &live.catalog {
            return Ok(catalog.clone());
        }
        live.ensure_bound()?;
        let token = live.proj_token()?;
        let reply = live
            .inner
            .borrow_mut()
            .session
            .send(BridgeRequest::new(commands::LIST_FIELDS).arg("PROJID", token))?;
        if reply.descs.is_empty() {
            return Err(TrackError::Data("list fields request failed".into()));
        }
        // Composites are synthesized helper-side for this backend, so the
        // descriptors arrive ready to use.
        let catalog: FieldCatalog = reply.descs.into_iter().collect();
        live.catalog = Some(catalog.clone());
        Ok(catalog)
    }

    fn set_segment_filters(&mut self, selections: &[FilterSelection]) -> TrackResult<()> {
        let live = match &mut self.backing {
            ProjectBacking::Testing { .. } => return Ok(()),
            ProjectBacking::Live(live) => live,
        };

        // Compile before mutating anything: a failed compilation leaves
        // the previous filter in effect.
        let filter = compile_filter(&RestDialect, &FieldVirtualizer::new(), selections)?;

        let mut projects: Vec<String> = selections
            .iter()
            .filter(|s| s.field == PROJECT_PSEUDO_FIELD)
            .flat_map(|s| s.values.iter().cloned())
            .collect();
        if projects.is_empty() {
            projects.push(live.name.clone());
        }
        live.filter = filter;
        live.filter_projects = projects.join(",");

        live.ensure_bound()?;
        let request = BridgeRequest::new(commands::SEGMENT_FILTERS)
            .arg("PROJID", live.proj_token()?)
            .arg("SEGMENT_FILTER", live.filter.as_str())
            .arg("PROJECT_LIST", &live.filter_projects);
        live.inner.borrow_mut().session.send(request)?;

        live.inner.borrow_mut().message.set(OperatorMessage::info(format!(
            "Segment filter is: {} Project list is: {}",
            live.filter.as_str(),
            live.filter_projects
        )));
        Ok(())
    }

    fn set_referenced_fields(&mut self, fields: &[String]) {
        if let ProjectBacking::Live(live) = &mut self.backing {
            live.ref_fields = fields.to_vec();
            live.sent_ref_fields = false;
        }
    }

    fn list_changed_records(&mut self, query: &ChangedQuery) -> TrackResult<Vec<String>> {
        let live = match &mut self.backing {
            ProjectBacking::Testing { .. } => return Ok(testing::canned_changed_records()),
            ProjectBacking::Live(live) => live,
        };
        live.ensure_bound()?;
        let token = live.proj_token()?;
        let mut inner = live.inner.borrow_mut();
        let max = query.max_rows.or_else(|| Some(inner.defect_batch));
        let args = list_defects_args(
            &token,
            &query.mod_date_field,
            &query.since.format(DATE_FORMAT).to_string(),
            query.mod_by_field.as_deref(),
            query.exclude_user.as_deref(),
            max,
        );
        let reply = inner
            .session
            .send(BridgeRequest::new(commands::LIST_DEFECTS).with_args(args))?;
        Ok(reply.strings)
    }

    fn get_record(&mut self, id: &str) -> TrackResult<RestRecord> {
        let live = match &mut self.backing {
            ProjectBacking::Testing { .. } => {
                return Ok(RestRecord {
                    backing: RecordBacking::Testing(RecordState::existing(
                        testing::TEST_RECORD,
                        testing::canned_record_fields(),
                    )),
                });
            }
            ProjectBacking::Live(live) => live,
        };
        live.ensure_bound()?;
        live.forward_ref_fields()?;
        let token = live.proj_token()?;
        let reply = live.inner.borrow_mut().session.send(
            BridgeRequest::new(commands::GET_DEFECT)
                .arg("PROJID", &token)
                .arg("DEFECT", id),
        )?;
        if reply.fields.is_empty() {
            return Err(TrackError::Data("get defect request failed".into()));
        }
        let base: BTreeMap<String, String> = reply
            .fields
            .into_iter()
            .map(|f| (f.name, f.value))
            .collect();
        Ok(RestRecord {
            backing: RecordBacking::Live {
                inner: Rc::clone(&live.inner),
                proj_token: token,
                state: RecordState::existing(id, base),
            },
        })
    }

    fn new_record(&mut self) -> TrackResult<RestRecord> {
        let live = match &mut self.backing {
            ProjectBacking::Testing { .. } => {
                return Ok(RestRecord {
                    backing: RecordBacking::Testing(RecordState::created(
                        testing::canned_record_fields(),
                    )),
                });
            }
            ProjectBacking::Live(live) => live,
        };
        if !live.inner.borrow().allow_creation {
            return Err(TrackError::Query(
                "issue creation is disabled for this connector".into(),
            ));
        }
        live.ensure_bound()?;
        let token = live.proj_token()?;
        let reply = live
            .inner
            .borrow_mut()
            .session
            .send(BridgeRequest::new(commands::NEW_DEFECT).arg("PROJID", &token))?;
        if reply.fields.is_empty() {
            return Err(TrackError::Data("new defect request failed".into()));
        }
        let defaults: BTreeMap<String, String> = reply
            .fields
            .into_iter()
            .filter(|f| f.name != "DefectID")
            .map(|f| (f.name, f.value))
            .collect();
        Ok(RestRecord {
            backing: RecordBacking::Live {
                inner: Rc::clone(&live.inner),
                proj_token: token,
                state: RecordState::created(defaults),
            },
        })
    }
}

#[derive(Debug)]
enum RecordBacking {
    Testing(RecordState),
    Live {
        inner: Rc<RefCell<Inner>>,
        proj_token: String,
        state: RecordState,
    },
}

/// One tracker issue with pending changes.
#[derive(Debug)]
pub struct RestRecord {
    backing: RecordBacking,
}

impl Record for RestRecord {
    fn id(&self) -> &str {
        match &self.backing {
            RecordBacking::Testing(state) => state.id(),
            RecordBacking::Live { state, .. } => state.id(),
        }
    }

    fn fields(&mut self) -> TrackResult<BTreeMap<String, String>> {
        match &self.backing {
            RecordBacking::Testing(state) => Ok(state.fields()),
            RecordBacking::Live { state, .. } => Ok(state.fields()),
        }
    }

    fn get_field(&mut self, name: &str) -> TrackResult<Option<String>> {
        match &self.backing {
            RecordBacking::Testing(_) => testing::canned_get_field(name),
            RecordBacking::Live { state, .. } => Ok(state.get(name).map(str::to_string)),
        }
    }

    fn set_field(&mut self, name: &str, value: &str) -> TrackResult<()> {
        match &mut self.backing {
            RecordBacking::Testing(state) => {
                testing::canned_set_field(name)?;
                state.set(name, value);
                Ok(())
            }
            RecordBacking::Live { state, .. } => {
                state.set(name, value);
                Ok(())
            }
        }
    }

    fn save(&mut self) -> TrackResult<String> {
        let (inner, proj_token, state) = match &mut self.backing {
            RecordBacking::Testing(state) => {
                state.commit_save(Some(testing::TEST_RECORD.to_string()));
                return Ok(testing::TEST_RECORD.to_string());
            }
            RecordBacking::Live {
                inner,
                proj_token,
                state,
            } => (inner, proj_token, state),
        };
        if !state.is_dirty() {
            return Ok(state.id().to_string());
        }

        // Creation sends the full field set (helper-supplied defaults
        // included); updates send only the pending changes.
        let request = if state.is_new() {
            let mut request =
                BridgeRequest::new(commands::CREATE_DEFECT).arg("PROJID", proj_token.as_str());
            for (name, value) in state.fields() {
                request = request.arg(name, value);
            }
            request
        } else {
            let mut request = BridgeRequest::new(commands::SAVE_DEFECT)
                .arg("PROJID", proj_token.as_str())
                .arg("DEFECTID", state.id());
            for (name, value) in state.pending() {
                request = request.arg(name, value);
            }
            request
        };

        // Saves are not retried internally: a lost reply after a completed
        // create must not become a duplicate. The engine owns retry policy.
        let mut inner = inner.borrow_mut();
        inner.session.ensure_connected()?;
        let reply = inner.session.send(request)?;
        let id = reply
            .first_string()
            .ok_or_else(|| TrackError::Data("defect name not returned".into()))?
            .to_string();
        state.commit_save(Some(id.clone()));
        Ok(id)
    }
}
