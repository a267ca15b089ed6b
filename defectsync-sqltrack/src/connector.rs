//! The SQL bug-database connector: tracker, project, and record handles.

use crate::catalog::{DESCRIPTION_FIELD, ProjectSchema, load_schema};
use crate::store::SqlStore;
use defectsync_core::{
    ChangedQuery, ConnectParams, Connector, FilterSelection, MessageSlot, OfflineWait,
    OperatorMessage, Project, QueryDialect, Record, RecordState, SegmentFilter, Session, WaitTime,
    compile_filter, testing,
};
use defectsync_types::{
    AttributeSpec, FieldCatalog, TrackError, TrackResult, looks_like_integer,
};
use chrono::NaiveDateTime;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MODULE_VERSION: &str = concat!("sqltrack ", env!("CARGO_PKG_VERSION"));
const CANNED_SERVER_VERSION: &str = "SqlTrackTest 3.0";
const SUPPORTED_SCHEMA_VERSION: &str = "3";

/// The single project a bug database exposes.
const PROJECT_NAME: &str = "Defects";

/// Marker value for a user id with no profile row; bugs predating the
/// profile table carry these.
const NOT_FOUND_USER: &str = "NotFound";

const DEFAULT_CLOSED_STATES: [&str; 3] = ["RESOLVED", "CLOSED", "VERIFIED"];
const DEFAULT_FIX_COLUMN: &str = "fix_notes";

const ATTR_TRACKER_USER: &str = "tracker_user";
const ATTR_FIX_FIELD: &str = "fix_field";
const ATTR_CLOSED_STATES: &str = "closed_states";
const ATTR_OFFSET: &str = "offset";
const ATTR_CHECK_PRIVS: &str = "check_privs";
const ATTR_WAIT_TIME: &str = "wait_time";

/// Store plus backoff config; the session surface over the embedded
/// database.
#[derive(Debug)]
struct SqlSession {
    store: SqlStore,
    wait: WaitTime,
}

impl Session for SqlSession {
    fn is_connected(&mut self) -> bool {
        self.store.is_connected()
    }

    fn ensure_connected(&mut self) -> TrackResult<()> {
        self.store.ensure_connected()
    }

    fn offline_wait(&mut self) -> OfflineWait {
        if self.is_connected() {
            OfflineWait::Online
        } else {
            self.wait.offline_hint()
        }
    }
}

#[derive(Debug)]
struct Inner {
    session: SqlSession,
    message: MessageSlot,
    server_version: Option<String>,
    offset: u32,
    closed_states: Vec<String>,
    fix_column: String,
    /// Profile id the connector writes comments as.
    acting_user: i64,
    /// userid → login name.
    profiles: BTreeMap<i64, String>,
}

#[derive(Debug)]
enum Backing {
    Testing,
    Live(Rc<RefCell<Inner>>),
}

/// Connector for a SQL-backed bug database.
#[derive(Debug)]
pub struct SqlTracker {
    backing: Backing,
}

impl Connector for SqlTracker {
    type Project = SqlProject;

    fn list_attributes() -> Vec<AttributeSpec> {
        vec![
            AttributeSpec::new(
                ATTR_TRACKER_USER,
                "Tracker username",
                "Set this if your tracker login name is different from the \
                 account used to open the bug database.",
            ),
            AttributeSpec::new(
                ATTR_FIX_FIELD,
                "Fixes custom field",
                "Bug database column that stores fix information. When in \
                 doubt, leave it be.",
            )
            .with_default(DEFAULT_FIX_COLUMN),
            AttributeSpec::new(
                ATTR_CLOSED_STATES,
                "Added closed states",
                "Site specific 'closed' status values beyond the standard \
                 CLOSED, RESOLVED, and VERIFIED. List the additional values \
                 separated by commas without spaces, matching the case \
                 defined in the bug database.",
            )
            .with_default(""),
            AttributeSpec::new(
                ATTR_OFFSET,
                "Change offset",
                "Overlap in seconds applied to the server clock when \
                 requesting changed defects. Too small and defects are \
                 missed; too large and the same defects are processed \
                 repeatedly. Valid range is 0 to 7200.",
            )
            .with_default("0"),
            AttributeSpec::new(
                ATTR_CHECK_PRIVS,
                "Check privileges",
                "Check database access rights before connecting. Specify \
                 either 'y' or 'n'.",
            )
            .with_default("y"),
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
            ATTR_TRACKER_USER | ATTR_FIX_FIELD => None,
            ATTR_CLOSED_STATES => value
                .contains(' ')
                .then(|| "Closed states: Must not contain spaces.".to_string()),
            ATTR_OFFSET => {
                if !looks_like_integer(value) {
                    Some("Change offset: Must be a number.".to_string())
                } else {
                    match value.parse::<i64>() {
                        Ok(n) if (0..=7200).contains(&n) => None,
                        _ => Some("Change offset: Must be between 0 and 7200.".to_string()),
                    }
                }
            }
            ATTR_CHECK_PRIVS => match value {
                "y" | "n" => None,
                _ => Some("Check privileges: Must be either 'y' or 'n'.".to_string()),
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

        let mut store = SqlStore::new(&params.server);
        store.ensure_connected()?;
        if params.attributes.get_flag_or(ATTR_CHECK_PRIVS, true) {
            store.writable_probe()?;
        }

        let profiles: BTreeMap<i64, String> = store
            .two_cols("SELECT userid, login_name FROM profiles", &[])?
            .into_iter()
            .filter_map(|(id, login)| id.parse().ok().map(|id| (id, login)))
            .collect();

        let wanted = match params.attributes.get(ATTR_TRACKER_USER) {
            Some(user) if !user.is_empty() => user,
            _ => params.user.as_str(),
        };
        let acting_user = profiles
            .iter()
            .find(|(_, login)| login.as_str() == wanted)
            .map(|(id, _)| *id)
            .ok_or_else(|| {
                TrackError::Configuration(format!(
                    "failed to find the tracker user account '{wanted}'; \
                     try the \"Tracker username\" attribute"
                ))
            })?;

        let mut closed_states: Vec<String> =
            DEFAULT_CLOSED_STATES.iter().map(|s| s.to_string()).collect();
        if let Some(extra) = params.attributes.get(ATTR_CLOSED_STATES) {
            closed_states.extend(
                extra
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }

        let offset = params.attributes.get_int_or(ATTR_OFFSET, 0).clamp(0, 7200) as u32;
        info!(database = %params.server, acting_user, "bug database connected");

        Ok(Self {
            backing: Backing::Live(Rc::new(RefCell::new(Inner {
                session: SqlSession {
                    store,
                    wait: WaitTime::from_attributes(&params.attributes),
                },
                message: MessageSlot::new(),
                server_version: None,
                offset,
                closed_states,
                fix_column: params
                    .attributes
                    .get_or(ATTR_FIX_FIELD, DEFAULT_FIX_COLUMN)
                    .to_string(),
                acting_user,
                profiles,
            }))),
        })
    }

    fn name(&self) -> &'static str {
        "SQLTrack"
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
        let schema = inner
            .session
            .store
            .scalar("SELECT value FROM meta WHERE key = 'schema_version'")?;
        let engine = inner.session.store.scalar("SELECT sqlite_version()")?;
        let version = format!("Schema:{schema}:SQLite:{engine}");
        inner.server_version = Some(version.clone());
        Ok(version)
    }

    fn server_warnings(&mut self) -> TrackResult<Option<String>> {
        let inner = match &self.backing {
            Backing::Testing => {
                return Ok(Some(format!("No warnings for {CANNED_SERVER_VERSION}")));
            }
            Backing::Live(inner) => inner,
        };
        let mut inner = inner.borrow_mut();
        inner.session.ensure_connected()?;
        let schema = inner
            .session
            .store
            .scalar("SELECT value FROM meta WHERE key = 'schema_version'")?;
        if schema == SUPPORTED_SCHEMA_VERSION {
            Ok(None)
        } else {
            Ok(Some(format!(
                "bug database schema version {schema} is unsupported; \
                 expected {SUPPORTED_SCHEMA_VERSION}"
            )))
        }
    }

    fn server_date(&mut self) -> TrackResult<NaiveDateTime> {
        let inner = match &self.backing {
            Backing::Testing => return Ok(testing::canned_server_date()),
            Backing::Live(inner) => inner,
        };
        let mut inner = inner.borrow_mut();
        inner.session.ensure_connected()?;
        // The overlap offset shifts the reported clock backwards so the
        // next changed-defect query re-covers the tail of the last cycle.
        let sql = format!("SELECT datetime('now', '-{} seconds')", inner.offset);
        let text = inner.session.store.scalar(&sql)?;
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

    fn open_project(&mut self, name: &str) -> TrackResult<SqlProject> {
        if name.is_empty() {
            return Err(TrackError::Query("Undefined project".into()));
        }
        let inner = match &self.backing {
            Backing::Testing => {
                testing::require_canned_project(name)?;
                return Ok(SqlProject {
                    backing: SqlProjectBacking::Testing { name: name.to_string() },
                });
            }
            Backing::Live(inner) => inner,
        };
        if name != PROJECT_NAME {
            return Err(TrackError::Query("Unknown project".into()));
        }
        Ok(SqlProject {
            backing: SqlProjectBacking::Live(LiveSqlProject {
                inner: Rc::clone(inner),
                name: name.to_string(),
                schema: None,
                filter: SegmentFilter::none(),
            }),
        })
    }
}

#[derive(Debug)]
struct LiveSqlProject {
    inner: Rc<RefCell<Inner>>,
    name: String,
    schema: Option<Rc<ProjectSchema>>,
    filter: SegmentFilter,
}

impl LiveSqlProject {
    /// Loads and caches the project schema on first use.
    fn schema(&mut self) -> TrackResult<Rc<ProjectSchema>> {
        if let Some(schema) = &self.schema {
            return Ok(Rc::clone(schema));
        }
        let mut inner = self.inner.borrow_mut();
        inner.session.ensure_connected()?;
        let closed_states = inner.closed_states.clone();
        let fix_column = inner.fix_column.clone();
        let schema = Rc::new(load_schema(
            &mut inner.session.store,
            &closed_states,
            &fix_column,
        )?);
        drop(inner);
        self.schema = Some(Rc::clone(&schema));
        Ok(schema)
    }
}

#[derive(Debug)]
enum SqlProjectBacking {
    Testing { name: String },
    Live(LiveSqlProject),
}

/// The bug database's single project.
#[derive(Debug)]
pub struct SqlProject {
    backing: SqlProjectBacking,
}

impl Project for SqlProject {
    type Record = SqlRecord;

    fn name(&self) -> &str {
        match &self.backing {
            SqlProjectBacking::Testing { name } => name,
            SqlProjectBacking::Live(live) => &live.name,
        }
    }

    fn list_fields(&mut self) -> TrackResult<FieldCatalog> {
        let live = match &mut self.backing {
            SqlProjectBacking::Testing { .. } => return Ok(testing::canned_catalog()),
            SqlProjectBacking::Live(live) => live,
        };
        Ok(live.schema()?.synthesized.clone())
    }

    fn set_segment_filters(&mut self, selections: &[FilterSelection]) -> TrackResult<()> {
        let live = match &mut self.backing {
            SqlProjectBacking::Testing { .. } => return Ok(()),
            SqlProjectBacking::Live(live) => live,
        };
        let schema = live.schema()?;
        // A failed compilation leaves the previous filter in effect.
        let filter = compile_filter(&schema.dialect, &schema.virtualizer, selections)?;
        live.inner.borrow_mut().message.set(OperatorMessage::info(format!(
            "Segment filter is: {}",
            filter.as_str()
        )));
        live.filter = filter;
        Ok(())
    }

    fn set_referenced_fields(&mut self, _fields: &[String]) {
        // Whole rows are fetched in one query; restricting the field set
        // buys nothing here.
    }

    fn list_changed_records(&mut self, query: &ChangedQuery) -> TrackResult<Vec<String>> {
        let live = match &mut self.backing {
            SqlProjectBacking::Testing { .. } => return Ok(testing::canned_changed_records()),
            SqlProjectBacking::Live(live) => live,
        };
        let schema = live.schema()?;
        let mut inner = live.inner.borrow_mut();
        inner.session.ensure_connected()?;

        let date_column = if schema.raw.contains(&query.mod_date_field) {
            schema.column(&query.mod_date_field)
        } else {
            "delta_ts"
        };
        let since = query.since.format(DATE_FORMAT).to_string();
        let mut sql = format!(
            "SELECT defect_id FROM defects WHERE \"{date_column}\" >= '{}'",
            schema.dialect.escape(&since)
        );
        if let (Some(mod_by), Some(user)) = (&query.mod_by_field, &query.exclude_user) {
            // Backends without a mod-by column simply skip the exclusion.
            if schema.raw.contains(mod_by) {
                sql.push_str(&format!(
                    " AND \"{}\" <> '{}'",
                    schema.column(mod_by),
                    schema.dialect.escape(user)
                ));
            }
        }
        if !live.filter.is_empty() {
            sql.push_str(" AND ");
            sql.push_str(live.filter.as_str());
        }
        sql.push_str(" ORDER BY defect_id");
        if let Some(max) = query.max_rows {
            sql.push_str(&format!(" LIMIT {max}"));
        }
        debug!(%sql, "changed-defect query");
        inner.session.store.single_col(&sql, &[])
    }

    fn get_record(&mut self, id: &str) -> TrackResult<SqlRecord> {
        let live = match &mut self.backing {
            SqlProjectBacking::Testing { .. } => {
                return Ok(SqlRecord {
                    backing: SqlRecordBacking::Testing(RecordState::existing(
                        testing::TEST_RECORD,
                        testing::canned_record_fields(),
                    )),
                });
            }
            SqlProjectBacking::Live(live) => live,
        };
        let defect_id: i64 = id
            .parse()
            .map_err(|_| TrackError::Query(format!("unsupported defect id: {id}")))?;
        let schema = live.schema()?;
        let mut inner = live.inner.borrow_mut();
        inner.session.ensure_connected()?;

        let row = inner
            .session
            .store
            .single_row("SELECT * FROM defects WHERE defect_id = ?1", &[&defect_id])?
            .ok_or_else(|| TrackError::Data(format!("defect not found: {id}")))?;

        let mut base = BTreeMap::new();
        for (column, value) in row {
            let label = schema.label(&column).to_string();
            let value = match column.as_str() {
                "assigned_to" | "reporter" if !value.is_empty() => {
                    resolve_user(&inner.profiles, &value)
                }
                _ => value,
            };
            base.insert(label, value);
        }
        base.insert(
            DESCRIPTION_FIELD.to_string(),
            assemble_description(&mut inner, defect_id)?,
        );

        Ok(SqlRecord {
            backing: SqlRecordBacking::Live {
                inner: Rc::clone(&live.inner),
                schema,
                state: RecordState::existing(id, base),
            },
        })
    }

    fn new_record(&mut self) -> TrackResult<SqlRecord> {
        Err(TrackError::Query(
            "the SQLTrack connector does not support creating new defects".into(),
        ))
    }
}

fn resolve_user(profiles: &BTreeMap<i64, String>, id: &str) -> String {
    id.parse::<i64>()
        .ok()
        .and_then(|id| profiles.get(&id).cloned())
        .unwrap_or_else(|| NOT_FOUND_USER.to_string())
}

/// Concatenates the defect's comments oldest-first, each annotated with
/// its author and timestamp.
fn assemble_description(inner: &mut Inner, defect_id: i64) -> TrackResult<String> {
    let comments = inner.session.store.rows(
        "SELECT who, posted_at, body FROM comments WHERE defect_id = ?1 \
         ORDER BY posted_at, id",
        &[&defect_id],
    )?;
    let mut description = String::new();
    for (n, comment) in comments.iter().enumerate() {
        let [who, posted_at, body] = comment.as_slice() else {
            continue;
        };
        let author = resolve_user(&inner.profiles, who);
        description.push_str(body);
        description.push_str(&format!("\n--- Comment {n}: From {author} at {posted_at}\n\n"));
    }
    Ok(description)
}

#[derive(Debug)]
enum SqlRecordBacking {
    Testing(RecordState),
    Live {
        inner: Rc<RefCell<Inner>>,
        schema: Rc<ProjectSchema>,
        state: RecordState,
    },
}

/// One defect with pending changes.
#[derive(Debug)]
pub struct SqlRecord {
    backing: SqlRecordBacking,
}

impl Record for SqlRecord {
    fn id(&self) -> &str {
        match &self.backing {
            SqlRecordBacking::Testing(state) => state.id(),
            SqlRecordBacking::Live { state, .. } => state.id(),
        }
    }

    fn fields(&mut self) -> TrackResult<BTreeMap<String, String>> {
        match &self.backing {
            SqlRecordBacking::Testing(state) => Ok(state.fields()),
            SqlRecordBacking::Live { state, .. } => Ok(state.fields()),
        }
    }

    fn get_field(&mut self, name: &str) -> TrackResult<Option<String>> {
        let (schema, state) = match &self.backing {
            SqlRecordBacking::Testing(_) => return testing::canned_get_field(name),
            SqlRecordBacking::Live { schema, state, .. } => (schema, state),
        };
        if name == schema.fix_label {
            // Fix fields are write-only targets of fix details; the field
            // contract requires reads to fail with that explanation.
            return Err(TrackError::Query(format!(
                "'{name}' may only be the mapping target of fix details"
            )));
        }
        if let Some(spec) = schema.virtualizer.find(name) {
            return Ok(spec.compose_current(|component| state.get(component)));
        }
        Ok(state.get(name).map(str::to_string))
    }

    fn set_field(&mut self, name: &str, value: &str) -> TrackResult<()> {
        let (schema, state) = match &mut self.backing {
            SqlRecordBacking::Testing(state) => {
                testing::canned_set_field(name)?;
                state.set(name, value);
                return Ok(());
            }
            SqlRecordBacking::Live { schema, state, .. } => (schema, state),
        };
        if let Some(spec) = schema.virtualizer.find(name) {
            for (component, component_value) in spec.split(value) {
                state.set(component, component_value);
            }
            return Ok(());
        }
        state.set(name, value);
        Ok(())
    }

    fn save(&mut self) -> TrackResult<String> {
        let (inner, schema, state) = match &mut self.backing {
            SqlRecordBacking::Testing(state) => {
                state.commit_save(Some(testing::TEST_RECORD.to_string()));
                return Ok(testing::TEST_RECORD.to_string());
            }
            SqlRecordBacking::Live {
                inner,
                schema,
                state,
            } => (inner, schema, state),
        };
        if !state.is_dirty() {
            return Ok(state.id().to_string());
        }
        let defect_id: i64 = state
            .id()
            .parse()
            .map_err(|_| TrackError::Query(format!("unsupported defect id: {}", state.id())))?;

        // Partition the overlay: the fix field appends, everything else
        // updates its column. Reject writes the catalog forbids before
        // touching the database.
        let mut updates: Vec<(String, String)> = Vec::new();
        let mut fix_text: Option<String> = None;
        for (label, value) in state.pending() {
            if *label == schema.fix_label {
                fix_text = Some(value.clone());
                continue;
            }
            match schema.raw.get(label) {
                None => {
                    return Err(TrackError::Query(format!("no such field: {label}")));
                }
                Some(descriptor) if !descriptor.is_writable() => {
                    return Err(TrackError::Query(format!("field '{label}' is read-only")));
                }
                Some(_) => {
                    updates.push((schema.column(label).to_string(), value.clone()));
                }
            }
        }

        let mut inner = inner.borrow_mut();
        inner.session.ensure_connected()?;

        if !updates.is_empty() {
            let mut sets: Vec<String> = Vec::with_capacity(updates.len() + 1);
            let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(updates.len() + 1);
            for (i, (column, value)) in updates.iter().enumerate() {
                sets.push(format!("\"{column}\" = ?{}", i + 1));
                params.push(value);
            }
            sets.push("\"delta_ts\" = datetime('now')".to_string());
            let sql = format!(
                "UPDATE defects SET {} WHERE defect_id = ?{}",
                sets.join(", "),
                updates.len() + 1
            );
            params.push(&defect_id);
            inner
                .session
                .store
                .execute_checked("save defect", &sql, &params)?;
        }

        if let Some(fix) = fix_text {
            // A fix may be applied with no other updates; the comment
            // insert alone does not bump the modified stamp, so do both.
            let fix = fix.strip_prefix('\n').unwrap_or(&fix).to_string();
            let acting_user = inner.acting_user;
            inner.session.store.execute_checked(
                "append fix",
                "INSERT INTO comments (defect_id, who, posted_at, body) \
                 VALUES (?1, ?2, datetime('now'), ?3)",
                &[&defect_id, &acting_user, &fix],
            )?;
            let fix_column = inner.fix_column.clone();
            inner.session.store.execute_checked(
                "append fix",
                &format!(
                    "UPDATE defects SET \"{fix_column}\" = CASE \
                     WHEN \"{fix_column}\" = '' THEN ?2 \
                     ELSE \"{fix_column}\" || char(10) || ?2 END, \
                     \"delta_ts\" = datetime('now') WHERE defect_id = ?1"
                ),
                &[&defect_id, &fix],
            )?;
        }

        let id = state.id().to_string();
        state.commit_save(None);
        debug!(defect = %id, "defect saved");
        Ok(id)
    }
}
