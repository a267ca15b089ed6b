//! Schema and seed data for an on-disk bug database.
//!
//! Used by this crate's tests and by anyone who needs a disposable bug
//! database with the shape the connector expects.

use defectsync_types::TrackResult;
use rusqlite::Connection;
use std::path::Path;

/// The schema the connector expects.
pub const SCHEMA: &str = r#"
CREATE TABLE meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE profiles (
    userid     INTEGER PRIMARY KEY,
    login_name TEXT NOT NULL UNIQUE
);
CREATE TABLE products (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE components (
    id         INTEGER PRIMARY KEY,
    name       TEXT NOT NULL,
    product_id INTEGER NOT NULL REFERENCES products(id)
);
CREATE TABLE status_values     (value TEXT NOT NULL UNIQUE, sortkey INTEGER);
CREATE TABLE resolution_values (value TEXT NOT NULL UNIQUE, sortkey INTEGER);
CREATE TABLE severity_values   (value TEXT NOT NULL UNIQUE, sortkey INTEGER);
CREATE TABLE priority_values   (value TEXT NOT NULL UNIQUE, sortkey INTEGER);
CREATE TABLE defects (
    defect_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    status      TEXT NOT NULL,
    resolution  TEXT NOT NULL DEFAULT '',
    product     TEXT NOT NULL,
    component   TEXT NOT NULL,
    severity    TEXT NOT NULL,
    priority    TEXT NOT NULL,
    summary     TEXT NOT NULL,
    assigned_to INTEGER REFERENCES profiles(userid),
    reporter    INTEGER REFERENCES profiles(userid),
    fix_notes   TEXT NOT NULL DEFAULT '',
    created_ts  TEXT NOT NULL,
    delta_ts    TEXT NOT NULL
);
CREATE TABLE comments (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    defect_id INTEGER NOT NULL REFERENCES defects(defect_id),
    who       INTEGER REFERENCES profiles(userid),
    posted_at TEXT NOT NULL,
    body      TEXT NOT NULL
);
CREATE TABLE field_defs (
    column_name TEXT PRIMARY KEY,
    label       TEXT NOT NULL
);
"#;

const SEED: &str = r#"
INSERT INTO meta VALUES ('schema_version', '3');

INSERT INTO field_defs VALUES
    ('defect_id',   'DefectID'),
    ('status',      'Status'),
    ('resolution',  'Resolution'),
    ('product',     'Product'),
    ('component',   'Component'),
    ('severity',    'Severity'),
    ('priority',    'Priority'),
    ('summary',     'Summary'),
    ('assigned_to', 'AssignedTo'),
    ('reporter',    'ReportedBy'),
    ('fix_notes',   'Fixes'),
    ('created_ts',  'Created'),
    ('delta_ts',    'Modified');

INSERT INTO status_values VALUES
    ('NEW', 1), ('ASSIGNED', 2), ('RESOLVED', 3), ('VERIFIED', 4), ('CLOSED', 5);
INSERT INTO resolution_values VALUES
    ('FIXED', 1), ('INVALID', 2), ('WONTFIX', 3), ('DUPLICATE', 4);
INSERT INTO severity_values VALUES
    ('blocker', 1), ('critical', 2), ('normal', 3), ('trivial', 4);
INSERT INTO priority_values VALUES
    ('P1', 1), ('P2', 2), ('P3', 3);

INSERT INTO profiles VALUES (1, 'alice'), (2, 'bob'), (3, 'replicator');

INSERT INTO products VALUES (1, 'Core'), (2, 'Docs');
INSERT INTO components VALUES
    (1, 'Engine', 1), (2, 'Parser', 1), (3, 'Manual', 2);
"#;

/// Creates the schema and reference data at `path`.
pub fn create_database(path: &Path) -> TrackResult<()> {
    let conn = open(path)?;
    conn.execute_batch(SCHEMA)
        .and_then(|()| conn.execute_batch(SEED))
        .map_err(|err| {
            defectsync_types::TrackError::Configuration(format!(
                "unable to create bug database: {err}"
            ))
        })
}

/// Inserts a defect and returns its assigned id.
pub fn insert_defect(
    path: &Path,
    summary: &str,
    status: &str,
    resolution: &str,
    delta_ts: &str,
) -> TrackResult<String> {
    let conn = open(path)?;
    conn.execute(
        "INSERT INTO defects (status, resolution, product, component, severity, \
         priority, summary, assigned_to, reporter, created_ts, delta_ts) \
         VALUES (?1, ?2, 'Core', 'Engine', 'normal', 'P2', ?3, 1, 2, ?4, ?4)",
        rusqlite::params![status, resolution, summary, delta_ts],
    )
    .map_err(|err| {
        defectsync_types::TrackError::Data(format!("unable to seed defect: {err}"))
    })?;
    Ok(conn.last_insert_rowid().to_string())
}

/// Adds a comment row to a defect.
pub fn insert_comment(
    path: &Path,
    defect_id: &str,
    who: i64,
    posted_at: &str,
    body: &str,
) -> TrackResult<()> {
    let conn = open(path)?;
    conn.execute(
        "INSERT INTO comments (defect_id, who, posted_at, body) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![defect_id, who, posted_at, body],
    )
    .map(|_| ())
    .map_err(|err| {
        defectsync_types::TrackError::Data(format!("unable to seed comment: {err}"))
    })
}

fn open(path: &Path) -> TrackResult<Connection> {
    Connection::open(path).map_err(|err| {
        defectsync_types::TrackError::Configuration(format!(
            "unable to open bug database {}: {err}",
            path.display()
        ))
    })
}
