//! Thin store façade over the embedded database connection.
//!
//! Owns the `rusqlite` connection with session semantics: lazily opened,
//! probed with a trivial query, discarded and reopened after failures.
//! Query helpers stringify every column so the layers above deal only in
//! field-name/value maps. Writes go through [`execute_checked`], which
//! turns row-count anomalies into data errors.
//!
//! [`execute_checked`]: SqlStore::execute_checked

use defectsync_types::{TrackError, TrackResult};
use rusqlite::types::Value;
use rusqlite::{Connection, ToSql};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug)]
pub struct SqlStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqlStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: None,
        }
    }

    /// Whether the connection is open and answering. Discards a connection
    /// that fails the probe.
    pub fn is_connected(&mut self) -> bool {
        let alive = match &self.conn {
            Some(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            None => false,
        };
        if !alive {
            self.conn = None;
        }
        alive
    }

    /// Opens the database if it is not already open.
    pub fn ensure_connected(&mut self) -> TrackResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let conn = Connection::open(&self.path).map_err(|err| {
            TrackError::severed(format!(
                "unable to open bug database {}: {err}",
                self.path.display()
            ))
        })?;
        conn.busy_timeout(std::time::Duration::from_secs(10))
            .map_err(|err| TrackError::severed(format!("busy timeout: {err}")))?;
        debug!(path = %self.path.display(), "bug database opened");
        self.conn = Some(conn);
        Ok(())
    }

    pub fn close(&mut self) {
        self.conn = None;
    }

    fn conn(&self) -> TrackResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| TrackError::severed("bug database is not open"))
    }

    /// Confirms the database accepts writes. A read-only file or mount is
    /// a configuration problem, reported before replication starts.
    pub fn writable_probe(&mut self) -> TrackResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;")
            .map_err(|err| {
                TrackError::Configuration(format!(
                    "Check privileges: bug database is not writable: {err}"
                ))
            })
    }

    /// First column of every row.
    pub fn single_col(&mut self, sql: &str, params: &[&dyn ToSql]) -> TrackResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|err| data_err("failed to prepare query", err))?;
        let mut rows = stmt
            .query(params)
            .map_err(|err| data_err("failed to retrieve data", err))?;
        let mut values = Vec::new();
        while let Some(row) = rows.next().map_err(|err| data_err("row fetch", err))? {
            let value: Value = row.get(0).map_err(|err| data_err("column read", err))?;
            values.push(stringify(value));
        }
        Ok(values)
    }

    /// First two columns of every row.
    pub fn two_cols(
        &mut self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> TrackResult<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|err| data_err("failed to prepare query", err))?;
        let mut rows = stmt
            .query(params)
            .map_err(|err| data_err("failed to retrieve data", err))?;
        let mut pairs = Vec::new();
        while let Some(row) = rows.next().map_err(|err| data_err("row fetch", err))? {
            let a: Value = row.get(0).map_err(|err| data_err("column read", err))?;
            let b: Value = row.get(1).map_err(|err| data_err("column read", err))?;
            pairs.push((stringify(a), stringify(b)));
        }
        Ok(pairs)
    }

    /// One row as (column name, stringified value) pairs, or `None` when
    /// the query matches nothing.
    pub fn single_row(
        &mut self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> TrackResult<Option<Vec<(String, String)>>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|err| data_err("failed to prepare query", err))?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let mut rows = stmt
            .query(params)
            .map_err(|err| data_err("failed to retrieve data", err))?;
        let Some(row) = rows.next().map_err(|err| data_err("row fetch", err))? else {
            return Ok(None);
        };
        let mut pairs = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let value: Value = row.get(i).map_err(|err| data_err("column read", err))?;
            pairs.push((name.clone(), stringify(value)));
        }
        Ok(Some(pairs))
    }

    /// All columns of every row, stringified.
    pub fn rows(&mut self, sql: &str, params: &[&dyn ToSql]) -> TrackResult<Vec<Vec<String>>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|err| data_err("failed to prepare query", err))?;
        let width = stmt.column_count();
        let mut rows = stmt
            .query(params)
            .map_err(|err| data_err("failed to retrieve data", err))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(|err| data_err("row fetch", err))? {
            let mut record = Vec::with_capacity(width);
            for i in 0..width {
                let value: Value = row.get(i).map_err(|err| data_err("column read", err))?;
                record.push(stringify(value));
            }
            result.push(record);
        }
        Ok(result)
    }

    /// One scalar result.
    pub fn scalar(&mut self, sql: &str) -> TrackResult<String> {
        let conn = self.conn()?;
        conn.query_row(sql, [], |row| row.get::<_, Value>(0))
            .map(stringify)
            .map_err(|err| data_err("failed to retrieve data", err))
    }

    /// Executes a write and verifies exactly one row was affected. Zero
    /// rows means the target vanished; more than one means the statement
    /// hit rows it must not touch. Either way the record stays usable and
    /// the engine decides whether to retry.
    pub fn execute_checked(
        &mut self,
        context: &str,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> TrackResult<()> {
        let conn = self.conn()?;
        let affected = conn
            .execute(sql, params)
            .map_err(|err| data_err(context, err))?;
        match affected {
            1 => Ok(()),
            0 => Err(TrackError::Data(format!("{context}: no rows updated"))),
            n => Err(TrackError::Data(format!("{context}: {n} rows updated"))),
        }
    }

    /// Column names of a table, in schema order, with their declared types.
    pub fn table_columns(&mut self, table: &str) -> TrackResult<Vec<(String, String)>> {
        // PRAGMA table_info columns: cid, name, type, notnull, dflt, pk.
        let sql = format!("PRAGMA table_info({table})");
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|err| data_err("failed to read schema", err))?;
        let mut rows = stmt
            .query([])
            .map_err(|err| data_err("failed to read schema", err))?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next().map_err(|err| data_err("schema fetch", err))? {
            let name: String = row.get(1).map_err(|err| data_err("schema read", err))?;
            let decl: String = row.get(2).map_err(|err| data_err("schema read", err))?;
            columns.push((name, decl));
        }
        Ok(columns)
    }
}

fn stringify(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(n) => n.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(_) => String::new(),
    }
}

fn data_err(context: &str, err: rusqlite::Error) -> TrackError {
    TrackError::Data(format!("{context}: {err}"))
}
