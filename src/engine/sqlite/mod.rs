//! `SQLite` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `SQLite` databases.
//!
//! # Features
//! - File-based connections (`/path/to/db.sqlite`)
//! - Schema introspection via `sqlite_master` and PRAGMA table functions
//! - Read-only statement execution with text-form results
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver) on `spawn_blocking` workers
//! - Databases are always opened with `SQLITE_OPEN_READ_ONLY`
//! - A call abandoned mid-flight interrupts its statement and frees the worker
//! - BLOB data is Base64-encoded for JSON safety
//! - No explicit schema support (`SQLite` uses catalogs)

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags, Row};

use crate::engine::{
    ColumnInfo, ConnectionConfig, DatabaseEngine, DatabaseType, EngineConnection, ForeignKeyInfo,
    RowSet, TableInfo,
};
use crate::error::{InsightError, Result};

/// Virtual machine steps between abandon checks
const PROGRESS_OPS: i32 = 1_000;

/// `SQLite` database engine implementation
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    path: PathBuf,
}

impl SqliteEngine {
    /// Validate the file parameter and build the engine
    ///
    /// The file is not opened until the first [`DatabaseEngine::connect`].
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != DatabaseType::SQLite {
            return Err(InsightError::invalid_config(format!(
                "Expected SQLite engine, got {}",
                config.engine
            )));
        }

        let path = config
            .file
            .clone()
            .ok_or_else(|| InsightError::invalid_config("SQLite requires 'file' parameter"))?;

        Ok(Self { path })
    }
}

impl DatabaseEngine for SqliteEngine {
    type Connection = SqliteConnection;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn connect(&self) -> Result<SqliteConnection> {
        let path = self.path.clone();
        let conn = run_blocking(move || open_connection(&path)).await?;
        Ok(SqliteConnection {
            interrupt: conn.get_interrupt_handle(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// A single read-only `SQLite` handle
///
/// The handle is shared with blocking workers only for the duration of one call.
pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
    interrupt: InterruptHandle,
}

impl SqliteConnection {
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let abandon = AbandonGuard::new(&self.interrupt);
        let abandoned = Arc::clone(&abandon.flag);

        let result = run_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| InsightError::internal("SQLite connection lock poisoned"))?;
            // The caller may have given up while this job waited for a worker
            if abandoned.load(Ordering::SeqCst) {
                return Err(InsightError::execution("SQLite call was abandoned"));
            }

            // Catches an abandon that lands before the statement starts stepping,
            // where `interrupt()` alone is a no-op
            guard.progress_handler(
                PROGRESS_OPS,
                Some(move || abandoned.load(Ordering::SeqCst)),
            );
            let out = f(&guard);
            guard.progress_handler(PROGRESS_OPS, None::<fn() -> bool>);
            out
        })
        .await;

        abandon.disarm();
        result
    }
}

/// Interrupts the in-flight blocking call if its future is dropped first
struct AbandonGuard<'a> {
    interrupt: Option<&'a InterruptHandle>,
    flag: Arc<AtomicBool>,
}

impl<'a> AbandonGuard<'a> {
    fn new(interrupt: &'a InterruptHandle) -> Self {
        Self {
            interrupt: Some(interrupt),
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    fn disarm(mut self) {
        self.interrupt = None;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if let Some(interrupt) = self.interrupt.take() {
            self.flag.store(true, Ordering::SeqCst);
            interrupt.interrupt();
            tracing::debug!("interrupted abandoned SQLite statement");
        }
    }
}

impl EngineConnection for SqliteConnection {
    async fn fetch_all(&mut self, sql: &str) -> Result<RowSet> {
        let sql = sql.to_string();
        self.with_conn(move |conn| fetch_rows(conn, &sql)).await
    }

    async fn introspect(&mut self) -> Result<Vec<TableInfo>> {
        self.with_conn(introspect_tables).await
    }
}

/// Run blocking driver work off the async runtime
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| InsightError::internal(format!("SQLite worker failed: {e}")))?
}

/// Open `SQLite` connection in read-only mode
fn open_connection(path: &std::path::Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| InsightError::execution(format!("Failed to open SQLite database: {e}")))
}

/// Execute a statement and collect every row as text
fn fetch_rows(conn: &Connection, sql: &str) -> Result<RowSet> {
    let mut stmt = conn.prepare(sql).map_err(|e| InsightError::execution(e.to_string()))?;

    let columns: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let width = columns.len();

    let mut result_rows = stmt.query([]).map_err(|e| InsightError::execution(e.to_string()))?;

    let mut rows = Vec::new();
    while let Some(row) = result_rows.next().map_err(|e| InsightError::execution(e.to_string()))? {
        let mut cells = Vec::with_capacity(width);
        for idx in 0..width {
            cells.push(
                sqlite_value_to_text(row, idx)
                    .map_err(|e| InsightError::execution(format!("Failed to read row: {e}")))?,
            );
        }
        rows.push(cells);
    }

    Ok(RowSet { columns, rows })
}

/// Convert `SQLite` value to its text form (`None` for NULL)
fn sqlite_value_to_text(
    row: &Row,
    idx: usize,
) -> std::result::Result<Option<String>, rusqlite::Error> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(s) => {
            let text = std::str::from_utf8(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Some(text.to_string())
        }
        // Encode BLOB as Base64 for JSON safety
        ValueRef::Blob(b) => Some(base64::engine::general_purpose::STANDARD.encode(b)),
    })
}

fn introspection_error(what: &str, e: &rusqlite::Error) -> InsightError {
    InsightError::internal(format!("Failed to introspect {what}: {e}"))
}

/// Read every user table (internal `sqlite_%` tables excluded)
fn introspect_tables(conn: &Connection) -> Result<Vec<TableInfo>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table'
             AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .map_err(|e| introspection_error("tables", &e))?;

    let table_names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(Iterator::collect)
        .map_err(|e| introspection_error("tables", &e))?;

    table_names.into_iter().map(|name| introspect_table(conn, name)).collect()
}

/// Introspect a single table
fn introspect_table(conn: &Connection, table_name: String) -> Result<TableInfo> {
    // pk column: >0 is the 1-based position within the primary key
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(|e| introspection_error(&format!("columns of {table_name}"), &e))?;

    let raw_columns: Vec<(ColumnInfo, i64)> = stmt
        .query_map([&table_name], |row| {
            Ok((
                ColumnInfo {
                    name: row.get::<_, String>(0)?,
                    data_type: row.get::<_, String>(1)?,
                    nullable: row.get::<_, i64>(2)? == 0,
                },
                row.get::<_, i64>(3)?,
            ))
        })
        .and_then(Iterator::collect)
        .map_err(|e| introspection_error(&format!("columns of {table_name}"), &e))?;

    let mut pk_columns: Vec<(i64, String)> = raw_columns
        .iter()
        .filter(|(_, pk)| *pk > 0)
        .map(|(column, pk)| (*pk, column.name.clone()))
        .collect();
    pk_columns.sort_unstable();

    let primary_key = if pk_columns.is_empty() {
        None
    } else {
        Some(pk_columns.into_iter().map(|(_, name)| name).collect())
    };

    let mut fk_stmt = conn
        .prepare(
            "SELECT id, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1) \
             ORDER BY id, seq",
        )
        .map_err(|e| introspection_error(&format!("foreign keys of {table_name}"), &e))?;

    let fk_rows: Vec<(i64, String, String, Option<String>)> = fk_stmt
        .query_map([&table_name], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(Iterator::collect)
        .map_err(|e| introspection_error(&format!("foreign keys of {table_name}"), &e))?;

    // Group foreign keys by constraint id
    let mut by_id: BTreeMap<i64, ForeignKeyInfo> = BTreeMap::new();
    for (id, referenced_table, from_col, to_col) in fk_rows {
        let entry = by_id.entry(id).or_insert_with(|| ForeignKeyInfo {
            columns: Vec::new(),
            referenced_table,
            referenced_columns: Vec::new(),
        });
        entry.columns.push(from_col);
        // "to" is NULL when the reference targets the parent's primary key implicitly
        entry.referenced_columns.push(to_col.unwrap_or_else(|| "rowid".to_string()));
    }

    Ok(TableInfo {
        name: table_name,
        columns: raw_columns.into_iter().map(|(column, _)| column).collect(),
        primary_key,
        foreign_keys: by_id.into_values().collect(),
    })
}
