//! Shared helpers for integration tests
//!
//! - [`TestDb`]: a temporary `SQLite` file seeded with the vendors / transactions /
//!   orders schema, removed on drop
//! - [`ScriptedChat`]: a chat-completion collaborator that always replies with the
//!   same text and counts its calls

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use insight::engine::sqlite::SqliteEngine;
use insight::generation::{ChatRequest, GenerationSettings};
use insight::{
    ChatCompletion, ConnectionConfig, DatabaseType, InsightError, Pipeline, QueryExecutor,
    SchemaProvider, SchemaSource, SqlGenerator,
};

pub const SEED: &str = "
    CREATE TABLE vendors (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        category TEXT,
        contact_email TEXT
    );
    CREATE TABLE transactions (
        id TEXT PRIMARY KEY,
        vendor_id TEXT REFERENCES vendors(id),
        amount REAL,
        description TEXT,
        date TEXT
    );
    CREATE TABLE orders (
        id TEXT PRIMARY KEY,
        vendor_id TEXT REFERENCES vendors(id),
        product_name TEXT,
        quantity INTEGER,
        unit_price REAL,
        total_amount REAL,
        order_date TEXT,
        status TEXT
    );
    INSERT INTO vendors VALUES
        ('v1', 'Acme Supplies', 'Office', 'sales@acme.test'),
        ('v2', 'Globex', 'Software', 'billing@globex.test'),
        ('v3', 'Initech', 'Consulting', NULL);
    INSERT INTO transactions VALUES
        ('t1', 'v1', 1000.0, 'Paper', datetime('now', '-3 days')),
        ('t2', 'v1', 234.5, 'Toner', datetime('now', '-40 days')),
        ('t3', 'v2', 11111.17, 'Licenses', datetime('now', '-100 days'));
    INSERT INTO orders VALUES
        ('o1', 'v1', 'Paper', 10, 100.0, 1000.0, datetime('now', '-3 days'), 'delivered'),
        ('o2', 'v2', 'License', 1, 11111.17, 11111.17, datetime('now', '-100 days'), 'pending');
";

/// Temporary seeded `SQLite` database
pub struct TestDb {
    path: PathBuf,
}

impl TestDb {
    /// Create a database seeded with [`SEED`]
    pub fn seeded() -> Self {
        Self::with_sql(SEED)
    }

    /// Create a database by running `sql`
    pub fn with_sql(sql: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir()
            .join(format!("insight_test_{}_{id}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let conn = rusqlite::Connection::open(&path).expect("Failed to create temp database");
        conn.execute_batch(sql).expect("Failed to seed database");

        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::sqlite(self.path.clone())
    }

    pub fn engine(&self) -> SqliteEngine {
        SqliteEngine::new(&self.config()).expect("valid sqlite config")
    }

    /// Run `sql` through a writable connection, bypassing the service
    pub fn query_count(&self, sql: &str) -> i64 {
        let conn = rusqlite::Connection::open(&self.path).expect("open");
        conn.query_row(sql, [], |row| row.get(0)).expect("count query")
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Collaborator replying with fixed text
#[derive(Clone)]
pub struct ScriptedChat {
    reply: String,
    calls: Arc<AtomicUsize>,
}

impl ScriptedChat {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChatCompletion for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> insight::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.user.is_empty() {
            return Err(InsightError::generation_failed("empty user message"));
        }
        Ok(self.reply.clone())
    }
}

pub fn sqlite_settings() -> GenerationSettings {
    GenerationSettings {
        dialect: DatabaseType::SQLite,
        ..GenerationSettings::default()
    }
}

/// Pipeline over `db` whose collaborator replies with `reply` (`None`: unconfigured)
pub fn pipeline(db: &TestDb, reply: Option<&ScriptedChat>) -> Pipeline<ScriptedChat, SqliteEngine> {
    pipeline_with_schema(db, reply, SchemaSource::Builtin)
}

pub fn pipeline_with_schema(
    db: &TestDb,
    reply: Option<&ScriptedChat>,
    source: SchemaSource,
) -> Pipeline<ScriptedChat, SqliteEngine> {
    Pipeline::new(
        SchemaProvider::new(source),
        SqlGenerator::new(reply.cloned(), sqlite_settings()),
        QueryExecutor::new(db.engine(), Duration::from_secs(5)),
    )
}
