//! `PostgreSQL` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `PostgreSQL` databases.
//!
//! # Features
//! - Connection from a URL or from discrete host/port/user/database parameters
//! - Schema introspection via `information_schema` (current schema only)
//! - Read-only statement execution with text-form results
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (native async driver, no TLS)
//! - Every statement runs inside a `READ ONLY` transaction that is rolled back
//! - Statements are prepared first: the extended protocol refuses multi-statement text
//! - Rows are fetched with the simple protocol so values arrive in server text form
//! - A fetch abandoned mid-flight (timeout or dropped request) sends a cancel request
//! - Errors never include connection parameters

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_postgres::{CancelToken, Client, Config, NoTls, SimpleQueryMessage};

use crate::engine::{
    ColumnInfo, ConnectionConfig, DatabaseEngine, DatabaseType, EngineConnection, ForeignKeyInfo,
    RowSet, TableInfo,
};
use crate::error::{InsightError, Result};

const DEFAULT_PORT: u16 = 5432;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `PostgreSQL` database engine implementation
#[derive(Debug, Clone)]
pub struct PostgresEngine {
    config: Config,
}

impl PostgresEngine {
    /// Validate connection parameters and build the engine
    ///
    /// # Errors
    /// Returns `InvalidConfig` for a malformed URL or missing parameters.
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != DatabaseType::Postgres {
            return Err(InsightError::invalid_config(format!(
                "Expected PostgreSQL engine, got {}",
                config.engine
            )));
        }

        Ok(Self {
            config: build_pg_config(config)?,
        })
    }
}

impl DatabaseEngine for PostgresEngine {
    type Connection = PostgresConnection;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self) -> Result<PostgresConnection> {
        let (client, connection) = self.config.connect(NoTls).await.map_err(|e| {
            InsightError::execution(format!("Failed to connect to PostgreSQL: {}", describe(&e)))
        })?;

        // The driver task ends once the client is dropped
        // Note: Connection errors are logged without parameters to prevent credential leakage
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %describe(&e), "postgres connection closed with error");
            }
        });

        Ok(PostgresConnection { client })
    }
}

/// A single `PostgreSQL` session
pub struct PostgresConnection {
    client: Client,
}

impl EngineConnection for PostgresConnection {
    async fn fetch_all(&mut self, sql: &str) -> Result<RowSet> {
        let cancel = CancelOnDrop::new(self.client.cancel_token());
        let fetched = self.fetch_read_only(sql).await;
        cancel.disarm();
        fetched
    }

    async fn introspect(&mut self) -> Result<Vec<TableInfo>> {
        let schema = current_schema(&self.client).await?;

        let rows = self
            .client
            .query(
                "SELECT table_name FROM information_schema.tables
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[&schema],
            )
            .await
            .map_err(|e| introspection_error("tables", &e))?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(0);
            tables.push(TableInfo {
                columns: introspect_columns(&self.client, &schema, &name).await?,
                primary_key: introspect_primary_key(&self.client, &schema, &name).await?,
                foreign_keys: introspect_foreign_keys(&self.client, &schema, &name).await?,
                name,
            });
        }

        Ok(tables)
    }
}

impl PostgresConnection {
    /// Run one statement inside a `READ ONLY` transaction that is always rolled back
    async fn fetch_read_only(&mut self, sql: &str) -> Result<RowSet> {
        let tx = self
            .client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(|e| {
                InsightError::execution(format!(
                    "Failed to start read-only transaction: {}",
                    describe(&e)
                ))
            })?;

        let statement = tx.prepare(sql).await.map_err(|e| InsightError::execution(describe(&e)))?;
        let columns: Vec<String> =
            statement.columns().iter().map(|c| c.name().to_string()).collect();

        let messages =
            tx.simple_query(sql).await.map_err(|e| InsightError::execution(describe(&e)))?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                if row.len() != columns.len() {
                    return Err(InsightError::execution(format!(
                        "Row has {} values but the result declares {} columns",
                        row.len(),
                        columns.len()
                    )));
                }
                rows.push((0..row.len()).map(|idx| row.get(idx).map(str::to_string)).collect());
            }
        }

        tx.rollback().await.map_err(|e| {
            InsightError::execution(format!(
                "Failed to end read-only transaction: {}",
                describe(&e)
            ))
        })?;

        Ok(RowSet { columns, rows })
    }
}

/// Cancels the running statement server-side unless disarmed
///
/// Dropping the client alone leaves the backend executing until it next writes to
/// the socket.
struct CancelOnDrop {
    token: Option<CancelToken>,
}

impl CancelOnDrop {
    fn new(token: CancelToken) -> Self {
        Self { token: Some(token) }
    }

    fn disarm(mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        handle.spawn(async move {
            if let Err(e) = token.cancel_query(NoTls).await {
                tracing::debug!(error = %describe(&e), "failed to cancel abandoned statement");
            } else {
                tracing::debug!("cancelled abandoned statement");
            }
        });
    }
}

/// Build `tokio_postgres::Config` from `ConnectionConfig`
fn build_pg_config(config: &ConnectionConfig) -> Result<Config> {
    let mut pg_config = if let Some(url) = &config.url {
        // Parse errors can echo the URL, so they are replaced wholesale
        url.parse::<Config>()
            .map_err(|_| InsightError::invalid_config("Invalid PostgreSQL connection URL"))?
    } else {
        let host = config
            .host
            .as_ref()
            .ok_or_else(|| InsightError::invalid_config("PostgreSQL requires 'host' parameter"))?;

        let user = config
            .user
            .as_ref()
            .ok_or_else(|| InsightError::invalid_config("PostgreSQL requires 'user' parameter"))?;

        let database = config.database.as_ref().ok_or_else(|| {
            InsightError::invalid_config("PostgreSQL requires 'database' parameter")
        })?;

        let mut pg_config = Config::new();
        pg_config
            .host(host)
            .port(config.port.unwrap_or(DEFAULT_PORT))
            .user(user)
            .dbname(database);

        if let Some(password) = &config.password {
            pg_config.password(password);
        }

        pg_config
    };

    pg_config.connect_timeout(CONNECT_TIMEOUT).application_name("insight");

    Ok(pg_config)
}

/// Database error message without the driver's wrapping
fn describe(e: &tokio_postgres::Error) -> String {
    e.as_db_error().map_or_else(|| e.to_string(), |db| db.message().to_string())
}

fn introspection_error(what: &str, e: &tokio_postgres::Error) -> InsightError {
    InsightError::internal(format!("Failed to introspect {what}: {}", describe(e)))
}

async fn current_schema(client: &Client) -> Result<String> {
    let row = client
        .query_one("SELECT current_schema()", &[])
        .await
        .map_err(|e| introspection_error("current schema", &e))?;

    let schema: Option<String> = row.get(0);
    Ok(schema.unwrap_or_else(|| "public".to_string()))
}

async fn introspect_columns(
    client: &Client,
    schema: &str,
    table_name: &str,
) -> Result<Vec<ColumnInfo>> {
    let query = "
        SELECT column_name, data_type, is_nullable
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position";

    let rows = client
        .query(query, &[&schema, &table_name])
        .await
        .map_err(|e| introspection_error(&format!("columns of {table_name}"), &e))?;

    Ok(rows
        .iter()
        .map(|row| {
            let is_nullable: String = row.get(2);
            ColumnInfo {
                name: row.get(0),
                data_type: row.get(1),
                nullable: is_nullable == "YES",
            }
        })
        .collect())
}

async fn introspect_primary_key(
    client: &Client,
    schema: &str,
    table_name: &str,
) -> Result<Option<Vec<String>>> {
    let query = "
        SELECT kcu.column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON tc.constraint_name = kcu.constraint_name
          AND tc.table_schema = kcu.table_schema
        WHERE tc.constraint_type = 'PRIMARY KEY'
          AND tc.table_schema = $1
          AND tc.table_name = $2
        ORDER BY kcu.ordinal_position";

    let rows = client
        .query(query, &[&schema, &table_name])
        .await
        .map_err(|e| introspection_error(&format!("primary key of {table_name}"), &e))?;

    if rows.is_empty() {
        return Ok(None);
    }

    Ok(Some(rows.iter().map(|row| row.get(0)).collect()))
}

async fn introspect_foreign_keys(
    client: &Client,
    schema: &str,
    table_name: &str,
) -> Result<Vec<ForeignKeyInfo>> {
    let query = "
        SELECT
            tc.constraint_name,
            kcu.column_name,
            ccu.table_name AS foreign_table_name,
            ccu.column_name AS foreign_column_name
        FROM information_schema.table_constraints AS tc
        JOIN information_schema.key_column_usage AS kcu
          ON tc.constraint_name = kcu.constraint_name
          AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage AS ccu
          ON ccu.constraint_name = tc.constraint_name
          AND ccu.table_schema = tc.table_schema
        WHERE tc.constraint_type = 'FOREIGN KEY'
          AND tc.table_schema = $1
          AND tc.table_name = $2
        ORDER BY tc.constraint_name, kcu.ordinal_position";

    let rows = client
        .query(query, &[&schema, &table_name])
        .await
        .map_err(|e| introspection_error(&format!("foreign keys of {table_name}"), &e))?;

    // Group by constraint name
    let mut by_constraint: BTreeMap<String, ForeignKeyInfo> = BTreeMap::new();

    for row in rows {
        let constraint_name: String = row.get(0);
        let entry = by_constraint.entry(constraint_name).or_insert_with(|| ForeignKeyInfo {
            columns: Vec::new(),
            referenced_table: row.get(2),
            referenced_columns: Vec::new(),
        });
        entry.columns.push(row.get(1));
        entry.referenced_columns.push(row.get(3));
    }

    Ok(by_constraint.into_values().collect())
}
