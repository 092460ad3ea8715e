//! Schema Context Provider
//!
//! Supplies the textual schema description that grounds SQL generation.
//!
//! # Sources
//! - `Builtin`: the vendors / transactions / orders schema of the analytics database
//! - `File`: free text read from a file
//! - `Introspect`: tables, columns and keys read live from the database
//!
//! Whatever the source, the description is loaded once and then shared read-only for
//! the lifetime of the process. A failed load is not cached; the next request retries.
//! Introspection is bounded by a timeout so a stalled database cannot hold every
//! waiting request.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::engine::{
    ColumnInfo, DatabaseEngine, EngineConnection, ForeignKeyInfo, TableInfo,
};
use crate::error::{InsightError, Result};

/// Immutable schema text shared by all requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescription(Arc<str>);

impl SchemaDescription {
    /// Wrap prepared schema text
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    /// Render table metadata in the prompt format
    ///
    /// ```text
    /// Table: transactions
    /// - id (varchar, primary key)
    /// - vendor_id (varchar, foreign key to vendors.id)
    /// ```
    #[must_use]
    pub fn from_tables(tables: &[TableInfo]) -> Self {
        let mut text = String::from("Database Schema:\n");

        for table in tables {
            let _ = write!(text, "\nTable: {}\n", table.name);
            for column in &table.columns {
                let _ = writeln!(text, "- {}", describe_column(table, column));
            }
        }

        Self::new(text)
    }

    /// Borrow the description text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn describe_column(table: &TableInfo, column: &ColumnInfo) -> String {
    let mut notes = vec![column.data_type.to_lowercase()];

    if table.primary_key.as_ref().is_some_and(|pk| pk.contains(&column.name)) {
        notes.push("primary key".to_string());
    }

    for fk in &table.foreign_keys {
        if let Some(pos) = fk.columns.iter().position(|c| c == &column.name) {
            if let Some(referenced) = fk.referenced_columns.get(pos) {
                notes.push(format!("foreign key to {}.{referenced}", fk.referenced_table));
            }
        }
    }

    format!("{} ({})", column.name, notes.join(", "))
}

/// Where the schema description comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SchemaSource {
    /// Built-in analytics schema
    #[default]
    Builtin,
    /// Text file
    File { path: PathBuf },
    /// Live database introspection
    Introspect,
}

const DEFAULT_INTROSPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Loads and caches the schema description
#[derive(Debug)]
pub struct SchemaProvider {
    source: SchemaSource,
    timeout: Duration,
    cache: OnceCell<SchemaDescription>,
}

impl Default for SchemaProvider {
    fn default() -> Self {
        Self::new(SchemaSource::default())
    }
}

impl SchemaProvider {
    /// Create a provider for the given source
    #[must_use]
    pub fn new(source: SchemaSource) -> Self {
        Self {
            source,
            timeout: DEFAULT_INTROSPECT_TIMEOUT,
            cache: OnceCell::new(),
        }
    }

    /// Bound live introspection (connect plus catalog queries) by `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configured source
    #[must_use]
    pub const fn source(&self) -> &SchemaSource {
        &self.source
    }

    /// Get the schema description, loading it on first use
    ///
    /// # Errors
    /// Returns `Internal` when the file cannot be read or introspection fails.
    pub async fn describe<E: DatabaseEngine>(&self, engine: &E) -> Result<SchemaDescription> {
        self.cache.get_or_try_init(|| self.load(engine)).await.cloned()
    }

    async fn load<E: DatabaseEngine>(&self, engine: &E) -> Result<SchemaDescription> {
        match &self.source {
            SchemaSource::Builtin => Ok(SchemaDescription::from_tables(&builtin_tables())),
            SchemaSource::File { path } => {
                let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                    InsightError::internal(format!(
                        "Failed to read schema file {}: {e}",
                        path.display()
                    ))
                })?;

                if text.trim().is_empty() {
                    return Err(InsightError::internal(format!(
                        "Schema file {} is empty",
                        path.display()
                    )));
                }

                Ok(SchemaDescription::new(text))
            }
            SchemaSource::Introspect => {
                let tables = tokio::time::timeout(self.timeout, introspect(engine))
                    .await
                    .map_err(|_| {
                        InsightError::internal(format!(
                            "Schema introspection exceeded timeout of {}ms",
                            self.timeout.as_millis()
                        ))
                    })?
                    .map_err(|e| {
                        InsightError::internal(format!(
                            "Schema introspection failed: {}",
                            e.message()
                        ))
                    })?;

                if tables.is_empty() {
                    return Err(InsightError::internal("Schema introspection found no tables"));
                }

                tracing::info!(tables = tables.len(), "schema introspected");
                Ok(SchemaDescription::from_tables(&tables))
            }
        }
    }
}

async fn introspect<E: DatabaseEngine>(engine: &E) -> Result<Vec<TableInfo>> {
    let mut conn = engine.connect().await?;
    conn.introspect().await
}

fn column(name: &str, data_type: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: true,
    }
}

fn references_vendor() -> ForeignKeyInfo {
    ForeignKeyInfo {
        columns: vec!["vendor_id".to_string()],
        referenced_table: "vendors".to_string(),
        referenced_columns: vec!["id".to_string()],
    }
}

/// The analytics schema: vendors, their transactions, and their orders
#[must_use]
pub fn builtin_tables() -> Vec<TableInfo> {
    let id = || ColumnInfo {
        nullable: false,
        ..column("id", "varchar")
    };
    let pk = || Some(vec!["id".to_string()]);

    vec![
        TableInfo {
            name: "vendors".to_string(),
            columns: vec![
                id(),
                column("name", "text"),
                column("category", "text"),
                column("contact_email", "text"),
            ],
            primary_key: pk(),
            foreign_keys: Vec::new(),
        },
        TableInfo {
            name: "transactions".to_string(),
            columns: vec![
                id(),
                column("vendor_id", "varchar"),
                column("amount", "numeric"),
                column("description", "text"),
                column("date", "timestamp"),
            ],
            primary_key: pk(),
            foreign_keys: vec![references_vendor()],
        },
        TableInfo {
            name: "orders".to_string(),
            columns: vec![
                id(),
                column("vendor_id", "varchar"),
                column("product_name", "text"),
                column("quantity", "integer"),
                column("unit_price", "numeric"),
                column("total_amount", "numeric"),
                column("order_date", "timestamp"),
                column("status", "text"),
            ],
            primary_key: pk(),
            foreign_keys: vec![references_vendor()],
        },
    ]
}
