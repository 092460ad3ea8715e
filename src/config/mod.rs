//! Configuration Management
//!
//! This module loads the service configuration and layers the process environment
//! and command-line flags over it.
//!
//! # Configuration Locations
//! - Explicit: the file passed with `--config`
//! - Local: `.insight/config.json` (team-shareable, per-project)
//! - Global: `~/.config/insight/config.json` (per-user)
//!
//! Only the first file found is read; files are not merged.
//!
//! # Resolution Precedence
//! 1. Command-line flags (highest priority)
//! 2. Environment variables (`PGHOST`, `DATABASE_URL`, `GROQ_API_KEY`, ...)
//! 3. Config file
//! 4. Built-in defaults
//!
//! Secrets never need to live in the file: the password can be referenced through
//! `database.password_env` and the API key is only ever read from the environment.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{ConnectionConfig, DatabaseType};
use crate::error::{InsightError, Result};
use crate::generation::GenerationSettings;
use crate::schema::SchemaSource;

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener
    pub server: ServerConfig,

    /// Database connection
    pub database: StoredConnection,

    /// SQL generation collaborator
    pub generation: GenerationConfig,

    /// Schema description source
    pub schema: SchemaSource,

    /// Bound on connect plus fetch for one statement, in seconds
    pub query_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: StoredConnection::default(),
            generation: GenerationConfig::default(),
            schema: SchemaSource::default(),
            query_timeout_secs: 30,
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Stored connection configuration
///
/// Like `ConnectionConfig`, but the password may be given as the name of an
/// environment variable instead of inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConnection {
    /// Connection configuration
    #[serde(flatten)]
    pub config: ConnectionConfig,

    /// Environment variable name for password (if not storing password directly)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl Default for StoredConnection {
    fn default() -> Self {
        Self {
            config: ConnectionConfig::postgres(
                "localhost".to_string(),
                5432,
                "postgres".to_string(),
                None,
                "postgres".to_string(),
            ),
            password_env: None,
        }
    }
}

impl StoredConnection {
    /// Resolve `password_env` through `lookup` and return the final `ConnectionConfig`
    ///
    /// # Errors
    /// Returns `InvalidConfig` when the referenced variable is not set.
    pub fn resolve_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ConnectionConfig> {
        let mut config = self.config.clone();

        if let Some(env_var) = &self.password_env {
            match lookup(env_var) {
                Some(password) => config.password = Some(password),
                None => {
                    return Err(InsightError::invalid_config(format!(
                        "Environment variable {env_var} not found for password"
                    )));
                }
            }
        }

        Ok(config)
    }
}

/// Generation collaborator configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Resolved API key; read from the environment only
    #[serde(skip)]
    pub api_key: Option<String>,

    /// OpenAI-compatible API root, e.g. `https://api.groq.com/openai/v1`
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Longest accepted generated statement, in characters
    pub max_sql_chars: usize,
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_sql_chars", &self.max_sql_chars)
            .finish()
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let settings = GenerationSettings::default();
        Self {
            api_key_env: "GROQ_API_KEY".to_string(),
            api_key: None,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: settings.model,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout_secs: settings.timeout.as_secs(),
            max_sql_chars: settings.max_sql_chars,
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Use this `SQLite` file instead of the configured database
    pub sqlite: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load the config file, then apply the process environment and `overrides`
    ///
    /// # Errors
    /// Returns `InvalidConfig` for unreadable or malformed files, malformed
    /// environment values and missing password variables.
    pub fn resolve(explicit: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        load_with_precedence(explicit)?.layered(|key| std::env::var(key).ok(), overrides)
    }

    /// Apply the environment read through `lookup`, then `overrides`, then resolve
    /// `password_env` for whichever connection survived
    ///
    /// # Errors
    /// Returns `InvalidConfig` for malformed environment values and for a
    /// `password_env` naming an unset variable.
    pub fn layered(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> Result<Self> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        self.apply_env_from(lookup)?;
        self.apply_overrides(overrides);

        self.database.config = self.database.resolve_with(lookup)?;
        self.database.password_env = None;

        Ok(self)
    }

    /// Apply environment variables read through `lookup`
    ///
    /// `DATABASE_URL` switches the database to `PostgreSQL`. The discrete `PG*`
    /// variables only apply when the configured engine is already `PostgreSQL`.
    /// `password_env` is left for [`ServiceConfig::layered`] to resolve.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for a malformed port.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = lookup("INSIGHT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("INSIGHT_PORT") {
            self.server.port = parse_port("INSIGHT_PORT", &port)?;
        }

        if let Some(url) = lookup("DATABASE_URL") {
            self.database = StoredConnection {
                config: ConnectionConfig::postgres_url(url),
                password_env: None,
            };
        }

        if self.database.config.engine == DatabaseType::Postgres {
            let db = &mut self.database.config;
            if let Some(host) = lookup("PGHOST") {
                db.host = Some(host);
            }
            if let Some(port) = lookup("PGPORT") {
                db.port = Some(parse_port("PGPORT", &port)?);
            }
            if let Some(database) = lookup("PGDATABASE") {
                db.database = Some(database);
            }
            if let Some(user) = lookup("PGUSER") {
                db.user = Some(user);
            }
            if let Some(password) = lookup("PGPASSWORD") {
                db.password = Some(password);
                self.database.password_env = None;
            }
        }

        self.generation.api_key = lookup(&self.generation.api_key_env);
        if let Some(base_url) = lookup("LLM_BASE_URL") {
            self.generation.base_url = base_url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.generation.model = model;
        }

        Ok(())
    }

    /// Apply command-line values
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(host) = &overrides.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(path) = &overrides.sqlite {
            self.database = StoredConnection {
                config: ConnectionConfig::sqlite(path.clone()),
                password_env: None,
            };
        }
    }

    /// Final connection parameters
    ///
    /// # Errors
    /// Returns `InvalidConfig` when `password_env` names an unset variable.
    pub fn connection(&self) -> Result<ConnectionConfig> {
        self.database.resolve_with(|key| std::env::var(key).ok())
    }

    /// Settings for the generator, asking for the dialect of the configured engine
    #[must_use]
    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            model: self.generation.model.clone(),
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_tokens,
            timeout: Duration::from_secs(self.generation.timeout_secs),
            max_sql_chars: self.generation.max_sql_chars,
            dialect: self.database.config.engine,
        }
    }

    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Listen address as `host:port`
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_port(name: &str, value: &str) -> Result<u16> {
    value.trim().parse().map_err(|_| {
        InsightError::invalid_config(format!("{name} must be a port number, got '{value}'"))
    })
}

/// Get path to local config file (`.insight/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        InsightError::invalid_config(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".insight").join("config.json"))
}

/// Get path to global config file (`~/.config/insight/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| InsightError::invalid_config("Could not determine user config directory"))?;

    Ok(config_dir.join("insight").join("config.json"))
}

/// Load a config file
///
/// # Errors
/// Returns `InvalidConfig` if the file cannot be read or parsed.
pub fn load_file(path: &Path) -> Result<ServiceConfig> {
    let contents = fs::read_to_string(path).map_err(|e| {
        InsightError::invalid_config(format!("Could not read config file {}: {e}", path.display()))
    })?;

    serde_json::from_str(&contents).map_err(|e| {
        InsightError::invalid_config(format!("Invalid config file {}: {e}", path.display()))
    })
}

/// Load the first config file found
///
/// An explicit path must exist. Otherwise the local file is tried, then the global
/// one, and defaults are used when neither exists.
pub fn load_with_precedence(explicit: Option<&Path>) -> Result<ServiceConfig> {
    if let Some(path) = explicit {
        return load_file(path);
    }

    for path in [local_config_path()?, global_config_path()?] {
        if path.exists() {
            tracing::debug!(path = %path.display(), "loading config file");
            return load_file(&path);
        }
    }

    Ok(ServiceConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    fn apply(config: &mut ServiceConfig, vars: &HashMap<String, String>) -> Result<()> {
        config.apply_env_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();

        assert_eq!(config.listen_addr(), "0.0.0.0:8000");
        assert_eq!(config.database.config.engine, DatabaseType::Postgres);
        assert_eq!(config.generation.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(config.generation.model, "llama-3.3-70b-versatile");
        assert_eq!(config.generation.max_tokens, 500);
        assert_eq!(config.generation.max_sql_chars, 8192);
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
        assert_eq!(config.schema, SchemaSource::Builtin);
        assert!(config.generation.api_key.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{
                "server": {"port": 9000},
                "database": {"engine": "sqlite", "file": "/tmp/app.db"},
                "schema": {"source": "introspect"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.listen_addr(), "0.0.0.0:9000");
        assert_eq!(config.database.config, ConnectionConfig::sqlite(PathBuf::from("/tmp/app.db")));
        assert_eq!(config.schema, SchemaSource::Introspect);
        assert_eq!(config.generation.api_key_env, "GROQ_API_KEY");
        assert_eq!(config.generation_settings().dialect, DatabaseType::SQLite);
    }

    #[test]
    fn test_api_key_never_read_from_file() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"generation": {"api_key": "sk-secret"}}"#).unwrap();
        assert!(config.generation.api_key.is_none());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("api_key\""));
    }

    #[test]
    fn test_env_pg_variables() {
        let mut config = ServiceConfig::default();
        let vars = env(&[
            ("PGHOST", "db.internal"),
            ("PGPORT", "6543"),
            ("PGDATABASE", "analytics"),
            ("PGUSER", "reader"),
            ("PGPASSWORD", "hunter2"),
            ("GROQ_API_KEY", "gsk_test"),
        ]);

        apply(&mut config, &vars).unwrap();

        let db = &config.database.config;
        assert_eq!(db.host.as_deref(), Some("db.internal"));
        assert_eq!(db.port, Some(6543));
        assert_eq!(db.database.as_deref(), Some("analytics"));
        assert_eq!(db.user.as_deref(), Some("reader"));
        assert_eq!(db.password.as_deref(), Some("hunter2"));
        assert_eq!(config.generation.api_key.as_deref(), Some("gsk_test"));
    }

    #[test]
    fn test_env_database_url_switches_engine() {
        let mut config = ServiceConfig::default();
        config.database.config = ConnectionConfig::sqlite(PathBuf::from("/tmp/app.db"));

        apply(&mut config, &env(&[("DATABASE_URL", "postgres://u@h/db")])).unwrap();

        assert_eq!(
            config.database.config,
            ConnectionConfig::postgres_url("postgres://u@h/db".to_string())
        );
    }

    #[test]
    fn test_env_pg_variables_ignored_for_sqlite() {
        let mut config = ServiceConfig::default();
        config.database.config = ConnectionConfig::sqlite(PathBuf::from("/tmp/app.db"));

        apply(&mut config, &env(&[("PGHOST", "db.internal")])).unwrap();

        assert_eq!(config.database.config.engine, DatabaseType::SQLite);
        assert!(config.database.config.host.is_none());
    }

    #[test]
    fn test_env_custom_api_key_variable_and_llm_overrides() {
        let mut config = ServiceConfig::default();
        config.generation.api_key_env = "OPENAI_API_KEY".to_string();

        let vars = env(&[
            ("GROQ_API_KEY", "ignored"),
            ("OPENAI_API_KEY", "sk-test"),
            ("LLM_BASE_URL", "http://localhost:11434/v1"),
            ("LLM_MODEL", "llama3"),
        ]);
        apply(&mut config, &vars).unwrap();

        assert_eq!(config.generation.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.generation.base_url, "http://localhost:11434/v1");
        assert_eq!(config.generation.model, "llama3");
    }

    #[test]
    fn test_blank_api_key_is_unset() {
        let mut config = ServiceConfig::default();
        apply(&mut config, &env(&[("GROQ_API_KEY", "   ")])).unwrap();
        assert!(config.generation.api_key.is_none());
    }

    #[test]
    fn test_env_bad_port() {
        let mut config = ServiceConfig::default();

        let err = apply(&mut config, &env(&[("INSIGHT_PORT", "eighty")])).unwrap_err();

        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert!(err.message().contains("INSIGHT_PORT"));
    }

    #[test]
    fn test_password_env_resolved() {
        let mut config = ServiceConfig::default();
        config.database.password_env = Some("APP_DB_PASSWORD".to_string());
        let vars = env(&[("APP_DB_PASSWORD", "s3cret")]);

        let config = config.layered(|key| vars.get(key).cloned(), &Overrides::default()).unwrap();

        assert_eq!(config.database.config.password.as_deref(), Some("s3cret"));
        assert!(config.database.password_env.is_none());
    }

    #[test]
    fn test_password_env_missing() {
        let mut config = ServiceConfig::default();
        config.database.password_env = Some("APP_DB_PASSWORD".to_string());

        let err = config.layered(|_| None, &Overrides::default()).unwrap_err();

        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert!(err.message().contains("APP_DB_PASSWORD"));
        assert!(!err.message().contains("s3cret"));
    }

    #[test]
    fn test_sqlite_override_skips_replaced_password_env() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{
                "database": {
                    "engine": "postgres",
                    "host": "db.internal",
                    "user": "reader",
                    "database": "sales",
                    "password_env": "APP_DB_PASSWORD"
                }
            }"#,
        )
        .unwrap();
        let overrides = Overrides {
            sqlite: Some(PathBuf::from("/tmp/local.db")),
            ..Overrides::default()
        };

        let config = config.layered(|_| None, &overrides).unwrap();

        assert_eq!(
            config.database.config,
            ConnectionConfig::sqlite(PathBuf::from("/tmp/local.db"))
        );
        assert!(config.connection().is_ok());
    }

    #[test]
    fn test_overrides_win_over_env() {
        let mut config = ServiceConfig::default();
        let vars = env(&[("INSIGHT_HOST", "10.0.0.1"), ("INSIGHT_PORT", "7000")]);
        apply(&mut config, &vars).unwrap();

        config.apply_overrides(&Overrides {
            host: Some("127.0.0.1".to_string()),
            port: Some(8080),
            sqlite: Some(PathBuf::from("/tmp/local.db")),
        });

        assert_eq!(config.listen_addr(), "127.0.0.1:8080");
        assert_eq!(config.database.config.engine, DatabaseType::SQLite);
    }

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!("insight_config_{}.json", std::process::id()));
        fs::write(
            &path,
            r#"{"query_timeout_secs": 5, "generation": {"model": "mixtral"}}"#,
        )
        .unwrap();

        let config = load_with_precedence(Some(&path)).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.query_timeout(), Duration::from_secs(5));
        assert_eq!(config.generation.model, "mixtral");
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let err = load_with_precedence(Some(Path::new("/nonexistent/insight.json"))).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_load_malformed_file() {
        let path =
            std::env::temp_dir().join(format!("insight_config_bad_{}.json", std::process::id()));
        fs::write(&path, "{ not json").unwrap();

        let err = load_file(&path).unwrap_err();
        fs::remove_file(&path).unwrap();

        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert!(err.message().contains("Invalid config file"));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let mut generation = GenerationConfig::default();
        generation.api_key = Some("gsk_live_123".to_string());

        let debug = format!("{generation:?}");
        assert!(!debug.contains("gsk_live_123"));
        assert!(debug.contains("<redacted>"));
    }
}
