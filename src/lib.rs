//! Insight - Natural-Language Questions over a Relational Database
//!
//! Insight answers a natural-language question by asking a chat-completion model for a
//! single SQL statement, proving that statement is a read-only SELECT, executing it,
//! and returning the rows as text.
//!
//! # Core Principles
//! - Generated SQL is untrusted text until the validator says otherwise
//! - Nothing reaches a database connection without a SAFE verdict
//! - One connection per request, released on every exit path
//! - No retries: every failure is reported to the caller once
//!
//! # Architecture
//! The library holds the whole pipeline. The `insight` binary wraps it as an HTTP
//! service and as one-shot CLI commands.
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`output`] - JSON output envelope types
//! - [`config`] - Configuration management
//! - [`engine`] - Database engine traits and implementations
//! - [`schema`] - Schema description for the generator
//! - [`generation`] - SQL generation via chat completions
//! - [`validator`] - SQL safety validation
//! - [`executor`] - Query execution
//! - [`pipeline`] - Request orchestration
//! - [`analytics`] - Fixed dashboard queries
//! - [`server`] - HTTP surface

pub mod analytics;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod generation;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod server;
pub mod validator;

pub use config::{Overrides, ServiceConfig};
pub use engine::{AnyEngine, ConnectionConfig, DatabaseEngine, DatabaseType, EngineConnection};
pub use error::{InsightError, Result};
pub use executor::{QueryExecutor, TabularResult};
pub use generation::{ChatCompletion, ChatCompletionsClient, SqlGenerator};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use pipeline::{Answer, HealthReport, Pipeline};
pub use schema::{SchemaDescription, SchemaProvider, SchemaSource};
pub use validator::{validate, CandidateStatement, SafeStatement, UnsafeReason, Verdict};
