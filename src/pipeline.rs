//! Request Orchestration
//!
//! Sequences one question through schema → generate → validate → execute.
//! An UNSAFE verdict stops the run before any connection is acquired.
//!
//! All collaborators are injected at construction; the pipeline holds no mutable
//! state, so one instance serves every concurrent request.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::engine::{AnyEngine, DatabaseEngine};
use crate::error::{InsightError, Result};
use crate::executor::{QueryExecutor, TabularResult};
use crate::generation::{ChatCompletion, ChatCompletionsClient, SqlGenerator};
use crate::schema::{SchemaDescription, SchemaProvider};
use crate::validator::{validate, CandidateStatement, SafeStatement, Verdict};

/// Successful answer to a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Statement that was executed, exactly as generated
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Service health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub generation_configured: bool,
    pub database_connected: bool,
}

/// The question-answering pipeline
pub struct Pipeline<C, E> {
    schema: SchemaProvider,
    generator: SqlGenerator<C>,
    executor: QueryExecutor<E>,
}

impl<C: ChatCompletion, E: DatabaseEngine> Pipeline<C, E> {
    pub const fn new(
        schema: SchemaProvider,
        generator: SqlGenerator<C>,
        executor: QueryExecutor<E>,
    ) -> Self {
        Self {
            schema,
            generator,
            executor,
        }
    }

    pub const fn executor(&self) -> &QueryExecutor<E> {
        &self.executor
    }

    /// Schema description the generator receives
    pub async fn schema(&self) -> Result<SchemaDescription> {
        self.schema.describe(self.executor.engine()).await
    }

    /// Answer a natural-language question
    ///
    /// # Errors
    /// - `InvalidInput` for an empty question
    /// - `Internal` when the schema cannot be loaded
    /// - `GenerationUnavailable` / `GenerationFailed` from generation
    /// - `RejectedUnsafeQuery` when the generated statement is UNSAFE
    /// - `ExecutionError` from the database
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let span = tracing::info_span!("pipeline", request_id = %Uuid::new_v4());
        self.run(question).instrument(span).await
    }

    async fn run(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(InsightError::invalid_input("Query is required"));
        }

        let started = Instant::now();

        let schema = self.schema().await.inspect_err(|e| {
            tracing::error!(error = %e, "schema unavailable");
        })?;

        let candidate = self.generator.generate(question, &schema).await.inspect_err(|e| {
            tracing::warn!(code = e.error_code(), error = %e, "generation failed");
        })?;

        let statement = admit(candidate)?;

        let result = self.executor.execute(&statement).await.inspect_err(|e| {
            tracing::warn!(sql = statement.as_str(), error = %e, "execution failed");
        })?;

        tracing::info!(
            rows = result.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "question answered"
        );

        let TabularResult { columns, rows } = result;
        Ok(Answer {
            sql: statement.into_inner(),
            columns,
            rows,
        })
    }

    /// Report health; never fails
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy".to_string(),
            generation_configured: self.generator.is_configured(),
            database_connected: self.executor.ping().await,
        }
    }
}

impl Pipeline<ChatCompletionsClient, AnyEngine> {
    /// Wire the production pipeline from resolved configuration
    ///
    /// A missing API key leaves generation unconfigured instead of failing.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for unusable connection parameters.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let engine = AnyEngine::from_config(&config.connection()?)?;

        let client = match &config.generation.api_key {
            Some(key) => Some(ChatCompletionsClient::new(&config.generation.base_url, key)?),
            None => {
                tracing::warn!(
                    env = config.generation.api_key_env.as_str(),
                    "no API key set, SQL generation is unavailable"
                );
                None
            }
        };

        Ok(Self::new(
            SchemaProvider::new(config.schema.clone()).with_timeout(config.query_timeout()),
            SqlGenerator::new(client, config.generation_settings()),
            QueryExecutor::new(engine, config.query_timeout()),
        ))
    }
}

/// Validate a candidate, logging and converting an UNSAFE verdict
///
/// # Errors
/// Returns `RejectedUnsafeQuery` carrying the validator's reason.
pub fn admit(candidate: CandidateStatement) -> Result<SafeStatement> {
    match validate(candidate) {
        Verdict::Safe(statement) => Ok(statement),
        Verdict::Unsafe { candidate, reason } => {
            tracing::warn!(
                reason = reason.code(),
                sql = candidate.as_str(),
                "generated statement rejected"
            );
            Err(InsightError::RejectedUnsafeQuery(reason))
        }
    }
}
