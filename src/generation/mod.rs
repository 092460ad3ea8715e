//! SQL Generation
//!
//! Turns a natural-language question plus the schema description into a
//! [`CandidateStatement`] by asking a chat-completion collaborator.
//!
//! The collaborator's text is never parsed as SQL here. It is trimmed, stripped of a
//! surrounding code fence, length-checked and handed on untouched for validation.

mod client;

use std::time::Duration;

pub use client::{ChatCompletion, ChatCompletionsClient, ChatRequest};

use crate::engine::DatabaseType;
use crate::error::{InsightError, Result};
use crate::schema::SchemaDescription;
use crate::validator::CandidateStatement;

/// Generation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Longest statement accepted from the collaborator, in characters
    pub max_sql_chars: usize,
    /// SQL dialect the prompt asks for
    pub dialect: DatabaseType,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.1,
            max_tokens: 500,
            timeout: Duration::from_secs(30),
            max_sql_chars: 8192,
            dialect: DatabaseType::Postgres,
        }
    }
}

/// Produces candidate statements from questions
#[derive(Debug)]
pub struct SqlGenerator<C> {
    client: Option<C>,
    settings: GenerationSettings,
}

impl<C: ChatCompletion> SqlGenerator<C> {
    /// Create a generator; `None` means no collaborator is configured
    pub const fn new(client: Option<C>, settings: GenerationSettings) -> Self {
        Self { client, settings }
    }

    /// Whether a collaborator is configured
    pub const fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub const fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Generate a candidate statement for `question`
    ///
    /// Exactly one collaborator call is made; nothing is retried.
    ///
    /// # Errors
    /// - `GenerationUnavailable` when no collaborator is configured
    /// - `GenerationFailed` when the call fails, times out, or returns empty or
    ///   oversized content
    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaDescription,
    ) -> Result<CandidateStatement> {
        let client = self.client.as_ref().ok_or_else(|| {
            InsightError::generation_unavailable(
                "no API key is set. Set GROQ_API_KEY or configure generation.api_key_env",
            )
        })?;

        let request = ChatRequest {
            system: build_system_prompt(schema, self.settings.dialect),
            user: question.to_string(),
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let raw = tokio::time::timeout(self.settings.timeout, client.complete(&request))
            .await
            .map_err(|_| {
                InsightError::generation_failed(format!(
                    "no response within {} ms",
                    self.settings.timeout.as_millis()
                ))
            })??;

        let sql = extract_statement(&raw);

        if sql.is_empty() {
            return Err(InsightError::generation_failed("the model returned no SQL"));
        }

        let length = sql.chars().count();
        if length > self.settings.max_sql_chars {
            return Err(InsightError::generation_failed(format!(
                "generated statement is {length} characters, limit is {}",
                self.settings.max_sql_chars
            )));
        }

        Ok(CandidateStatement::new(sql))
    }
}

/// Build the system instruction for the collaborator
#[must_use]
pub fn build_system_prompt(schema: &SchemaDescription, dialect: DatabaseType) -> String {
    let (name, ninety_days_ago) = match dialect {
        DatabaseType::Postgres => ("PostgreSQL", "CURRENT_DATE - INTERVAL '90 days'"),
        DatabaseType::SQLite => ("SQLite", "date('now', '-90 days')"),
    };

    format!(
        "You are a SQL expert. Generate {name} queries based on user questions.

{schema}

Rules:
1. Only generate SELECT queries
2. Use proper {name} syntax
3. Join tables when needed using the foreign keys listed in the schema
4. Use aggregate functions (SUM, COUNT, AVG) when appropriate
5. Format currency amounts properly
6. Use date functions for time-based queries
7. Return ONLY the SQL query, no explanations or markdown formatting
8. Use LIMIT for top N queries
9. Use ORDER BY for sorting results

Example questions and queries:
- \"Show top 5 vendors by spend in last 90 days\" →
  SELECT v.name, SUM(t.amount) as total_spend, COUNT(t.id) as transaction_count
  FROM vendors v
  JOIN transactions t ON v.id = t.vendor_id
  WHERE t.date >= {ninety_days_ago}
  GROUP BY v.id, v.name
  ORDER BY total_spend DESC
  LIMIT 5;
"
    )
}

/// Extract the statement from a collaborator response
///
/// Trims, then removes an opening fence (with an optional language tag) and a
/// closing fence. The rest is returned verbatim.
#[must_use]
pub fn extract_statement(raw: &str) -> String {
    let text = strip_opening_fence(raw.trim());
    let text = text.trim_end().strip_suffix("```").unwrap_or(text);
    text.trim().to_string()
}

/// Language tags accepted on an opening fence line
const FENCE_TAGS: &[&str] = &[
    "sql", "postgresql", "postgres", "pgsql", "psql", "sqlite", "sqlite3", "plsql", "text",
];

fn strip_opening_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };

    // Bare fence or a known language tag on its own line
    let line_end = rest.find('\n').unwrap_or(rest.len());
    let tag = rest[..line_end].trim();
    if tag.is_empty() || FENCE_TAGS.iter().any(|known| known.eq_ignore_ascii_case(tag)) {
        return &rest[line_end..];
    }

    // ```sql SELECT ... on a single line
    if rest.get(..3).is_some_and(|tag| tag.eq_ignore_ascii_case("sql"))
        && rest[3..].starts_with(char::is_whitespace)
    {
        return &rest[3..];
    }

    rest
}
