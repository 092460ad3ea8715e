//! Insight CLI Entry Point
//!
//! This is the main binary entry point for Insight.
//! It provides four subcommands:
//! - `serve` - Run the HTTP service
//! - `ask` - Answer one question and exit
//! - `validate` - Run only the SQL safety validator
//! - `schema` - Print the schema description the generator receives
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use insight::output::{ErrorEnvelope, Metadata, SuccessEnvelope};
use insight::{
    validate, AnyEngine, CandidateStatement, ChatCompletionsClient, DatabaseEngine, InsightError,
    Overrides, Pipeline, ServiceConfig, Verdict,
};

/// Insight - answer natural-language questions with read-only SQL
#[derive(Parser)]
#[command(name = "insight")]
#[command(about = "Natural-language questions over a relational database, read-only by construction")]
#[command(version)]
struct Cli {
    /// Config file (default: .insight/config.json, then the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `insight=debug` (falls back to RUST_LOG)
    #[arg(long, global = true, env = "INSIGHT_LOG")]
    log_level: Option<String>,

    /// Use this SQLite database file instead of the configured database
    #[arg(long, global = true, value_name = "FILE")]
    sqlite: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Listen address
        #[arg(long)]
        host: Option<String>,

        /// Listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Answer one question
    Ask {
        /// The question, in plain language
        question: String,
    },

    /// Check whether a statement would be allowed to run
    Validate {
        /// SQL text
        sql: String,
    },

    /// Print the schema description given to the generator
    Schema,
}

/// `validate` command output
#[derive(Serialize)]
struct ValidationOutput {
    safe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

/// `schema` command output
#[derive(Serialize)]
struct SchemaOutput {
    description: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Run the selected command; `Ok(false)` means an error envelope was printed
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = cli.config.as_deref();
    let mut overrides = Overrides {
        sqlite: cli.sqlite,
        ..Overrides::default()
    };

    match cli.command {
        Commands::Serve { host, port } => {
            overrides.host = host;
            overrides.port = port;
            serve(config, &overrides).await
        }
        Commands::Ask { question } => ask(config, &overrides, &question).await,
        Commands::Validate { sql } => validate_sql(sql),
        Commands::Schema => schema(config, &overrides).await,
    }
}

fn build(
    config: Option<&Path>,
    overrides: &Overrides,
) -> insight::Result<Pipeline<ChatCompletionsClient, AnyEngine>> {
    let config = ServiceConfig::resolve(config, overrides)?;
    Pipeline::from_config(&config)
}

async fn serve(config: Option<&Path>, overrides: &Overrides) -> anyhow::Result<bool> {
    let config =
        ServiceConfig::resolve(config, overrides).context("Failed to load configuration")?;
    let pipeline = Pipeline::from_config(&config).context("Failed to initialize the pipeline")?;

    tracing::info!(
        engine = %pipeline.executor().engine().database_type(),
        model = config.generation.model.as_str(),
        generation_configured = config.generation.api_key.is_some(),
        "starting insight"
    );

    insight::server::serve(&config.listen_addr(), Arc::new(pipeline)).await?;
    Ok(true)
}

async fn ask(config: Option<&Path>, overrides: &Overrides, question: &str) -> anyhow::Result<bool> {
    let pipeline = match build(config, overrides) {
        Ok(pipeline) => pipeline,
        Err(e) => return emit_error("", "ask", &e),
    };
    let engine = pipeline.executor().engine().database_type().as_str();

    let started = Instant::now();
    match pipeline.answer(question).await {
        Ok(answer) => {
            let meta = Metadata::with_rows(elapsed_ms(started), answer.rows.len());
            emit(&SuccessEnvelope::new(engine, "ask", answer, meta))?;
            Ok(true)
        }
        Err(e) => emit_error(engine, "ask", &e),
    }
}

fn validate_sql(sql: String) -> anyhow::Result<bool> {
    let started = Instant::now();
    let output = match validate(CandidateStatement::new(sql)) {
        Verdict::Safe(_) => ValidationOutput {
            safe: true,
            reason: None,
        },
        Verdict::Unsafe { reason, .. } => ValidationOutput {
            safe: false,
            reason: Some(reason.code()),
        },
    };

    let meta = Metadata::new(elapsed_ms(started));
    emit(&SuccessEnvelope::new("", "validate", output, meta))?;
    Ok(true)
}

async fn schema(config: Option<&Path>, overrides: &Overrides) -> anyhow::Result<bool> {
    let pipeline = match build(config, overrides) {
        Ok(pipeline) => pipeline,
        Err(e) => return emit_error("", "schema", &e),
    };
    let engine = pipeline.executor().engine().database_type().as_str();

    let started = Instant::now();
    match pipeline.schema().await {
        Ok(schema) => {
            let output = SchemaOutput {
                description: schema.as_str().to_string(),
            };
            let meta = Metadata::new(elapsed_ms(started));
            emit(&SuccessEnvelope::new(engine, "schema", output, meta))?;
            Ok(true)
        }
        Err(e) => emit_error(engine, "schema", &e),
    }
}

fn emit<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

fn emit_error(engine: &str, command: &str, err: &InsightError) -> anyhow::Result<bool> {
    emit(&ErrorEnvelope::from_error(engine, command, err))?;
    Ok(false)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
