//! HTTP Service
//!
//! axum router exposing the pipeline:
//! - `POST /generate-sql` answers a question (also mounted at `/api/chat-with-data`
//!   for the chat page)
//! - `GET /health` reports readiness
//! - `GET /api/analytics/*` serves the fixed dashboard queries
//!
//! Failures are rendered as an [`ErrorEnvelope`] with status 400 for client faults
//! and 500 for everything else.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::analytics;
use crate::engine::{DatabaseEngine, DatabaseType};
use crate::error::{InsightError, Result};
use crate::generation::ChatCompletion;
use crate::output::ErrorEnvelope;
use crate::pipeline::{Answer, HealthReport, Pipeline};

/// Body of `POST /generate-sql`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub query: String,
}

/// Error response for one command
#[derive(Debug)]
pub struct ApiError {
    engine: DatabaseType,
    command: &'static str,
    error: InsightError,
}

impl ApiError {
    pub const fn new(engine: DatabaseType, command: &'static str, error: InsightError) -> Self {
        Self {
            engine,
            command,
            error,
        }
    }

    /// 400 for caller-correctable errors, 500 otherwise
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        if self.error.is_client_fault() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(
                command = self.command,
                code = self.error.error_code(),
                "request failed"
            );
        }

        let body = ErrorEnvelope::from_error(self.engine.as_str(), self.command, &self.error);
        (status, Json(body)).into_response()
    }
}

type Shared<C, E> = Arc<Pipeline<C, E>>;

/// Build the router
pub fn router<C, E>(pipeline: Shared<C, E>) -> Router
where
    C: ChatCompletion + 'static,
    E: DatabaseEngine + 'static,
{
    Router::new()
        .route("/generate-sql", post(generate_sql::<C, E>))
        .route("/api/chat-with-data", post(generate_sql::<C, E>))
        .route("/health", get(health::<C, E>))
        .route("/api/analytics/metrics", get(metrics::<C, E>))
        .route("/api/analytics/revenue-trend", get(revenue_trend::<C, E>))
        .route("/api/analytics/top-vendors", get(top_vendors::<C, E>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

async fn generate_sql<C, E>(
    State(pipeline): State<Shared<C, E>>,
    payload: std::result::Result<Json<GenerateRequest>, JsonRejection>,
) -> std::result::Result<Json<Answer>, ApiError>
where
    C: ChatCompletion,
    E: DatabaseEngine,
{
    let engine = pipeline.executor().engine().database_type();
    let fail = |error| ApiError::new(engine, "generate-sql", error);

    let Json(request) = payload.map_err(|rejection| {
        fail(InsightError::invalid_input(rejection.body_text()))
    })?;

    pipeline.answer(&request.query).await.map(Json).map_err(fail)
}

async fn health<C, E>(State(pipeline): State<Shared<C, E>>) -> Json<HealthReport>
where
    C: ChatCompletion,
    E: DatabaseEngine,
{
    Json(pipeline.health().await)
}

async fn metrics<C, E>(
    State(pipeline): State<Shared<C, E>>,
) -> std::result::Result<Json<analytics::Metrics>, ApiError>
where
    C: ChatCompletion,
    E: DatabaseEngine,
{
    respond(&pipeline, "analytics-metrics", analytics::metrics(pipeline.executor()).await)
}

async fn revenue_trend<C, E>(
    State(pipeline): State<Shared<C, E>>,
) -> std::result::Result<Json<Vec<analytics::RevenuePoint>>, ApiError>
where
    C: ChatCompletion,
    E: DatabaseEngine,
{
    let trend = analytics::revenue_trend(pipeline.executor()).await;
    respond(&pipeline, "analytics-revenue-trend", trend)
}

async fn top_vendors<C, E>(
    State(pipeline): State<Shared<C, E>>,
) -> std::result::Result<Json<Vec<analytics::VendorSpend>>, ApiError>
where
    C: ChatCompletion,
    E: DatabaseEngine,
{
    respond(&pipeline, "analytics-top-vendors", analytics::top_vendors(pipeline.executor()).await)
}

fn respond<C, E, T>(
    pipeline: &Pipeline<C, E>,
    command: &'static str,
    result: Result<T>,
) -> std::result::Result<Json<T>, ApiError>
where
    C: ChatCompletion,
    E: DatabaseEngine,
{
    let engine = pipeline.executor().engine().database_type();
    result.map(Json).map_err(|error| ApiError::new(engine, command, error))
}

/// Serve the router on `addr` until Ctrl-C or SIGTERM
///
/// # Errors
/// Returns `InvalidConfig` when the address cannot be bound and `Internal` when the
/// server fails while running.
pub async fn serve<C, E>(addr: &str, pipeline: Shared<C, E>) -> Result<()>
where
    C: ChatCompletion + 'static,
    E: DatabaseEngine + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| InsightError::invalid_config(format!("Could not bind {addr}: {e}")))?;

    tracing::info!(addr, "listening");

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| InsightError::internal(format!("Server error: {e}")))?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::UnsafeReason;

    fn status_of(error: InsightError) -> StatusCode {
        ApiError::new(DatabaseType::Postgres, "generate-sql", error).status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(InsightError::RejectedUnsafeQuery(UnsafeReason::NotASelect)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(InsightError::execution("syntax error")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(InsightError::invalid_input("Query is required")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(InsightError::generation_unavailable("no key")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(InsightError::generation_failed("timeout")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(InsightError::internal("boom")), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
