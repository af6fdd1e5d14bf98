//! REST API Server
//!
//! Exposes the quote arbiter and finance assistant over HTTP.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Instrument};

use crate::arbiter::QuoteArbiter;
use crate::assistant::FinanceAssistant;
use crate::error::{AssistantError, QuoteError, UnavailableReason};
use crate::models::{AiQuery, QuoteField, QuoteRequest, QuoteResult};

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default, alias = "query")]
    pub question: String,
    #[serde(default)]
    pub context: Vec<String>,
    pub portfolio: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub model: String,
    pub latency_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct QuoteParams {
    pub symbol: Option<String>,
    pub fields: Option<String>,
    pub range: Option<String>,
    pub as_of: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    pub timestamp: String,
}

/// =============================
/// Error Mapping
/// =============================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
            timestamp: Utc::now().to_rfc3339(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<QuoteError> for ApiError {
    fn from(err: QuoteError) -> Self {
        match &err {
            QuoteError::InvalidSymbol { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_symbol", err.to_string())
            }
            QuoteError::InvalidRequest(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
            }
            QuoteError::Unavailable { .. } if err.is_not_found() => {
                ApiError::new(StatusCode::NOT_FOUND, "symbol_not_found", "No provider knows this symbol")
            }
            // Causes are logged by the arbiter; callers get a stable message.
            QuoteError::Unavailable { .. } => ApiError::new(
                StatusCode::BAD_GATEWAY,
                "quote_unavailable",
                "Quote data is temporarily unavailable",
            ),
        }
    }
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        match err {
            AssistantError::InvalidQuery(message) => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_query", message)
            }
            AssistantError::Unavailable { reason, .. } => {
                let status = match reason {
                    UnavailableReason::Timeout | UnavailableReason::RateLimited => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    UnavailableReason::Blocked
                    | UnavailableReason::EmptyResponse
                    | UnavailableReason::Upstream => StatusCode::BAD_GATEWAY,
                };
                ApiError::new(status, "ai_unavailable", format!("AI service unavailable: {}", reason))
            }
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub arbiter: Arc<QuoteArbiter>,
    pub assistant: Arc<FinanceAssistant>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Quote Endpoint
/// =============================

fn build_quote_request(params: &QuoteParams) -> Result<QuoteRequest, QuoteError> {
    let mut request = QuoteRequest::new(params.symbol.as_deref().unwrap_or_default())?;

    if let Some(fields) = params.fields.as_deref() {
        let parsed = fields
            .split(',')
            .filter(|f| !f.trim().is_empty())
            .map(|f| {
                QuoteField::parse(f)
                    .ok_or_else(|| QuoteError::InvalidRequest(format!("unknown field '{}'", f.trim())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        request = request.with_fields(parsed);
    }

    if let Some(range) = params.range.as_deref() {
        request = request.with_range(range)?;
    }

    if let Some(as_of) = params.as_of.as_deref() {
        let as_of = DateTime::parse_from_rfc3339(as_of)
            .map_err(|e| QuoteError::InvalidRequest(format!("as_of is not RFC 3339: {}", e)))?;
        request = request.with_as_of(as_of.with_timezone(&Utc));
    }

    Ok(request)
}

async fn finance_quote(
    State(state): State<ApiState>,
    params: Result<Query<QuoteParams>, QueryRejection>,
) -> Result<Json<QuoteResult>, ApiError> {
    let Query(params) = params
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "invalid_request", e.body_text()))?;
    let request = build_quote_request(&params)?;
    let span = tracing::info_span!(
        "quote",
        request_id = %uuid::Uuid::new_v4(),
        symbol = %request.symbol()
    );

    let quote = state.arbiter.get_quote(&request).instrument(span).await?;
    Ok(Json(quote))
}

/// =============================
/// Assistant Endpoint
/// =============================

async fn ai_ask(
    State(state): State<ApiState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, ApiError> {
    // Unreadable bodies are reported like an empty question.
    let Json(req) = payload
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "invalid_query", e.body_text()))?;
    let request_id = uuid::Uuid::new_v4();
    info!(%request_id, context_turns = req.context.len(), "Received assistant question");

    let query = AiQuery {
        question: req.question,
        context: req.context,
        portfolio: req.portfolio,
    };

    let span = tracing::info_span!("ai_ask", %request_id);
    match state.assistant.ask(&query).instrument(span).await {
        Ok(answer) => Ok(Json(AskResponse {
            answer: answer.text,
            model: answer.metadata.model,
            latency_ms: answer.metadata.latency_ms,
        })),
        Err(e) => {
            warn!(%request_id, error = %e, "Assistant request failed");
            Err(e.into())
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ai/ask", post(ai_ask))
        .route("/api/finance/quote", get(finance_quote))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn start_server<F>(
    state: ApiState,
    port: u16,
    shutdown: F,
) -> std::result::Result<(), Box<dyn std::error::Error>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
