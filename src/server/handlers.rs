//! HTTP handlers and the error/NDJSON response shapes

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;

use super::state::AppState;
use crate::error::{Code, LogError};
use crate::filter::GetLogsRequest;
use crate::materializer::MaterializerStatus;
use crate::store::LogStream;
use crate::types::{Ack, LogEvent};

const DEFAULT_DEAD_LETTER_LIMIT: usize = 50;

/// A `LogError` rendered as `{"error": {"code", "message"}}`
pub struct ApiError(pub LogError);

impl From<LogError> for ApiError {
    fn from(e: LogError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code() {
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::FailedPrecondition => StatusCode::CONFLICT,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(error_body(&self.0))).into_response()
    }
}

fn error_body(e: &LogError) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "code": e.code(),
            "message": e.to_string(),
        }
    })
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// POST /logs - Submit one log event.
pub async fn send_log(
    State(state): State<AppState>,
    body: std::result::Result<Json<LogEvent>, JsonRejection>,
) -> ApiResult<Json<Ack>> {
    let Json(event) = body.map_err(|e| LogError::Validation(e.body_text()))?;
    Ok(Json(state.ingest.submit(event).await?))
}

/// GET /logs - Query with filters from the query string, streamed as NDJSON.
pub async fn get_logs(
    State(state): State<AppState>,
    request: std::result::Result<Query<GetLogsRequest>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(request) = request.map_err(|e| LogError::Validation(e.body_text()))?;
    ndjson_response(state.query.get_logs(&request)).await
}

/// POST /logs/query - Query with a JSON request body, streamed as NDJSON.
pub async fn query_logs(
    State(state): State<AppState>,
    body: std::result::Result<Json<GetLogsRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = body.map_err(|e| LogError::Validation(e.body_text()))?;
    ndjson_response(state.query.get_logs(&request)).await
}

/// One event per line.
///
/// A failure before the first row is returned as a classified error status;
/// once rows are flowing, a failure becomes a final error line.
async fn ndjson_response(mut stream: LogStream) -> ApiResult<Response> {
    let first = match stream.next().await {
        Some(Err(e)) => return Err(e.into()),
        first => first,
    };
    let lines = futures::stream::iter(first)
        .chain(stream)
        .map(|item| Ok::<_, Infallible>(ndjson_line(item)));
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

fn ndjson_line(item: crate::error::Result<LogEvent>) -> Bytes {
    let encoded = item.and_then(|event| Ok(serde_json::to_vec(&event)?));
    let mut line = match encoded {
        Ok(line) => line,
        Err(e) => error_body(&e).to_string().into_bytes(),
    };
    line.push(b'\n');
    Bytes::from(line)
}

/// POST /materializer/start
pub async fn start_materializer(
    State(state): State<AppState>,
) -> ApiResult<Json<MaterializerStatus>> {
    state.supervisor.start().await?;
    Ok(Json(state.supervisor.status().await))
}

/// POST /materializer/stop
pub async fn stop_materializer(
    State(state): State<AppState>,
) -> ApiResult<Json<MaterializerStatus>> {
    state.supervisor.stop().await?;
    Ok(Json(state.supervisor.status().await))
}

/// GET /status - Materializer state, counters, and broker info.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let materializer = state.supervisor.status().await;

    let provider = match state.publisher.info().await {
        Ok(info) => serde_json::to_value(info).unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read provider info");
            serde_json::json!({ "provider": state.publisher.provider_name(), "error": e.to_string() })
        }
    };

    let dead_letters = match state.dlq.count().await {
        Ok(count) => serde_json::json!(count),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };

    Json(serde_json::json!({
        "materializer": materializer,
        "provider": provider,
        "topic": state.publisher.topic(),
        "dead_letters": dead_letters,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DeadLettersParams {
    pub limit: Option<usize>,
}

/// GET /dead-letters - Most recent dead letters first.
pub async fn dead_letters(
    State(state): State<AppState>,
    Query(params): Query<DeadLettersParams>,
) -> ApiResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT);
    let letters = state.dlq.list(limit).await?;
    Ok(Json(serde_json::json!({ "dead_letters": letters })))
}
