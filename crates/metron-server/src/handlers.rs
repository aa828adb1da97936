//! Route handlers. Typed errors from the ingest pipeline are converted to
//! HTTP statuses here: validation problems answer 400 and are logged at
//! debug, storage problems answer 500 and are logged at warn.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use metron_core::Metric;
use tracing::{debug, warn};

use crate::AppState;
use crate::ingest::{self, IngestError};

pub struct ApiError(IngestError);

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError(err)
    }
}

impl From<ingest::ValidationError> for ApiError {
    fn from(err: ingest::ValidationError) -> Self {
        ApiError(IngestError::Validation(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            IngestError::Validation(e) => {
                debug!("rejecting request: {e}");
                StatusCode::BAD_REQUEST.into_response()
            }
            IngestError::Storage(e) => {
                warn!("storage failure: {e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// GET `/` — the known metric ids, one per line.
pub async fn index(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut ids = state.ingestor.ids().await?;
    ids.sort();

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/html; charset=utf-8")],
        ids.join("\n"),
    )
        .into_response())
}

/// GET `/ping` — 200 iff the storage backend is healthy.
pub async fn ping(State(state): State<AppState>) -> StatusCode {
    if state.ingestor.healthy().await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub async fn liveness(State(state): State<AppState>) -> Response {
    flag_response(state.health.liveness())
}

pub async fn readiness(State(state): State<AppState>) -> Response {
    flag_response(state.health.readiness())
}

fn flag_response(flag: bool) -> Response {
    if flag {
        (StatusCode::OK, "OK").into_response()
    } else {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

/// POST `/update/{kind}/{id}/{value}` — upsert one metric from path
/// variables, answering the merged plaintext value.
pub async fn update_from_path(
    State(state): State<AppState>,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> Result<String, ApiError> {
    let incoming = ingest::metric_from_path(&kind, &id, &value)?;
    let merged = state.ingestor.set(incoming).await?;
    Ok(merged.value_string())
}

/// GET `/value/{kind}/{id}` — plaintext current value; unknown id or a
/// kind that does not match answers 404.
pub async fn value_from_path(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind: metron_core::MetricKind = kind
        .parse()
        .map_err(|_| ingest::ValidationError::UnknownKind(kind))?;

    match state.ingestor.get(&id).await? {
        Some(metric) if metric.kind == kind => Ok(metric.value_string().into_response()),
        _ => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

/// POST `/update/` — upsert one JSON metric, answering the merged metric.
pub async fn update_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let incoming = ingest::metric_from_json(&body)?;
    let merged = state.ingestor.set(incoming).await?;
    Ok(Json(merged))
}

/// POST `/value/` — look up the full metric for a JSON (id, kind) query.
pub async fn value_json(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let query = ingest::query_from_json(&body)?;

    match state.ingestor.get(&query.id).await? {
        Some(metric) if metric.kind == query.kind => Ok(Json(metric).into_response()),
        _ => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

/// POST `/updates/` — atomic batch upsert of a JSON array.
pub async fn updates_json(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let batch = ingest::batch_from_json(&body)?;
    state.ingestor.set_many(batch).await?;
    Ok(StatusCode::OK)
}
