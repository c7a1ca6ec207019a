//! api.rs — Adaptador HTTP: ingestão (`POST /ingest`) e consulta (`GET /outages`)
//!
//! Só valida e encaminha. A ingestão publica na fila (mesmo caminho dos
//! eventos vindos do broker) e a consulta chama [`OutageQuery::find`].

use crate::consumer::IngestPublisher;
use crate::error::{StorageError, ValidationError};
use crate::query::OutageQuery;
use crate::storage::WindowStore;
use crate::types::{AggregatedWindow, OutageType, RawEvent, WindowQuery};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Estado compartilhado pelos handlers.
pub struct AppState<S> {
    pub publisher: Arc<dyn IngestPublisher>,
    pub query: OutageQuery<S>,
}

/// Corpo de `POST /ingest`. `timestamp` em segundos Unix.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(alias = "controllerId")]
    pub controller_id: Option<String>,
    #[serde(alias = "outageType", alias = "tvent_type")]
    pub outage_type: Option<String>,
    pub timestamp: Option<i64>,
}

impl IngestRequest {
    pub fn into_event(self) -> Result<RawEvent, ValidationError> {
        let controller_id = self
            .controller_id
            .ok_or(ValidationError::MissingField("controller_id"))?;
        let outage_type: OutageType = self
            .outage_type
            .ok_or(ValidationError::MissingField("outage_type"))?
            .parse()?;
        let timestamp = self
            .timestamp
            .ok_or(ValidationError::MissingField("timestamp"))?;
        let occurred_at = DateTime::<Utc>::from_timestamp(timestamp, 0)
            .ok_or_else(|| ValidationError::InvalidTimestamp(timestamp.to_string()))?;
        RawEvent::new(&controller_id, outage_type, occurred_at)
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub queued: bool,
}

/// Parâmetros de `GET /outages`.
#[derive(Debug, Deserialize)]
pub struct OutagesParams {
    #[serde(rename = "type")]
    pub outage_type: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(rename = "controllerId", alias = "controller_id")]
    pub controller_id: Option<String>,
}

fn parse_instant(field: &'static str, value: Option<String>) -> Result<DateTime<Utc>, ValidationError> {
    let value = value.ok_or(ValidationError::MissingField(field))?;
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp(value))
}

impl OutagesParams {
    pub fn into_query(self) -> Result<WindowQuery, ValidationError> {
        let outage_type: OutageType = self
            .outage_type
            .ok_or(ValidationError::MissingField("type"))?
            .parse()?;
        let start = parse_instant("start", self.start)?;
        let end = parse_instant("end", self.end)?;
        WindowQuery::new(outage_type, start, end, self.controller_id.as_deref())
    }
}

/// Erros convertidos em resposta HTTP.
#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Storage(StorageError),
    Unavailable(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Storage(e) if e.is_retryable() => {
                warn!("[HTTP] Conflito de transação na consulta: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            ApiError::Storage(e) => {
                error!("[HTTP] Erro de persistência: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "erro interno de persistência".to_string(),
                )
            }
            ApiError::Unavailable(reason) => {
                error!("[HTTP] Fila indisponível: {}", reason);
                (StatusCode::SERVICE_UNAVAILABLE, reason)
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

pub fn router<S>(state: Arc<AppState<S>>) -> Router
where
    S: WindowStore + 'static,
{
    Router::new()
        .route("/ingest", post(ingest::<S>))
        .route("/outages", get(find_outages::<S>))
        .with_state(state)
}

async fn ingest<S>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError>
where
    S: WindowStore + 'static,
{
    let Json(request) =
        body.map_err(|e| ValidationError::MalformedPayload(e.body_text()))?;
    let event = request.into_event()?;
    let tag = state
        .publisher
        .publish(&event)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    debug!(
        "[HTTP] Evento de {} / {} enfileirado em {} (mensagem {}).",
        event.controller_id,
        event.outage_type,
        state.publisher.queue_name(),
        tag
    );
    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            ok: true,
            queued: true,
        }),
    ))
}

async fn find_outages<S>(
    State(state): State<Arc<AppState<S>>>,
    params: Result<Query<OutagesParams>, QueryRejection>,
) -> Result<Json<Vec<AggregatedWindow>>, ApiError>
where
    S: WindowStore + 'static,
{
    let Query(params) =
        params.map_err(|e| ValidationError::MalformedPayload(e.body_text()))?;
    let query = params.into_query()?;
    let windows = state.query.find(&query).await?;
    Ok(Json(windows))
}
