//! Investigation CRUD, chat history, user messages and runtime ingestion.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracecast_core::{
    DeletedPayload, Event, EventPayload, Investigation, InvestigationStatus, Message,
    MessageCompletePayload, MessageType, StartedPayload, StatusChangedPayload,
    new_investigation_id, new_message_id,
};
use tracing::{info, instrument};

use crate::errors::ApiError;
use crate::server::AppState;

/// `POST /investigations` body.
#[derive(Debug, Default, Deserialize)]
pub struct CreateInvestigation {
    /// Caller-chosen ID; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Mark the investigation running and emit `started`.
    #[serde(default)]
    pub start: bool,
}

/// `PUT /investigations/{id}/status` body.
#[derive(Debug, Deserialize)]
pub struct UpdateStatus {
    /// New status (`pending`, `running`, `completed`, `failed`, `cancelled`).
    pub status: String,
    /// Failure reason.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// `POST /investigations/{id}/message` body.
#[derive(Debug, Deserialize)]
pub struct PostMessage {
    /// Message text.
    pub content: String,
}

/// `POST /investigations/{id}/events` response.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Raw payloads accepted.
    pub accepted: usize,
    /// Sequences assigned to the resulting events.
    pub sequences: Vec<u64>,
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::invalid(format!("invalid request body: {e}")))
}

/// POST /investigations
#[instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Investigation>), ApiError> {
    let request: CreateInvestigation = if body.iter().all(u8::is_ascii_whitespace) {
        CreateInvestigation::default()
    } else {
        parse_json(&body)?
    };
    let id = match request.id {
        Some(id) if id.trim().is_empty() => return Err(ApiError::invalid("id must not be empty")),
        Some(id) => id,
        None => new_investigation_id(),
    };

    let _ = state.store.create(Investigation::new(&id)).await?;
    info!(investigation_id = %id, start = request.start, "investigation created");

    if request.start {
        let _ = state
            .pipeline
            .emit(Event::new(
                id.clone(),
                EventPayload::Started(StartedPayload {
                    message: Some("investigation started".into()),
                }),
            ))
            .await;
    }

    let investigation = state.store.get(&id).await?;
    Ok((StatusCode::CREATED, Json(investigation)))
}

/// GET /investigations
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Investigation>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

/// GET /investigations/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Investigation>, ApiError> {
    Ok(Json(state.store.get(&id).await?))
}

/// PUT /investigations/{id}/status
#[instrument(skip_all, fields(investigation_id = %id))]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Investigation>, ApiError> {
    let request: UpdateStatus = parse_json(&body)?;
    let status: InvestigationStatus = request.status.parse().map_err(ApiError::invalid)?;
    let _ = state.store.get(&id).await?;

    let _ = state
        .pipeline
        .emit(Event::new(
            id.clone(),
            EventPayload::StatusChanged(StatusChangedPayload {
                status,
                error_message: request.error_message,
            }),
        ))
        .await;
    Ok(Json(state.store.get(&id).await?))
}

/// DELETE /investigations/{id}
#[instrument(skip_all, fields(investigation_id = %id))]
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let _ = state.store.get(&id).await?;
    let _ = state
        .pipeline
        .emit(Event::new(id.clone(), EventPayload::Deleted(DeletedPayload {})))
        .await;
    state.store.delete(&id).await?;
    state.pipeline.forget(&id);
    info!("investigation deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /investigations/{id}/chat
pub async fn chat_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.store.history(&id).await?))
}

/// POST /investigations/{id}/message
#[instrument(skip_all, fields(investigation_id = %id))]
pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let request: PostMessage = parse_json(&body)?;
    let content = request.content.trim();
    if content.is_empty() {
        return Err(ApiError::invalid("content must not be empty"));
    }
    let _ = state.store.get(&id).await?;

    let message = Message::new(new_message_id(), &id, MessageType::User, content, Utc::now());
    let event = Event::at(
        id.clone(),
        message.timestamp,
        EventPayload::MessageComplete(MessageCompletePayload {
            message_id: message.id.clone(),
            content: message.content.clone(),
            message_type: MessageType::User,
            author: None,
            metadata: None,
        }),
    );
    let _ = state.pipeline.emit(event).await;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /investigations/{id}/events
#[instrument(skip_all, fields(investigation_id = %id))]
pub async fn ingest_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let payload: Value = parse_json(&body)?;
    let _ = state.store.get(&id).await?;

    let raws = match payload {
        Value::Array(items) => items,
        single => vec![single],
    };
    let mut sequences = Vec::new();
    for raw in &raws {
        sequences.extend(state.pipeline.ingest(&id, raw).await);
    }
    Ok(Json(IngestResponse {
        accepted: raws.len(),
        sequences,
    }))
}
