//! HTTP handlers for the enqueue endpoint and upload status lookups.
//! Request bodies are streamed straight into the object store.

use crate::{
    errors::AppError,
    models::{metadata::UploadMetadata, upload::Upload},
    services::{
        enqueue_service::{EnqueueResponse, EnqueueService},
        object_store::ByteStream,
        request_classifier::EnqueueQuery,
    },
};
use axum::{
    Json,
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Serialize;
use std::io;

/// Body of a `202 Accepted` response. The id is a string for older clients.
#[derive(Debug, Serialize)]
pub struct EnqueueIdResponse {
    pub id: String,
}

impl IntoResponse for EnqueueResponse {
    fn into_response(self) -> Response {
        match self {
            EnqueueResponse::Accepted { id } => (
                StatusCode::ACCEPTED,
                Json(EnqueueIdResponse { id: id.to_string() }),
            )
                .into_response(),
            EnqueueResponse::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

/// `POST /upload` — single payload, multipart setup, part upload or finalize,
/// depending on the query parameters.
pub async fn enqueue_upload<M: UploadMetadata>(
    State(service): State<EnqueueService<M>>,
    request: Request,
) -> Result<EnqueueResponse, AppError> {
    let (parts, body) = request.into_parts();
    let Query(query) = Query::<EnqueueQuery>::try_from_uri(&parts.uri)
        .map_err(|err| AppError::bad_request(err.body_text()))?;

    let stream: ByteStream = Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(io::Error::other)),
    );

    Ok(service.enqueue(&parts, &query, stream).await?)
}

/// `GET /uploads/{id}` — current state of an upload record.
pub async fn get_upload<M: UploadMetadata>(
    State(service): State<EnqueueService<M>>,
    Path(id): Path<i64>,
) -> Result<Json<Upload<M>>, AppError> {
    Ok(Json(service.get_upload(id).await?))
}
