//! Defines routes for the upload ingestion endpoint.
//!
//! ## Structure
//! - `POST /upload` — enqueue protocol; the query string selects the operation:
//!   - no `uploadId`, no `multiPart` — upload a single payload (`202`, `{"id": "..."}`)
//!   - no `uploadId`, `multiPart&numParts=N` — set up a multipart upload (`202`)
//!   - `uploadId=I&index=K` — upload part `K` (`204`)
//!   - `uploadId=I&done` — finalize a multipart upload (`204`)
//! - `GET /uploads/{id}` — upload record status
//! - `GET /healthz`, `GET /readyz` — liveness and readiness

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{enqueue_upload, get_upload},
    },
    models::metadata::UploadMetadata,
    services::enqueue_service::EnqueueService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. It carries `EnqueueService<M>` as shared state.
pub fn routes<M: UploadMetadata>() -> Router<EnqueueService<M>> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz::<M>))
        .route("/upload", post(enqueue_upload::<M>))
        .route("/uploads/{id}", get(get_upload::<M>))
}
