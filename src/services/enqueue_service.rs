//! EnqueueService — stages upload payloads and drives upload records to `queued`.
//!
//! A request is classified (see `request_classifier`) and then handled by one
//! of four operations:
//! - **upload single payload**: stream to a staging object, then insert, move
//!   it to `upload-{id}` and mark queued inside one database transaction
//! - **setup multipart**: insert a record expecting `numParts` parts
//! - **upload part**: write `upload-{id}.{index}` and record the index
//! - **finalize multipart**: compose all parts into `upload-{id}` and mark queued
//!
//! A record only reaches `queued` once its bytes are present in the object
//! store. Object store failures during part upload or finalize move the record
//! to `failed` on a best-effort basis; the store error is always what the caller sees.

use crate::{
    models::{
        metadata::UploadMetadata,
        upload::{NewUpload, Upload, part_key, staging_key, upload_key},
    },
    services::{
        metadata_extractor::{ExtractError, MetadataExtractor},
        object_store::{ByteStream, ObjectStore, ObjectStoreError},
        request_classifier::{self, EnqueueQuery, Operation, OperationKind},
        upload_store::{UploadStore, UploadStoreError},
    },
};
use axum::http::request::Parts;
use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("{0}")]
    Validation(String),
    #[error("upload {0} not found")]
    NotFound(i64),
    #[error("{0}")]
    Unprocessable(String),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("database error: {0}")]
    Database(#[from] UploadStoreError),
}

pub type EnqueueResult<T> = Result<T, EnqueueError>;

/// Outcome of a successful enqueue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResponse {
    /// A new upload record was created.
    Accepted { id: i64 },
    /// An existing upload record was advanced.
    NoContent,
}

/// Hook invoked around every classified operation.
pub trait OperationObserver: Send + Sync + 'static {
    fn observe(
        &self,
        operation: OperationKind,
        elapsed: Duration,
        outcome: Result<(), &EnqueueError>,
    );
}

/// Logs each operation's duration and outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl OperationObserver for TracingObserver {
    fn observe(
        &self,
        operation: OperationKind,
        elapsed: Duration,
        outcome: Result<(), &EnqueueError>,
    ) {
        let elapsed_ms = elapsed.as_millis() as u64;
        match outcome {
            Ok(()) => info!(operation = %operation, elapsed_ms, "upload operation succeeded"),
            Err(err) => {
                warn!(operation = %operation, elapsed_ms, error = %err, "upload operation failed")
            }
        }
    }
}

pub struct EnqueueService<M: UploadMetadata> {
    uploads: Arc<dyn UploadStore<M>>,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn MetadataExtractor<M>>,
    observer: Arc<dyn OperationObserver>,
}

impl<M: UploadMetadata> Clone for EnqueueService<M> {
    fn clone(&self) -> Self {
        Self {
            uploads: self.uploads.clone(),
            objects: self.objects.clone(),
            extractor: self.extractor.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl<M: UploadMetadata> EnqueueService<M> {
    pub fn new(
        uploads: Arc<dyn UploadStore<M>>,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn MetadataExtractor<M>>,
    ) -> Self {
        Self {
            uploads,
            objects,
            extractor,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the default [`TracingObserver`].
    pub fn with_observer(mut self, observer: Arc<dyn OperationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn uploads(&self) -> &Arc<dyn UploadStore<M>> {
        &self.uploads
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    /// Classify and execute one enqueue request.
    pub async fn enqueue(
        &self,
        request: &Parts,
        query: &EnqueueQuery,
        body: ByteStream,
    ) -> EnqueueResult<EnqueueResponse> {
        let operation = request_classifier::classify(
            request,
            query,
            self.uploads.as_ref(),
            self.extractor.as_ref(),
        )
        .await?;

        let kind = operation.kind();
        let started = Instant::now();
        let result = self.execute(operation, body).await;
        self.observer
            .observe(kind, started.elapsed(), result.as_ref().map(|_| ()));
        result
    }

    async fn execute(
        &self,
        operation: Operation<M>,
        body: ByteStream,
    ) -> EnqueueResult<EnqueueResponse> {
        match operation {
            Operation::UploadSinglePayload {
                uncompressed_size,
                metadata,
            } => {
                let id = self
                    .upload_single_payload(uncompressed_size, metadata, body)
                    .await?;
                Ok(EnqueueResponse::Accepted { id })
            }
            Operation::SetupMultipart {
                num_parts,
                uncompressed_size,
                metadata,
            } => {
                let id = self
                    .setup_multipart(num_parts, uncompressed_size, metadata)
                    .await?;
                Ok(EnqueueResponse::Accepted { id })
            }
            Operation::UploadPart { upload, index } => {
                self.upload_part(&upload, index, body).await?;
                Ok(EnqueueResponse::NoContent)
            }
            Operation::FinalizeMultipart { upload } => {
                self.finalize_multipart(&upload).await?;
                Ok(EnqueueResponse::NoContent)
            }
        }
    }

    /// Fetch an upload record for status reporting.
    pub async fn get_upload(&self, id: i64) -> EnqueueResult<Upload<M>> {
        self.uploads
            .get_upload_by_id(id)
            .await?
            .ok_or(EnqueueError::NotFound(id))
    }

    /// Stream the body to a staging object, then insert a one-part record,
    /// move the staging object to `upload-{id}` and mark the record queued in
    /// one database transaction. The body is never read while that
    /// transaction holds the write lock.
    pub async fn upload_single_payload(
        &self,
        uncompressed_size: Option<i64>,
        metadata: M,
        body: ByteStream,
    ) -> EnqueueResult<i64> {
        let staging = staging_key();
        self.objects.write(&staging, body).await?;

        match self
            .commit_single_payload(&staging, uncompressed_size, metadata)
            .await
        {
            Ok(id) => Ok(id),
            Err(err) => {
                self.discard(&staging).await;
                Err(err)
            }
        }
    }

    async fn commit_single_payload(
        &self,
        staging: &str,
        uncompressed_size: Option<i64>,
        metadata: M,
    ) -> EnqueueResult<i64> {
        let mut tx = self.uploads.transact().await?;
        let id = tx
            .insert_upload(NewUpload {
                num_parts: 1,
                uploaded_parts: BTreeSet::from([0]),
                uncompressed_size,
                metadata,
            })
            .await?;

        let key = upload_key(id);
        let size = self.objects.compose(&key, &[staging.to_string()]).await?;
        let committed = match tx.mark_queued(id, to_upload_size(size)).await {
            Ok(_) => tx.commit().await,
            Err(err) => Err(err),
        };
        if let Err(err) = committed {
            self.discard(&key).await;
            return Err(err.into());
        }

        info!("upload {} queued with {} bytes", id, size);
        Ok(id)
    }

    /// Insert a record that expects `num_parts` parts. No object is written.
    pub async fn setup_multipart(
        &self,
        num_parts: i64,
        uncompressed_size: Option<i64>,
        metadata: M,
    ) -> EnqueueResult<i64> {
        let num_parts = u32::try_from(num_parts)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                EnqueueError::Validation(format!("illegal number of parts: {}", num_parts))
            })?;

        let mut tx = self.uploads.transact().await?;
        let id = tx
            .insert_upload(NewUpload {
                num_parts,
                uploaded_parts: BTreeSet::new(),
                uncompressed_size,
                metadata,
            })
            .await?;
        tx.commit().await?;

        info!("upload {} created, expecting {} parts", id, num_parts);
        Ok(id)
    }

    /// Write one part to `upload-{id}.{index}` and record it as uploaded.
    pub async fn upload_part(
        &self,
        upload: &Upload<M>,
        index: i64,
        body: ByteStream,
    ) -> EnqueueResult<()> {
        let index = u32::try_from(index)
            .ok()
            .filter(|i| *i < upload.num_parts)
            .ok_or_else(|| {
                EnqueueError::Validation(format!(
                    "illegal part index: {} is outside the range [0, {})",
                    index, upload.num_parts
                ))
            })?;

        let key = part_key(upload.id, index);
        let size = match self.objects.write(&key, body).await {
            Ok(size) => size,
            Err(err) => {
                self.mark_failed(upload.id, &err).await;
                return Err(err.into());
            }
        };

        self.uploads.add_upload_part(upload.id, index).await?;
        debug!("upload {} part {} stored ({} bytes)", upload.id, index, size);
        Ok(())
    }

    /// Compose every part, in index order, into `upload-{id}` and mark the
    /// record queued. Rejected without side effects while parts are missing.
    pub async fn finalize_multipart(&self, upload: &Upload<M>) -> EnqueueResult<()> {
        let missing = upload.missing_parts();
        if missing > 0 {
            return Err(EnqueueError::Validation(format!(
                "upload is missing {} parts",
                missing
            )));
        }

        let sources = (0..upload.num_parts)
            .map(|index| part_key(upload.id, index))
            .collect::<Vec<_>>();

        let size = match self.objects.compose(&upload_key(upload.id), &sources).await {
            Ok(size) => size,
            Err(err) => {
                self.mark_failed(upload.id, &err).await;
                return Err(err.into());
            }
        };

        if !self.uploads.mark_queued(upload.id, to_upload_size(size)).await? {
            self.discard(&upload_key(upload.id)).await;
            return Err(EnqueueError::Unprocessable(format!(
                "upload {} is no longer uploading",
                upload.id
            )));
        }

        info!("upload {} queued with {} bytes", upload.id, size);
        Ok(())
    }

    /// Best-effort removal of an object no record points at.
    async fn discard(&self, key: &str) {
        if let Err(err) = self.objects.delete(key).await {
            warn!("failed to remove object {}: {}", key, err);
        }
    }

    /// Best-effort transition to `failed`. A failure here is logged, never returned.
    async fn mark_failed(&self, id: i64, cause: &ObjectStoreError) {
        let reason = failure_reason(cause);
        match self.uploads.mark_failed(id, &reason).await {
            Ok(true) => warn!("upload {} marked failed: {}", id, reason),
            Ok(false) => debug!("upload {} already terminal, not marked failed", id),
            Err(err) => error!("failed to mark upload {} as failed: {}", id, err),
        }
    }
}

/// Human-readable failure message for an object store error, using the first
/// underlying error of an aggregate.
pub fn failure_reason(err: &ObjectStoreError) -> String {
    format!("upload failed: {}", err.root_cause())
}

fn to_upload_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}
