//! Database abstraction over upload records.
//!
//! Writes that must commit together go through an [`UploadTransaction`]
//! obtained from [`UploadStore::transact`]. Dropping a transaction without
//! calling `commit` rolls it back.

use crate::models::{
    metadata::UploadMetadata,
    upload::{NewUpload, Upload},
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadStoreError {
    #[error("stored metadata could not be decoded: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("stored value `{column}` is out of range: {value}")]
    OutOfRange { column: &'static str, value: i64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type UploadStoreResult<T> = Result<T, UploadStoreError>;

#[async_trait]
pub trait UploadStore<M: UploadMetadata>: Send + Sync + 'static {
    /// Fetch an upload with its recorded parts. `None` if no such record exists.
    async fn get_upload_by_id(&self, id: i64) -> UploadStoreResult<Option<Upload<M>>>;

    /// Record `index` as uploaded. Repeating an index is a no-op.
    async fn add_upload_part(&self, id: i64, index: u32) -> UploadStoreResult<()>;

    /// Move an `uploading` record to `queued` with its final size.
    ///
    /// Returns `false` when the record was not in the `uploading` state.
    async fn mark_queued(&self, id: i64, upload_size: i64) -> UploadStoreResult<bool>;

    /// Move an `uploading` record to `failed` with a diagnostic reason.
    ///
    /// Returns `false` when the record was not in the `uploading` state.
    async fn mark_failed(&self, id: i64, reason: &str) -> UploadStoreResult<bool>;

    /// Begin a transaction.
    async fn transact(&self) -> UploadStoreResult<Box<dyn UploadTransaction<M>>>;

    /// Verify the database is reachable.
    async fn health_check(&self) -> UploadStoreResult<()> {
        Ok(())
    }
}

/// Writes that commit or roll back as a unit.
#[async_trait]
pub trait UploadTransaction<M: UploadMetadata>: Send {
    /// Insert a new `uploading` record and return its generated id.
    async fn insert_upload(&mut self, upload: NewUpload<M>) -> UploadStoreResult<i64>;

    /// Same as [`UploadStore::mark_queued`], inside this transaction.
    async fn mark_queued(&mut self, id: i64, upload_size: i64) -> UploadStoreResult<bool>;

    async fn commit(self: Box<Self>) -> UploadStoreResult<()>;
}
