//! Represents an upload record: one artifact being staged for processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};
use uuid::Uuid;

/// Lifecycle state of an upload record.
///
/// Transitions are monotonic: `Uploading` may move to `Queued` or `Failed`,
/// and neither terminal state moves again.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UploadState {
    Uploading,
    Queued,
    Failed,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Uploading => "uploading",
            UploadState::Queued => "queued",
            UploadState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadState::Uploading)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upload record, generic over the caller-defined metadata payload.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Upload<M> {
    /// Identifier assigned by the database on insert.
    pub id: i64,

    pub state: UploadState,

    /// Number of parts fixed at creation (1 for single-payload uploads).
    pub num_parts: u32,

    /// Part indices written to the object store, each in `0..num_parts`.
    pub uploaded_parts: BTreeSet<u32>,

    /// Caller-supplied size of the uncompressed payload. Informational only.
    pub uncompressed_size: Option<i64>,

    /// Bytes present in the object store once the record is queued.
    pub upload_size: Option<i64>,

    /// Diagnostic reason set when the record is marked failed.
    pub failure_message: Option<String>,

    pub uploaded_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Opaque caller metadata, never mutated after creation.
    pub metadata: M,
}

impl<M> Upload<M> {
    /// Number of part indices not yet recorded as uploaded.
    pub fn missing_parts(&self) -> usize {
        let present = self
            .uploaded_parts
            .iter()
            .filter(|index| **index < self.num_parts)
            .count();
        (self.num_parts as usize).saturating_sub(present)
    }
}

/// Values used to insert a new upload record.
#[derive(Clone, Debug)]
pub struct NewUpload<M> {
    pub num_parts: u32,
    pub uploaded_parts: BTreeSet<u32>,
    pub uncompressed_size: Option<i64>,
    pub metadata: M,
}

/// Object key of the final payload for an upload.
pub fn upload_key(id: i64) -> String {
    format!("upload-{}", id)
}

/// Object key of a single part of a multipart upload.
pub fn part_key(id: i64, index: u32) -> String {
    format!("upload-{}.{}", id, index)
}

/// Unique object key a single payload streams into before its record exists.
pub fn staging_key() -> String {
    format!("staging-{}", Uuid::new_v4())
}
