//! Classifies an enqueue request into one of the four upload operations.
//!
//! New uploads (no `uploadId`) run the metadata extractor and become either a
//! single-payload upload or a multipart setup. Continuation requests load the
//! stored record, and every shape field (`numParts`, uploaded parts, sizes,
//! metadata) comes from that record rather than from the request. Records
//! that are already `queued` or `failed` accept no further parts.

use crate::{
    models::{metadata::UploadMetadata, upload::Upload},
    services::{
        enqueue_service::EnqueueError, metadata_extractor::MetadataExtractor,
        upload_store::UploadStore,
    },
};
use axum::http::{HeaderMap, request::Parts};
use serde::Deserialize;
use std::fmt;

/// Header carrying the caller-reported uncompressed payload size.
pub const UNCOMPRESSED_SIZE_HEADER: &str = "x-uncompressed-size";

/// Query parameters of an enqueue request.
///
/// `done` and `multiPart` are presence flags: `?done` and `?done=` both set them.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueQuery {
    pub upload_id: Option<i64>,
    pub index: Option<i64>,
    pub done: Option<String>,
    pub multi_part: Option<String>,
    pub num_parts: Option<i64>,
}

impl EnqueueQuery {
    pub fn is_done(&self) -> bool {
        self.done.is_some()
    }

    pub fn is_multipart(&self) -> bool {
        self.multi_part.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    UploadSinglePayload,
    SetupMultipart,
    UploadPart,
    FinalizeMultipart,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::UploadSinglePayload => "upload_single_payload",
            OperationKind::SetupMultipart => "setup_multipart",
            OperationKind::UploadPart => "upload_part",
            OperationKind::FinalizeMultipart => "finalize_multipart",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified request, ready for its handler.
#[derive(Debug, Clone)]
pub enum Operation<M> {
    UploadSinglePayload {
        uncompressed_size: Option<i64>,
        metadata: M,
    },
    SetupMultipart {
        num_parts: i64,
        uncompressed_size: Option<i64>,
        metadata: M,
    },
    UploadPart {
        upload: Upload<M>,
        index: i64,
    },
    FinalizeMultipart {
        upload: Upload<M>,
    },
}

impl<M> Operation<M> {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::UploadSinglePayload { .. } => OperationKind::UploadSinglePayload,
            Operation::SetupMultipart { .. } => OperationKind::SetupMultipart,
            Operation::UploadPart { .. } => OperationKind::UploadPart,
            Operation::FinalizeMultipart { .. } => OperationKind::FinalizeMultipart,
        }
    }
}

/// Parse the optional uncompressed-size header. A present but non-integer
/// value is rejected as unprocessable.
pub fn parse_uncompressed_size(headers: &HeaderMap) -> Result<Option<i64>, EnqueueError> {
    let Some(value) = headers.get(UNCOMPRESSED_SIZE_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(Some)
        .ok_or_else(|| {
            EnqueueError::Unprocessable(format!(
                "illegal {} header value `{}`",
                UNCOMPRESSED_SIZE_HEADER,
                String::from_utf8_lossy(value.as_bytes())
            ))
        })
}

/// Decide which operation a request asks for, loading the stored record for
/// continuation requests.
pub async fn classify<M: UploadMetadata>(
    request: &Parts,
    query: &EnqueueQuery,
    uploads: &dyn UploadStore<M>,
    extractor: &dyn MetadataExtractor<M>,
) -> Result<Operation<M>, EnqueueError> {
    let uncompressed_size = parse_uncompressed_size(&request.headers)?;

    let Some(upload_id) = query.upload_id else {
        let metadata = extractor.extract(request)?;
        return Ok(if query.is_multipart() {
            Operation::SetupMultipart {
                num_parts: query.num_parts.unwrap_or(0),
                uncompressed_size,
                metadata,
            }
        } else {
            Operation::UploadSinglePayload {
                uncompressed_size,
                metadata,
            }
        });
    };

    let upload = uploads
        .get_upload_by_id(upload_id)
        .await?
        .ok_or(EnqueueError::NotFound(upload_id))?;

    if query.index.is_none() && !query.is_done() {
        return Err(EnqueueError::Unprocessable(
            "no upload operation matches the supplied parameters".into(),
        ));
    }
    if upload.state.is_terminal() {
        return Err(EnqueueError::Unprocessable(format!(
            "upload {} is already {}",
            upload.id, upload.state
        )));
    }

    Ok(match query.index {
        Some(index) => Operation::UploadPart { upload, index },
        None => Operation::FinalizeMultipart { upload },
    })
}
