//! Extraction of caller metadata from a new upload request.
//!
//! The enqueue protocol never inspects metadata; the embedding service
//! supplies a [`MetadataExtractor`] that turns request parts into its own
//! payload type, or rejects the request with a status of its choosing.

use crate::models::metadata::{IndexMetadata, UploadMetadata};
use axum::http::{StatusCode, request::Parts};
use serde::Deserialize;
use thiserror::Error;

/// Rejection produced by a metadata extractor, carrying its own HTTP status.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExtractError {
    pub status: StatusCode,
    pub message: String,
}

impl ExtractError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }
}

pub trait MetadataExtractor<M: UploadMetadata>: Send + Sync + 'static {
    /// Build the metadata for a new upload from the request line and headers.
    fn extract(&self, request: &Parts) -> Result<M, ExtractError>;
}

impl<M, F> MetadataExtractor<M> for F
where
    M: UploadMetadata,
    F: Fn(&Parts) -> Result<M, ExtractError> + Send + Sync + 'static,
{
    fn extract(&self, request: &Parts) -> Result<M, ExtractError> {
        self(request)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexMetadataQuery {
    repository: Option<String>,
    commit: Option<String>,
    root: Option<String>,
    indexer_name: Option<String>,
    indexer_version: Option<String>,
}

/// Reads [`IndexMetadata`] from the `repository`, `commit`, `root`,
/// `indexerName` and `indexerVersion` query parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryMetadataExtractor;

impl MetadataExtractor<IndexMetadata> for QueryMetadataExtractor {
    fn extract(&self, request: &Parts) -> Result<IndexMetadata, ExtractError> {
        let query = axum::extract::Query::<IndexMetadataQuery>::try_from_uri(&request.uri)
            .map_err(|err| ExtractError::new(StatusCode::BAD_REQUEST, err.body_text()))?
            .0;

        let repository = query
            .repository
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ExtractError::new(StatusCode::BAD_REQUEST, "no repository supplied"))?;

        let commit = query
            .commit
            .ok_or_else(|| ExtractError::new(StatusCode::BAD_REQUEST, "no commit supplied"))?;
        if !is_commit_hash(&commit) {
            return Err(ExtractError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("commit `{}` must be a 40-character hexadecimal hash", commit),
            ));
        }

        Ok(IndexMetadata {
            repository,
            commit: commit.to_ascii_lowercase(),
            root: sanitize_root(query.root.as_deref().unwrap_or_default()),
            indexer: query.indexer_name.filter(|s| !s.is_empty()),
            indexer_version: query.indexer_version.filter(|s| !s.is_empty()),
        })
    }
}

fn is_commit_hash(commit: &str) -> bool {
    commit.len() == 40 && commit.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalizes a root directory to either "" or a path ending in `/`.
fn sanitize_root(root: &str) -> String {
    let trimmed = root.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
