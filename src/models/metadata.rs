//! Caller metadata captured when an upload record is created.
//!
//! The enqueue protocol treats metadata as opaque: any type satisfying
//! [`UploadMetadata`] can be threaded through and persisted as JSON.
//! [`IndexMetadata`] is the payload used by the bundled binary.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Bound for metadata payloads carried by upload records.
pub trait UploadMetadata: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> UploadMetadata for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Identity of a code-intelligence index payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IndexMetadata {
    /// Repository name as known to the embedding service (e.g. "github.com/foo/bar").
    pub repository: String,

    /// Full 40-character commit hash the index was generated for.
    pub commit: String,

    /// Directory within the repository the index covers. Empty for the repository root.
    #[serde(default)]
    pub root: String,

    pub indexer: Option<String>,
    pub indexer_version: Option<String>,
}
