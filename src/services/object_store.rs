//! Object store abstraction used to stage upload payloads.
//!
//! Implementations must make `write` for a given key idempotent (last writer
//! wins) and must perform `compose` without handing the source bytes back to
//! the caller.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, pin::Pin};
use thiserror::Error;

/// A boxed stream of byte chunks, used for both request bodies and reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("{} object store errors occurred", .0.len())]
    Multi(Vec<ObjectStoreError>),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ObjectStoreError {
    /// Returns the first underlying error of an aggregate, recursively.
    ///
    /// Non-aggregate errors are their own root cause.
    pub fn root_cause(&self) -> &ObjectStoreError {
        match self {
            ObjectStoreError::Multi(errors) => match errors.first() {
                Some(first) => first.root_cause(),
                None => self,
            },
            other => other,
        }
    }
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Stream `data` into the object at `key`, replacing any existing object.
    ///
    /// Returns the number of bytes written.
    async fn write(&self, key: &str, data: ByteStream) -> ObjectStoreResult<u64>;

    /// Concatenate `sources`, in the order given, into the object at `dest`.
    ///
    /// Returns the size of the composed object.
    async fn compose(&self, dest: &str, sources: &[String]) -> ObjectStoreResult<u64>;

    /// Open the object at `key` as a byte stream.
    async fn get(&self, key: &str) -> ObjectStoreResult<ByteStream>;

    /// Remove the object at `key`. Missing objects are not an error.
    async fn delete(&self, key: &str) -> ObjectStoreResult<()>;

    /// Verify the backend can accept writes.
    async fn health_check(&self) -> ObjectStoreResult<()> {
        Ok(())
    }
}
