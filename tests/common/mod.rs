#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use codeintel_upload::{
    models::{metadata::IndexMetadata, upload::Upload},
    routes::routes::routes,
    services::{
        enqueue_service::{EnqueueError, EnqueueService, OperationObserver},
        fs_object_store::FilesystemObjectStore,
        metadata_extractor::QueryMetadataExtractor,
        object_store::{ByteStream, ObjectStore, ObjectStoreError, ObjectStoreResult},
        request_classifier::OperationKind,
        sqlite_store::SqliteUploadStore,
        upload_store::{UploadStore, UploadStoreError, UploadStoreResult, UploadTransaction},
    },
};
use futures::TryStreamExt;
use serde_json::Value;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

/// Query string prefix carrying valid index metadata.
pub fn new_upload_query() -> String {
    format!(
        "repository=github.com/example/repo&commit={}&indexerName=scip-rust",
        COMMIT
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Write(String),
    Compose(String, Vec<String>),
}

/// Filesystem object store that records calls and can inject failures.
pub struct RecordingObjectStore {
    pub inner: FilesystemObjectStore,
    calls: Mutex<Vec<StoreCall>>,
    pub fail_writes: AtomicBool,
    pub fail_compose: AtomicBool,
}

impl RecordingObjectStore {
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn read(&self, key: &str) -> Vec<u8> {
        let chunks: Vec<Bytes> = self
            .inner
            .get(key)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        chunks.concat()
    }
}

#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn write(&self, key: &str, data: ByteStream) -> ObjectStoreResult<u64> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Write(key.to_string()));
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Io(std::io::Error::other(
                "injected write failure",
            )));
        }
        self.inner.write(key, data).await
    }

    async fn compose(&self, dest: &str, sources: &[String]) -> ObjectStoreResult<u64> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Compose(dest.to_string(), sources.to_vec()));
        if self.fail_compose.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Multi(vec![
                ObjectStoreError::Io(std::io::Error::other("injected compose failure")),
                ObjectStoreError::NotFound(sources[0].clone()),
            ]));
        }
        self.inner.compose(dest, sources).await
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<ByteStream> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<()> {
        self.inner.delete(key).await
    }
}

/// Faults injected into the upload store's state transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreFaults {
    /// `mark_failed` returns a database error.
    pub mark_failed_errors: bool,
    /// `mark_queued` reports that the record already left `uploading`.
    pub mark_queued_is_stale: bool,
}

/// SQLite upload store with injectable transition faults.
pub struct FaultyUploadStore {
    pub inner: SqliteUploadStore,
    pub faults: StoreFaults,
}

#[async_trait]
impl UploadStore<IndexMetadata> for FaultyUploadStore {
    async fn get_upload_by_id(
        &self,
        id: i64,
    ) -> UploadStoreResult<Option<Upload<IndexMetadata>>> {
        UploadStore::<IndexMetadata>::get_upload_by_id(&self.inner, id).await
    }

    async fn add_upload_part(&self, id: i64, index: u32) -> UploadStoreResult<()> {
        UploadStore::<IndexMetadata>::add_upload_part(&self.inner, id, index).await
    }

    async fn mark_queued(&self, id: i64, upload_size: i64) -> UploadStoreResult<bool> {
        if self.faults.mark_queued_is_stale {
            return Ok(false);
        }
        UploadStore::<IndexMetadata>::mark_queued(&self.inner, id, upload_size).await
    }

    async fn mark_failed(&self, id: i64, reason: &str) -> UploadStoreResult<bool> {
        if self.faults.mark_failed_errors {
            return Err(UploadStoreError::Sqlx(sqlx::Error::PoolClosed));
        }
        UploadStore::<IndexMetadata>::mark_failed(&self.inner, id, reason).await
    }

    async fn transact(&self) -> UploadStoreResult<Box<dyn UploadTransaction<IndexMetadata>>> {
        UploadStore::<IndexMetadata>::transact(&self.inner).await
    }
}

/// Observer that remembers every operation and whether it succeeded.
#[derive(Default)]
pub struct RecordingObserver {
    pub seen: Mutex<Vec<(OperationKind, bool)>>,
}

impl OperationObserver for RecordingObserver {
    fn observe(
        &self,
        operation: OperationKind,
        _elapsed: Duration,
        outcome: Result<(), &EnqueueError>,
    ) {
        self.seen.lock().unwrap().push((operation, outcome.is_ok()));
    }
}

pub struct TestServer {
    pub router: Router,
    pub service: EnqueueService<IndexMetadata>,
    pub uploads: SqliteUploadStore,
    pub objects: Arc<RecordingObjectStore>,
    pub observer: Arc<RecordingObserver>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_faults(StoreFaults::default()).await
    }

    /// A server whose upload store misbehaves as described by `faults`.
    pub async fn with_faults(faults: StoreFaults) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("uploads.db").display());
        let uploads = SqliteUploadStore::connect(&url, 5).await.unwrap();
        uploads.migrate().await.unwrap();

        let objects = Arc::new(RecordingObjectStore {
            inner: FilesystemObjectStore::new(dir.path().join("objects"))
                .await
                .unwrap(),
            calls: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_compose: AtomicBool::new(false),
        });

        let store = Arc::new(FaultyUploadStore {
            inner: uploads.clone(),
            faults,
        });

        let observer = Arc::new(RecordingObserver::default());
        let service = EnqueueService::new(
            store,
            objects.clone(),
            Arc::new(QueryMetadataExtractor),
        )
        .with_observer(observer.clone());
        let router = routes().with_state(service.clone());

        Self {
            router,
            service,
            uploads,
            objects,
            observer,
            _dir: dir,
        }
    }

    /// Whether an object exists, without recording a call.
    pub async fn object_exists(&self, key: &str) -> bool {
        self.objects.inner.get(key).await.is_ok()
    }

    pub async fn upload(&self, id: i64) -> Option<Upload<IndexMetadata>> {
        UploadStore::<IndexMetadata>::get_upload_by_id(&self.uploads, id)
            .await
            .unwrap()
    }

    /// Send a request and return its status and JSON body (`Null` when empty).
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: impl Into<Body>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(body.into()).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn post(&self, query: &str, body: impl Into<Body>) -> (StatusCode, Value) {
        self.send("POST", &format!("/upload?{}", query), &[], body)
            .await
    }

    /// Set up a multipart upload and return its id.
    pub async fn setup_multipart(&self, num_parts: u32) -> i64 {
        let (status, body) = self
            .post(
                &format!("{}&multiPart&numParts={}", new_upload_query(), num_parts),
                Body::empty(),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED, "setup failed: {}", body);
        parse_id(&body)
    }

    pub async fn upload_part(
        &self,
        id: i64,
        index: i64,
        data: &'static str,
    ) -> (StatusCode, Value) {
        self.post(&format!("uploadId={}&index={}", id, index), data)
            .await
    }

    pub async fn finalize(&self, id: i64) -> (StatusCode, Value) {
        self.post(&format!("uploadId={}&done", id), Body::empty())
            .await
    }
}

/// Parse the string id from a `202 Accepted` body.
pub fn parse_id(body: &Value) -> i64 {
    body.get("id")
        .and_then(Value::as_str)
        .expect("id should be a JSON string")
        .parse()
        .unwrap()
}
