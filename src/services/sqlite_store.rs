//! SqliteUploadStore — upload records backed by SQLite.
//!
//! Records live in `lsif_uploads`; uploaded part indices live in
//! `lsif_upload_parts` keyed by `(upload_id, part_index)`, so recording the
//! same part twice leaves a single row. Metadata is stored as JSON text.

use crate::{
    models::{
        metadata::UploadMetadata,
        upload::{NewUpload, Upload, UploadState},
    },
    services::upload_store::{
        UploadStore, UploadStoreError, UploadStoreResult, UploadTransaction,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    FromRow, Sqlite, SqliteConnection, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{collections::BTreeSet, str::FromStr, sync::Arc, time::Duration};
use tracing::debug;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct SqliteUploadStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

#[derive(FromRow)]
struct UploadRow {
    id: i64,
    state: UploadState,
    num_parts: i64,
    uncompressed_size: Option<i64>,
    upload_size: Option<i64>,
    failure_message: Option<String>,
    metadata: String,
    uploaded_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl SqliteUploadStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open a pool against `database_url`, creating the database file if needed.
    pub async fn connect(database_url: &str, max_connections: u32) -> UploadStoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> UploadStoreResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

fn to_u32(column: &'static str, value: i64) -> UploadStoreResult<u32> {
    u32::try_from(value).map_err(|_| UploadStoreError::OutOfRange { column, value })
}

async fn insert_upload<M: UploadMetadata>(
    conn: &mut SqliteConnection,
    upload: NewUpload<M>,
) -> UploadStoreResult<i64> {
    let metadata = serde_json::to_string(&upload.metadata)?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO lsif_uploads (state, num_parts, uncompressed_size, metadata, uploaded_at)
         VALUES ('uploading', ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(i64::from(upload.num_parts))
    .bind(upload.uncompressed_size)
    .bind(metadata)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    for index in &upload.uploaded_parts {
        add_upload_part(&mut *conn, id, *index).await?;
    }

    debug!("inserted upload {} with {} parts", id, upload.num_parts);
    Ok(id)
}

async fn add_upload_part(
    conn: &mut SqliteConnection,
    id: i64,
    index: u32,
) -> UploadStoreResult<()> {
    sqlx::query(
        "INSERT INTO lsif_upload_parts (upload_id, part_index)
         SELECT id, ? FROM lsif_uploads WHERE id = ?
         ON CONFLICT (upload_id, part_index) DO NOTHING",
    )
    .bind(i64::from(index))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn mark_queued(
    conn: &mut SqliteConnection,
    id: i64,
    upload_size: i64,
) -> UploadStoreResult<bool> {
    let result = sqlx::query(
        "UPDATE lsif_uploads SET state = 'queued', upload_size = ?
         WHERE id = ? AND state = 'uploading'",
    )
    .bind(upload_size)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl<M: UploadMetadata> UploadStore<M> for SqliteUploadStore {
    async fn get_upload_by_id(&self, id: i64) -> UploadStoreResult<Option<Upload<M>>> {
        let row = sqlx::query_as::<_, UploadRow>(
            "SELECT id, state, num_parts, uncompressed_size, upload_size, failure_message,
                    metadata, uploaded_at, finished_at
             FROM lsif_uploads WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let part_rows: Vec<i64> = sqlx::query_scalar(
            "SELECT part_index FROM lsif_upload_parts WHERE upload_id = ? ORDER BY part_index",
        )
        .bind(id)
        .fetch_all(&*self.db)
        .await?;
        let uploaded_parts = part_rows
            .into_iter()
            .map(|index| to_u32("part_index", index))
            .collect::<UploadStoreResult<BTreeSet<u32>>>()?;

        Ok(Some(Upload {
            id: row.id,
            state: row.state,
            num_parts: to_u32("num_parts", row.num_parts)?,
            uploaded_parts,
            uncompressed_size: row.uncompressed_size,
            upload_size: row.upload_size,
            failure_message: row.failure_message,
            uploaded_at: row.uploaded_at,
            finished_at: row.finished_at,
            metadata: serde_json::from_str(&row.metadata)?,
        }))
    }

    async fn add_upload_part(&self, id: i64, index: u32) -> UploadStoreResult<()> {
        let mut conn = self.db.acquire().await?;
        add_upload_part(&mut *conn, id, index).await
    }

    async fn mark_queued(&self, id: i64, upload_size: i64) -> UploadStoreResult<bool> {
        let mut conn = self.db.acquire().await?;
        mark_queued(&mut *conn, id, upload_size).await
    }

    async fn mark_failed(&self, id: i64, reason: &str) -> UploadStoreResult<bool> {
        let result = sqlx::query(
            "UPDATE lsif_uploads
             SET state = 'failed',
                 finished_at = ?,
                 failure_message = ?,
                 num_failures = num_failures + 1
             WHERE id = ? AND state = 'uploading'",
        )
        .bind(Utc::now())
        .bind(reason)
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transact(&self) -> UploadStoreResult<Box<dyn UploadTransaction<M>>> {
        let tx = self.db.begin().await?;
        Ok(Box::new(SqliteUploadTransaction { tx }))
    }

    async fn health_check(&self) -> UploadStoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// A SQLite transaction; rolled back on drop unless committed.
pub struct SqliteUploadTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl<M: UploadMetadata> UploadTransaction<M> for SqliteUploadTransaction {
    async fn insert_upload(&mut self, upload: NewUpload<M>) -> UploadStoreResult<i64> {
        insert_upload(&mut *self.tx, upload).await
    }

    async fn mark_queued(&mut self, id: i64, upload_size: i64) -> UploadStoreResult<bool> {
        mark_queued(&mut *self.tx, id, upload_size).await
    }

    async fn commit(self: Box<Self>) -> UploadStoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::IndexMetadata;

    async fn test_store(dir: &tempfile::TempDir) -> SqliteUploadStore {
        let url = format!("sqlite://{}", dir.path().join("uploads.db").display());
        let store = SqliteUploadStore::connect(&url, 5).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn metadata() -> IndexMetadata {
        IndexMetadata {
            repository: "github.com/example/repo".into(),
            commit: "a".repeat(40),
            root: "lib/".into(),
            indexer: Some("scip-rust".into()),
            indexer_version: None,
        }
    }

    async fn insert(store: &SqliteUploadStore, num_parts: u32, parts: &[u32]) -> i64 {
        let mut tx = UploadStore::<IndexMetadata>::transact(store).await.unwrap();
        let id = tx
            .insert_upload(NewUpload {
                num_parts,
                uploaded_parts: parts.iter().copied().collect(),
                uncompressed_size: Some(1024),
                metadata: metadata(),
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        id
    }

    async fn get(store: &SqliteUploadStore, id: i64) -> Option<Upload<IndexMetadata>> {
        UploadStore::<IndexMetadata>::get_upload_by_id(store, id)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let id = insert(&store, 3, &[]).await;
        let upload = get(&store, id).await.unwrap();

        assert_eq!(upload.id, id);
        assert_eq!(upload.state, UploadState::Uploading);
        assert_eq!(upload.num_parts, 3);
        assert!(upload.uploaded_parts.is_empty());
        assert_eq!(upload.uncompressed_size, Some(1024));
        assert_eq!(upload.upload_size, None);
        assert_eq!(upload.metadata, metadata());
    }

    #[tokio::test]
    async fn test_get_missing_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        assert!(get(&store, 42).await.is_none());
    }

    #[tokio::test]
    async fn test_add_upload_part_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let id = insert(&store, 3, &[]).await;

        for index in [2, 0, 2, 2] {
            UploadStore::<IndexMetadata>::add_upload_part(&store, id, index)
                .await
                .unwrap();
        }

        let upload = get(&store, id).await.unwrap();
        assert_eq!(upload.uploaded_parts, BTreeSet::from([0, 2]));
        assert_eq!(upload.missing_parts(), 1);
    }

    #[tokio::test]
    async fn test_add_upload_part_for_missing_upload_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        UploadStore::<IndexMetadata>::add_upload_part(&store, 99, 0)
            .await
            .unwrap();
        assert!(get(&store, 99).await.is_none());
    }

    #[tokio::test]
    async fn test_mark_queued_only_from_uploading() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let id = insert(&store, 1, &[0]).await;

        assert!(UploadStore::<IndexMetadata>::mark_queued(&store, id, 512).await.unwrap());
        assert!(!UploadStore::<IndexMetadata>::mark_failed(&store, id, "late").await.unwrap());
        assert!(!UploadStore::<IndexMetadata>::mark_queued(&store, id, 1).await.unwrap());

        let upload = get(&store, id).await.unwrap();
        assert_eq!(upload.state, UploadState::Queued);
        assert_eq!(upload.upload_size, Some(512));
        assert_eq!(upload.failure_message, None);
    }

    #[tokio::test]
    async fn test_mark_failed_records_reason() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let id = insert(&store, 2, &[]).await;

        assert!(UploadStore::<IndexMetadata>::mark_failed(&store, id, "disk full").await.unwrap());

        let upload = get(&store, id).await.unwrap();
        assert_eq!(upload.state, UploadState::Failed);
        assert_eq!(upload.failure_message.as_deref(), Some("disk full"));
        assert!(upload.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let id = {
            let mut tx = UploadStore::<IndexMetadata>::transact(&store).await.unwrap();
            tx.insert_upload(NewUpload {
                num_parts: 1,
                uploaded_parts: BTreeSet::from([0]),
                uncompressed_size: None,
                metadata: metadata(),
            })
            .await
            .unwrap()
        };

        assert!(get(&store, id).await.is_none());
    }

    #[tokio::test]
    async fn test_transaction_marks_queued_before_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let mut tx = UploadStore::<IndexMetadata>::transact(&store).await.unwrap();
        let id = tx
            .insert_upload(NewUpload {
                num_parts: 1,
                uploaded_parts: BTreeSet::from([0]),
                uncompressed_size: None,
                metadata: metadata(),
            })
            .await
            .unwrap();
        assert!(tx.mark_queued(id, 77).await.unwrap());
        tx.commit().await.unwrap();

        let upload = get(&store, id).await.unwrap();
        assert_eq!(upload.state, UploadState::Queued);
        assert_eq!(upload.uploaded_parts, BTreeSet::from([0]));
        assert_eq!(upload.upload_size, Some(77));
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        UploadStore::<IndexMetadata>::health_check(&store).await.unwrap();
    }
}
