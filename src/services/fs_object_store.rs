//! FilesystemObjectStore — local-disk backend for upload payloads.
//!
//! Objects live beneath `root/{shard}/{shard}/{key}` where the shards are the
//! first two bytes of `md5(key)`. Writes go to a temp file in the target
//! directory, are fsynced, then renamed into place. Composing a single source
//! is a rename.

use crate::services::object_store::{ByteStream, ObjectStore, ObjectStoreError, ObjectStoreResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Clone, Debug)]
pub struct FilesystemObjectStore {
    /// Base directory on disk where object payloads are stored.
    root: PathBuf,
}

impl FilesystemObjectStore {
    /// Create the store, making sure `root` exists.
    pub async fn new(root: impl Into<PathBuf>) -> ObjectStoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Rejects keys that could escape `root` or that contain control bytes.
    fn ensure_key_safe(key: &str) -> ObjectStoreResult<()> {
        let unsafe_key = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if unsafe_key {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Two-level shard directories for a key, as lowercase hex (00–ff).
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.root.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Final path of `key`, with its shard directories created.
    async fn prepare_path(&self, key: &str) -> ObjectStoreResult<PathBuf> {
        let file_path = self.object_path(key);
        let parent = file_path.parent().ok_or_else(|| {
            ObjectStoreError::Io(std::io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(parent).await?;
        Ok(file_path)
    }

    /// Create a temp file next to the final location of `key`.
    async fn create_temp(&self, key: &str) -> ObjectStoreResult<(PathBuf, PathBuf, File)> {
        let file_path = self.prepare_path(key).await?;
        let parent = file_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let file = File::create(&tmp_path).await?;
        Ok((file_path, tmp_path, file))
    }

    /// Flush, fsync and rename a finished temp file over `file_path`.
    async fn persist(file: &mut File, tmp_path: &Path, file_path: &Path) -> ObjectStoreResult<()> {
        file.flush().await?;
        file.sync_all().await?;
        if let Err(err) = fs::rename(tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(tmp_path, file_path).await?;
            } else {
                return Err(ObjectStoreError::Io(err));
            }
        }
        Ok(())
    }

    async fn copy_stream(file: &mut File, mut data: ByteStream) -> ObjectStoreResult<u64> {
        let mut size_bytes: u64 = 0;
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        Ok(size_bytes)
    }

    async fn concat_into(&self, dest: &str, paths: &[PathBuf]) -> ObjectStoreResult<u64> {
        let (file_path, tmp_path, mut file) = self.create_temp(dest).await?;
        let result = match Self::concat_files(&mut file, paths).await {
            Ok(size) => Self::persist(&mut file, &tmp_path, &file_path)
                .await
                .map(|_| size),
            Err(err) => Err(err),
        };
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }

    async fn concat_files(file: &mut File, sources: &[PathBuf]) -> ObjectStoreResult<u64> {
        let mut size_bytes: u64 = 0;
        for path in sources {
            let mut source = File::open(path).await?;
            size_bytes += tokio::io::copy(&mut source, file).await?;
        }
        Ok(size_bytes)
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn write(&self, key: &str, data: ByteStream) -> ObjectStoreResult<u64> {
        Self::ensure_key_safe(key)?;
        let (file_path, tmp_path, mut file) = self.create_temp(key).await?;

        let result = match Self::copy_stream(&mut file, data).await {
            Ok(size) => Self::persist(&mut file, &tmp_path, &file_path)
                .await
                .map(|_| size),
            Err(err) => Err(err),
        };
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }

        let size = result?;
        debug!("wrote {} bytes to object {}", size, key);
        Ok(size)
    }

    async fn compose(&self, dest: &str, sources: &[String]) -> ObjectStoreResult<u64> {
        Self::ensure_key_safe(dest)?;

        let mut failures = Vec::new();
        let mut paths = Vec::with_capacity(sources.len());
        for source in sources {
            if let Err(err) = Self::ensure_key_safe(source) {
                failures.push(err);
                continue;
            }
            let path = self.object_path(source);
            match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => paths.push(path),
                Ok(_) => failures.push(ObjectStoreError::NotFound(source.clone())),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    failures.push(ObjectStoreError::NotFound(source.clone()))
                }
                Err(err) => failures.push(ObjectStoreError::Io(err)),
            }
        }
        if !failures.is_empty() {
            return Err(ObjectStoreError::Multi(failures));
        }

        let size = if let [source] = paths.as_slice() {
            let file_path = self.prepare_path(dest).await?;
            let size = fs::metadata(source).await?.len();
            fs::rename(source, &file_path).await?;
            size
        } else {
            let size = self.concat_into(dest, &paths).await?;
            for source in sources {
                if let Err(err) = self.delete(source).await {
                    debug!("failed to remove composed source {}: {}", source, err);
                }
            }
            size
        };

        debug!(
            "composed {} sources into object {} ({} bytes)",
            sources.len(),
            dest,
            size
        );
        Ok(size)
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<ByteStream> {
        Self::ensure_key_safe(key)?;
        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound(key.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<()> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed object file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("object file {} already missing", file_path.display());
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }
        Ok(())
    }

    /// Write, read back and delete a probe file beneath the root.
    async fn health_check(&self) -> ObjectStoreResult<()> {
        let probe = self.root.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let contents = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if contents? != b"readyz" {
            return Err(ObjectStoreError::Io(std::io::Error::other(
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}
