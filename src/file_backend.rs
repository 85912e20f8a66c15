// File-based Key-Value Backend
// One file per key under `<root>/entries`, written through a temp file and an atomic rename.
// Conditional writes are serialized by a process-wide async mutex, so the compare-and-set
// guarantee holds for every writer sharing this `FileBackend` instance.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::contracts::KeyValueBackend;
use crate::error::{StoreError, StoreResult};

/// Directory-backed store
pub struct FileBackend {
    /// Root directory for the store
    root: PathBuf,
    /// Serializes every mutation so compare-and-set is atomic
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Open (or create) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let backend = Self {
            root: root.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        };
        backend.ensure_directories().await?;
        info!("Opened file backend at {}", backend.root.display());
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn ensure_directories(&self) -> Result<()> {
        for path in [self.root.join("entries"), self.root.join("tmp")] {
            fs::create_dir_all(&path)
                .await
                .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        }
        self.sweep_temp_files().await
    }

    /// Remove temp files abandoned by interrupted writes
    async fn sweep_temp_files(&self) -> Result<()> {
        let tmp_dir = self.root.join("tmp");
        let mut entries = fs::read_dir(&tmp_dir)
            .await
            .with_context(|| format!("Failed to list directory: {}", tmp_dir.display()))?;

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!("Failed to remove stale temp file {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!("Removed {} stale temp files from {}", removed, tmp_dir.display());
        }
        Ok(())
    }

    /// Keys may contain separators and arbitrary characters, so file names are hex-encoded
    fn entry_path(&self, key: &str) -> PathBuf {
        self.root
            .join("entries")
            .join(format!("{}.bin", hex::encode(key.as_bytes())))
    }

    async fn read_entry(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.entry_path(key);
        match fs::read(&path).await {
            Ok(content) => Ok(Some(Bytes::from(content))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read entry: {}", path.display())),
        }
    }

    async fn write_entry(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.entry_path(key);
        let tmp_path = self.root.join("tmp").join(format!("{}.tmp", Uuid::new_v4()));

        let written = match fs::write(&tmp_path, value).await {
            Ok(()) => fs::rename(&tmp_path, &path)
                .await
                .with_context(|| format!("Failed to move entry into place: {}", path.display())),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to write temp file: {}", tmp_path.display())),
        };
        if written.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        written?;

        debug!("Wrote {} bytes for key {}", value.len(), key);
        Ok(())
    }

    async fn remove_entry(&self, key: &str) -> Result<bool> {
        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove entry: {}", path.display())),
        }
    }
}

fn backend_error(operation: &'static str) -> impl FnOnce(anyhow::Error) -> StoreError {
    move |e| StoreError::backend(operation, format!("{e:#}"))
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.read_entry(key).await.map_err(backend_error("get"))
    }

    async fn set(&self, key: &str, value: Bytes) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_entry(key, &value)
            .await
            .map_err(backend_error("set"))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        self.remove_entry(key).await.map_err(backend_error("delete"))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Bytes,
    ) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;

        let current = self
            .read_entry(key)
            .await
            .map_err(backend_error("compare_and_set"))?;
        if current.as_deref() != expected {
            return Ok(false);
        }

        self.write_entry(key, &value)
            .await
            .map_err(backend_error("compare_and_set"))?;
        Ok(true)
    }
}

/// Create a file backend rooted at `data_dir`
pub async fn create_file_backend(data_dir: impl AsRef<Path>) -> Result<FileBackend> {
    FileBackend::open(data_dir).await
}
