use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::{BlobStore, UploadEvent};

/// Progress is reported once per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Blobs held in memory, addressed as `mem://<path>`.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.blobs.lock().await.contains_key(path)
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn upload(&self, path: &str, bytes: Bytes) -> BoxStream<'static, Result<UploadEvent>> {
        let blobs = self.blobs.clone();
        let path = path.to_string();
        Box::pin(async_stream::stream! {
            let total = bytes.len() as u64;
            let mut done = 0u64;
            for chunk in bytes.chunks(CHUNK_SIZE) {
                done += chunk.len() as u64;
                yield Ok::<_, StoreError>(UploadEvent::Progress { bytes_done: done, bytes_total: total });
            }
            blobs.lock().await.insert(path.clone(), bytes);
            yield Ok(UploadEvent::Complete { url: format!("mem://{}", path) });
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if self.blobs.lock().await.remove(path).is_none() {
            warn!("Blob {} already gone", path);
        }
        Ok(())
    }
}

/// Blobs stored as files under a root directory.
///
/// Each blob lives at `{root}/{path}`; its URL is
/// `{base_url}/o/{percent-encoded path}`.
pub struct DiskBlobStore {
    root: PathBuf,
    base_url: String,
}

impl DiskBlobStore {
    pub async fn new(root: PathBuf, base_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Blob storage directory: {}", root.display());
        Ok(Self {
            root,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a blob path below the root, rejecting anything that escapes it.
    pub fn file_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let clean = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/o/{}", self.base_url, urlencoding::encode(path))
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    fn upload(&self, path: &str, bytes: Bytes) -> BoxStream<'static, Result<UploadEvent>> {
        let target = self.file_path(path);
        let url = self.url_for(path);
        Box::pin(async_stream::stream! {
            let (target, mut file) = match create_blob_file(target).await {
                Ok(created) => created,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let total = bytes.len() as u64;
            let mut done = 0u64;
            for chunk in bytes.chunks(CHUNK_SIZE) {
                if let Err(e) = file.write_all(chunk).await {
                    drop(file);
                    remove_partial(&target).await;
                    yield Err(StoreError::Io(e));
                    return;
                }
                done += chunk.len() as u64;
                yield Ok(UploadEvent::Progress { bytes_done: done, bytes_total: total });
            }
            if let Err(e) = file.flush().await {
                drop(file);
                remove_partial(&target).await;
                yield Err(StoreError::Io(e));
                return;
            }

            yield Ok(UploadEvent::Complete { url });
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.file_path(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => {
                info!("Deleted blob {}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn create_blob_file(target: Result<PathBuf>) -> Result<(PathBuf, fs::File)> {
    let target = target?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    let file = fs::File::create(&target).await?;
    Ok((target, file))
}

/// A failed upload leaves nothing behind.
async fn remove_partial(target: &Path) {
    if let Err(e) = fs::remove_file(target).await {
        warn!("Could not remove partial blob {}: {}", target.display(), e);
    }
}
