//! Attachment upload and storage path resolution.

use chrono::{DateTime, Utc};
use duet_store::{BlobStore, Result, StoreError, UploadEvent};
use duet_types::models::Attachment;
use futures_util::StreamExt;
use tracing::{debug, info};

const DEFAULT_MIME: &str = "application/octet-stream";

/// Blob path for a new upload: `images/<ms>_<name>` for images,
/// `files/<ms>_<name>` for everything else.
pub fn storage_path(name: &str, mime: &str, now: DateTime<Utc>) -> String {
    let folder = if mime.starts_with("image/") {
        "images"
    } else {
        "files"
    };
    format!("{}/{}_{}", folder, now.timestamp_millis(), name)
}

/// Upload a file and describe it as a message attachment.
pub async fn upload_attachment(
    blobs: &dyn BlobStore,
    name: &str,
    mime: &str,
    bytes: bytes::Bytes,
    now: DateTime<Utc>,
) -> Result<Attachment> {
    let path = storage_path(name, mime, now);
    let size = bytes.len() as u64;
    info!("Uploading {} ({} bytes)", path, size);

    let mut events = blobs.upload(&path, bytes);
    let mut url = None;
    while let Some(event) = events.next().await {
        match event? {
            UploadEvent::Progress {
                bytes_done,
                bytes_total,
            } => {
                let pct = if bytes_total == 0 {
                    100.0
                } else {
                    bytes_done as f64 * 100.0 / bytes_total as f64
                };
                debug!("Upload {} at {:.0}%", path, pct);
            }
            UploadEvent::Complete { url: done } => url = Some(done),
        }
    }

    let url = url.ok_or_else(|| StoreError::Upload(format!("upload of {} ended without a URL", path)))?;
    Ok(Attachment {
        url,
        name: name.to_string(),
        mime: if mime.is_empty() {
            DEFAULT_MIME.to_string()
        } else {
            mime.to_string()
        },
        size,
        path: Some(path),
    })
}

/// Blob path of an attachment: the stored `path`, else the percent-decoded
/// segment after `/o/` in its URL.
pub fn resolve_storage_path(attachment: &Attachment) -> Option<String> {
    if let Some(path) = attachment.path.as_deref().filter(|p| !p.is_empty()) {
        return Some(path.to_string());
    }

    let (_, rest) = attachment.url.split_once("/o/")?;
    let encoded = rest.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
    if encoded.is_empty() {
        return None;
    }
    urlencoding::decode(encoded).ok().map(|p| p.into_owned())
}
