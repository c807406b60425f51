//! Shared record store and blob store abstractions, plus the backends the
//! chat engine runs against.
//!
//! The record store holds JSON documents addressed by `(collection, id)`.
//! Every write is pushed in full to the record's subscribers; delivery is
//! at-least-once and subscribers must tolerate repeated snapshots.

pub mod blob;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod migrations;
pub mod patch;
pub mod queries;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde_json::Value;
use tokio::sync::mpsc;

pub use blob::{DiskBlobStore, MemoryBlobStore};
pub use database::Database;
pub use dispatcher::Dispatcher;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use patch::{Patch, PatchOp};
pub use sqlite::SqliteStore;

/// Address of one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub collection: String,
    pub id: String,
}

impl RecordKey {
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Notification delivered to a record subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEvent {
    /// Full current contents of the record, `None` if it does not exist.
    Snapshot(Option<Value>),
    /// The backend failed to produce a snapshot.
    Error(String),
}

/// Live subscription to one record. Dropping it unsubscribes.
pub struct Subscription {
    key: RecordKey,
    rx: mpsc::UnboundedReceiver<RecordEvent>,
}

impl Subscription {
    pub(crate) fn new(key: RecordKey, rx: mpsc::UnboundedReceiver<RecordEvent>) -> Self {
        Self { key, rx }
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Wait for the next notification. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<RecordEvent> {
        self.rx.recv().await
    }

    /// Take a notification that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<RecordEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

/// Document store shared by both chat participants.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Create or wholly replace a record. The record must be a JSON object.
    async fn set(&self, collection: &str, id: &str, record: Value) -> Result<()>;

    /// Apply a partial update. Fails with [`StoreError::NotFound`] if the record is absent.
    async fn update(&self, collection: &str, id: &str, patch: Patch) -> Result<()>;

    /// Append `element` to the array at `field`, creating the array if needed.
    ///
    /// Appends are atomic: concurrent callers each get their element
    /// inserted. Returns the array length after the append.
    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        element: Value,
    ) -> Result<usize>;

    /// Subscribe to a record. The current snapshot is delivered first.
    async fn subscribe(&self, collection: &str, id: &str) -> Result<Subscription>;
}

/// Progress of a blob upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Progress { bytes_done: u64, bytes_total: u64 },
    Complete { url: String },
}

/// Attachment storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `bytes` to `path`. The stream yields progress events and ends
    /// with [`UploadEvent::Complete`] on success.
    fn upload(&self, path: &str, bytes: Bytes) -> BoxStream<'static, Result<UploadEvent>>;

    async fn delete(&self, path: &str) -> Result<()>;
}
