#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use duet_store::{
    BlobStore, MemoryBlobStore, MemoryStore, Patch, PatchOp, RecordStore, StoreError, Subscription,
    UploadEvent,
};
use serde_json::Value;
use duet_sync::{ConversationContext, ManualClock};
use duet_types::collections::{CONVERSATIONS, USERS, USER_CHATS};
use duet_types::events::ConversationView;
use duet_types::models::{Conversation, ConversationSummary, UserChats, UserRecord};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::mpsc;

pub const CONVERSATION: &str = "c1";
pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()))
}

pub fn alice_ctx() -> ConversationContext {
    ConversationContext::new(CONVERSATION, ALICE, BOB)
}

pub fn bob_ctx() -> ConversationContext {
    ConversationContext::new(CONVERSATION, BOB, ALICE)
}

/// Both users, an empty conversation and a summary entry for each side.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for (id, other) in [(ALICE, BOB), (BOB, ALICE)] {
        store
            .set(USERS, id, serde_json::to_value(UserRecord::new(id, id)).unwrap())
            .await
            .unwrap();
        let chats = UserChats {
            chats: vec![ConversationSummary::empty(CONVERSATION, other, Utc::now())],
        };
        store
            .set(USER_CHATS, id, serde_json::to_value(chats).unwrap())
            .await
            .unwrap();
    }
    store
        .set(CONVERSATIONS, CONVERSATION, serde_json::to_value(Conversation::default()).unwrap())
        .await
        .unwrap();
    store
}

pub async fn conversation(store: &MemoryStore) -> Conversation {
    let value = store.get(CONVERSATIONS, CONVERSATION).await.unwrap().unwrap();
    serde_json::from_value(value).unwrap()
}

pub async fn summary(store: &MemoryStore, owner: &str) -> ConversationSummary {
    let value = store.get(USER_CHATS, owner).await.unwrap().unwrap();
    let chats: UserChats = serde_json::from_value(value).unwrap();
    chats
        .chats
        .into_iter()
        .find(|c| c.conversation_id == CONVERSATION)
        .unwrap()
}

pub async fn block(store: &MemoryStore, who: &str, whom: &str) {
    let value = store.get(USERS, who).await.unwrap().unwrap();
    let mut user: UserRecord = serde_json::from_value(value).unwrap();
    user.blocked.push(whom.to_string());
    store
        .set(USERS, who, serde_json::to_value(user).unwrap())
        .await
        .unwrap();
}

/// Receive views until one matches, failing after five seconds.
pub async fn wait_for_view(
    views: &mut mpsc::Receiver<ConversationView>,
    mut matches: impl FnMut(&ConversationView) -> bool,
) -> ConversationView {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let view = views.recv().await.expect("view stream ended");
            if matches(&view) {
                return view;
            }
        }
    })
    .await
    .expect("no matching view within 5s")
}

/// Memory blob store that records every delete.
#[derive(Clone, Default)]
pub struct CountingBlobStore {
    pub inner: MemoryBlobStore,
    deletes: Arc<Mutex<Vec<String>>>,
}

impl CountingBlobStore {
    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for CountingBlobStore {
    fn upload(&self, path: &str, bytes: Bytes) -> BoxStream<'static, duet_store::Result<UploadEvent>> {
        self.inner.upload(path, bytes)
    }

    async fn delete(&self, path: &str) -> duet_store::Result<()> {
        self.deletes.lock().unwrap().push(path.to_string());
        self.inner.delete(path).await
    }
}

/// Blob store whose uploads fail halfway and whose deletes always fail.
#[derive(Clone, Default)]
pub struct FailingBlobStore {
    pub uploads: Arc<AtomicUsize>,
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    fn upload(&self, _path: &str, bytes: Bytes) -> BoxStream<'static, duet_store::Result<UploadEvent>> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let total = bytes.len() as u64;
        stream::iter(vec![
            Ok(UploadEvent::Progress {
                bytes_done: total / 2,
                bytes_total: total,
            }),
            Err(StoreError::Upload("connection reset".into())),
        ])
        .boxed()
    }

    async fn delete(&self, path: &str) -> duet_store::Result<()> {
        Err(StoreError::Backend(format!("cannot delete {}", path)))
    }
}

/// Record store whose updates take `delay` to land when `is_slow` matches
/// one of their ops.
pub struct SlowStore {
    pub inner: Arc<MemoryStore>,
    delay: Duration,
    is_slow: fn(&PatchOp) -> bool,
}

impl SlowStore {
    pub fn new(inner: Arc<MemoryStore>, delay: Duration, is_slow: fn(&PatchOp) -> bool) -> Arc<Self> {
        Arc::new(Self {
            inner,
            delay,
            is_slow,
        })
    }
}

#[async_trait]
impl RecordStore for SlowStore {
    async fn get(&self, collection: &str, id: &str) -> duet_store::Result<Option<Value>> {
        self.inner.get(collection, id).await
    }

    async fn set(&self, collection: &str, id: &str, record: Value) -> duet_store::Result<()> {
        self.inner.set(collection, id, record).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> duet_store::Result<()> {
        if patch.ops().iter().any(self.is_slow) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.update(collection, id, patch).await
    }

    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        element: Value,
    ) -> duet_store::Result<usize> {
        self.inner.append_to_array(collection, id, field, element).await
    }

    async fn subscribe(&self, collection: &str, id: &str) -> duet_store::Result<Subscription> {
        self.inner.subscribe(collection, id).await
    }
}
