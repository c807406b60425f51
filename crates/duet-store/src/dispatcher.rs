use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::trace;

use crate::{RecordEvent, RecordKey, Subscription};

/// Fans record snapshots out to subscribers.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// Per-record subscriber channels
    subscribers: RwLock<HashMap<RecordKey, Vec<mpsc::UnboundedSender<RecordEvent>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and hand it `initial` as its first snapshot.
    ///
    /// Callers hold their store's write lock across this call so no write can
    /// slip between the initial snapshot and the registration.
    pub async fn register(&self, key: RecordKey, initial: RecordEvent) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(initial);
        self.inner
            .subscribers
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .push(tx);
        Subscription::new(key, rx)
    }

    /// Deliver a snapshot to every live subscriber of `key`, pruning closed ones.
    pub async fn publish(&self, key: &RecordKey, snapshot: Option<Value>) {
        self.send(key, RecordEvent::Snapshot(snapshot)).await;
    }

    pub async fn publish_error(&self, key: &RecordKey, message: String) {
        self.send(key, RecordEvent::Error(message)).await;
    }

    async fn send(&self, key: &RecordKey, event: RecordEvent) {
        let mut subscribers = self.inner.subscribers.write().await;
        let Some(senders) = subscribers.get_mut(key) else {
            return;
        };
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        trace!("Published {} to {} subscribers", key, senders.len());
        if senders.is_empty() {
            subscribers.remove(key);
        }
    }

    /// Keys that currently have at least one subscriber.
    pub async fn subscribed_keys(&self) -> Vec<RecordKey> {
        let mut subscribers = self.inner.subscribers.write().await;
        subscribers.retain(|_, senders| {
            senders.retain(|tx| !tx.is_closed());
            !senders.is_empty()
        });
        subscribers.keys().cloned().collect()
    }
}
