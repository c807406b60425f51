use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::dispatcher::Dispatcher;
use crate::error::{Result, StoreError};
use crate::patch::{self, Patch};
use crate::{RecordEvent, RecordKey, RecordStore, Subscription};

/// In-process record store. Clones share the same records, so two clients
/// in one process see each other's writes exactly as they would through a
/// remote store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<RecordKey, Value>>>,
    dispatcher: Dispatcher,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against an existing record and publish the result.
    async fn modify<T>(
        &self,
        key: RecordKey,
        f: impl FnOnce(&mut Value) -> Result<T>,
    ) -> Result<T> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        // Work on a copy so a failed patch leaves the record untouched
        let mut updated = record.clone();
        let out = f(&mut updated)?;
        *record = updated.clone();

        self.dispatcher.publish(&key, Some(updated)).await;
        Ok(out)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let key = RecordKey::new(collection, id);
        Ok(self.records.lock().await.get(&key).cloned())
    }

    async fn set(&self, collection: &str, id: &str, record: Value) -> Result<()> {
        patch::ensure_object(&record)?;
        let key = RecordKey::new(collection, id);
        let mut records = self.records.lock().await;
        records.insert(key.clone(), record.clone());
        self.dispatcher.publish(&key, Some(record)).await;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> Result<()> {
        self.modify(RecordKey::new(collection, id), |record| patch.apply(record))
            .await
    }

    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        element: Value,
    ) -> Result<usize> {
        self.modify(RecordKey::new(collection, id), |record| {
            patch::append_to_array(record, field, element)
        })
        .await
    }

    async fn subscribe(&self, collection: &str, id: &str) -> Result<Subscription> {
        let key = RecordKey::new(collection, id);
        let records = self.records.lock().await;
        let initial = RecordEvent::Snapshot(records.get(&key).cloned());
        Ok(self.dispatcher.register(key, initial).await)
    }
}
