use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, StoreError};
use crate::patch::{self, Patch};
use crate::{RecordEvent, RecordKey, RecordStore, Subscription};

/// Record store persisted in a SQLite file.
///
/// Several processes may open the same file; each runs a change watcher that
/// notices commits from the other connections and re-publishes the records
/// its own subscribers are watching.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    /// Serializes write+publish so subscribers see writes in commit order
    write_lock: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            write_lock: Arc::new(Mutex::new(())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run a blocking DB call off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Backend(format!("spawn_blocking join error: {}", e)))?
            .map_err(StoreError::from)
    }

    async fn modify<T, F>(&self, key: RecordKey, f: F) -> Result<T>
    where
        F: FnOnce(&mut Value) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let (collection, id) = (key.collection.clone(), key.id.clone());
        let outcome = self
            .blocking(move |db| {
                db.modify_record(&collection, &id, |body| f(body).map_err(anyhow::Error::from))
            })
            .await?;

        let Some((out, body)) = outcome else {
            return Err(StoreError::NotFound(key));
        };
        self.dispatcher.publish(&key, Some(body)).await;
        Ok(out)
    }

    /// Poll for commits made by other connections and re-publish watched records.
    pub fn spawn_change_watcher(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut last_version = match store.blocking(|db| db.data_version()).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("Change watcher could not read data_version: {}", e);
                    return;
                }
            };

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("SQLite change watcher running every {:?}", interval);

            loop {
                tokio::select! {
                    _ = store.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match store.blocking(|db| db.data_version()).await {
                    Ok(version) if version != last_version => {
                        debug!("External commit detected (data_version {} -> {})", last_version, version);
                        last_version = version;
                        store.republish_subscribed().await;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Change watcher poll failed: {}", e),
                }
            }

            debug!("SQLite change watcher stopped");
        })
    }

    /// Stop the change watcher.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn republish_subscribed(&self) {
        let _guard = self.write_lock.lock().await;
        for key in self.dispatcher.subscribed_keys().await {
            let (collection, id) = (key.collection.clone(), key.id.clone());
            match self.blocking(move |db| db.get_record(&collection, &id)).await {
                Ok(snapshot) => self.dispatcher.publish(&key, snapshot).await,
                Err(e) => self.dispatcher.publish_error(&key, e.to_string()).await,
            }
        }
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |db| db.get_record(&collection, &id)).await
    }

    async fn set(&self, collection: &str, id: &str, record: Value) -> Result<()> {
        patch::ensure_object(&record)?;
        let key = RecordKey::new(collection, id);
        let _guard = self.write_lock.lock().await;

        let (c, i, body) = (key.collection.clone(), key.id.clone(), record.clone());
        self.blocking(move |db| db.put_record(&c, &i, &body)).await?;

        self.dispatcher.publish(&key, Some(record)).await;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> Result<()> {
        self.modify(RecordKey::new(collection, id), move |record| patch.apply(record))
            .await
    }

    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        element: Value,
    ) -> Result<usize> {
        let field = field.to_string();
        self.modify(RecordKey::new(collection, id), move |record| {
            patch::append_to_array(record, &field, element)
        })
        .await
    }

    async fn subscribe(&self, collection: &str, id: &str) -> Result<Subscription> {
        let key = RecordKey::new(collection, id);
        let _guard = self.write_lock.lock().await;

        let (c, i) = (key.collection.clone(), key.id.clone());
        let initial = match self.blocking(move |db| db.get_record(&c, &i)).await {
            Ok(snapshot) => RecordEvent::Snapshot(snapshot),
            Err(e) => RecordEvent::Error(e.to_string()),
        };
        Ok(self.dispatcher.register(key, initial).await)
    }
}
