use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use duet_store::{Patch, RecordStore};
use duet_types::collections::CONVERSATIONS;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;

/// Whether a typing timestamp written at `typed_at_ms` still counts at `now_ms`.
///
/// Timestamps come from the partner's clock, so a small amount of future
/// skew is tolerated.
pub fn is_fresh(typed_at_ms: i64, now_ms: i64, config: &SyncConfig) -> bool {
    let age = now_ms - typed_at_ms;
    age < config.typing_stale_after.as_millis() as i64
        && age >= -(config.typing_clock_skew.as_millis() as i64)
}

/// Whether `partner_id` is typing according to a conversation's typing map.
pub fn partner_is_typing(
    typing: &BTreeMap<String, i64>,
    partner_id: &str,
    now_ms: i64,
    config: &SyncConfig,
) -> bool {
    typing
        .get(partner_id)
        .is_some_and(|&ts| is_fresh(ts, now_ms, config))
}

/// Writes this participant's typing indicator into the conversation record.
///
/// Cheap to clone; clones share the debounce timer and the writer, so
/// writes land in the order they were requested.
#[derive(Clone)]
pub struct TypingSignaler {
    inner: Arc<Inner>,
}

struct Inner {
    clock: Arc<dyn Clock>,
    conversation_id: String,
    self_id: String,
    debounce: Duration,
    writes: mpsc::UnboundedSender<TypingWrite>,
    pending_clear: Mutex<Option<JoinHandle<()>>>,
}

struct TypingWrite {
    patch: Patch,
    done: Option<oneshot::Sender<()>>,
}

impl TypingSignaler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        conversation_id: impl Into<String>,
        self_id: impl Into<String>,
        config: &SyncConfig,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let self_id = self_id.into();
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(
            store,
            conversation_id.clone(),
            self_id.clone(),
            rx,
        ));

        Self {
            inner: Arc::new(Inner {
                clock,
                conversation_id,
                self_id,
                debounce: config.typing_debounce,
                writes,
                pending_clear: Mutex::new(None),
            }),
        }
    }

    /// Write (`true`) or remove (`false`) this participant's typing timestamp.
    /// Failures are logged, never returned.
    pub async fn set_typing(&self, is_typing: bool) {
        self.inner.write(is_typing).await;
    }

    /// Feed the current input text. Re-arms the idle timer on every call.
    pub fn on_input(&self, text: &str, blocked: bool) {
        let typing = !text.trim().is_empty() && !blocked;
        self.inner.enqueue(typing, None);

        let inner = self.inner.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            debug!("Typing idle in {}, clearing", inner.conversation_id);
            inner.enqueue(false, None);
        });
        if let Some(previous) = self.inner.replace_pending(Some(timer)) {
            previous.abort();
        }
    }

    /// Cancel the idle timer and clear typing without waiting for the write.
    pub fn stop_typing(&self) {
        self.cancel_timer();
        self.inner.enqueue(false, None);
    }

    /// Cancel the idle timer and clear typing. Returns once the clear and
    /// every write queued before it have landed.
    pub async fn clear(&self) {
        self.cancel_timer();
        self.inner.write(false).await;
    }

    /// Final clear when the conversation closes.
    pub async fn shutdown(&self) {
        self.clear().await;
        debug!("Typing for {} in {} shut down", self.inner.self_id, self.inner.conversation_id);
    }

    fn cancel_timer(&self) {
        if let Some(pending) = self.inner.replace_pending(None) {
            pending.abort();
        }
    }
}

impl Inner {
    fn replace_pending(&self, next: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut pending = self.pending_clear.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *pending, next)
    }

    /// The timestamp is taken now, not when the writer gets to it.
    fn enqueue(&self, is_typing: bool, done: Option<oneshot::Sender<()>>) {
        let field = format!("typing.{}", self.self_id);
        let patch = if is_typing {
            Patch::new().set(field, json!(self.clock.now_millis()))
        } else {
            Patch::new().delete(field)
        };
        if self.writes.send(TypingWrite { patch, done }).is_err() {
            warn!("Typing writer for {} is gone", self.conversation_id);
        }
    }

    async fn write(&self, is_typing: bool) {
        let (done, landed) = oneshot::channel();
        self.enqueue(is_typing, Some(done));
        // An error only means the writer is gone
        let _ = landed.await;
    }
}

/// Applies typing writes one at a time, in order. Ends when every
/// [`TypingSignaler`] clone is dropped.
async fn write_loop(
    store: Arc<dyn RecordStore>,
    conversation_id: String,
    self_id: String,
    mut writes: mpsc::UnboundedReceiver<TypingWrite>,
) {
    while let Some(TypingWrite { patch, done }) = writes.recv().await {
        if let Err(e) = store.update(CONVERSATIONS, &conversation_id, patch).await {
            warn!(
                "Failed to update typing for {} in {}: {}",
                self_id, conversation_id, e
            );
        }
        if let Some(done) = done {
            let _ = done.send(());
        }
    }
    debug!("Typing writer for {} in {} stopped", self_id, conversation_id);
}
