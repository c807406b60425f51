use std::sync::{Arc, Mutex};

use chrono::Utc;
use duet_store::{Patch, RecordStore};
use duet_types::collections::USERS;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;

/// Publishes one participant's online state for as long as it is alive.
///
/// The heartbeat re-asserts `isOnline: true` on a fixed interval whatever the
/// user is doing, so a crashed client eventually shows a stale `lastSeen`.
/// Every write before [`PresenceSession::stop`] goes through the heartbeat
/// task, so none can land after the final offline write.
pub struct PresenceSession {
    store: Arc<dyn RecordStore>,
    participant_id: String,
    cancel: CancellationToken,
    foreground: mpsc::UnboundedSender<bool>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceSession {
    /// Assert online now and start the heartbeat.
    pub fn start(
        store: Arc<dyn RecordStore>,
        participant_id: impl Into<String>,
        config: &SyncConfig,
    ) -> Self {
        let participant_id = participant_id.into();
        let cancel = CancellationToken::new();
        let (foreground, foreground_rx) = mpsc::unbounded_channel();

        let heartbeat = tokio::spawn(heartbeat_loop(
            store.clone(),
            participant_id.clone(),
            config.heartbeat_interval,
            foreground_rx,
            cancel.clone(),
        ));
        info!("Presence started for {}", participant_id);

        Self {
            store,
            participant_id,
            cancel,
            foreground,
            heartbeat: Mutex::new(Some(heartbeat)),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// App moved to the foreground (`true`) or background (`false`).
    pub fn set_foreground(&self, foreground: bool) {
        if !self.is_running() {
            return;
        }
        if self.foreground.send(foreground).is_err() {
            debug!("Presence for {} already stopped", self.participant_id);
        }
    }

    /// Stop the heartbeat and assert offline. Calling it again does nothing.
    pub async fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        let heartbeat = self
            .heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = heartbeat {
            // Wait out an in-flight write so it cannot land after the offline write
            if let Err(e) = handle.await {
                warn!("Presence heartbeat task failed: {}", e);
            }
        }

        assert_presence(self.store.as_ref(), &self.participant_id, false).await;
        info!("Presence stopped for {}", self.participant_id);
    }
}

impl Drop for PresenceSession {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!("Presence for {} dropped without stop()", self.participant_id);
            self.cancel.cancel();
        }
    }
}

async fn heartbeat_loop(
    store: Arc<dyn RecordStore>,
    participant_id: String,
    every: std::time::Duration,
    mut foreground: mpsc::UnboundedReceiver<bool>,
    cancel: CancellationToken,
) {
    // The first tick completes immediately, which is the initial online assertion
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let online = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            // Ahead of foreground changes so the initial assertion comes first
            _ = ticker.tick() => true,
            Some(online) = foreground.recv() => online,
        };
        assert_presence(store.as_ref(), &participant_id, online).await;
    }

    debug!("Presence heartbeat for {} stopped", participant_id);
}

/// Best-effort presence write. Failures are logged and dropped.
async fn assert_presence(store: &dyn RecordStore, participant_id: &str, online: bool) {
    let patch = Patch::new()
        .set("isOnline", json!(online))
        .set("lastSeen", json!(Utc::now()));
    if let Err(e) = store.update(USERS, participant_id, patch).await {
        warn!(
            "Failed to set {} {}: {}",
            participant_id,
            if online { "online" } else { "offline" },
            e
        );
    }
}
