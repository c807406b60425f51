//! Per-participant conversation summaries kept in `userchats/<owner>`.
//!
//! Both participants write each other's summary entry, so these updates are
//! plain read-modify-writes and can lose a concurrent update. The message
//! record is the source of truth; a summary is repaired on the next send or
//! delete.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use duet_store::{Patch, RecordStore, Result};
use duet_types::collections::USER_CHATS;
use duet_types::models::{Message, NO_MESSAGES_PREVIEW};
use tracing::{debug, warn};

use crate::records;

/// What a summary should show for one viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// `None` when the viewer has no visible messages left.
    pub latest: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Projection {
    pub fn preview(&self) -> &str {
        self.latest.as_deref().unwrap_or(NO_MESSAGES_PREVIEW)
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_none()
    }
}

/// Preview of the last message `viewer_id` can still see.
pub fn project(messages: &[Message], viewer_id: &str, now: DateTime<Utc>) -> Projection {
    let latest = messages
        .iter()
        .rev()
        .find(|m| m.is_visible_to(viewer_id))
        .map(|m| m.preview().to_string());
    Projection {
        latest,
        updated_at: now,
    }
}

/// Changes to one owner's summary entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryUpdate {
    pub preview: String,
    /// Left unchanged when `None`.
    pub is_seen_by_owner: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl From<Projection> for SummaryUpdate {
    fn from(p: Projection) -> Self {
        Self {
            preview: p.preview().to_string(),
            is_seen_by_owner: None,
            updated_at: p.updated_at,
        }
    }
}

/// The only code path that writes summary entries.
#[derive(Clone)]
pub struct SummaryWriter {
    store: Arc<dyn RecordStore>,
}

impl SummaryWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Apply `update` to `owner_id`'s entry for `conversation_id`.
    ///
    /// Returns `Ok(false)` when the owner has no summary record or no entry
    /// for this conversation.
    pub async fn apply(
        &self,
        owner_id: &str,
        conversation_id: &str,
        update: &SummaryUpdate,
    ) -> Result<bool> {
        let Some(mut chats) = records::load_user_chats(self.store.as_ref(), owner_id).await? else {
            debug!("No summary record for {}, skipping", owner_id);
            return Ok(false);
        };
        let Some(entry) = chats.find_mut(conversation_id) else {
            debug!("{} has no summary for {}, skipping", owner_id, conversation_id);
            return Ok(false);
        };

        entry.last_message_preview = update.preview.clone();
        entry.updated_at = update.updated_at;
        if let Some(seen) = update.is_seen_by_owner {
            entry.is_seen_by_owner = seen;
        }

        let patch = Patch::new().set("chats", records::encode(&chats.chats)?);
        self.store.update(USER_CHATS, owner_id, patch).await?;
        Ok(true)
    }

    /// [`apply`](Self::apply), logging instead of returning failures.
    pub async fn apply_logged(&self, owner_id: &str, conversation_id: &str, update: &SummaryUpdate) {
        if let Err(e) = self.apply(owner_id, conversation_id, update).await {
            warn!(
                "Failed to update summary of {} for {}: {}",
                owner_id, conversation_id, e
            );
        }
    }

    /// Record a newly sent message in both participants' summaries.
    pub async fn after_send(
        &self,
        conversation_id: &str,
        sender_id: &str,
        recipient_id: &str,
        preview: &str,
        now: DateTime<Utc>,
    ) {
        let update = |seen| SummaryUpdate {
            preview: preview.to_string(),
            is_seen_by_owner: Some(seen),
            updated_at: now,
        };
        let (for_sender, for_recipient) = (update(true), update(false));
        tokio::join!(
            self.apply_logged(sender_id, conversation_id, &for_sender),
            self.apply_logged(recipient_id, conversation_id, &for_recipient),
        );
    }

    /// Recompute both participants' summaries from the remaining messages.
    pub async fn after_delete(
        &self,
        conversation_id: &str,
        participants: [&str; 2],
        messages: &[Message],
        now: DateTime<Utc>,
    ) {
        let [a, b] = participants;
        let (for_a, for_b) = (
            SummaryUpdate::from(project(messages, a, now)),
            SummaryUpdate::from(project(messages, b, now)),
        );
        tokio::join!(
            self.apply_logged(a, conversation_id, &for_a),
            self.apply_logged(b, conversation_id, &for_b),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_store::MemoryStore;
    use duet_types::models::{ConversationSummary, UserChats};

    fn msg(sender: &str, text: &str, deleted_for: &[&str]) -> Message {
        let mut m = Message::new(sender, Some(text.to_string()), None, Utc::now());
        m.deleted_for = deleted_for.iter().map(|s| s.to_string()).collect();
        m
    }

    #[test]
    fn projection_skips_messages_hidden_from_viewer() {
        let now = Utc::now();
        let messages = vec![msg("a", "one", &[]), msg("b", "two", &["a"])];

        assert_eq!(project(&messages, "a", now).preview(), "one");
        assert_eq!(project(&messages, "b", now).preview(), "two");
        assert_eq!(project(&messages, "b", now).updated_at, now);
    }

    #[test]
    fn projection_is_sentinel_exactly_when_nothing_is_visible() {
        let now = Utc::now();
        let empty = project(&[], "a", now);
        assert!(empty.is_empty());
        assert_eq!(empty.preview(), NO_MESSAGES_PREVIEW);

        let hidden = vec![msg("a", "x", &["a"])];
        assert!(project(&hidden, "a", now).is_empty());
        assert!(!project(&hidden, "b", now).is_empty());
    }

    async fn seed(store: &MemoryStore, owner: &str, other: &str) {
        let chats = UserChats {
            chats: vec![
                ConversationSummary::empty("other-conv", "z", Utc::now()),
                ConversationSummary::empty("c1", other, Utc::now()),
            ],
        };
        store
            .set(USER_CHATS, owner, records::encode(&chats).unwrap())
            .await
            .unwrap();
    }

    async fn entry(store: &MemoryStore, owner: &str) -> ConversationSummary {
        let chats = records::load_user_chats(store, owner).await.unwrap().unwrap();
        chats.chats.into_iter().find(|c| c.conversation_id == "c1").unwrap()
    }

    #[tokio::test]
    async fn after_send_marks_seen_for_sender_only() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "a", "b").await;
        seed(&store, "b", "a").await;
        let writer = SummaryWriter::new(store.clone());

        writer.after_send("c1", "a", "b", "hello", Utc::now()).await;

        let (ea, eb) = (entry(&store, "a").await, entry(&store, "b").await);
        assert_eq!(ea.last_message_preview, "hello");
        assert!(ea.is_seen_by_owner);
        assert_eq!(eb.last_message_preview, "hello");
        assert!(!eb.is_seen_by_owner);

        // The unrelated entry is untouched
        let chats = records::load_user_chats(store.as_ref(), "a").await.unwrap().unwrap();
        assert_eq!(chats.chats[0].conversation_id, "other-conv");
        assert_eq!(chats.chats[0].last_message_preview, NO_MESSAGES_PREVIEW);
    }

    #[tokio::test]
    async fn missing_record_or_entry_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "a", "b").await;
        let writer = SummaryWriter::new(store.clone());
        let update = SummaryUpdate {
            preview: "x".into(),
            is_seen_by_owner: Some(true),
            updated_at: Utc::now(),
        };

        assert!(!writer.apply("nobody", "c1", &update).await.unwrap());
        assert!(!writer.apply("a", "unknown-conv", &update).await.unwrap());
        assert!(writer.apply("a", "c1", &update).await.unwrap());

        // One missing summary does not stop the other
        writer.after_send("c1", "a", "b", "still", Utc::now()).await;
        assert_eq!(entry(&store, "a").await.last_message_preview, "still");
    }

    #[tokio::test]
    async fn after_delete_repairs_each_viewer_independently() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "a", "b").await;
        seed(&store, "b", "a").await;
        let writer = SummaryWriter::new(store.clone());

        let remaining = vec![msg("b", "older", &[]), msg("b", "newest", &["a"])];
        writer.after_delete("c1", ["a", "b"], &remaining, Utc::now()).await;
        assert_eq!(entry(&store, "a").await.last_message_preview, "older");
        assert_eq!(entry(&store, "b").await.last_message_preview, "newest");

        writer.after_delete("c1", ["a", "b"], &[], Utc::now()).await;
        assert_eq!(entry(&store, "a").await.last_message_preview, NO_MESSAGES_PREVIEW);
    }
}
