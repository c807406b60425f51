//! First-run setup: make sure both users and their conversation exist.

use anyhow::Result;
use chrono::Utc;
use duet_store::RecordStore;
use duet_sync::records;
use duet_types::collections::{CONVERSATIONS, USERS, USER_CHATS};
use duet_types::models::{Conversation, ConversationSummary, UserRecord};
use tracing::info;
use uuid::Uuid;

pub async fn ensure_user(store: &dyn RecordStore, id: &str) -> Result<()> {
    if store.get(USERS, id).await?.is_none() {
        store
            .set(USERS, id, records::encode(&UserRecord::new(id, id))?)
            .await?;
        info!("Created user {}", id);
    }
    Ok(())
}

/// Find or create the conversation between `self_id` and `partner_id`.
///
/// Without an explicit id, the user's summaries are searched for an entry
/// with the partner; failing that a new conversation is created and listed
/// in both users' summaries.
pub async fn resolve_conversation(
    store: &dyn RecordStore,
    self_id: &str,
    partner_id: &str,
    explicit: Option<&str>,
) -> Result<String> {
    let id = match explicit {
        Some(id) => id.to_string(),
        None => {
            let existing = records::load_user_chats(store, self_id)
                .await?
                .and_then(|chats| {
                    chats
                        .chats
                        .into_iter()
                        .find(|c| c.receiver_id == partner_id)
                        .map(|c| c.conversation_id)
                });
            match existing {
                Some(id) => return Ok(id),
                None => Uuid::new_v4().to_string(),
            }
        }
    };

    if store.get(CONVERSATIONS, &id).await?.is_none() {
        store
            .set(CONVERSATIONS, &id, records::encode(&Conversation::default())?)
            .await?;
        info!("Created conversation {} between {} and {}", id, self_id, partner_id);
    }
    add_summary(store, self_id, &id, partner_id).await?;
    add_summary(store, partner_id, &id, self_id).await?;
    Ok(id)
}

async fn add_summary(
    store: &dyn RecordStore,
    owner_id: &str,
    conversation_id: &str,
    receiver_id: &str,
) -> Result<()> {
    let mut chats = records::load_user_chats(store, owner_id)
        .await?
        .unwrap_or_default();
    if chats.find_mut(conversation_id).is_some() {
        return Ok(());
    }
    chats.chats.push(ConversationSummary::empty(
        conversation_id,
        receiver_id,
        Utc::now(),
    ));
    store.set(USER_CHATS, owner_id, records::encode(&chats)?).await?;
    Ok(())
}
