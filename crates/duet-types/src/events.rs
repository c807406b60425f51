use serde::{Deserialize, Serialize};

use crate::models::{Message, PresenceRecord};

/// A message as seen by one viewer, tagged with its position in the shared sequence.
/// The index is the stable handle used for delete and menu lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleMessage {
    pub index: usize,
    pub message: Message,
}

/// Block relationship between the viewer and their partner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    /// The partner has blocked the viewer.
    pub viewer_blocked: bool,
    /// The viewer has blocked the partner.
    pub partner_blocked: bool,
}

impl BlockState {
    pub fn is_blocked(&self) -> bool {
        self.viewer_blocked || self.partner_blocked
    }
}

/// Immutable snapshot emitted by the conversation synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationView {
    pub conversation_id: String,
    pub messages: Vec<VisibleMessage>,
    pub partner_typing: bool,
    pub partner_presence: PresenceRecord,
    pub block: BlockState,
}

impl ConversationView {
    pub fn empty(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            partner_typing: false,
            partner_presence: PresenceRecord::default(),
            block: BlockState::default(),
        }
    }

    /// Number of visible messages sent by someone else that `viewer_id` has not seen yet.
    pub fn unseen_count(&self, viewer_id: &str) -> usize {
        self.messages
            .iter()
            .filter(|m| m.message.sender_id != viewer_id && !m.message.is_seen_by(viewer_id))
            .count()
    }
}

/// Side effects of lifecycle operations that the presentation layer may react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LifecycleEvent {
    /// A message was committed to the conversation.
    MessageSent {
        conversation_id: String,
        index: usize,
    },

    /// The next list shrink was caused by a delete; do not autoscroll on it.
    SuppressNextAutoscroll { conversation_id: String },
}
