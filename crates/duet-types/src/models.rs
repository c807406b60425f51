use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary preview used when a participant has no visible messages left.
pub const NO_MESSAGES_PREVIEW: &str = "No messages yet";

/// Preview used for an attachment that carries no file name.
pub const ATTACHMENT_PREVIEW: &str = "File";

/// Uploaded file metadata embedded in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub mime: String,
    pub size: u64,
    /// Blob store path. Older records only carry the URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

/// One entry of a conversation's message sequence.
///
/// Messages have no id of their own: their position in the sequence is their
/// identity, which is why deletion splices instead of leaving holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub seen_by: Vec<String>,
    #[serde(default)]
    pub deleted_for: Vec<String>,
}

impl Message {
    pub fn new(
        sender_id: impl Into<String>,
        text: Option<String>,
        attachment: Option<Attachment>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            text: text.filter(|t| !t.is_empty()),
            attachment,
            created_at,
            seen_by: Vec::new(),
            deleted_for: Vec::new(),
        }
    }

    pub fn is_visible_to(&self, viewer_id: &str) -> bool {
        !self.deleted_for.iter().any(|id| id == viewer_id)
    }

    pub fn is_seen_by(&self, participant_id: &str) -> bool {
        self.seen_by.iter().any(|id| id == participant_id)
    }

    /// Adds `participant_id` to `seen_by`. Returns false if it was already there.
    pub fn mark_seen_by(&mut self, participant_id: &str) -> bool {
        if self.is_seen_by(participant_id) {
            return false;
        }
        self.seen_by.push(participant_id.to_string());
        true
    }

    /// Adds `participant_id` to `deleted_for`. Returns false if it was already there.
    pub fn hide_for(&mut self, participant_id: &str) -> bool {
        if !self.is_visible_to(participant_id) {
            return false;
        }
        self.deleted_for.push(participant_id.to_string());
        true
    }

    /// Text shown in conversation summaries for this message.
    pub fn preview(&self) -> &str {
        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            return text;
        }
        self.attachment
            .as_ref()
            .map(|a| a.name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(ATTACHMENT_PREVIEW)
    }
}

/// Shared conversation record, jointly written by both participants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default)]
    pub messages: Vec<Message>,
    /// participant id -> last typing timestamp (epoch millis)
    #[serde(default)]
    pub typing: BTreeMap<String, i64>,
}

/// Online state of one participant, written only by that participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Per-user record: profile, block list and presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub blocked: Vec<String>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            blocked: Vec::new(),
            is_online: false,
            last_seen: None,
        }
    }

    pub fn presence(&self) -> PresenceRecord {
        PresenceRecord {
            is_online: self.is_online,
            last_seen: self.last_seen,
        }
    }

    pub fn has_blocked(&self, other_id: &str) -> bool {
        self.blocked.iter().any(|id| id == other_id)
    }
}

/// Denormalized per-participant preview of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub receiver_id: String,
    pub last_message_preview: String,
    pub is_seen_by_owner: bool,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSummary {
    pub fn empty(
        conversation_id: impl Into<String>,
        receiver_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            receiver_id: receiver_id.into(),
            last_message_preview: NO_MESSAGES_PREVIEW.to_string(),
            is_seen_by_owner: true,
            updated_at: now,
        }
    }
}

/// A participant's summary collection (`userchats/<participant>`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChats {
    #[serde(default)]
    pub chats: Vec<ConversationSummary>,
}

impl UserChats {
    pub fn find_mut(&mut self, conversation_id: &str) -> Option<&mut ConversationSummary> {
        self.chats
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
    }
}
