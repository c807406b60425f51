//! Message synchronization and presence engine for two-party conversations.
//!
//! Both participants talk only to a shared [`RecordStore`](duet_store::RecordStore):
//! presence and typing are published one-way, the conversation record is
//! watched through a push subscription backed by a poll, and every message
//! operation is a read-modify-write or atomic append against that record.

pub mod clock;
pub mod config;
pub mod draft;
pub mod error;
pub mod lifecycle;
pub mod menu;
pub mod presence;
pub mod records;
pub mod session;
pub mod summary;
pub mod synchronizer;
pub mod typing;
pub mod upload;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use draft::{Draft, LocalPreview, OutgoingFile, RestoredDraft};
pub use error::{Result, SyncError};
pub use lifecycle::{DeleteOutcome, MessageLifecycle};
pub use presence::PresenceSession;
pub use session::ChatSession;
pub use synchronizer::{ConversationSynchronizer, SyncHandle};
pub use typing::TypingSignaler;

/// The three ids every conversation-scoped component needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub self_id: String,
    pub partner_id: String,
}

impl ConversationContext {
    pub fn new(
        conversation_id: impl Into<String>,
        self_id: impl Into<String>,
        partner_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            self_id: self_id.into(),
            partner_id: partner_id.into(),
        }
    }

    /// Both participants, sender side first.
    pub fn participants(&self) -> [&str; 2] {
        [&self.self_id, &self.partner_id]
    }
}
