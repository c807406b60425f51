use duet_store::StoreError;
use thiserror::Error;

use crate::draft::RestoredDraft;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("cannot send: {0}")]
    InvalidSendState(String),

    #[error("attachment upload failed: {reason}")]
    UploadFailure {
        reason: String,
        draft: Box<RestoredDraft>,
    },

    #[error("could not commit message: {reason}")]
    CommitFailed {
        reason: String,
        draft: Box<RestoredDraft>,
    },

    #[error("only the sender can delete a message for everyone")]
    NotAuthorized,

    #[error("conversation {conversation_id} does not exist")]
    ConversationMissing {
        conversation_id: String,
        draft: Option<Box<RestoredDraft>>,
    },

    #[error("no message at index {0}")]
    MessageNotFound(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// The draft the caller should put back into its input, if the failed
    /// operation was a send.
    pub fn restored_draft(&self) -> Option<&RestoredDraft> {
        match self {
            SyncError::UploadFailure { draft, .. } | SyncError::CommitFailed { draft, .. } => {
                Some(draft)
            }
            SyncError::ConversationMissing { draft, .. } => draft.as_deref(),
            _ => None,
        }
    }

    pub fn into_restored_draft(self) -> Option<RestoredDraft> {
        match self {
            SyncError::UploadFailure { draft, .. } | SyncError::CommitFailed { draft, .. } => {
                Some(*draft)
            }
            SyncError::ConversationMissing { draft, .. } => draft.map(|d| *d),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
