use std::sync::Arc;

use duet_store::{BlobStore, Patch, RecordStore};
use duet_types::collections::CONVERSATIONS;
use duet_types::events::LifecycleEvent;
use duet_types::models::{Attachment, Conversation, Message};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::draft::{Draft, RestoredDraft};
use crate::error::{Result, SyncError};
use crate::summary::SummaryWriter;
use crate::typing::TypingSignaler;
use crate::upload::{resolve_storage_path, upload_attachment};
use crate::{ConversationContext, records};

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The message was spliced out of the shared sequence.
    RemovedForEveryone,
    /// The message is now hidden from this participant.
    HiddenForMe,
}

/// Send, mark-seen and delete for one participant in one conversation.
pub struct MessageLifecycle {
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    context: ConversationContext,
    typing: TypingSignaler,
    summaries: SummaryWriter,
    events: broadcast::Sender<LifecycleEvent>,
}

impl MessageLifecycle {
    pub fn new(
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        context: ConversationContext,
        typing: TypingSignaler,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            summaries: SummaryWriter::new(store.clone()),
            store,
            blobs,
            clock,
            context,
            typing,
            events,
        }
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Upload the draft's file if any, then append the message.
    /// Returns the new message's index.
    pub async fn send(&self, draft: Draft) -> Result<usize> {
        self.validate(&draft)?;
        let ctx = &self.context;

        self.typing.clear().await;

        let uploaded = match &draft.file {
            Some(file) => Some(
                upload_attachment(
                    self.blobs.as_ref(),
                    &file.name,
                    &file.mime,
                    file.bytes.clone(),
                    self.clock.now(),
                )
                .await,
            ),
            None => None,
        };
        let attachment = match uploaded.transpose() {
            Ok(attachment) => attachment,
            Err(e) => {
                warn!("Upload failed in {}: {}", ctx.conversation_id, e);
                return Err(SyncError::UploadFailure {
                    reason: e.to_string(),
                    draft: Box::new(RestoredDraft::from(draft)),
                });
            }
        };

        let exists = match self.store.get(CONVERSATIONS, &ctx.conversation_id).await {
            Ok(record) => record.is_some(),
            Err(e) => {
                self.discard_upload(attachment.as_ref()).await;
                return Err(SyncError::CommitFailed {
                    reason: e.to_string(),
                    draft: Box::new(RestoredDraft::from(draft)),
                });
            }
        };
        if !exists {
            self.discard_upload(attachment.as_ref()).await;
            return Err(SyncError::ConversationMissing {
                conversation_id: ctx.conversation_id.clone(),
                draft: Some(Box::new(RestoredDraft::from(draft))),
            });
        }

        let now = self.clock.now();
        let message = Message::new(&ctx.self_id, draft.message_text(), attachment, now);
        let preview = message.preview().to_string();

        let appended = match records::encode(&message) {
            Ok(element) => {
                self.store
                    .append_to_array(CONVERSATIONS, &ctx.conversation_id, "messages", element)
                    .await
            }
            Err(e) => Err(e),
        };
        let index = match appended {
            Ok(len) => len.saturating_sub(1),
            Err(e) => {
                self.discard_upload(message.attachment.as_ref()).await;
                return Err(SyncError::CommitFailed {
                    reason: e.to_string(),
                    draft: Box::new(RestoredDraft::from(draft)),
                });
            }
        };
        info!("{} sent message {} in {}", ctx.self_id, index, ctx.conversation_id);

        self.summaries
            .after_send(&ctx.conversation_id, &ctx.self_id, &ctx.partner_id, &preview, now)
            .await;

        self.emit(LifecycleEvent::MessageSent {
            conversation_id: ctx.conversation_id.clone(),
            index,
        });
        Ok(index)
    }

    /// Mark every partner message as seen. Returns how many changed; nothing
    /// is written when that is zero.
    pub async fn mark_seen(&self) -> Result<usize> {
        let ctx = &self.context;
        let mut conversation = self.load_conversation().await?;

        let changed = conversation
            .messages
            .iter_mut()
            .filter(|m| m.sender_id != ctx.self_id)
            .map(|m| m.mark_seen_by(&ctx.self_id))
            .filter(|&marked| marked)
            .count();

        if changed > 0 {
            self.write_messages(&conversation.messages).await?;
            debug!("{} marked {} messages seen in {}", ctx.self_id, changed, ctx.conversation_id);
        }
        Ok(changed)
    }

    /// Delete the message at `index` for everyone (sender only) or hide it
    /// for this participant.
    pub async fn delete(&self, index: usize, for_everyone: bool) -> Result<DeleteOutcome> {
        let result = self.delete_message(index, for_everyone).await;
        // The list is about to shrink or already failed; either way do not scroll
        self.emit(LifecycleEvent::SuppressNextAutoscroll {
            conversation_id: self.context.conversation_id.clone(),
        });
        result
    }

    async fn delete_message(&self, index: usize, for_everyone: bool) -> Result<DeleteOutcome> {
        let ctx = &self.context;
        let mut conversation = self.load_conversation().await?;
        let Some(message) = conversation.messages.get_mut(index) else {
            return Err(SyncError::MessageNotFound(index));
        };

        let (outcome, blob_path, changed) = if for_everyone {
            if message.sender_id != ctx.self_id {
                return Err(SyncError::NotAuthorized);
            }
            let removed = conversation.messages.remove(index);
            let path = removed.attachment.as_ref().and_then(resolve_storage_path);
            (DeleteOutcome::RemovedForEveryone, path, true)
        } else {
            let changed = message.hide_for(&ctx.self_id);
            (DeleteOutcome::HiddenForMe, None, changed)
        };

        if changed {
            self.write_messages(&conversation.messages).await?;
        } else {
            debug!("Message {} already hidden for {}", index, ctx.self_id);
        }
        info!("{} deleted message {} in {} ({:?})", ctx.self_id, index, ctx.conversation_id, outcome);

        self.summaries
            .after_delete(
                &ctx.conversation_id,
                ctx.participants(),
                &conversation.messages,
                self.clock.now(),
            )
            .await;

        if let Some(path) = blob_path {
            if let Err(e) = self.blobs.delete(&path).await {
                warn!("Failed to delete blob {}: {}", path, e);
            }
        }

        Ok(outcome)
    }

    fn validate(&self, draft: &Draft) -> Result<()> {
        let ctx = &self.context;
        if draft.is_empty() {
            return Err(SyncError::InvalidSendState("nothing to send".into()));
        }
        if ctx.conversation_id.is_empty() {
            return Err(SyncError::InvalidSendState("no conversation selected".into()));
        }
        if ctx.self_id.is_empty() || ctx.partner_id.is_empty() {
            return Err(SyncError::InvalidSendState("participants are not resolved".into()));
        }
        Ok(())
    }

    async fn load_conversation(&self) -> Result<Conversation> {
        let id = &self.context.conversation_id;
        records::load_conversation(self.store.as_ref(), id)
            .await?
            .ok_or_else(|| SyncError::ConversationMissing {
                conversation_id: id.clone(),
                draft: None,
            })
    }

    async fn write_messages(&self, messages: &[Message]) -> Result<()> {
        let patch = Patch::new().set("messages", records::encode(&messages)?);
        self.store
            .update(CONVERSATIONS, &self.context.conversation_id, patch)
            .await?;
        Ok(())
    }

    /// Remove a blob uploaded for a message that was never committed.
    async fn discard_upload(&self, attachment: Option<&Attachment>) {
        let Some(path) = attachment.and_then(resolve_storage_path) else {
            return;
        };
        if let Err(e) = self.blobs.delete(&path).await {
            warn!("Failed to discard orphaned upload {}: {}", path, e);
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
