use std::sync::Arc;

use duet_store::{BlobStore, Patch, RecordKey, RecordStore, StoreError};
use duet_types::collections::USERS;
use duet_types::events::{BlockState, ConversationView, LifecycleEvent};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::draft::Draft;
use crate::error::{Result, SyncError};
use crate::lifecycle::{DeleteOutcome, MessageLifecycle};
use crate::presence::PresenceSession;
use crate::synchronizer::{ConversationSynchronizer, SyncHandle};
use crate::typing::TypingSignaler;
use crate::{ConversationContext, records};

/// Everything one participant runs while a conversation is open: presence,
/// typing, the view stream and the message operations.
pub struct ChatSession {
    store: Arc<dyn RecordStore>,
    context: ConversationContext,
    presence: PresenceSession,
    typing: TypingSignaler,
    lifecycle: Arc<MessageLifecycle>,
    block: watch::Receiver<BlockState>,
    sync: SyncHandle,
    forwarder: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ChatSession {
    /// Open the conversation. Returns the session and the stream of views it
    /// produces.
    pub async fn open(
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        context: ConversationContext,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<ConversationView>)> {
        let (raw_views, sync) = ConversationSynchronizer::new(
            store.clone(),
            clock.clone(),
            context.clone(),
            config.clone(),
        )
        .spawn()
        .await?;

        let presence = PresenceSession::start(store.clone(), context.self_id.clone(), &config);
        let typing = TypingSignaler::new(
            store.clone(),
            clock.clone(),
            context.conversation_id.clone(),
            context.self_id.clone(),
            &config,
        );
        let lifecycle = Arc::new(MessageLifecycle::new(
            store.clone(),
            blobs,
            clock,
            context.clone(),
            typing.clone(),
        ));

        match lifecycle.mark_seen().await {
            Ok(0) => {}
            Ok(n) => debug!("Marked {} messages seen on open", n),
            Err(e) => warn!("Initial mark-seen in {} failed: {}", context.conversation_id, e),
        }

        let cancel = CancellationToken::new();
        let (views_tx, views_rx) = mpsc::channel(config.view_buffer.max(1));
        let (block_tx, block) = watch::channel(BlockState::default());
        let forwarder = tokio::spawn(forward_views(
            raw_views,
            views_tx,
            lifecycle.clone(),
            block_tx,
            context.self_id.clone(),
            cancel.clone(),
        ));

        info!(
            "{} opened conversation {} with {}",
            context.self_id, context.conversation_id, context.partner_id
        );
        let session = Self {
            store,
            context,
            presence,
            typing,
            lifecycle,
            block,
            sync,
            forwarder,
            cancel,
        };
        Ok((session, views_rx))
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn presence(&self) -> &PresenceSession {
        &self.presence
    }

    pub fn lifecycle(&self) -> &MessageLifecycle {
        &self.lifecycle
    }

    pub fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe_events()
    }

    /// Block state from the most recent view.
    pub fn block_state(&self) -> BlockState {
        *self.block.borrow()
    }

    /// Feed the composer's current text to the typing indicator.
    pub fn on_input(&self, text: &str) {
        self.typing.on_input(text, self.block_state().is_blocked());
    }

    pub fn stop_typing(&self) {
        self.typing.stop_typing();
    }

    pub async fn send(&self, draft: Draft) -> Result<usize> {
        if self.block_state().is_blocked() {
            return Err(SyncError::InvalidSendState("conversation is blocked".into()));
        }
        self.lifecycle.send(draft).await
    }

    pub async fn mark_seen(&self) -> Result<usize> {
        self.lifecycle.mark_seen().await
    }

    pub async fn delete(&self, index: usize, for_everyone: bool) -> Result<DeleteOutcome> {
        self.lifecycle.delete(index, for_everyone).await
    }

    /// Add (`true`) or remove (`false`) the partner in this participant's
    /// block list. Views pick the change up through the self-record
    /// subscription.
    pub async fn set_blocked(&self, blocked: bool) -> Result<()> {
        let ctx = &self.context;
        let Some(me) = records::load_user(self.store.as_ref(), &ctx.self_id).await? else {
            return Err(StoreError::NotFound(RecordKey::new(USERS, &ctx.self_id)).into());
        };

        let mut list = me.blocked;
        let before = list.len();
        if blocked {
            if !list.iter().any(|id| id == &ctx.partner_id) {
                list.push(ctx.partner_id.clone());
            }
        } else {
            list.retain(|id| id != &ctx.partner_id);
        }
        if list.len() == before {
            debug!("Block list of {} already up to date", ctx.self_id);
            return Ok(());
        }

        if blocked {
            self.typing.stop_typing();
        }
        self.store
            .update(USERS, &ctx.self_id, Patch::new().set("blocked", json!(list)))
            .await?;
        info!(
            "{} {} {}",
            ctx.self_id,
            if blocked { "blocked" } else { "unblocked" },
            ctx.partner_id
        );
        Ok(())
    }

    /// Tear everything down: stop the synchronizer and every timer, clear
    /// typing and go offline.
    pub async fn close(self) {
        self.cancel.cancel();
        self.sync.shutdown().await;
        if let Err(e) = self.forwarder.await {
            warn!("View forwarder ended abnormally: {}", e);
        }
        self.typing.shutdown().await;
        self.presence.stop().await;
        info!("{} closed conversation {}", self.context.self_id, self.context.conversation_id);
    }
}

/// Pass views through, tracking block state and marking partner messages
/// seen as they arrive.
async fn forward_views(
    mut raw: mpsc::Receiver<ConversationView>,
    out: mpsc::Sender<ConversationView>,
    lifecycle: Arc<MessageLifecycle>,
    block: watch::Sender<BlockState>,
    self_id: String,
    cancel: CancellationToken,
) {
    loop {
        let view = tokio::select! {
            _ = cancel.cancelled() => break,
            view = raw.recv() => match view {
                Some(view) => view,
                None => break,
            },
        };

        block.send_replace(view.block);
        if view.unseen_count(&self_id) > 0 {
            if let Err(e) = lifecycle.mark_seen().await {
                warn!("Mark-seen in {} failed: {}", view.conversation_id, e);
            }
        }

        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = out.send(view) => sent,
        };
        if sent.is_err() {
            debug!("View consumer for {} went away", lifecycle.context().conversation_id);
            break;
        }
    }
}
