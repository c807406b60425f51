use std::collections::BTreeMap;
use std::sync::Arc;

use duet_store::{RecordEvent, RecordStore, Subscription};
use duet_types::collections::{CONVERSATIONS, USERS};
use duet_types::events::{BlockState, ConversationView, VisibleMessage};
use duet_types::models::{Conversation, Message, UserRecord};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::typing::partner_is_typing;
use crate::{ConversationContext, records};

const INPUT_BUFFER: usize = 32;

/// Messages `viewer_id` can see, tagged with their index in the full sequence.
pub fn visible_messages(messages: &[Message], viewer_id: &str) -> Vec<VisibleMessage> {
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_visible_to(viewer_id))
        .map(|(index, m)| VisibleMessage {
            index,
            message: m.clone(),
        })
        .collect()
}

/// Block relationship as seen by `self_id`. A missing record blocks nobody.
pub fn block_state(
    me: Option<&UserRecord>,
    partner: Option<&UserRecord>,
    self_id: &str,
    partner_id: &str,
) -> BlockState {
    BlockState {
        viewer_blocked: partner.is_some_and(|p| p.has_blocked(self_id)),
        partner_blocked: me.is_some_and(|m| m.has_blocked(partner_id)),
    }
}

enum Input {
    /// Pushed conversation snapshot.
    Conversation(Option<Conversation>),
    /// Polled conversation, used only to re-evaluate typing.
    Poll(Option<Conversation>),
    Partner(Option<UserRecord>),
    /// The self record changed; the reducer re-reads it.
    SelfChanged,
}

/// Watches one conversation and emits a [`ConversationView`] whenever what
/// the viewer should see changes.
pub struct ConversationSynchronizer {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    context: ConversationContext,
    config: SyncConfig,
}

impl ConversationSynchronizer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        context: ConversationContext,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            clock,
            context,
            config,
        }
    }

    /// Subscribe and start the input tasks and the reducer.
    pub async fn spawn(self) -> Result<(mpsc::Receiver<ConversationView>, SyncHandle)> {
        let ctx = &self.context;
        let conversation = self.store.subscribe(CONVERSATIONS, &ctx.conversation_id).await?;
        let partner = self.store.subscribe(USERS, &ctx.partner_id).await?;
        let me = self.store.subscribe(USERS, &ctx.self_id).await?;

        let cancel = CancellationToken::new();
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let (view_tx, view_rx) = mpsc::channel(self.config.view_buffer.max(1));

        let mut tasks = vec![
            tokio::spawn(forward(conversation, input_tx.clone(), cancel.clone(), |snapshot| {
                decode_snapshot(snapshot).map(Input::Conversation)
            })),
            tokio::spawn(forward(partner, input_tx.clone(), cancel.clone(), |snapshot| {
                decode_snapshot(snapshot).map(Input::Partner)
            })),
            tokio::spawn(forward(me, input_tx.clone(), cancel.clone(), |_| {
                Some(Input::SelfChanged)
            })),
            tokio::spawn(poll_typing(
                self.store.clone(),
                ctx.conversation_id.clone(),
                self.config.typing_poll_interval,
                input_tx,
                cancel.clone(),
            )),
        ];

        info!(
            "Syncing conversation {} for {}",
            ctx.conversation_id, ctx.self_id
        );
        let reducer = Reducer {
            store: self.store,
            clock: self.clock,
            context: self.context,
            config: self.config,
            conversation_loaded: false,
            messages: Vec::new(),
            typing: BTreeMap::new(),
            partner: None,
            me: None,
            last_emitted: None,
        };
        tasks.push(tokio::spawn(reducer.run(input_rx, view_tx, cancel.clone())));

        Ok((view_rx, SyncHandle { cancel, tasks }))
    }
}

/// Owns the synchronizer's tasks. Dropping it cancels them.
pub struct SyncHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("Sync task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Undecodable snapshots are skipped with a warning.
fn decode_snapshot<T: serde::de::DeserializeOwned>(snapshot: Option<Value>) -> Option<Option<T>> {
    match snapshot.map(records::decode::<T>).transpose() {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!("Ignoring malformed record: {}", e);
            None
        }
    }
}

async fn forward(
    mut sub: Subscription,
    tx: mpsc::Sender<Input>,
    cancel: CancellationToken,
    map: fn(Option<Value>) -> Option<Input>,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = sub.recv() => event,
        };
        let input = match event {
            Some(RecordEvent::Snapshot(snapshot)) => match map(snapshot) {
                Some(input) => input,
                None => continue,
            },
            Some(RecordEvent::Error(e)) => {
                warn!("Subscription to {} failed: {}", sub.key(), e);
                continue;
            }
            None => {
                debug!("Subscription to {} closed", sub.key());
                break;
            }
        };
        if tx.send(input).await.is_err() {
            break;
        }
    }
}

/// A push subscription only fires on writes, so typing staleness needs a clock-driven re-read.
async fn poll_typing(
    store: Arc<dyn RecordStore>,
    conversation_id: String,
    every: std::time::Duration,
    tx: mpsc::Sender<Input>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match records::load_conversation(store.as_ref(), &conversation_id).await {
            Ok(conversation) => {
                if tx.send(Input::Poll(conversation)).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Typing poll of {} failed: {}", conversation_id, e),
        }
    }
}

struct Reducer {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    context: ConversationContext,
    config: SyncConfig,
    /// No view is emitted before the first conversation snapshot.
    conversation_loaded: bool,
    messages: Vec<Message>,
    typing: BTreeMap<String, i64>,
    partner: Option<UserRecord>,
    me: Option<UserRecord>,
    last_emitted: Option<ConversationView>,
}

impl Reducer {
    async fn run(
        mut self,
        mut inputs: mpsc::Receiver<Input>,
        views: mpsc::Sender<ConversationView>,
        cancel: CancellationToken,
    ) {
        loop {
            let input = tokio::select! {
                _ = cancel.cancelled() => break,
                input = inputs.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };
            self.apply(input).await;

            let Some(view) = self.changed_view() else {
                continue;
            };
            let sent = tokio::select! {
                _ = cancel.cancelled() => break,
                sent = views.send(view.clone()) => sent,
            };
            if sent.is_err() {
                debug!("View receiver for {} dropped", self.context.conversation_id);
                break;
            }
            self.last_emitted = Some(view);
        }
        debug!("Reducer for {} stopped", self.context.conversation_id);
    }

    async fn apply(&mut self, input: Input) {
        match input {
            Input::Conversation(conversation) => {
                self.conversation_loaded = true;
                let conversation = conversation.unwrap_or_default();
                self.messages = conversation.messages;
                self.typing = conversation.typing;
            }
            Input::Poll(conversation) => {
                self.typing = conversation.map(|c| c.typing).unwrap_or_default();
            }
            Input::Partner(partner) => self.partner = partner,
            Input::SelfChanged => {
                match records::load_user(self.store.as_ref(), &self.context.self_id).await {
                    Ok(me) => self.me = me,
                    Err(e) => warn!("Could not re-read {}: {}", self.context.self_id, e),
                }
            }
        }
    }

    /// The view to emit, if it differs from the last one.
    fn changed_view(&self) -> Option<ConversationView> {
        if !self.conversation_loaded {
            return None;
        }
        let view = self.view();
        (self.last_emitted.as_ref() != Some(&view)).then_some(view)
    }

    fn view(&self) -> ConversationView {
        let ctx = &self.context;
        ConversationView {
            conversation_id: ctx.conversation_id.clone(),
            messages: visible_messages(&self.messages, &ctx.self_id),
            partner_typing: partner_is_typing(
                &self.typing,
                &ctx.partner_id,
                self.clock.now_millis(),
                &self.config,
            ),
            partner_presence: self
                .partner
                .as_ref()
                .map(UserRecord::presence)
                .unwrap_or_default(),
            block: block_state(
                self.me.as_ref(),
                self.partner.as_ref(),
                &ctx.self_id,
                &ctx.partner_id,
            ),
        }
    }
}
