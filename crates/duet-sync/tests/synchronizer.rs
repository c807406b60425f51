mod common;

use std::time::Duration;

use common::*;
use duet_store::{Patch, RecordStore};
use duet_sync::{Clock, ConversationSynchronizer, SyncConfig};
use duet_types::collections::{CONVERSATIONS, USERS};
use duet_types::models::Message;
use serde_json::json;

async fn append(store: &duet_store::MemoryStore, message: Message) {
    store
        .append_to_array(CONVERSATIONS, CONVERSATION, "messages", serde_json::to_value(message).unwrap())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn first_view_reflects_current_state() {
    let store = seeded_store().await;
    append(&store, Message::new(BOB, Some("hey".into()), None, chrono::Utc::now())).await;
    store
        .update(USERS, BOB, Patch::new().set("isOnline", json!(true)))
        .await
        .unwrap();

    let (mut views, handle) =
        ConversationSynchronizer::new(store.clone(), clock(), alice_ctx(), SyncConfig::default())
            .spawn()
            .await
            .unwrap();

    let view = wait_for_view(&mut views, |v| v.partner_presence.is_online).await;
    assert_eq!(view.conversation_id, CONVERSATION);
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].index, 0);
    assert!(!view.partner_typing);
    assert!(!view.block.is_blocked());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unchanged_state_emits_nothing() {
    let store = seeded_store().await;
    let (mut views, handle) =
        ConversationSynchronizer::new(store.clone(), clock(), alice_ctx(), SyncConfig::default())
            .spawn()
            .await
            .unwrap();

    // Initial snapshots of the conversation and both users settle into one view
    wait_for_view(&mut views, |_| true).await;
    while tokio::time::timeout(Duration::from_millis(100), views.recv()).await.is_ok() {}

    // A write that changes nothing the viewer sees, plus several polls
    store
        .update(CONVERSATIONS, CONVERSATION, Patch::new().set("topic", json!("x")))
        .await
        .unwrap();
    let quiet = tokio::time::timeout(Duration::from_secs(3), views.recv()).await;
    assert!(quiet.is_err(), "unexpected view {:?}", quiet);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn deleted_for_viewer_is_hidden_with_indices_preserved() {
    let store = seeded_store().await;
    let now = chrono::Utc::now();
    append(&store, Message::new(BOB, Some("one".into()), None, now)).await;
    let mut hidden = Message::new(BOB, Some("two".into()), None, now);
    hidden.deleted_for.push(ALICE.into());
    append(&store, hidden).await;
    append(&store, Message::new(ALICE, Some("three".into()), None, now)).await;

    let (mut views, handle) =
        ConversationSynchronizer::new(store.clone(), clock(), alice_ctx(), SyncConfig::default())
            .spawn()
            .await
            .unwrap();
    let view = wait_for_view(&mut views, |v| !v.messages.is_empty()).await;
    let indices: Vec<usize> = view.messages.iter().map(|m| m.index).collect();
    assert_eq!(indices, vec![0, 2]);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn typing_goes_stale_through_the_poll() {
    let store = seeded_store().await;
    let clock = clock();
    let (mut views, handle) =
        ConversationSynchronizer::new(store.clone(), clock.clone(), alice_ctx(), SyncConfig::default())
            .spawn()
            .await
            .unwrap();

    store
        .update(
            CONVERSATIONS,
            CONVERSATION,
            Patch::new().set("typing.bob", json!(clock.now_millis())),
        )
        .await
        .unwrap();
    wait_for_view(&mut views, |v| v.partner_typing).await;

    // No further writes: only the poll can notice the timestamp aging out
    clock.advance(chrono::Duration::milliseconds(4000));
    wait_for_view(&mut views, |v| !v.partner_typing).await;

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn own_typing_never_shows_as_partner_typing() {
    let store = seeded_store().await;
    let clock = clock();
    let (mut views, handle) =
        ConversationSynchronizer::new(store.clone(), clock.clone(), alice_ctx(), SyncConfig::default())
            .spawn()
            .await
            .unwrap();
    wait_for_view(&mut views, |_| true).await;

    store
        .update(
            CONVERSATIONS,
            CONVERSATION,
            Patch::new().set("typing.alice", json!(clock.now_millis())),
        )
        .await
        .unwrap();
    let quiet = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let view = views.recv().await.unwrap();
            if view.partner_typing {
                return view;
            }
        }
    })
    .await;
    assert!(quiet.is_err());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn block_state_follows_both_user_records() {
    let store = seeded_store().await;
    let (mut views, handle) =
        ConversationSynchronizer::new(store.clone(), clock(), alice_ctx(), SyncConfig::default())
            .spawn()
            .await
            .unwrap();
    wait_for_view(&mut views, |_| true).await;

    block(&store, BOB, ALICE).await;
    let view = wait_for_view(&mut views, |v| v.block.viewer_blocked).await;
    assert!(!view.block.partner_blocked);

    block(&store, ALICE, BOB).await;
    let view = wait_for_view(&mut views, |v| v.block.partner_blocked).await;
    assert!(view.block.viewer_blocked);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn conversation_removed_mid_session_empties_view() {
    let store = seeded_store().await;
    append(&store, Message::new(BOB, Some("hey".into()), None, chrono::Utc::now())).await;
    let (mut views, handle) =
        ConversationSynchronizer::new(store.clone(), clock(), alice_ctx(), SyncConfig::default())
            .spawn()
            .await
            .unwrap();
    wait_for_view(&mut views, |v| v.messages.len() == 1).await;

    store
        .set(CONVERSATIONS, CONVERSATION, json!({}))
        .await
        .unwrap();
    wait_for_view(&mut views, |v| v.messages.is_empty()).await;

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_ends_the_view_stream() {
    let store = seeded_store().await;
    let (mut views, handle) =
        ConversationSynchronizer::new(store.clone(), clock(), alice_ctx(), SyncConfig::default())
            .spawn()
            .await
            .unwrap();
    wait_for_view(&mut views, |_| true).await;

    handle.shutdown().await;
    while views.recv().await.is_some() {}
}
