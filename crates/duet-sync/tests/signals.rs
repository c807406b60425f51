mod common;

use std::time::Duration;

use common::*;
use duet_store::{PatchOp, RecordStore};
use duet_sync::{PresenceSession, SyncConfig, TypingSignaler};
use duet_types::collections::USERS;
use serde_json::json;

fn online_set(op: &PatchOp) -> bool {
    matches!(op, PatchOp::Set { path, value } if path == "isOnline" && value == &json!(true))
}

fn typing_set(op: &PatchOp) -> bool {
    matches!(op, PatchOp::Set { path, .. } if path.starts_with("typing."))
}

async fn online(store: &duet_store::MemoryStore) -> serde_json::Value {
    store.get(USERS, ALICE).await.unwrap().unwrap()["isOnline"].clone()
}

#[tokio::test(start_paused = true)]
async fn foreground_write_cannot_land_after_stop() {
    let memory = seeded_store().await;
    let store = SlowStore::new(memory.clone(), Duration::from_millis(50), online_set);
    let presence = PresenceSession::start(store, ALICE, &SyncConfig::default());

    presence.set_foreground(true);
    presence.stop().await;
    assert_eq!(online(&memory).await, json!(false));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(online(&memory).await, json!(false));
}

#[tokio::test(start_paused = true)]
async fn foreground_toggles_presence_while_running() {
    let memory = seeded_store().await;
    let presence = PresenceSession::start(memory.clone(), ALICE, &SyncConfig::default());
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(online(&memory).await, json!(true));

    presence.set_foreground(false);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(online(&memory).await, json!(false));

    presence.set_foreground(true);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(online(&memory).await, json!(true));

    presence.stop().await;
    // Ignored once stopped
    presence.set_foreground(true);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(online(&memory).await, json!(false));
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_earlier_typing_writes() {
    let memory = seeded_store().await;
    let store = SlowStore::new(memory.clone(), Duration::from_millis(50), typing_set);
    let typing = TypingSignaler::new(store, clock(), CONVERSATION, ALICE, &SyncConfig::default());

    typing.on_input("hello", false);
    typing.shutdown().await;
    assert!(conversation(&memory).await.typing.is_empty());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(conversation(&memory).await.typing.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_typing_lands_after_a_slow_keystroke_write() {
    let memory = seeded_store().await;
    let store = SlowStore::new(memory.clone(), Duration::from_millis(50), typing_set);
    let typing = TypingSignaler::new(store, clock(), CONVERSATION, ALICE, &SyncConfig::default());

    typing.on_input("he", false);
    typing.on_input("hey", false);
    typing.stop_typing();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(conversation(&memory).await.typing.is_empty());
}
