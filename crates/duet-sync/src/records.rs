//! Typed access to the three collections the engine reads.

use duet_store::{RecordStore, Result, StoreError};
use duet_types::collections::{CONVERSATIONS, USERS, USER_CHATS};
use duet_types::models::{Conversation, UserChats, UserRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(StoreError::from)
}

pub fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(StoreError::from)
}

pub async fn load<T: DeserializeOwned>(
    store: &dyn RecordStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>> {
    store.get(collection, id).await?.map(decode).transpose()
}

pub async fn load_conversation(store: &dyn RecordStore, id: &str) -> Result<Option<Conversation>> {
    load(store, CONVERSATIONS, id).await
}

pub async fn load_user(store: &dyn RecordStore, id: &str) -> Result<Option<UserRecord>> {
    load(store, USERS, id).await
}

pub async fn load_user_chats(store: &dyn RecordStore, owner_id: &str) -> Result<Option<UserChats>> {
    load(store, USER_CHATS, owner_id).await
}
