pub mod events;
pub mod models;

/// Record collections shared by every client.
pub mod collections {
    pub const CONVERSATIONS: &str = "conversations";
    pub const USERS: &str = "users";
    pub const USER_CHATS: &str = "userchats";
}
