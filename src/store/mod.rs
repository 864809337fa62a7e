//! Persistence seams for accounts, messages and conversations
//!
//! Both the in-memory and PostgreSQL backends implement these traits; services
//! only ever hold `Arc<dyn ...>` handles.

use crate::error::AppResult;
use crate::models::{Account, Conversation, Message, NewAccount, OtpChallenge};
use crate::websocket::ConnectionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Durable account records
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Account>>;

    async fn find_by_username(&self, username: &str) -> AppResult<Option<Account>>;

    async fn find_by_email(&self, email: &str) -> AppResult<Option<Account>>;

    /// Account whose outstanding login code was requested from `conn`
    async fn find_by_challenge_connection(&self, conn: ConnectionId)
        -> AppResult<Option<Account>>;

    /// Create an account; duplicate username or email is a `Conflict`
    async fn create(&self, new: NewAccount) -> AppResult<Account>;

    /// Persist the presence fields of an account
    async fn set_presence(
        &self,
        id: Uuid,
        is_online: bool,
        connection_id: Option<ConnectionId>,
        last_seen: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Store or clear the login challenge
    async fn set_login_challenge(
        &self,
        id: Uuid,
        challenge: Option<OtpChallenge>,
    ) -> AppResult<()>;

    /// Clear the login challenge only if it carries `code`, returning it
    ///
    /// At most one caller can take a given challenge.
    async fn take_login_challenge(
        &self,
        id: Uuid,
        code: &str,
    ) -> AppResult<Option<OtpChallenge>>;

    async fn list_online(&self) -> AppResult<Vec<Account>>;

    async fn list_all(&self) -> AppResult<Vec<Account>>;

    /// Mark every account offline; used at startup and shutdown
    async fn reset_presence(&self, now: DateTime<Utc>) -> AppResult<u64>;
}

/// Append-only record of direct messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: &Message) -> AppResult<()>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Message>>;

    async fn count_between(&self, a: Uuid, b: Uuid) -> AppResult<u64>;

    /// Messages between two accounts, newest first
    async fn page_between(&self, a: Uuid, b: Uuid, offset: u64, limit: u32)
        -> AppResult<Vec<Message>>;

    /// Set read=true if not already; returns the stored record
    async fn mark_read(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Message>>;

    /// Set delivered=true if not already; returns the stored record
    async fn mark_delivered(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Message>>;

    /// Mark every unread message from `sender` to `recipient` read; returns the ids changed
    async fn mark_read_from(
        &self,
        sender: Uuid,
        recipient: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>>;
}

/// Pairwise conversation summaries
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create or update the conversation for an unordered pair in one step
    async fn upsert(
        &self,
        a: Uuid,
        b: Uuid,
        last_message: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Conversation>;

    async fn find(&self, a: Uuid, b: Uuid) -> AppResult<Option<Conversation>>;

    /// Conversations involving the account, newest first
    async fn list_for_account(&self, account_id: Uuid) -> AppResult<Vec<Conversation>>;
}

/// Store handles shared by every service
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub messages: Arc<dyn MessageStore>,
    pub conversations: Arc<dyn ConversationStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            accounts: store.clone(),
            messages: store.clone(),
            conversations: store,
        }
    }

    pub fn postgres(pool: deadpool_postgres::Pool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            accounts: store.clone(),
            messages: store.clone(),
            conversations: store,
        }
    }
}
