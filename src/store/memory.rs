use super::{AccountStore, ConversationStore, MessageStore};
use crate::error::{AppError, AppResult};
use crate::models::{canonical_hash, Account, Conversation, Message, NewAccount, OtpChallenge};
use crate::websocket::ConnectionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    /// Insertion order doubles as creation order
    messages: Vec<Message>,
    message_index: HashMap<Uuid, usize>,
    conversations: HashMap<String, Conversation>,
}

/// Process-local store used when no database is configured and in tests
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> AppResult<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn find_by_challenge_connection(
        &self,
        conn: ConnectionId,
    ) -> AppResult<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| {
                a.login_challenge
                    .as_ref()
                    .is_some_and(|c| c.requested_by == conn)
            })
            .cloned())
    }

    async fn create(&self, new: NewAccount) -> AppResult<Account> {
        let mut tables = self.tables.write().await;
        if tables.accounts.values().any(|a| a.username == new.username) {
            return Err(AppError::Conflict("username already taken".into()));
        }
        if tables.accounts.values().any(|a| a.email == new.email) {
            return Err(AppError::Conflict("email already registered".into()));
        }

        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            provider_id: new.provider_id,
            is_online: false,
            last_seen: now,
            login_challenge: None,
            connection_id: None,
            created_at: now,
        };
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn set_presence(
        &self,
        id: Uuid,
        is_online: bool,
        connection_id: Option<ConnectionId>,
        last_seen: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("account".into()))?;
        account.is_online = is_online;
        account.connection_id = connection_id;
        account.last_seen = last_seen;
        Ok(())
    }

    async fn set_login_challenge(
        &self,
        id: Uuid,
        challenge: Option<OtpChallenge>,
    ) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("account".into()))?;
        account.login_challenge = challenge;
        Ok(())
    }

    async fn take_login_challenge(
        &self,
        id: Uuid,
        code: &str,
    ) -> AppResult<Option<OtpChallenge>> {
        let mut tables = self.tables.write().await;
        let Some(account) = tables.accounts.get_mut(&id) else {
            return Ok(None);
        };
        if !account
            .login_challenge
            .as_ref()
            .is_some_and(|c| c.matches(code))
        {
            return Ok(None);
        }
        Ok(account.login_challenge.take())
    }

    async fn list_online(&self) -> AppResult<Vec<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .filter(|a| a.is_online)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> AppResult<Vec<Account>> {
        Ok(self.tables.read().await.accounts.values().cloned().collect())
    }

    async fn reset_presence(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for account in tables.accounts.values_mut().filter(|a| a.is_online) {
            account.is_online = false;
            account.connection_id = None;
            account.last_seen = now;
            changed += 1;
        }
        Ok(changed)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: &Message) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let idx = tables.messages.len();
        tables.messages.push(message.clone());
        tables.message_index.insert(message.id, idx);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        let tables = self.tables.read().await;
        Ok(tables
            .message_index
            .get(&id)
            .and_then(|&idx| tables.messages.get(idx))
            .cloned())
    }

    async fn count_between(&self, a: Uuid, b: Uuid) -> AppResult<u64> {
        let tables = self.tables.read().await;
        Ok(tables.messages.iter().filter(|m| m.is_between(a, b)).count() as u64)
    }

    async fn page_between(
        &self,
        a: Uuid,
        b: Uuid,
        offset: u64,
        limit: u32,
    ) -> AppResult<Vec<Message>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .rev()
            .filter(|m| m.is_between(a, b))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Message>> {
        let mut tables = self.tables.write().await;
        let Some(&idx) = tables.message_index.get(&id) else {
            return Ok(None);
        };
        Ok(tables.messages.get_mut(idx).map(|m| {
            m.mark_read(now);
            m.clone()
        }))
    }

    async fn mark_delivered(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Message>> {
        let mut tables = self.tables.write().await;
        let Some(&idx) = tables.message_index.get(&id) else {
            return Ok(None);
        };
        Ok(tables.messages.get_mut(idx).map(|m| {
            m.mark_delivered(now);
            m.clone()
        }))
    }

    async fn mark_read_from(
        &self,
        sender: Uuid,
        recipient: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .messages
            .iter_mut()
            .filter(|m| m.sender_id == sender && m.recipient_id == recipient)
            .filter_map(|m| m.mark_read(now).then_some(m.id))
            .collect())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn upsert(
        &self,
        a: Uuid,
        b: Uuid,
        last_message: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Conversation> {
        let hash = canonical_hash(a, b);
        let mut tables = self.tables.write().await;
        let conversation = tables
            .conversations
            .entry(hash)
            .and_modify(|c| {
                c.last_message = last_message.to_string();
                c.last_updated = now;
            })
            .or_insert_with(|| Conversation::new(a, b, last_message.to_string(), now));
        Ok(conversation.clone())
    }

    async fn find(&self, a: Uuid, b: Uuid) -> AppResult<Option<Conversation>> {
        let tables = self.tables.read().await;
        Ok(tables.conversations.get(&canonical_hash(a, b)).cloned())
    }

    async fn list_for_account(&self, account_id: Uuid) -> AppResult<Vec<Conversation>> {
        let tables = self.tables.read().await;
        let mut list: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| c.involves(account_id))
            .cloned()
            .collect();
        list.sort_by(|x, y| y.last_updated.cmp(&x.last_updated));
        Ok(list)
    }
}
