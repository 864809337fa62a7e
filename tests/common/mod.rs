//! Shared harness: in-memory stores, a recording code dispatcher and fake
//! connections backed by registry receivers.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use direct_chat_service::config::Config;
use direct_chat_service::error::{AppError, AppResult};
use direct_chat_service::models::{Account, NewAccount, OtpChallenge};
use direct_chat_service::services::CodeDispatcher;
use direct_chat_service::state::AppState;
use direct_chat_service::store::{AccountStore, Stores};
use direct_chat_service::websocket::{handlers, ConnectionId};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingDispatcher {
    pub fn fail_next_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Most recent code sent to `email`
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl CodeDispatcher for RecordingDispatcher {
    async fn send_code(&self, recipient: &str, code: &str) -> AppResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("smtp relay refused connection".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), code.to_string()));
        Ok(())
    }
}

/// Account store that sleeps around selected operations so concurrent
/// handlers interleave at their storage awaits
pub struct SlowAccounts {
    inner: Arc<dyn AccountStore>,
    read_delay: Duration,
    online_write_delay: Duration,
}

impl SlowAccounts {
    pub fn new(inner: Arc<dyn AccountStore>, read_delay: Duration, online_write_delay: Duration) -> Self {
        Self {
            inner,
            read_delay,
            online_write_delay,
        }
    }
}

#[async_trait]
impl AccountStore for SlowAccounts {
    async fn find_by_id(&self, id: uuid::Uuid) -> AppResult<Option<Account>> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.find_by_id(id).await
    }

    async fn find_by_username(&self, username: &str) -> AppResult<Option<Account>> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.find_by_username(username).await
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<Account>> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.find_by_email(email).await
    }

    async fn find_by_challenge_connection(&self, conn: ConnectionId) -> AppResult<Option<Account>> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.find_by_challenge_connection(conn).await
    }

    async fn create(&self, new: NewAccount) -> AppResult<Account> {
        self.inner.create(new).await
    }

    async fn set_presence(
        &self,
        id: uuid::Uuid,
        is_online: bool,
        connection_id: Option<ConnectionId>,
        last_seen: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = self
            .inner
            .set_presence(id, is_online, connection_id, last_seen)
            .await;
        if is_online {
            tokio::time::sleep(self.online_write_delay).await;
        }
        result
    }

    async fn set_login_challenge(&self, id: uuid::Uuid, challenge: Option<OtpChallenge>) -> AppResult<()> {
        self.inner.set_login_challenge(id, challenge).await
    }

    async fn take_login_challenge(&self, id: uuid::Uuid, code: &str) -> AppResult<Option<OtpChallenge>> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.take_login_challenge(id, code).await
    }

    async fn list_online(&self) -> AppResult<Vec<Account>> {
        self.inner.list_online().await
    }

    async fn list_all(&self) -> AppResult<Vec<Account>> {
        self.inner.list_all().await
    }

    async fn reset_presence(&self, now: DateTime<Utc>) -> AppResult<u64> {
        self.inner.reset_presence(now).await
    }
}

pub struct Harness {
    pub state: AppState,
    pub mailer: Arc<RecordingDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stores(Stores::memory())
    }

    /// In-memory stores with every account operation slowed down
    pub fn with_slow_accounts(read_delay: Duration, online_write_delay: Duration) -> Self {
        let mut stores = Stores::memory();
        stores.accounts = Arc::new(SlowAccounts::new(
            stores.accounts.clone(),
            read_delay,
            online_write_delay,
        ));
        Self::with_stores(stores)
    }

    pub fn with_stores(stores: Stores) -> Self {
        let mailer = Arc::new(RecordingDispatcher::default());
        let state = AppState::new(Arc::new(Config::default()), stores, mailer.clone());
        Self { state, mailer }
    }

    pub async fn seed_account(&self, username: &str) -> Account {
        self.seed_account_with(username, None).await
    }

    pub async fn seed_account_with(&self, username: &str, password: Option<&str>) -> Account {
        let password_hash =
            password.map(|p| crypto_core::password::hash_password(p).unwrap());
        self.state
            .stores
            .accounts
            .create(NewAccount {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password_hash,
                provider_id: None,
            })
            .await
            .unwrap()
    }

    pub async fn connect(&self) -> TestClient {
        let conn = ConnectionId::new();
        let rx = handlers::connection_opened(&self.state, conn).await;
        TestClient { conn, rx }
    }

    /// Seed an account, connect, and join as it
    pub async fn joined(&self, username: &str) -> (TestClient, Account) {
        let account = self.seed_account(username).await;
        let mut client = self.connect().await;
        client
            .send(&self.state, serde_json::json!({ "type": "join", "username": username }))
            .await;
        assert_eq!(client.take("join_success").len(), 1, "{username} failed to join");
        client.drain();
        (client, account)
    }

    pub async fn close(&self, client: &TestClient) {
        handlers::connection_closed(&self.state, client.conn).await;
    }
}

pub struct TestClient {
    pub conn: ConnectionId,
    rx: UnboundedReceiver<String>,
}

impl TestClient {
    pub async fn send(&self, state: &AppState, frame: Value) {
        handlers::handle_text_frame(state, self.conn, &frame.to_string()).await;
    }

    pub async fn send_raw(&self, state: &AppState, text: &str) {
        handlers::handle_text_frame(state, self.conn, text).await;
    }

    /// Every frame received so far
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    /// Frames of one type received so far; other frames are discarded
    pub fn take(&mut self, event_type: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|f| f["type"] == event_type)
            .collect()
    }
}
