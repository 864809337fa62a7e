//! Connection-bound presence
//!
//! The in-memory table is authoritative for who is reachable right now; the
//! account's `is_online`/`connection_id` columns mirror it. An account stays
//! online while at least one of its connections is bound.

use crate::error::{AppError, AppResult};
use crate::models::account::sort_by_presence;
use crate::models::{Account, AccountSummary};
use crate::store::AccountStore;
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::{ConnectionId, ConnectionRegistry};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub struct PresenceRegistry {
    accounts: Arc<dyn AccountStore>,
    connections: ConnectionRegistry,
    table: RwLock<HashMap<ConnectionId, Uuid>>,
    // Held across a mapping change and the store write that mirrors it
    transitions: Mutex<()>,
}

/// Outcome of removing one connection's mapping
struct Detached {
    account_id: Uuid,
    still_online: bool,
}

impl PresenceRegistry {
    pub fn new(accounts: Arc<dyn AccountStore>, connections: ConnectionRegistry) -> Self {
        Self {
            accounts,
            connections,
            table: RwLock::new(HashMap::new()),
            transitions: Mutex::new(()),
        }
    }

    /// Attach an account to a connection and announce it
    ///
    /// A connection already bound to a different account is unbound first.
    /// Any failure after the mapping is installed removes it again, so an
    /// error never leaves the connection bound.
    pub async fn bind(&self, conn: ConnectionId, account_id: Uuid) -> AppResult<Account> {
        let now = Utc::now();
        let (superseded, result) = {
            let _guard = self.transitions.lock().await;
            let superseded = match self.resolve(conn).await {
                Some(previous) if previous != account_id => self.detach(conn).await,
                _ => None,
            };
            let result = self.attach(conn, account_id, now).await;
            if result.is_err() {
                self.detach(conn).await;
            }
            (superseded, result)
        };

        if let Some(detached) = superseded {
            self.announce_left(conn, detached, now).await;
        }
        let account = result?;

        tracing::info!(
            user_id = %account.id,
            connection_id = %conn,
            "user bound to connection"
        );

        self.connections
            .broadcast(&WsOutboundEvent::UserJoined {
                connection_id: conn,
                user_id: account.id,
                username: account.username.clone(),
                timestamp: now,
            })
            .await;
        self.broadcast_roster().await;

        Ok(account)
    }

    // Caller holds `transitions`
    async fn attach(
        &self,
        conn: ConnectionId,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Account> {
        self.table.write().await.insert(conn, account_id);

        if !self.connections.join_room(conn, account_id).await {
            tracing::debug!(connection_id = %conn, user_id = %account_id, "bind raced with disconnect");
            return Err(AppError::NotFound("connection".into()));
        }

        self.accounts
            .set_presence(account_id, true, Some(conn), now)
            .await?;

        self.accounts
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound("account".into()))
    }

    /// Detach a connection; unknown or already-unbound connections are a no-op
    ///
    /// `user_left` is only announced when the account has no other bound
    /// connection.
    pub async fn unbind(&self, conn: ConnectionId) -> Option<Uuid> {
        let detached = {
            let _guard = self.transitions.lock().await;
            self.detach(conn).await?
        };
        let account_id = detached.account_id;
        self.announce_left(conn, detached, Utc::now()).await;
        Some(account_id)
    }

    // Caller holds `transitions`
    async fn detach(&self, conn: ConnectionId) -> Option<Detached> {
        let (account_id, remaining) = {
            let mut table = self.table.write().await;
            let account_id = table.remove(&conn)?;
            let remaining = table
                .iter()
                .find(|(_, id)| **id == account_id)
                .map(|(c, _)| *c);
            (account_id, remaining)
        };
        self.connections.leave_room(conn, account_id).await;

        let now = Utc::now();
        let persisted = match remaining {
            Some(other) => {
                self.accounts
                    .set_presence(account_id, true, Some(other), now)
                    .await
            }
            None => self.accounts.set_presence(account_id, false, None, now).await,
        };
        if let Err(e) = persisted {
            tracing::error!(
                user_id = %account_id,
                connection_id = %conn,
                error = %e,
                "failed to persist presence after unbind"
            );
        }

        Some(Detached {
            account_id,
            still_online: remaining.is_some(),
        })
    }

    async fn announce_left(&self, conn: ConnectionId, detached: Detached, now: DateTime<Utc>) {
        let Detached {
            account_id,
            still_online,
        } = detached;

        tracing::info!(
            user_id = %account_id,
            connection_id = %conn,
            still_online,
            "user unbound from connection"
        );

        if !still_online {
            let username = match self.accounts.find_by_id(account_id).await {
                Ok(Some(account)) => account.username,
                Ok(None) => String::new(),
                Err(e) => {
                    tracing::warn!(user_id = %account_id, error = %e, "account lookup failed during unbind");
                    String::new()
                }
            };
            self.connections
                .broadcast(&WsOutboundEvent::UserLeft {
                    connection_id: conn,
                    user_id: account_id,
                    username,
                    timestamp: now,
                })
                .await;
        }
        self.broadcast_roster().await;
    }

    /// Accounts marked online, online-first then most recently seen
    pub async fn list_online(&self) -> AppResult<Vec<AccountSummary>> {
        let mut online = self.accounts.list_online().await?;
        sort_by_presence(&mut online);
        Ok(online.iter().map(AccountSummary::from).collect())
    }

    pub async fn resolve(&self, conn: ConnectionId) -> Option<Uuid> {
        self.table.read().await.get(&conn).copied()
    }

    /// Account bound to `conn`, or `SenderUnresolved`
    pub async fn require(&self, conn: ConnectionId) -> AppResult<Uuid> {
        self.resolve(conn).await.ok_or(AppError::SenderUnresolved)
    }

    pub async fn is_reachable(&self, account_id: Uuid) -> bool {
        self.table.read().await.values().any(|id| *id == account_id)
    }

    pub async fn bound_count(&self) -> usize {
        self.table.read().await.len()
    }

    /// Send the full online roster to every connection
    pub async fn broadcast_roster(&self) {
        match self.list_online().await {
            Ok(users) => {
                self.connections
                    .broadcast(&WsOutboundEvent::UsersList { users })
                    .await
            }
            Err(e) => tracing::error!(error = %e, "failed to load roster for broadcast"),
        }
    }

    /// Drop every mapping and mark all accounts offline
    pub async fn clear(&self) -> AppResult<()> {
        let _guard = self.transitions.lock().await;
        let drained = {
            let mut table = self.table.write().await;
            let n = table.len();
            table.clear();
            n
        };
        let reset = self.accounts.reset_presence(Utc::now()).await?;
        tracing::info!(connections = drained, accounts = reset, "presence table cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAccount;
    use crate::store::MemoryStore;

    async fn setup() -> (PresenceRegistry, Arc<MemoryStore>, ConnectionRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = ConnectionRegistry::new();
        let presence = PresenceRegistry::new(store.clone(), registry.clone());
        (presence, store, registry)
    }

    async fn account(store: &MemoryStore, name: &str) -> Account {
        store
            .create(NewAccount {
                username: name.into(),
                email: format!("{name}@example.com"),
                password_hash: None,
                provider_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_then_unbind_round_trip() {
        let (presence, store, registry) = setup().await;
        let alice = account(&store, "alice").await;
        let conn = ConnectionId::new();
        let _rx = registry.register(conn).await;

        let bound = presence.bind(conn, alice.id).await.unwrap();
        assert!(bound.is_online);
        assert_eq!(bound.connection_id, Some(conn));
        assert_eq!(presence.list_online().await.unwrap().len(), 1);

        assert_eq!(presence.unbind(conn).await, Some(alice.id));
        assert_eq!(presence.unbind(conn).await, None);

        let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
        assert!(!stored.is_online);
        assert!(stored.connection_id.is_none());
    }

    #[tokio::test]
    async fn test_second_session_keeps_account_online() {
        let (presence, store, registry) = setup().await;
        let alice = account(&store, "alice").await;
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());
        let _rx1 = registry.register(c1).await;
        let _rx2 = registry.register(c2).await;

        presence.bind(c1, alice.id).await.unwrap();
        presence.bind(c2, alice.id).await.unwrap();
        presence.unbind(c1).await;

        let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
        assert!(stored.is_online);
        assert_eq!(stored.connection_id, Some(c2));
    }

    #[tokio::test]
    async fn test_rebind_to_other_account_supersedes() {
        let (presence, store, registry) = setup().await;
        let alice = account(&store, "alice").await;
        let bob = account(&store, "bob").await;
        let conn = ConnectionId::new();
        let _rx = registry.register(conn).await;

        presence.bind(conn, alice.id).await.unwrap();
        presence.bind(conn, bob.id).await.unwrap();

        assert_eq!(presence.resolve(conn).await, Some(bob.id));
        let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
        assert!(!stored.is_online);
    }

    #[tokio::test]
    async fn test_bind_on_closed_connection_reverts() {
        let (presence, store, _registry) = setup().await;
        let alice = account(&store, "alice").await;
        let conn = ConnectionId::new();

        let result = presence.bind(conn, alice.id).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(presence.bound_count().await, 0);
        let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
        assert!(!stored.is_online);
    }

    #[tokio::test]
    async fn test_bind_unknown_account_installs_nothing() {
        let (presence, _store, registry) = setup().await;
        let conn = ConnectionId::new();
        let _rx = registry.register(conn).await;

        assert!(presence.bind(conn, Uuid::new_v4()).await.is_err());
        assert_eq!(presence.resolve(conn).await, None);
    }

    /// Account store whose lookups by id fail
    struct BrokenLookups(MemoryStore);

    #[async_trait::async_trait]
    impl AccountStore for BrokenLookups {
        async fn find_by_id(&self, _id: Uuid) -> AppResult<Option<Account>> {
            Err(AppError::Upstream("database: connection reset".into()))
        }
        async fn find_by_username(&self, username: &str) -> AppResult<Option<Account>> {
            self.0.find_by_username(username).await
        }
        async fn find_by_email(&self, email: &str) -> AppResult<Option<Account>> {
            self.0.find_by_email(email).await
        }
        async fn find_by_challenge_connection(
            &self,
            conn: ConnectionId,
        ) -> AppResult<Option<Account>> {
            self.0.find_by_challenge_connection(conn).await
        }
        async fn create(&self, new: NewAccount) -> AppResult<Account> {
            self.0.create(new).await
        }
        async fn set_presence(
            &self,
            id: Uuid,
            is_online: bool,
            connection_id: Option<ConnectionId>,
            last_seen: DateTime<Utc>,
        ) -> AppResult<()> {
            self.0.set_presence(id, is_online, connection_id, last_seen).await
        }
        async fn set_login_challenge(
            &self,
            id: Uuid,
            challenge: Option<crate::models::OtpChallenge>,
        ) -> AppResult<()> {
            self.0.set_login_challenge(id, challenge).await
        }
        async fn take_login_challenge(
            &self,
            id: Uuid,
            code: &str,
        ) -> AppResult<Option<crate::models::OtpChallenge>> {
            self.0.take_login_challenge(id, code).await
        }
        async fn list_online(&self) -> AppResult<Vec<Account>> {
            self.0.list_online().await
        }
        async fn list_all(&self) -> AppResult<Vec<Account>> {
            self.0.list_all().await
        }
        async fn reset_presence(&self, now: DateTime<Utc>) -> AppResult<u64> {
            self.0.reset_presence(now).await
        }
    }

    #[tokio::test]
    async fn test_bind_failure_after_presence_write_unbinds() {
        let inner = MemoryStore::new();
        let alice = account(&inner, "alice").await;
        let store = Arc::new(BrokenLookups(inner));
        let registry = ConnectionRegistry::new();
        let presence = PresenceRegistry::new(store.clone(), registry.clone());
        let conn = ConnectionId::new();
        let _rx = registry.register(conn).await;

        let result = presence.bind(conn, alice.id).await;
        assert!(matches!(result, Err(AppError::Upstream(_))));
        assert_eq!(presence.resolve(conn).await, None);
        assert!(registry.room_members(alice.id).await.is_empty());

        let stored = store.0.list_online().await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_user_left_only_when_last_session_closes() {
        let (presence, store, registry) = setup().await;
        let alice = account(&store, "alice").await;
        let (c1, c2, watcher) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());
        let _rx1 = registry.register(c1).await;
        let _rx2 = registry.register(c2).await;
        let mut rx_watcher = registry.register(watcher).await;

        presence.bind(c1, alice.id).await.unwrap();
        presence.bind(c2, alice.id).await.unwrap();
        while rx_watcher.try_recv().is_ok() {}

        let left_events = |rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>| {
            let mut n = 0;
            while let Ok(frame) = rx.try_recv() {
                if frame.contains("\"type\":\"user_left\"") {
                    n += 1;
                }
            }
            n
        };

        presence.unbind(c1).await;
        assert_eq!(left_events(&mut rx_watcher), 0);

        presence.unbind(c2).await;
        assert_eq!(left_events(&mut rx_watcher), 1);
    }

    #[tokio::test]
    async fn test_require_reports_unresolved_sender() {
        let (presence, _store, _registry) = setup().await;
        assert!(matches!(
            presence.require(ConnectionId::new()).await,
            Err(AppError::SenderUnresolved)
        ));
    }
}
