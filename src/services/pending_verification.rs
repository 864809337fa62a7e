use crate::error::AppResult;
use crate::models::{OtpChallenge, VerificationState};
use crate::websocket::ConnectionId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A registration waiting for its emailed code
#[derive(Debug, Clone)]
pub struct PendingRegistration {
    pub username: String,
    pub email: String,
    /// Argon2 PHC string; the plaintext password is never held
    pub password_hash: String,
    pub state: VerificationState,
    pub created_at: DateTime<Utc>,
}

impl PendingRegistration {
    pub fn new(
        username: String,
        email: String,
        password_hash: String,
        challenge: OtpChallenge,
    ) -> AppResult<Self> {
        let state = VerificationState::None.begin_registration(challenge)?;
        Ok(Self {
            username,
            email,
            password_hash,
            state,
            created_at: Utc::now(),
        })
    }

    pub fn challenge(&self) -> Option<&OtpChallenge> {
        self.state.challenge()
    }

    fn requested_by(&self, conn: ConnectionId) -> bool {
        self.challenge().is_some_and(|c| c.requested_by == conn)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.challenge().map_or(true, |c| c.is_expired(now))
    }
}

/// Not-yet-committed registrations keyed by email; lost on restart
#[derive(Default)]
pub struct PendingVerificationStore {
    entries: RwLock<HashMap<String, PendingRegistration>>,
}

impl PendingVerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing any earlier registration for the same email
    pub async fn insert(&self, entry: PendingRegistration) -> Option<PendingRegistration> {
        self.entries
            .write()
            .await
            .insert(entry.email.clone(), entry)
    }

    /// Whether a live pending registration for another email holds `username`
    pub async fn username_held_by_other(
        &self,
        username: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|p| p.username == username && p.email != email && !p.is_expired(now))
    }

    /// Take the entry requested by `conn` whose code matches
    ///
    /// A matching but expired entry is discarded and reported as `Expired`.
    pub async fn take_matching(
        &self,
        conn: ConnectionId,
        code: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PendingRegistration>> {
        let mut entries = self.entries.write().await;
        let key = entries
            .iter()
            .find(|(_, p)| p.requested_by(conn) && p.challenge().is_some_and(|c| c.matches(code)))
            .map(|(k, _)| k.clone());

        let Some(key) = key else {
            return Ok(None);
        };
        let Some(entry) = entries.remove(&key) else {
            return Ok(None);
        };

        let verified = entry.state.verify(code, now)?;
        Ok(Some(PendingRegistration {
            state: verified,
            ..entry
        }))
    }

    pub async fn has_entry_for(&self, conn: ConnectionId) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|p| p.requested_by(conn))
    }

    pub async fn remove(&self, email: &str) -> Option<PendingRegistration> {
        self.entries.write().await.remove(email)
    }

    /// Drop entries requested by a connection that has gone away
    pub async fn remove_for_connection(&self, conn: ConnectionId) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, p| !p.requested_by(conn));
        before - entries.len()
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, p| !p.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
