use crate::models::verification::{OtpChallenge, VerificationState};
use crate::websocket::ConnectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 50;
pub const EMAIL_MIN_LEN: usize = 5;
pub const EMAIL_MAX_LEN: usize = 255;

/// Account record owned by the identity store
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    /// External identity-provider subject, for provider-only accounts
    pub provider_id: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub login_challenge: Option<OtpChallenge>,
    pub connection_id: Option<ConnectionId>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn verification_state(&self) -> VerificationState {
        match &self.login_challenge {
            Some(challenge) => VerificationState::PendingLogin(challenge.clone()),
            None => VerificationState::None,
        }
    }

    /// Provider-only accounts have no password and must use their provider
    pub fn is_provider_only(&self) -> bool {
        self.provider_id.is_some() && self.password_hash.is_none()
    }
}

/// Fields needed to materialize a new account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub provider_id: Option<String>,
}

/// Public projection of an account used in rosters and contact lists
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            is_online: account.is_online,
            last_seen: account.last_seen,
        }
    }
}

/// Online accounts first, then most recently seen first
pub fn sort_by_presence(accounts: &mut [Account]) {
    accounts.sort_by(|a, b| {
        b.is_online
            .cmp(&a.is_online)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
    });
}

/// Online accounts first, then alphabetical by username
pub fn sort_by_presence_then_name(accounts: &mut [Account]) {
    accounts.sort_by(|a, b| {
        b.is_online
            .cmp(&a.is_online)
            .then_with(|| a.username.cmp(&b.username))
    });
}

pub fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if username.trim().is_empty() {
        return Err("username is required".into());
    }
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(format!(
            "username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.trim().is_empty() {
        return Err("email is required".into());
    }
    let len = email.chars().count();
    if !(EMAIL_MIN_LEN..=EMAIL_MAX_LEN).contains(&len) || !email.contains('@') {
        return Err("invalid email address".into());
    }
    Ok(())
}
