//! Identity attach, registration and login with emailed one-time codes
//!
//! Registration keeps the candidate account in the pending table until its
//! code is verified from the same connection. Login stores the challenge on
//! the account; presence is bound only after the code checks out.

use crate::error::{AppError, AppResult};
use crate::logging::mask_email;
use crate::models::account::{validate_email, validate_username};
use crate::models::{Account, AccountSummary, NewAccount, OtpChallenge, VerificationState};
use crate::services::email::CodeDispatcher;
use crate::services::pending_verification::{PendingRegistration, PendingVerificationStore};
use crate::services::presence::PresenceRegistry;
use crate::store::AccountStore;
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::{ConnectionId, ConnectionRegistry};
use chrono::Utc;
use crypto_core::jwt::SessionKeys;
use crypto_core::{otp, password};
use std::sync::Arc;

const CODE_SENT_MESSAGE: &str = "verification code sent to your email";

pub struct AuthService {
    accounts: Arc<dyn AccountStore>,
    pending: Arc<PendingVerificationStore>,
    presence: Arc<PresenceRegistry>,
    connections: ConnectionRegistry,
    dispatcher: Arc<dyn CodeDispatcher>,
    keys: SessionKeys,
    otp_ttl: chrono::Duration,
}

/// Result of a successful code verification
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    pub account: Account,
    pub token: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn hash_blocking(plain: String) -> AppResult<String> {
    let hash = tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| AppError::Internal(format!("password hash task: {e}")))??;
    Ok(hash)
}

async fn verify_blocking(plain: String, hash: String) -> AppResult<bool> {
    let ok = tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("password verify task: {e}")))??;
    Ok(ok)
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        pending: Arc<PendingVerificationStore>,
        presence: Arc<PresenceRegistry>,
        connections: ConnectionRegistry,
        dispatcher: Arc<dyn CodeDispatcher>,
        keys: SessionKeys,
        otp_ttl: chrono::Duration,
    ) -> Self {
        Self {
            accounts,
            pending,
            presence,
            connections,
            dispatcher,
            keys,
            otp_ttl,
        }
    }

    /// Attach an existing account by username
    pub async fn join(&self, conn: ConnectionId, username: &str) -> AppResult<Account> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("username is required".into()));
        }

        let account = self
            .accounts
            .find_by_username(username)
            .await?
            .ok_or_else(|| AppError::NotFound("user".into()))?;

        let account = self.presence.bind(conn, account.id).await?;
        let users = self.presence.list_online().await?;
        self.connections
            .send_to_connection(
                conn,
                &WsOutboundEvent::JoinSuccess {
                    user: AccountSummary::from(&account),
                    users,
                },
            )
            .await;
        Ok(account)
    }

    /// Attach the account named by a previously issued session token
    pub async fn resume_session(&self, conn: ConnectionId, token: &str) -> AppResult<Account> {
        if token.trim().is_empty() {
            return Err(AppError::Validation("token is required".into()));
        }

        let claims = self.keys.validate(token)?;
        let account_id = claims.account_id()?;
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user".into()))?;

        let account = self.presence.bind(conn, account.id).await?;
        let users = self.presence.list_online().await?;
        self.connections
            .send_to_connection(
                conn,
                &WsOutboundEvent::SessionResumed {
                    user: AccountSummary::from(&account),
                    users,
                },
            )
            .await;
        Ok(account)
    }

    /// Validate a registration request and email a code
    pub async fn register(
        &self,
        conn: ConnectionId,
        username: &str,
        email: &str,
        plain_password: &str,
    ) -> AppResult<()> {
        let username = username.trim().to_string();
        let email = normalize_email(email);
        validate_username(&username).map_err(AppError::Validation)?;
        validate_email(&email).map_err(AppError::Validation)?;
        if plain_password.chars().count() < password::MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "password must be at least {} characters",
                password::MIN_PASSWORD_LENGTH
            )));
        }

        if self.accounts.find_by_username(&username).await?.is_some() {
            return Err(AppError::Conflict("username already taken".into()));
        }
        if self.accounts.find_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("email already registered".into()));
        }
        let now = Utc::now();
        if self
            .pending
            .username_held_by_other(&username, &email, now)
            .await
        {
            return Err(AppError::Conflict("username already taken".into()));
        }

        let password_hash = hash_blocking(plain_password.to_string()).await?;
        let code = otp::generate_code();
        let challenge = OtpChallenge::new(code.clone(), self.otp_ttl, conn, now);
        let entry = PendingRegistration::new(username, email.clone(), password_hash, challenge)?;

        if self.pending.insert(entry).await.is_some() {
            tracing::debug!(email = %mask_email(&email), "replaced earlier pending registration");
        }

        if let Err(e) = self.dispatcher.send_code(&email, &code).await {
            self.pending.remove(&email).await;
            tracing::error!(
                email = %mask_email(&email),
                connection_id = %conn,
                error = %e,
                "failed to dispatch registration code"
            );
            return Err(e);
        }

        tracing::info!(email = %mask_email(&email), connection_id = %conn, "registration code sent");
        self.connections
            .send_to_connection(
                conn,
                &WsOutboundEvent::RegisterSuccess {
                    message: CODE_SENT_MESSAGE.into(),
                    email,
                },
            )
            .await;
        Ok(())
    }

    /// Check credentials and email a login code
    pub async fn login(&self, conn: ConnectionId, email: &str, plain_password: &str) -> AppResult<()> {
        let email = normalize_email(email);
        if email.is_empty() || plain_password.is_empty() {
            return Err(AppError::Validation("email and password are required".into()));
        }

        let account = self
            .accounts
            .find_by_email(&email)
            .await?
            .ok_or_else(|| AppError::Unauthorized("invalid credentials".into()))?;

        if account.is_provider_only() {
            return Err(AppError::Unauthorized(
                "this account signs in through its identity provider".into(),
            ));
        }
        let Some(hash) = account.password_hash.clone() else {
            return Err(AppError::Unauthorized("invalid credentials".into()));
        };
        if !verify_blocking(plain_password.to_string(), hash).await? {
            return Err(AppError::Unauthorized("invalid credentials".into()));
        }

        let code = otp::generate_code();
        let challenge = OtpChallenge::new(code.clone(), self.otp_ttl, conn, Utc::now());
        let state = account.verification_state().begin_login(challenge)?;
        self.accounts
            .set_login_challenge(account.id, state.challenge().cloned())
            .await?;

        if let Err(e) = self.dispatcher.send_code(&account.email, &code).await {
            if let Err(clear_err) = self.accounts.set_login_challenge(account.id, None).await {
                tracing::error!(user_id = %account.id, error = %clear_err, "failed to clear login code");
            }
            tracing::error!(
                user_id = %account.id,
                connection_id = %conn,
                error = %e,
                "failed to dispatch login code"
            );
            return Err(e);
        }

        tracing::info!(user_id = %account.id, connection_id = %conn, "login code sent");
        self.connections
            .send_to_connection(
                conn,
                &WsOutboundEvent::LoginSuccess {
                    message: CODE_SENT_MESSAGE.into(),
                    email: account.email,
                },
            )
            .await;
        Ok(())
    }

    /// Complete a pending registration or login
    ///
    /// Pending registrations requested by this connection are tried first,
    /// then the account whose login code this connection requested. With
    /// `email` present, a login code requested from an earlier connection is
    /// accepted as well.
    pub async fn verify_code(
        &self,
        conn: ConnectionId,
        code: &str,
        email: Option<&str>,
    ) -> AppResult<VerifiedSession> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AppError::Validation("verification code is required".into()));
        }
        if !otp::is_well_formed(code) {
            return Err(AppError::Validation("invalid verification code".into()));
        }

        let now = Utc::now();
        if let Some(registration) = self.pending.take_matching(conn, code, now).await? {
            return self.complete_registration(conn, registration).await;
        }

        let mut account = self.accounts.find_by_challenge_connection(conn).await?;
        if account.is_none() {
            if let Some(email) = email.map(normalize_email).filter(|e| !e.is_empty()) {
                account = self
                    .accounts
                    .find_by_email(&email)
                    .await?
                    .filter(|a| a.login_challenge.is_some());
            }
        }

        let Some(account) = account else {
            if self.pending.has_entry_for(conn).await {
                return Err(AppError::Validation("invalid verification code".into()));
            }
            return Err(AppError::NotFound("pending verification".into()));
        };

        if let Some(challenge) = &account.login_challenge {
            if !challenge.matches(code) {
                return Err(AppError::Validation("invalid verification code".into()));
            }
        }

        // Only the caller that clears the challenge may continue
        let Some(challenge) = self.accounts.take_login_challenge(account.id, code).await? else {
            return Err(AppError::NotFound("pending verification".into()));
        };
        VerificationState::PendingLogin(challenge).verify(code, now)?;

        let token = self
            .keys
            .issue(account.id, &account.username, &account.email)?;
        let account = self.presence.bind(conn, account.id).await?;
        self.announce_verified(conn, &account, &token).await?;

        tracing::info!(user_id = %account.id, connection_id = %conn, "login verified");
        Ok(VerifiedSession { account, token })
    }

    async fn complete_registration(
        &self,
        conn: ConnectionId,
        registration: PendingRegistration,
    ) -> AppResult<VerifiedSession> {
        let account = self
            .accounts
            .create(NewAccount {
                username: registration.username,
                email: registration.email,
                password_hash: Some(registration.password_hash),
                provider_id: None,
            })
            .await?;

        self.connections
            .broadcast(&WsOutboundEvent::NewUserRegistered {
                user: AccountSummary::from(&account),
            })
            .await;

        let token = self
            .keys
            .issue(account.id, &account.username, &account.email)?;
        let account = self.presence.bind(conn, account.id).await?;
        self.announce_verified(conn, &account, &token).await?;

        tracing::info!(user_id = %account.id, connection_id = %conn, "registration verified");
        Ok(VerifiedSession { account, token })
    }

    async fn announce_verified(
        &self,
        conn: ConnectionId,
        account: &Account,
        token: &str,
    ) -> AppResult<()> {
        let users = self.presence.list_online().await?;
        self.connections
            .send_to_connection(
                conn,
                &WsOutboundEvent::VerifyCodeSuccess {
                    user: AccountSummary::from(account),
                    token: token.to_string(),
                    users,
                },
            )
            .await;
        Ok(())
    }

    /// Forget registrations that can no longer be verified from `conn`
    pub async fn release_connection(&self, conn: ConnectionId) {
        let dropped = self.pending.remove_for_connection(conn).await;
        if dropped > 0 {
            tracing::debug!(connection_id = %conn, dropped, "pending registrations discarded");
        }
    }

    /// Remove expired pending registrations; returns how many were dropped
    pub async fn sweep_expired(&self) -> usize {
        self.pending.purge_expired(Utc::now()).await
    }
}
