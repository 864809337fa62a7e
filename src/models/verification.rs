//! One-time-code verification states
//!
//! Registration: `None -> PendingRegistration -> Verified`.
//! Login: `None -> PendingLogin -> Verified`.
//! Transition functions check the current state before producing the next one
//! and never mutate in place; callers persist the returned state.

use crate::error::{AppError, AppResult};
use crate::websocket::ConnectionId;
use chrono::{DateTime, Duration, Utc};

/// An outstanding code plus its deadline and the connection that asked for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub requested_by: ConnectionId,
}

impl OtpChallenge {
    pub fn new(code: String, ttl: Duration, requested_by: ConnectionId, now: DateTime<Utc>) -> Self {
        Self {
            code,
            expires_at: now + ttl,
            requested_by,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn matches(&self, code: &str) -> bool {
        crypto_core::otp::codes_match(&self.code, code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationState {
    None,
    PendingRegistration(OtpChallenge),
    PendingLogin(OtpChallenge),
    Verified { verified_at: DateTime<Utc> },
}

impl VerificationState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PendingRegistration(_) => "pending_registration",
            Self::PendingLogin(_) => "pending_login",
            Self::Verified { .. } => "verified",
        }
    }

    pub fn challenge(&self) -> Option<&OtpChallenge> {
        match self {
            Self::PendingRegistration(c) | Self::PendingLogin(c) => Some(c),
            _ => None,
        }
    }

    /// Start (or restart) a registration verification
    pub fn begin_registration(&self, challenge: OtpChallenge) -> AppResult<Self> {
        match self {
            Self::None | Self::PendingRegistration(_) => Ok(Self::PendingRegistration(challenge)),
            other => Err(AppError::Conflict(format!(
                "cannot start registration from state {}",
                other.name()
            ))),
        }
    }

    /// Start (or restart) a login verification for an existing account
    pub fn begin_login(&self, challenge: OtpChallenge) -> AppResult<Self> {
        match self {
            Self::None | Self::PendingLogin(_) | Self::Verified { .. } => {
                Ok(Self::PendingLogin(challenge))
            }
            other => Err(AppError::Conflict(format!(
                "cannot start login from state {}",
                other.name()
            ))),
        }
    }

    /// Check a presented code; success moves to `Verified`
    pub fn verify(&self, code: &str, now: DateTime<Utc>) -> AppResult<Self> {
        let challenge = self.challenge().ok_or_else(|| {
            AppError::NotFound("pending verification".to_string())
        })?;

        if !challenge.matches(code) {
            return Err(AppError::Validation("invalid verification code".into()));
        }
        if challenge.is_expired(now) {
            return Err(AppError::Expired("verification code has expired".into()));
        }
        Ok(Self::Verified { verified_at: now })
    }
}
