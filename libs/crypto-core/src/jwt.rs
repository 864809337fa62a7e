//! Session token issuance and validation
//!
//! Tokens are HS256-signed JWTs carrying the account id, username and email.
//! Keys live in an explicitly constructed [`SessionKeys`] value that the
//! service owns and passes around; nothing here is process-global.
//!
//! ## Usage
//!
//! ```rust
//! use crypto_core::jwt::SessionKeys;
//! use uuid::Uuid;
//!
//! let keys = SessionKeys::from_secret("change-me", 24);
//! let token = keys.issue(Uuid::new_v4(), "alice", "alice@example.com").unwrap();
//! let claims = keys.validate(&token).unwrap();
//! assert_eq!(claims.username, "alice");
//! ```
use crate::{CryptoError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;
const SESSION_TOKEN_TYPE: &str = "session";

/// JWT claims for a chat session
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (account id as UUID string)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub token_type: String,
    pub username: String,
    pub email: String,
}

impl Claims {
    /// Account id carried in `sub`
    pub fn account_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|e| CryptoError::InvalidToken(format!("invalid subject: {e}")))
    }
}

/// Signing and verification keys plus the token lifetime
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn from_secret(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Lifetime of issued tokens in seconds
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Issue a signed session token for an account
    pub fn issue(&self, account_id: Uuid, username: &str, email: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: account_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            token_type: SESSION_TOKEN_TYPE.to_string(),
            username: username.to_string(),
            email: email.to_string(),
        };

        encode(&Header::new(JWT_ALGORITHM), &claims, &self.encoding)
            .map_err(|e| CryptoError::Signing(e.to_string()))
    }

    /// Validate signature, expiry and token type
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => CryptoError::TokenExpired,
                _ => CryptoError::InvalidToken(e.to_string()),
            }
        })?;

        if data.claims.token_type != SESSION_TOKEN_TYPE {
            return Err(CryptoError::InvalidToken(format!(
                "unexpected token type: {}",
                data.claims.token_type
            )));
        }

        Ok(data.claims)
    }
}
