//! Credential primitives shared by the chat service: session tokens,
//! password hashing and one-time verification codes.

pub mod jwt;
pub mod otp;
pub mod password;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("invalid password hash format: {0}")]
    InvalidHash(String),
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("token validation failed: {0}")]
    InvalidToken(String),
    #[error("session token expired")]
    TokenExpired,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
