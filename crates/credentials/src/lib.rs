//! Credential primitives for the satchel exam-sharing service.
//!
//! This crate provides:
//! - One-way secret hashing and verification (account passwords, OTP codes)
//! - Signed, expiring bearer tokens (account sessions, share-access grants)

pub mod error;
pub mod jwt;
pub mod secrets;

pub use error::{CredentialError, CredentialResult};
pub use jwt::{SessionClaims, ShareAccessClaims, TokenIssuer, SESSION_KIND, SHARE_ACCESS_KIND};
pub use secrets::{hash_secret, verify_secret};
