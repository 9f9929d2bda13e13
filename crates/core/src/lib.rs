//! Core domain types and shared logic for the satchel exam-sharing service.
//!
//! This crate defines the vocabulary used across all other crates:
//! - Share codes and OTP generation
//! - Access-ledger event kinds
//! - Media kind classification
//! - Email / filename normalization
//! - Configuration for every subsystem

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod share;
pub mod text;

pub use config::{
    AppConfig, MailConfig, MetadataConfig, RateLimitConfig, ServerConfig, ShareConfig,
    StorageConfig, TokenConfig,
};
pub use error::{Error, Result};
pub use events::AccessEventKind;
pub use media::MediaKind;
pub use share::{generate_otp, generate_share_code};
pub use text::{normalize_email, safe_file_name};

use time::Duration;

/// Number of base62 characters in a public share code.
pub const SHARE_CODE_LENGTH: usize = 12;

/// Attempts to find an unused share code before giving up.
pub const SHARE_CODE_RETRY_LIMIT: u32 = 10;

/// Lifetime of an OTP challenge.
pub const OTP_TTL: Duration = Duration::minutes(10);

/// Wrong submissions allowed against a single OTP challenge.
pub const OTP_MAX_ATTEMPTS: i64 = 5;

/// OTP send budget per (bundle, ip) within [`OTP_SEND_WINDOW`].
pub const OTP_SEND_LIMIT: i64 = 5;

/// Rolling window for the OTP send budget.
pub const OTP_SEND_WINDOW: Duration = Duration::minutes(60);

/// OTP verification budget per (bundle, ip) within [`OTP_VERIFY_WINDOW`].
pub const OTP_VERIFY_LIMIT: i64 = 5;

/// Rolling window for the OTP verification budget.
pub const OTP_VERIFY_WINDOW: Duration = Duration::minutes(10);

/// Lifetime of a share-access token issued after OTP success.
pub const SHARE_ACCESS_TTL: Duration = Duration::minutes(15);
