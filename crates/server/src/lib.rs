//! HTTP API server for Satchel, a medical exam sharing service.
//!
//! This crate provides the HTTP surface:
//! - Account registration and session login
//! - Exam and exam-file management for owners
//! - Share bundle lifecycle (create, list, revoke, expire, delete)
//! - The public share surface: summary, email OTP challenge, token-gated
//!   downloads and zip archives
//! - Per-bundle access ledger endpoints

pub mod auth;
pub mod error;
pub mod handlers;
pub mod limits;
pub mod metrics;
pub mod ratelimit;
pub mod routes;
pub mod share_access;
pub mod state;

pub use auth::TraceId;
pub use error::ApiError;
pub use ratelimit::{RateLimitState, UserIdExtension};
pub use routes::create_router;
pub use state::AppState;
