//! HTTP request handlers.

pub mod auth;
pub mod common;
pub mod exams;
pub mod health;
pub mod media;
pub mod share_download;
pub mod share_public;
pub mod shares;

pub use auth::*;
pub use common::*;
pub use exams::*;
pub use health::*;
pub use media::*;
pub use share_download::*;
pub use share_public::*;
pub use shares::*;
