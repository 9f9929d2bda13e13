//! Shared fixtures for the integration tests.

pub mod server;

#[allow(unused_imports)]
pub use server::*;
