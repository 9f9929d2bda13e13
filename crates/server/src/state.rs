//! Application state shared across handlers.

use crate::ratelimit::RateLimitState;
use satchel_core::config::AppConfig;
use satchel_credentials::TokenIssuer;
use satchel_mailer::Mailer;
use satchel_metadata::MetadataStore;
use satchel_storage::ObjectStore;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Parsed configuration, shared by reference.
    pub config: Arc<AppConfig>,
    /// Object storage backend for exam files.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Outbound mail transport.
    pub mailer: Arc<dyn Mailer>,
    /// Session and share-access token issuer.
    pub issuer: Arc<TokenIssuer>,
    /// Transport-level rate limiter.
    pub rate_limit: RateLimitState,
}

impl AppState {
    /// Build the shared state, wiring the limiter and token issuer from
    /// config.
    ///
    /// # Panics
    ///
    /// Panics when the rate-limit configuration is invalid; startup is
    /// the only caller.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let warnings = config
            .rate_limit
            .validate()
            .unwrap_or_else(|error| panic!("invalid rate limit configuration: {error}"));
        for warning in warnings {
            tracing::warn!(%warning, "rate limit configuration warning");
        }

        let rate_limit = RateLimitState::new(&config.rate_limit);
        let issuer = Arc::new(TokenIssuer::new(&config.tokens));

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            mailer,
            issuer,
            rate_limit,
        }
    }

    /// Cleanup cadence for the transport limiter; None when limiting is
    /// disabled.
    ///
    /// A zero interval would make `tokio::time::interval` panic, so it
    /// falls back to 60 seconds.
    pub fn rate_limit_cleanup_interval(&self) -> Option<Duration> {
        if !self.rate_limit.is_enabled() {
            return None;
        }
        match self.config.rate_limit.cleanup_interval_secs {
            0 => {
                tracing::warn!("rate_limit.cleanup_interval_secs is 0, falling back to 60s");
                Some(Duration::from_secs(60))
            }
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
