//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Listener and HTTP surface settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on, host:port.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Public base URL embedded in share links and notification emails
    /// (e.g., "https://satchel.example.com"). No trailing slash.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Maximum accepted upload body size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Attach the tower-http request trace layer.
    #[serde(default)]
    pub enable_tracing: bool,
    /// Enable the /metrics endpoint for Prometheus scraping (default: false).
    /// SECURITY: when enabled, restrict this endpoint to authorized scraper
    /// IPs at the infrastructure level; it is unauthenticated.
    #[serde(default)]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024 // 50 MiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: default_public_base_url(),
            max_upload_bytes: default_max_upload_bytes(),
            enable_tracing: false,
            metrics_enabled: false,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.public_base_url.is_empty() {
            return Err("server.public_base_url cannot be empty".to_string());
        }
        if self.public_base_url.ends_with('/') {
            return Err("server.public_base_url must not end with '/'".to_string());
        }
        if self.max_upload_bytes == 0 {
            return Err("server.max_upload_bytes cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Signed-token configuration.
///
/// One HS256 secret signs both session tokens and the short-lived
/// share-access tokens; the claim set's `kind` field keeps the two
/// non-interchangeable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Signing secret. Required, minimum 32 bytes.
    /// WARNING: prefer the SATCHEL_TOKENS__SECRET env var over storing
    /// this in a config file.
    pub secret: String,
    /// Session token lifetime in hours (default: 168 = 7 days).
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,
}

fn default_session_ttl_hours() -> u64 {
    168 // 7 days
}

impl TokenConfig {
    /// Get the session lifetime as a Duration.
    pub fn session_ttl(&self) -> Duration {
        // A u64 past i64::MAX would wrap negative; saturate instead.
        let hours = i64::try_from(self.session_ttl_hours).unwrap_or(i64::MAX);
        Duration::hours(hours)
    }

    /// Validate token configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.len() < 32 {
            return Err(format!(
                "tokens.secret must be at least 32 bytes (got {})",
                self.secret.len()
            ));
        }
        if self.session_ttl_hours == 0 {
            return Err("tokens.session_ttl_hours cannot be 0".to_string());
        }
        Ok(())
    }

    /// Create a test configuration with a fixed secret.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            secret: "satchel-test-secret-satchel-test-secret".to_string(),
            session_ttl_hours: default_session_ttl_hours(),
        }
    }
}

/// Share-link defaults and debug switches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Default bundle lifetime in days when the owner does not specify one.
    #[serde(default = "default_expires_in_days")]
    pub default_expires_in_days: u16,
    /// Default max_uses when the owner does not specify one.
    #[serde(default = "default_max_uses")]
    pub default_max_uses: u32,
    /// Include the raw OTP in the request-access response (default: false).
    /// For local development without a mail sink only; never enable in
    /// production.
    #[serde(default)]
    pub expose_otp: bool,
}

fn default_expires_in_days() -> u16 {
    7
}

fn default_max_uses() -> u32 {
    1
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            default_expires_in_days: default_expires_in_days(),
            default_max_uses: default_max_uses(),
            expose_otp: false,
        }
    }
}

impl ShareConfig {
    /// Validate share configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_expires_in_days == 0 || self.default_expires_in_days > 365 {
            return Err("share.default_expires_in_days must be within 1..=365".to_string());
        }
        if self.default_max_uses == 0 || self.default_max_uses > 100 {
            return Err("share.default_max_uses must be within 1..=100".to_string());
        }
        Ok(())
    }
}

/// TLS mode for the SMTP transport.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    /// Implicit TLS from the first byte (port 465).
    #[default]
    Implicit,
    /// Plaintext connection upgraded via STARTTLS (port 587).
    Starttls,
    /// No TLS at all. Local development against a capture sink only.
    None,
}

/// Outbound mail configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MailConfig {
    /// Real SMTP delivery.
    Smtp {
        /// SMTP relay host.
        host: String,
        /// SMTP port (default: 465).
        #[serde(default = "default_smtp_port")]
        port: u16,
        /// Relay username. Optional for unauthenticated relays.
        username: Option<String>,
        /// Relay password.
        /// WARNING: prefer the SATCHEL_MAIL__PASSWORD env var over storing
        /// this in a config file.
        password: Option<String>,
        /// TLS mode.
        #[serde(default)]
        tls: SmtpTls,
        /// From address for all outbound mail.
        from_address: String,
        /// Display name on the From header.
        #[serde(default = "default_from_name")]
        from_name: String,
    },
    /// No delivery; outbound mail is written to the log. The development
    /// default, mirroring an unconfigured SMTP environment.
    Log {
        /// From address recorded on logged mail.
        #[serde(default = "default_log_from")]
        from_address: String,
    },
}

fn default_smtp_port() -> u16 {
    465
}

fn default_from_name() -> String {
    "Satchel".to_string()
}

fn default_log_from() -> String {
    "noreply@localhost".to_string()
}

impl Default for MailConfig {
    fn default() -> Self {
        Self::Log {
            from_address: default_log_from(),
        }
    }
}

impl MailConfig {
    /// Validate mail configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MailConfig::Smtp {
                host,
                username,
                password,
                from_address,
                ..
            } => {
                if host.is_empty() {
                    return Err("mail.host cannot be empty".to_string());
                }
                if from_address.is_empty() {
                    return Err("mail.from_address cannot be empty".to_string());
                }
                match (username.as_ref(), password.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "smtp config requires both username and password when either is set"
                            .to_string(),
                    ),
                }
            }
            MailConfig::Log { .. } => Ok(()),
        }
    }
}

/// Blob storage configuration for exam attachments.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Blobs under a local directory.
    Filesystem {
        /// Root directory for stored files.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/files"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        let StorageConfig::Filesystem { path } = self;
        if path.as_os_str().is_empty() {
            return Err("storage.path cannot be empty".to_string());
        }
        Ok(())
    }
}

/// TLS posture for PostgreSQL connections.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Plaintext only.
    Disable,
    /// TLS when the server offers it, plaintext otherwise (default).
    #[default]
    Prefer,
    /// Refuse unencrypted connections.
    Require,
}

/// Control-plane database selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// Single-file SQLite store. Fine for a clinic-scale deployment or
    /// tests; use postgres beyond that.
    Sqlite {
        /// Where the database file lives.
        path: PathBuf,
    },
    /// PostgreSQL store.
    Postgres {
        /// Full connection URL. Wins over the individual fields below
        /// when both are given.
        url: Option<String>,
        /// Server hostname.
        host: Option<String>,
        /// Server port when connecting by host.
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Login role.
        username: Option<String>,
        /// Login password.
        /// WARNING: prefer the SATCHEL_METADATA__PASSWORD env var over
        /// storing this in a config file.
        password: Option<String>,
        /// Database to open.
        database: Option<String>,
        /// TLS posture, see [`PgSslMode`].
        ssl_mode: Option<PgSslMode>,
        /// Pool size cap.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Reject shapes that name no usable database.
    pub fn validate(&self) -> Result<(), String> {
        let MetadataConfig::Postgres {
            url,
            host,
            database,
            ..
        } = self
        else {
            return Ok(());
        };
        if url.is_some() {
            return Ok(());
        }
        // Piecewise connection needs at least a host and a database name.
        match (host, database) {
            (Some(_), Some(_)) => Ok(()),
            (Some(_), None) => {
                Err("metadata.database is required when connecting by metadata.host".to_string())
            }
            (None, _) => {
                Err("metadata needs either metadata.url or metadata.host + metadata.database"
                    .to_string())
            }
        }
    }
}

/// Rate limiting configuration for the HTTP surface.
///
/// This is transport-level limiting (per client IP on the public share
/// endpoints, per user on `/api`); the OTP send/verify windows are ledger
/// policies and are not configured here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch; off by default.
    #[serde(default)]
    pub enabled: bool,
    /// Per-minute budget for each client IP on the public endpoints.
    #[serde(default = "default_ip_requests_per_minute")]
    pub ip_requests_per_minute: u32,
    /// Per-minute budget for each signed-in account on `/api`.
    #[serde(default = "default_user_requests_per_minute")]
    pub user_requests_per_minute: u32,
    /// Extra requests a key may spend at once before the per-minute
    /// refill applies.
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    /// Proxy addresses (plain IPs or CIDR ranges) whose
    /// X-Forwarded-For/X-Real-IP headers are believed. Empty means
    /// forwarded headers are ignored; `["*"]` believes everyone, which
    /// is for development only.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Cap on distinct IPs/users tracked at once. Past the cap, new keys
    /// are throttled outright so an address-spraying client cannot grow
    /// the maps without bound.
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
    /// Seconds between sweeps that drop stale tracking entries.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Seconds a tracking entry may sit idle before a sweep drops it.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
}

fn default_ip_requests_per_minute() -> u32 {
    60
}

fn default_user_requests_per_minute() -> u32 {
    600
}

fn default_burst_size() -> u32 {
    20
}

fn default_max_entries() -> u32 {
    100_000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_entry_ttl_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ip_requests_per_minute: default_ip_requests_per_minute(),
            user_requests_per_minute: default_user_requests_per_minute(),
            burst_size: default_burst_size(),
            trusted_proxies: Vec::new(),
            max_entries: default_max_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            entry_ttl_secs: default_entry_ttl_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Validate rate limit configuration.
    ///
    /// Hard errors reject the config; legal-but-risky settings come back
    /// as warnings for the caller to log.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !self.enabled {
            return Ok(warnings);
        }

        // A zero interval would panic when creating the cleanup timer.
        if self.cleanup_interval_secs == 0 {
            return Err("rate_limit.cleanup_interval_secs cannot be 0; use at least 1 second"
                .to_string());
        }

        if self.trusted_proxies.len() == 1 && self.trusted_proxies[0] == "*" {
            warnings.push(
                "rate_limit.trusted_proxies=['*'] believes forwarded headers from anyone, \
                 so a client can pick its own IP and dodge the per-IP limit; keep this to \
                 development setups"
                    .to_string(),
            );
        }

        if self.entry_ttl_secs < 120 {
            warnings.push(format!(
                "rate_limit.entry_ttl_secs={} may evict a tracking entry before its window \
                 resets, handing a patient client a fresh budget; 120 seconds or more is safer",
                self.entry_ttl_secs
            ));
        }

        Ok(warnings)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener and HTTP surface.
    #[serde(default)]
    pub server: ServerConfig,
    /// Blob storage for exam files.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Control-plane database.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Signed-token settings (required; no default secret exists).
    pub tokens: TokenConfig,
    /// Outbound mail transport.
    #[serde(default)]
    pub mail: MailConfig,
    /// Share-link defaults.
    #[serde(default)]
    pub share: ShareConfig,
    /// Transport rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Validate every section up front.
    ///
    /// The storage and mail factories re-check their own sections at
    /// construction; running the full sweep first turns a bad config into
    /// one readable startup error instead of a failure halfway through
    /// initialization. Rate-limit warnings are reported separately by the
    /// server state constructor.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.tokens.validate()?;
        self.mail.validate()?;
        self.share.validate()?;
        Ok(())
    }

    /// Canned configuration for tests: filesystem storage, SQLite
    /// metadata, logged mail, and a fixed token secret.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            tokens: TokenConfig::for_testing(),
            mail: MailConfig::default(),
            share: ShareConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_config_rejects_short_secret() {
        let config = TokenConfig {
            secret: "too-short".to_string(),
            session_ttl_hours: 24,
        };
        assert!(config.validate().is_err());
        assert!(TokenConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_app_config_validate_covers_every_section() {
        assert!(AppConfig::for_testing().validate().is_ok());

        let mut config = AppConfig::for_testing();
        config.tokens.secret = "too-short".to_string();
        let error = config.validate().unwrap_err();
        assert!(error.contains("tokens.secret"), "got: {error}");

        let mut config = AppConfig::for_testing();
        config.share.default_max_uses = 0;
        let error = config.validate().unwrap_err();
        assert!(error.contains("share.default_max_uses"), "got: {error}");
    }

    #[test]
    fn test_share_config_defaults() {
        let config = ShareConfig::default();
        assert_eq!(config.default_expires_in_days, 7);
        assert_eq!(config.default_max_uses, 1);
        assert!(!config.expose_otp, "expose_otp must default to off");
    }

    #[test]
    fn test_mail_config_defaults_to_log() {
        let config = MailConfig::default();
        assert!(matches!(config, MailConfig::Log { .. }));
    }

    #[test]
    fn test_mail_config_deserializes_tagged_smtp() {
        let json = r#"{
            "type": "smtp",
            "host": "smtp.example.com",
            "from_address": "noreply@example.com"
        }"#;
        let config: MailConfig = serde_json::from_str(json).unwrap();
        match config {
            MailConfig::Smtp {
                host, port, tls, ..
            } => {
                assert_eq!(host, "smtp.example.com");
                assert_eq!(port, 465);
                assert_eq!(tls, SmtpTls::Implicit);
            }
            _ => panic!("expected smtp config"),
        }
    }

    #[test]
    fn test_mail_config_rejects_half_credentials() {
        let config = MailConfig::Smtp {
            host: "smtp.example.com".to_string(),
            port: 465,
            username: Some("user".to_string()),
            password: None,
            tls: SmtpTls::Implicit,
            from_address: "noreply@example.com".to_string(),
            from_name: "Satchel".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metadata_config_postgres_requires_url_or_host() {
        let config = MetadataConfig::Postgres {
            url: None,
            host: None,
            port: Some(5432),
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 10,
        };
        assert!(config.validate().is_err());

        let config = MetadataConfig::Postgres {
            url: Some("postgres://localhost/satchel".to_string()),
            host: None,
            port: Some(5432),
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 10,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_config_rejects_trailing_slash_base_url() {
        let config = ServerConfig {
            public_base_url: "https://satchel.example.com/".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_validate_warns_on_wildcard_proxies() {
        let config = RateLimitConfig {
            enabled: true,
            trusted_proxies: vec!["*".to_string()],
            ..RateLimitConfig::default()
        };
        let warnings = config.validate().unwrap();
        assert!(!warnings.is_empty());
    }

    #[test]
    fn test_app_config_deserializes_with_only_tokens() {
        let json = r#"{"tokens": {"secret": "satchel-test-secret-satchel-test-secret"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tokens.session_ttl_hours, 168);
        assert!(matches!(config.metadata, MetadataConfig::Sqlite { .. }));
    }
}
