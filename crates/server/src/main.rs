//! Satchel server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use satchel_core::config::AppConfig;
use satchel_server::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Satchel - a medical exam sharing server
#[derive(Parser, Debug)]
#[command(name = "satcheld")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file location
    #[arg(
        short,
        long,
        env = "SATCHEL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,

    /// Listen address override, e.g. 0.0.0.0:8080
    #[arg(long)]
    bind: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Layer the config file (when present) under `SATCHEL_` environment
/// overrides, then apply CLI overrides. Refuses to start with neither
/// source, since the token secret has no usable default.
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut figment = Figment::new();

    let has_config_file = std::path::Path::new(&args.config).exists();
    if has_config_file {
        tracing::info!(config_path = %args.config, "Reading config file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!(config_path = %args.config, "Config file absent, skipping");
    }

    // SATCHEL_CONFIG only names the file path, so it does not count as
    // configuration on its own.
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("SATCHEL_") && key != "SATCHEL_CONFIG");
    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "no configuration found\n\n\
             Pass a config file:\n  \
             satcheld --config /path/to/config.toml\n\
             or configure through the environment:\n  \
             SATCHEL_SERVER__BIND=0.0.0.0:8080 SATCHEL_TOKENS__SECRET=... satcheld\n\n\
             config/server.example.toml documents every setting; SATCHEL_CONFIG \
             names a default config file path."
        );
    }
    if !has_config_file {
        tracing::info!("Configuration taken from SATCHEL_ environment variables");
    }

    let mut config: AppConfig = figment
        .merge(Env::prefixed("SATCHEL_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }

    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();
    tracing::info!("Satchel v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;

    satchel_server::metrics::register_metrics();

    let storage = satchel_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;

    // Surface storage misconfiguration now rather than on the first request.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    // Runs migrations on first connect.
    let metadata = satchel_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store ready");

    let mailer = satchel_mailer::from_config(&config.mail).context("failed to initialize mailer")?;
    tracing::info!(transport = mailer.transport_name(), "Mail transport ready");

    let state = AppState::new(config.clone(), storage, metadata, mailer);

    if let Some(cleanup_interval) = state.rate_limit_cleanup_interval() {
        satchel_server::ratelimit::spawn_cleanup_task(state.rate_limit.clone(), cleanup_interval);
        tracing::info!(
            interval_secs = cleanup_interval.as_secs(),
            "Rate limiter cleanup running"
        );
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!("Listening on {}", addr);

    // ConnectInfo exposes the peer address for per-IP rate limiting.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
