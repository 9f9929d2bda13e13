//! Metadata store abstraction and implementations for Satchel.
//!
//! Data model for the control plane:
//! - User accounts and credentials
//! - Exams and their uploaded media
//! - Share bundles, attached exams, and OTP challenge state
//! - The append-only share access ledger

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use store::{MetadataStore, SqliteStore};

use satchel_core::config::MetadataConfig;
use std::sync::Arc;

/// Open the metadata store named by the configuration.
///
/// Runs pending migrations before returning. A URL wins over piecewise
/// connection fields when the config carries both.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;

    let store: Arc<dyn MetadataStore> = match config {
        MetadataConfig::Sqlite { path } => Arc::new(SqliteStore::new(path).await?),
        MetadataConfig::Postgres {
            url: Some(url),
            max_connections,
            ..
        } => {
            tracing::info!("Connecting to PostgreSQL via connection URL");
            Arc::new(PostgresStore::from_url(url, *max_connections).await?)
        }
        MetadataConfig::Postgres {
            url: None,
            host: Some(host),
            port,
            username,
            password,
            database: Some(database),
            ssl_mode,
            max_connections,
        } => Arc::new(
            PostgresStore::from_params(
                host,
                port.unwrap_or(5432),
                username.as_deref(),
                password.as_deref(),
                database,
                *ssl_mode,
                *max_connections,
            )
            .await?,
        ),
        MetadataConfig::Postgres { .. } => {
            // validate() has already rejected this shape
            return Err(MetadataError::Config(
                "metadata needs either metadata.url or metadata.host + metadata.database"
                    .to_string(),
            ));
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_opens_sqlite_and_migrates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("satchel.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists(), "sqlite file should be created on open");
    }
}
