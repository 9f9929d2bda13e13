//! Server test utilities.

use satchel_core::config::{AppConfig, MetadataConfig, StorageConfig};
use satchel_mailer::{Mailer, MemoryMailer};
use satchel_metadata::{MetadataStore, SqliteStore};
use satchel_server::{AppState, create_router};
use satchel_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Full in-process stack on temporary storage: router, state, and the
/// memory mailer so tests can read captured OTP mail back.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub mailer: Arc<MemoryMailer>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Stack with the stock test configuration.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Stack with `modifier` applied to the configuration before the
    /// state is built.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("tempdir");

        let storage_path = temp_dir.path().join("files");
        std::fs::create_dir_all(&storage_path).expect("storage dir");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("filesystem backend"),
        );

        let db_path = temp_dir.path().join("satchel.db");
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(&db_path).await.expect("sqlite open"));

        // Capture outbound mail in memory so tests can read OTP codes back
        let mailer = Arc::new(MemoryMailer::new());
        let mailer_dyn: Arc<dyn Mailer> = mailer.clone();

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path.clone(),
        };
        config.metadata = MetadataConfig::Sqlite { path: db_path };
        modifier(&mut config);

        let state = AppState::new(config, storage, metadata, mailer_dyn);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            mailer,
            _temp_dir: temp_dir,
        }
    }

    /// Direct handle on the metadata store, for seeding and assertions.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Pull the verification code out of the most recent captured mail.
    ///
    /// OTP mail renders the six digit code on a line of its own, so scanning
    /// for that line is enough without parsing the full template.
    pub async fn latest_otp(&self) -> String {
        let sent = self.mailer.sent().await;
        let mail = sent.last().expect("no mail captured");
        mail.text
            .lines()
            .map(str::trim)
            .find(|line| line.len() == 6 && line.chars().all(|c| c.is_ascii_digit()))
            .expect("no OTP line in mail body")
            .to_string()
    }
}
