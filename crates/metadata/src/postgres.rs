//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{
    AccessLogRepo, ExamRepo, MediaRepo, ShareListFilter, ShareRepo, ShareStats, UserRepo,
};
use crate::store::{MetadataStore, event_like_prefix};
use async_trait::async_trait;
use satchel_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(url: &str, max_connections: u32) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, enabling better
    /// secret management (e.g., passwords via environment variables).
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Everything but the password is loggable
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL by host and database"
        );

        Self::connect(opts, max_connections).await
    }

    async fn connect(opts: PgConnectOptions, max_connections: u32) -> MetadataResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Borrow the underlying pool, mainly for tests.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared
        // statement, so we split the schema and execute each statement
        // separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UserRepo for PostgresStore {
    async fn create_user(&self, user: &UserRow) -> MetadataResult<()> {
        if self.get_user_by_email(&user.email).await?.is_some() {
            return Err(MetadataError::AlreadyExists(format!(
                "email '{}' already registered",
                user.email
            )));
        }

        sqlx::query(
            "INSERT INTO users (user_id, email, password_hash, display_name, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> MetadataResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_user_by_email(&self, email: &str) -> MetadataResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl ExamRepo for PostgresStore {
    async fn create_exam(&self, exam: &ExamRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO exams (exam_id, user_id, exam_name, exam_date, notes, tags, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(exam.exam_id)
        .bind(exam.user_id)
        .bind(&exam.exam_name)
        .bind(exam.exam_date)
        .bind(&exam.notes)
        .bind(&exam.tags)
        .bind(exam.created_at)
        .bind(exam.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_exam(&self, exam_id: Uuid) -> MetadataResult<Option<ExamRow>> {
        let row = sqlx::query_as::<_, ExamRow>("SELECT * FROM exams WHERE exam_id = $1")
            .bind(exam_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_exam_for_user(
        &self,
        exam_id: Uuid,
        user_id: Uuid,
    ) -> MetadataResult<Option<ExamRow>> {
        let row = sqlx::query_as::<_, ExamRow>(
            "SELECT * FROM exams WHERE exam_id = $1 AND user_id = $2",
        )
        .bind(exam_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_exams_for_user(&self, user_id: Uuid) -> MetadataResult<Vec<ExamRow>> {
        let rows = sqlx::query_as::<_, ExamRow>(
            "SELECT * FROM exams WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_exams_by_ids_for_user(
        &self,
        user_id: Uuid,
        exam_ids: &[Uuid],
    ) -> MetadataResult<Vec<ExamRow>> {
        if exam_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ExamRow>(
            "SELECT * FROM exams WHERE user_id = $1 AND exam_id = ANY($2)",
        )
        .bind(user_id)
        .bind(exam_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update_exam(
        &self,
        exam_id: Uuid,
        user_id: Uuid,
        update: &ExamUpdate,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        let mut sets: Vec<String> = Vec::new();
        let mut next = 1;
        if update.exam_name.is_some() {
            sets.push(format!("exam_name = ${}", next));
            next += 1;
        }
        if update.exam_date.is_some() {
            sets.push(format!("exam_date = ${}", next));
            next += 1;
        }
        if update.notes.is_some() {
            sets.push(format!("notes = ${}", next));
            next += 1;
        }
        if update.tags.is_some() {
            sets.push(format!("tags = ${}", next));
            next += 1;
        }
        sets.push(format!("updated_at = ${}", next));

        let query = format!(
            "UPDATE exams SET {} WHERE exam_id = ${} AND user_id = ${}",
            sets.join(", "),
            next + 1,
            next + 2
        );

        let mut query_builder = sqlx::query(&query);
        if let Some(name) = &update.exam_name {
            query_builder = query_builder.bind(name);
        }
        if let Some(date) = &update.exam_date {
            query_builder = query_builder.bind(*date);
        }
        if let Some(notes) = &update.notes {
            query_builder = query_builder.bind(notes.clone());
        }
        if let Some(tags) = &update.tags {
            query_builder = query_builder.bind(tags.clone());
        }
        let result = query_builder
            .bind(updated_at)
            .bind(exam_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "exam_id {} not found",
                exam_id
            )));
        }
        Ok(())
    }

    async fn delete_exam(&self, exam_id: Uuid, user_id: Uuid) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM exams WHERE exam_id = $1 AND user_id = $2")
            .bind(exam_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "exam_id {} not found",
                exam_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaRepo for PostgresStore {
    async fn create_media(&self, media: &ExamMediaRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO exam_media (media_id, exam_id, user_id, file_name, mime_type, media_kind, \
             size_bytes, object_key, checksum, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(media.media_id)
        .bind(media.exam_id)
        .bind(media.user_id)
        .bind(&media.file_name)
        .bind(&media.mime_type)
        .bind(&media.media_kind)
        .bind(media.size_bytes)
        .bind(&media.object_key)
        .bind(&media.checksum)
        .bind(media.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_media(&self, media_id: Uuid) -> MetadataResult<Option<ExamMediaRow>> {
        let row = sqlx::query_as::<_, ExamMediaRow>("SELECT * FROM exam_media WHERE media_id = $1")
            .bind(media_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_media_for_user(
        &self,
        media_id: Uuid,
        user_id: Uuid,
    ) -> MetadataResult<Option<ExamMediaRow>> {
        let row = sqlx::query_as::<_, ExamMediaRow>(
            "SELECT * FROM exam_media WHERE media_id = $1 AND user_id = $2",
        )
        .bind(media_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_media_in_share(
        &self,
        share_id: Uuid,
        media_id: Uuid,
    ) -> MetadataResult<Option<ExamMediaRow>> {
        let row = sqlx::query_as::<_, ExamMediaRow>(
            "SELECT m.* FROM exam_media m \
             JOIN shared_exams se ON se.exam_id = m.exam_id \
             WHERE se.share_id = $1 AND m.media_id = $2",
        )
        .bind(share_id)
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_media_for_exam(&self, exam_id: Uuid) -> MetadataResult<Vec<ExamMediaRow>> {
        let rows = sqlx::query_as::<_, ExamMediaRow>(
            "SELECT * FROM exam_media WHERE exam_id = $1 ORDER BY created_at ASC",
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_media(&self, media_id: Uuid, user_id: Uuid) -> MetadataResult<ExamMediaRow> {
        let row = sqlx::query_as::<_, ExamMediaRow>(
            "DELETE FROM exam_media WHERE media_id = $1 AND user_id = $2 RETURNING *",
        )
        .bind(media_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| MetadataError::NotFound(format!("media_id {} not found", media_id)))
    }
}

/// Build the WHERE clause for a share listing with numbered placeholders,
/// `$1` always being user_id. Returns the clause and the next free index.
/// Bind order: user_id, now (when the active filter is set), exam_id (when
/// set).
fn share_filter_clauses(filter: &ShareListFilter) -> (String, usize) {
    let mut sql = String::from("user_id = $1");
    let mut next = 2;
    match filter.active {
        Some(true) => {
            sql.push_str(&format!(
                " AND revoked_at IS NULL AND expires_at > ${}",
                next
            ));
            next += 1;
        }
        Some(false) => {
            sql.push_str(&format!(
                " AND (revoked_at IS NOT NULL OR expires_at <= ${})",
                next
            ));
            next += 1;
        }
        None => {}
    }
    if filter.exam_id.is_some() {
        sql.push_str(&format!(
            " AND share_id IN (SELECT share_id FROM shared_exams WHERE exam_id = ${})",
            next
        ));
        next += 1;
    }
    (sql, next)
}

#[async_trait]
impl ShareRepo for PostgresStore {
    async fn create_share_with_exams(
        &self,
        share: &ShareLinkRow,
        exam_ids: &[Uuid],
    ) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            "INSERT INTO share_links (share_id, user_id, code, recipient_email, message, \
             expires_at, max_uses, times_used, revoked_at, otp_hash, otp_expires_at, \
             otp_attempts, otp_sent_at, otp_sent_count, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(share.share_id)
        .bind(share.user_id)
        .bind(&share.code)
        .bind(&share.recipient_email)
        .bind(&share.message)
        .bind(share.expires_at)
        .bind(share.max_uses)
        .bind(share.times_used)
        .bind(share.revoked_at)
        .bind(&share.otp_hash)
        .bind(share.otp_expires_at)
        .bind(share.otp_attempts)
        .bind(share.otp_sent_at)
        .bind(share.otp_sent_count)
        .bind(share.created_at)
        .bind(share.updated_at)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(MetadataError::AlreadyExists(format!(
                    "share code '{}' already exists",
                    share.code
                )));
            }
            Err(e) => return Err(e.into()),
        }

        for exam_id in exam_ids {
            sqlx::query("INSERT INTO shared_exams (share_id, exam_id) VALUES ($1, $2)")
                .bind(share.share_id)
                .bind(exam_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_share(&self, share_id: Uuid) -> MetadataResult<Option<ShareLinkRow>> {
        let row = sqlx::query_as::<_, ShareLinkRow>("SELECT * FROM share_links WHERE share_id = $1")
            .bind(share_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_share_for_user(
        &self,
        share_id: Uuid,
        user_id: Uuid,
    ) -> MetadataResult<Option<ShareLinkRow>> {
        let row = sqlx::query_as::<_, ShareLinkRow>(
            "SELECT * FROM share_links WHERE share_id = $1 AND user_id = $2",
        )
        .bind(share_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_share_by_code(&self, code: &str) -> MetadataResult<Option<ShareLinkRow>> {
        let row = sqlx::query_as::<_, ShareLinkRow>("SELECT * FROM share_links WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn code_exists(&self, code: &str) -> MetadataResult<bool> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM share_links WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn list_shares_for_user(
        &self,
        user_id: Uuid,
        filter: &ShareListFilter,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<ShareLinkRow>> {
        let (clauses, next) = share_filter_clauses(filter);
        let query = format!(
            "SELECT * FROM share_links WHERE {} ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            clauses,
            next,
            next + 1
        );

        let mut query_builder = sqlx::query_as::<_, ShareLinkRow>(&query).bind(user_id);
        if filter.active.is_some() {
            query_builder = query_builder.bind(now);
        }
        if let Some(exam_id) = filter.exam_id {
            query_builder = query_builder.bind(exam_id);
        }
        let rows = query_builder
            .bind(filter.limit as i64)
            .bind(filter.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn count_shares_for_user(
        &self,
        user_id: Uuid,
        filter: &ShareListFilter,
        now: OffsetDateTime,
    ) -> MetadataResult<u64> {
        let (clauses, _) = share_filter_clauses(filter);
        let query = format!("SELECT COUNT(*) FROM share_links WHERE {}", clauses);

        let mut query_builder = sqlx::query_scalar::<_, i64>(&query).bind(user_id);
        if filter.active.is_some() {
            query_builder = query_builder.bind(now);
        }
        if let Some(exam_id) = filter.exam_id {
            query_builder = query_builder.bind(exam_id);
        }
        let count = query_builder.fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn list_exams_for_share(&self, share_id: Uuid) -> MetadataResult<Vec<ExamRow>> {
        let rows = sqlx::query_as::<_, ExamRow>(
            "SELECT e.* FROM exams e \
             JOIN shared_exams se ON se.exam_id = e.exam_id \
             WHERE se.share_id = $1 \
             ORDER BY e.created_at DESC",
        )
        .bind(share_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_otp_challenge(
        &self,
        share_id: Uuid,
        otp_hash: &str,
        otp_expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE share_links SET otp_hash = $1, otp_expires_at = $2, otp_attempts = 0, \
             otp_sent_at = $3, otp_sent_count = otp_sent_count + 1, updated_at = $3 \
             WHERE share_id = $4",
        )
        .bind(otp_hash)
        .bind(otp_expires_at)
        .bind(now)
        .bind(share_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "share_id {} not found",
                share_id
            )));
        }
        Ok(())
    }

    async fn increment_otp_attempts(&self, share_id: Uuid) -> MetadataResult<i64> {
        let attempts: Option<i64> = sqlx::query_scalar(
            "UPDATE share_links SET otp_attempts = otp_attempts + 1 \
             WHERE share_id = $1 RETURNING otp_attempts",
        )
        .bind(share_id)
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or_else(|| MetadataError::NotFound(format!("share_id {} not found", share_id)))
    }

    async fn clear_otp_challenge(
        &self,
        share_id: Uuid,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE share_links SET otp_hash = NULL, otp_expires_at = NULL, \
             otp_attempts = 0, updated_at = $1 WHERE share_id = $2",
        )
        .bind(updated_at)
        .bind(share_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "share_id {} not found",
                share_id
            )));
        }
        Ok(())
    }

    async fn increment_times_used(
        &self,
        share_id: Uuid,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<i64> {
        let times_used: Option<i64> = sqlx::query_scalar(
            "UPDATE share_links SET times_used = times_used + 1, updated_at = $1 \
             WHERE share_id = $2 RETURNING times_used",
        )
        .bind(updated_at)
        .bind(share_id)
        .fetch_optional(&self.pool)
        .await?;

        times_used
            .ok_or_else(|| MetadataError::NotFound(format!("share_id {} not found", share_id)))
    }

    async fn revoke_share(&self, share_id: Uuid, now: OffsetDateTime) -> MetadataResult<()> {
        // Revoking twice keeps the first revocation instant.
        let result = sqlx::query(
            "UPDATE share_links SET revoked_at = COALESCE(revoked_at, $1), updated_at = $1 \
             WHERE share_id = $2",
        )
        .bind(now)
        .bind(share_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "share_id {} not found",
                share_id
            )));
        }
        Ok(())
    }

    async fn update_share_expiration(
        &self,
        share_id: Uuid,
        expires_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE share_links SET expires_at = $1, updated_at = $2 WHERE share_id = $3",
        )
        .bind(expires_at)
        .bind(updated_at)
        .bind(share_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "share_id {} not found",
                share_id
            )));
        }
        Ok(())
    }

    async fn delete_share(&self, share_id: Uuid, user_id: Uuid) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM share_links WHERE share_id = $1 AND user_id = $2")
            .bind(share_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "share_id {} not found",
                share_id
            )));
        }
        Ok(())
    }

    async fn share_stats_for_user(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<ShareStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM share_links WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM share_links \
             WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let expired: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM share_links WHERE user_id = $1 AND expires_at <= $2",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(ShareStats {
            total: total as u64,
            active: active as u64,
            expired: expired as u64,
        })
    }
}

#[async_trait]
impl AccessLogRepo for PostgresStore {
    async fn record_event(&self, event: &AccessEventRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO share_access_log (event_id, share_id, event, email_input, \
             ip_address, user_agent, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.event_id)
        .bind(event.share_id)
        .bind(&event.event)
        .bind(&event.email_input)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_events_since(
        &self,
        share_id: Uuid,
        ip: &str,
        event: &str,
        since: OffsetDateTime,
    ) -> MetadataResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM share_access_log \
             WHERE share_id = $1 AND ip_address = $2 AND event = $3 AND created_at >= $4",
        )
        .bind(share_id)
        .bind(ip)
        .bind(event)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_events_with_prefix_since(
        &self,
        share_id: Uuid,
        ip: &str,
        prefix: &str,
        since: OffsetDateTime,
    ) -> MetadataResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM share_access_log \
             WHERE share_id = $1 AND ip_address = $2 AND event LIKE $3 ESCAPE '\\' \
             AND created_at >= $4",
        )
        .bind(share_id)
        .bind(ip)
        .bind(event_like_prefix(prefix))
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_events_for_share(
        &self,
        share_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> MetadataResult<Vec<AccessEventRow>> {
        let rows = sqlx::query_as::<_, AccessEventRow>(
            "SELECT * FROM share_access_log WHERE share_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(share_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_events_for_share(&self, share_id: Uuid) -> MetadataResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM share_access_log WHERE share_id = $1")
                .bind(share_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::postgres_schema_statements;

    #[test]
    fn postgres_schema_statements_skips_empty_and_comment_only() {
        let schema = r#"
            -- comment only

            CREATE TABLE exams_test (id int);
            ;
            -- another comment
            CREATE TABLE media_test (id int);
        "#;

        let statements = postgres_schema_statements(schema);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("exams_test"));
        assert!(statements[1].contains("media_test"));
    }

    #[test]
    fn embedded_schema_splits_into_statements() {
        let statements = postgres_schema_statements(super::POSTGRES_SCHEMA);
        assert!(statements.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS share_links")));
        assert!(statements.iter().all(|s| !s.trim().is_empty()));
    }
}
