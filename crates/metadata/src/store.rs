//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{AccessLogRepo, ExamRepo, MediaRepo, ShareRepo, UserRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    UserRepo + ExamRepo + MediaRepo + ShareRepo + AccessLogRepo + Send + Sync
{
    /// Apply the schema; safe to run on every startup.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Cheap liveness probe against the database.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Build a LIKE pattern matching event kinds that start with `prefix`.
/// LIKE metacharacters in the prefix are escaped so `_` stays literal;
/// pair with `ESCAPE '\'` in the query.
pub(crate) fn event_like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // The configured path may point into a directory that does not exist yet
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Wait out short lock contention instead of surfacing it
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One writer connection; SQLite returns "database is locked" to a
            // second writer, which axum's concurrent handlers would hit often.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Borrow the underlying pool, mainly for tests.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::{ShareListFilter, ShareStats};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl UserRepo for SqliteStore {
        async fn create_user(&self, user: &UserRow) -> MetadataResult<()> {
            if self.get_user_by_email(&user.email).await?.is_some() {
                return Err(MetadataError::AlreadyExists(format!(
                    "email '{}' already registered",
                    user.email
                )));
            }

            sqlx::query(
                "INSERT INTO users (user_id, email, password_hash, display_name, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
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
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_user_by_email(&self, email: &str) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl ExamRepo for SqliteStore {
        async fn create_exam(&self, exam: &ExamRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO exams (exam_id, user_id, exam_name, exam_date, notes, tags, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
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
            let row = sqlx::query_as::<_, ExamRow>("SELECT * FROM exams WHERE exam_id = ?")
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
                "SELECT * FROM exams WHERE exam_id = ? AND user_id = ?",
            )
            .bind(exam_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_exams_for_user(&self, user_id: Uuid) -> MetadataResult<Vec<ExamRow>> {
            let rows = sqlx::query_as::<_, ExamRow>(
                "SELECT * FROM exams WHERE user_id = ? ORDER BY created_at DESC",
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

            let placeholders: Vec<&str> = exam_ids.iter().map(|_| "?").collect();
            let query = format!(
                "SELECT * FROM exams WHERE user_id = ? AND exam_id IN ({})",
                placeholders.join(", ")
            );

            let mut query_builder = sqlx::query_as::<_, ExamRow>(&query).bind(user_id);
            for exam_id in exam_ids {
                query_builder = query_builder.bind(exam_id);
            }

            let rows = query_builder.fetch_all(&self.pool).await?;
            Ok(rows)
        }

        async fn update_exam(
            &self,
            exam_id: Uuid,
            user_id: Uuid,
            update: &ExamUpdate,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let mut sets: Vec<&str> = Vec::new();
            if update.exam_name.is_some() {
                sets.push("exam_name = ?");
            }
            if update.exam_date.is_some() {
                sets.push("exam_date = ?");
            }
            if update.notes.is_some() {
                sets.push("notes = ?");
            }
            if update.tags.is_some() {
                sets.push("tags = ?");
            }
            sets.push("updated_at = ?");

            let query = format!(
                "UPDATE exams SET {} WHERE exam_id = ? AND user_id = ?",
                sets.join(", ")
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
            let result = sqlx::query("DELETE FROM exams WHERE exam_id = ? AND user_id = ?")
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
    impl MediaRepo for SqliteStore {
        async fn create_media(&self, media: &ExamMediaRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO exam_media (media_id, exam_id, user_id, file_name, mime_type, media_kind, \
                 size_bytes, object_key, checksum, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
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
            let row =
                sqlx::query_as::<_, ExamMediaRow>("SELECT * FROM exam_media WHERE media_id = ?")
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
                "SELECT * FROM exam_media WHERE media_id = ? AND user_id = ?",
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
                 WHERE se.share_id = ? AND m.media_id = ?",
            )
            .bind(share_id)
            .bind(media_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_media_for_exam(&self, exam_id: Uuid) -> MetadataResult<Vec<ExamMediaRow>> {
            let rows = sqlx::query_as::<_, ExamMediaRow>(
                "SELECT * FROM exam_media WHERE exam_id = ? ORDER BY created_at ASC",
            )
            .bind(exam_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_media(
            &self,
            media_id: Uuid,
            user_id: Uuid,
        ) -> MetadataResult<ExamMediaRow> {
            let row = sqlx::query_as::<_, ExamMediaRow>(
                "DELETE FROM exam_media WHERE media_id = ? AND user_id = ? RETURNING *",
            )
            .bind(media_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            row.ok_or_else(|| {
                MetadataError::NotFound(format!("media_id {} not found", media_id))
            })
        }
    }

    /// Build the WHERE clause for a share listing, minus the leading
    /// `WHERE`. Bind order: user_id, now (when the active filter is set),
    /// exam_id (when set).
    fn share_filter_clauses(filter: &ShareListFilter) -> String {
        let mut sql = String::from("user_id = ?");
        match filter.active {
            Some(true) => sql.push_str(" AND revoked_at IS NULL AND expires_at > ?"),
            Some(false) => sql.push_str(" AND (revoked_at IS NOT NULL OR expires_at <= ?)"),
            None => {}
        }
        if filter.exam_id.is_some() {
            sql.push_str(" AND share_id IN (SELECT share_id FROM shared_exams WHERE exam_id = ?)");
        }
        sql
    }

    #[async_trait]
    impl ShareRepo for SqliteStore {
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
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
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
                sqlx::query("INSERT INTO shared_exams (share_id, exam_id) VALUES (?, ?)")
                    .bind(share.share_id)
                    .bind(exam_id)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn get_share(&self, share_id: Uuid) -> MetadataResult<Option<ShareLinkRow>> {
            let row =
                sqlx::query_as::<_, ShareLinkRow>("SELECT * FROM share_links WHERE share_id = ?")
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
                "SELECT * FROM share_links WHERE share_id = ? AND user_id = ?",
            )
            .bind(share_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_share_by_code(&self, code: &str) -> MetadataResult<Option<ShareLinkRow>> {
            let row = sqlx::query_as::<_, ShareLinkRow>("SELECT * FROM share_links WHERE code = ?")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn code_exists(&self, code: &str) -> MetadataResult<bool> {
            let row: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM share_links WHERE code = ?")
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
            let query = format!(
                "SELECT * FROM share_links WHERE {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
                share_filter_clauses(filter)
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
            let query = format!(
                "SELECT COUNT(*) FROM share_links WHERE {}",
                share_filter_clauses(filter)
            );

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
                 WHERE se.share_id = ? \
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
                "UPDATE share_links SET otp_hash = ?, otp_expires_at = ?, otp_attempts = 0, \
                 otp_sent_at = ?, otp_sent_count = otp_sent_count + 1, updated_at = ? \
                 WHERE share_id = ?",
            )
            .bind(otp_hash)
            .bind(otp_expires_at)
            .bind(now)
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
            // The increment happens inside the database so concurrent
            // verification attempts each observe a distinct count.
            let attempts: Option<i64> = sqlx::query_scalar(
                "UPDATE share_links SET otp_attempts = otp_attempts + 1 \
                 WHERE share_id = ? RETURNING otp_attempts",
            )
            .bind(share_id)
            .fetch_optional(&self.pool)
            .await?;

            attempts.ok_or_else(|| {
                MetadataError::NotFound(format!("share_id {} not found", share_id))
            })
        }

        async fn clear_otp_challenge(
            &self,
            share_id: Uuid,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE share_links SET otp_hash = NULL, otp_expires_at = NULL, \
                 otp_attempts = 0, updated_at = ? WHERE share_id = ?",
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
                "UPDATE share_links SET times_used = times_used + 1, updated_at = ? \
                 WHERE share_id = ? RETURNING times_used",
            )
            .bind(updated_at)
            .bind(share_id)
            .fetch_optional(&self.pool)
            .await?;

            times_used.ok_or_else(|| {
                MetadataError::NotFound(format!("share_id {} not found", share_id))
            })
        }

        async fn revoke_share(&self, share_id: Uuid, now: OffsetDateTime) -> MetadataResult<()> {
            // Revoking twice keeps the first revocation instant.
            let result = sqlx::query(
                "UPDATE share_links SET revoked_at = COALESCE(revoked_at, ?), updated_at = ? \
                 WHERE share_id = ?",
            )
            .bind(now)
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
                "UPDATE share_links SET expires_at = ?, updated_at = ? WHERE share_id = ?",
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
            let result = sqlx::query("DELETE FROM share_links WHERE share_id = ? AND user_id = ?")
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
            let total: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM share_links WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await?;
            let active: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM share_links WHERE user_id = ? AND revoked_at IS NULL \
                 AND expires_at > ?",
            )
            .bind(user_id)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            let expired: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM share_links WHERE user_id = ? AND expires_at <= ?",
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
    impl AccessLogRepo for SqliteStore {
        async fn record_event(&self, event: &AccessEventRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO share_access_log (event_id, share_id, event, email_input, \
                 ip_address, user_agent, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
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
                 WHERE share_id = ? AND ip_address = ? AND event = ? AND created_at >= ?",
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
                 WHERE share_id = ? AND ip_address = ? AND event LIKE ? ESCAPE '\\' \
                 AND created_at >= ?",
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
                "SELECT * FROM share_access_log WHERE share_id = ? \
                 ORDER BY created_at DESC LIMIT ? OFFSET ?",
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
                sqlx::query_scalar("SELECT COUNT(*) FROM share_access_log WHERE share_id = ?")
                    .bind(share_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }
    }
}

impl std::convert::From<std::io::Error> for crate::MetadataError {
    fn from(e: std::io::Error) -> Self {
        crate::MetadataError::Config(e.to_string())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Account holders
CREATE TABLE IF NOT EXISTS users (
    user_id BLOB PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);

-- Exams
CREATE TABLE IF NOT EXISTS exams (
    exam_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    exam_name TEXT NOT NULL,
    exam_date TEXT,
    notes TEXT,
    tags TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_exams_user ON exams(user_id, created_at);

-- Uploaded exam files
CREATE TABLE IF NOT EXISTS exam_media (
    media_id BLOB PRIMARY KEY,
    exam_id BLOB NOT NULL REFERENCES exams(exam_id) ON DELETE CASCADE,
    user_id BLOB NOT NULL,
    file_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    media_kind TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    object_key TEXT NOT NULL,
    checksum TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_exam_media_exam ON exam_media(exam_id, created_at);

-- Share bundles
CREATE TABLE IF NOT EXISTS share_links (
    share_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    code TEXT NOT NULL UNIQUE,
    recipient_email TEXT NOT NULL,
    message TEXT,
    expires_at TEXT NOT NULL,
    max_uses INTEGER NOT NULL DEFAULT 1,
    times_used INTEGER NOT NULL DEFAULT 0,
    revoked_at TEXT,
    otp_hash TEXT,
    otp_expires_at TEXT,
    otp_attempts INTEGER NOT NULL DEFAULT 0,
    otp_sent_at TEXT,
    otp_sent_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_share_links_user ON share_links(user_id, created_at);

-- Exams attached to a share bundle
CREATE TABLE IF NOT EXISTS shared_exams (
    share_id BLOB NOT NULL REFERENCES share_links(share_id) ON DELETE CASCADE,
    exam_id BLOB NOT NULL REFERENCES exams(exam_id) ON DELETE CASCADE,
    PRIMARY KEY (share_id, exam_id)
);
CREATE INDEX IF NOT EXISTS idx_shared_exams_exam ON shared_exams(exam_id);

-- Access ledger: audit trail plus the backing data for OTP rate limits.
-- share_id is nullable so probes against unknown codes are still recorded.
-- Ledger rows are deleted with their bundle; they must never dangle.
CREATE TABLE IF NOT EXISTS share_access_log (
    event_id BLOB PRIMARY KEY,
    share_id BLOB REFERENCES share_links(share_id) ON DELETE CASCADE,
    event TEXT NOT NULL,
    email_input TEXT,
    ip_address TEXT,
    user_agent TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_share_access_log_share ON share_access_log(share_id, created_at);
CREATE INDEX IF NOT EXISTS idx_share_access_log_window ON share_access_log(share_id, ip_address, event, created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;
    use crate::repos::{ShareListFilter, ShareRepo};
    use crate::repos::{AccessLogRepo, ExamRepo, MediaRepo, UserRepo};
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("metadata.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn sample_user(email: &str) -> UserRow {
        let now = OffsetDateTime::now_utc();
        UserRow {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: "$argon2id$test".to_string(),
            display_name: "Test User".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_exam(user_id: Uuid, name: &str) -> ExamRow {
        let now = OffsetDateTime::now_utc();
        ExamRow {
            exam_id: Uuid::new_v4(),
            user_id,
            exam_name: name.to_string(),
            exam_date: None,
            notes: Some("initial notes".to_string()),
            tags: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_media(exam: &ExamRow, file_name: &str) -> ExamMediaRow {
        ExamMediaRow {
            media_id: Uuid::new_v4(),
            exam_id: exam.exam_id,
            user_id: exam.user_id,
            file_name: file_name.to_string(),
            mime_type: "application/pdf".to_string(),
            media_kind: "pdf".to_string(),
            size_bytes: 1024,
            object_key: format!("{}/{}", exam.user_id, file_name),
            checksum: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn sample_share(user_id: Uuid, code: &str) -> ShareLinkRow {
        let now = OffsetDateTime::now_utc();
        ShareLinkRow {
            share_id: Uuid::new_v4(),
            user_id,
            code: code.to_string(),
            recipient_email: "recipient@example.com".to_string(),
            message: None,
            expires_at: now + Duration::days(7),
            max_uses: 1,
            times_used: 0,
            revoked_at: None,
            otp_hash: None,
            otp_expires_at: None,
            otp_attempts: 0,
            otp_sent_at: None,
            otp_sent_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_event(share_id: Option<Uuid>, event: &str, ip: &str) -> AccessEventRow {
        AccessEventRow {
            event_id: Uuid::new_v4(),
            share_id,
            event: event.to_string(),
            email_input: None,
            ip_address: Some(ip.to_string()),
            user_agent: Some("test-agent".to_string()),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_user_create_and_lookup() {
        let (_dir, store) = open_store().await;
        let user = sample_user("alice@example.com");
        store.create_user(&user).await.unwrap();

        let by_id = store.get_user(user.user_id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "alice@example.com");

        let by_email = store
            .get_user_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.user_id, user.user_id);

        let dup = sample_user("alice@example.com");
        let err = store.create_user(&dup).await.unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_exam_update_absent_vs_null() {
        let (_dir, store) = open_store().await;
        let user = sample_user("bob@example.com");
        store.create_user(&user).await.unwrap();
        let exam = sample_exam(user.user_id, "MRI scan");
        store.create_exam(&exam).await.unwrap();

        // Rename only: notes untouched.
        let rename = ExamUpdate {
            exam_name: Some("MRI scan (head)".to_string()),
            ..Default::default()
        };
        store
            .update_exam(exam.exam_id, user.user_id, &rename, OffsetDateTime::now_utc())
            .await
            .unwrap();
        let fetched = store.get_exam(exam.exam_id).await.unwrap().unwrap();
        assert_eq!(fetched.exam_name, "MRI scan (head)");
        assert_eq!(fetched.notes.as_deref(), Some("initial notes"));

        // Explicit null clears notes; tags set in the same patch sticks.
        let clear_notes = ExamUpdate {
            notes: Some(None),
            tags: Some(Some("cardio,annual".to_string())),
            ..Default::default()
        };
        store
            .update_exam(
                exam.exam_id,
                user.user_id,
                &clear_notes,
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap();
        let fetched = store.get_exam(exam.exam_id).await.unwrap().unwrap();
        assert_eq!(fetched.notes, None);
        assert_eq!(fetched.tags.as_deref(), Some("cardio,annual"));

        // Unknown exam id fails.
        let err = store
            .update_exam(
                Uuid::new_v4(),
                user.user_id,
                &rename,
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_exam_delete_cascades_media() {
        let (_dir, store) = open_store().await;
        let user = sample_user("carol@example.com");
        store.create_user(&user).await.unwrap();
        let exam = sample_exam(user.user_id, "X-ray");
        store.create_exam(&exam).await.unwrap();
        let media = sample_media(&exam, "scan.pdf");
        store.create_media(&media).await.unwrap();

        store.delete_exam(exam.exam_id, user.user_id).await.unwrap();
        assert!(store.get_media(media.media_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_share_create_code_collision() {
        let (_dir, store) = open_store().await;
        let user = sample_user("dave@example.com");
        store.create_user(&user).await.unwrap();
        let exam = sample_exam(user.user_id, "Blood panel");
        store.create_exam(&exam).await.unwrap();

        let share = sample_share(user.user_id, "abcDEF123456");
        store
            .create_share_with_exams(&share, &[exam.exam_id])
            .await
            .unwrap();

        let fetched = store
            .get_share_by_code("abcDEF123456")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.share_id, share.share_id);
        assert!(store.code_exists("abcDEF123456").await.unwrap());
        assert!(!store.code_exists("other-code00").await.unwrap());

        let exams = store.list_exams_for_share(share.share_id).await.unwrap();
        assert_eq!(exams.len(), 1);
        assert_eq!(exams[0].exam_id, exam.exam_id);

        let collision = sample_share(user.user_id, "abcDEF123456");
        let err = store
            .create_share_with_exams(&collision, &[exam.exam_id])
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_otp_challenge_lifecycle() {
        let (_dir, store) = open_store().await;
        let user = sample_user("erin@example.com");
        store.create_user(&user).await.unwrap();
        let share = sample_share(user.user_id, "otpcode00001");
        store.create_share_with_exams(&share, &[]).await.unwrap();

        let now = OffsetDateTime::now_utc();
        store
            .set_otp_challenge(share.share_id, "$argon2id$otp", now + Duration::minutes(10), now)
            .await
            .unwrap();
        let fetched = store.get_share(share.share_id).await.unwrap().unwrap();
        assert!(fetched.has_otp_challenge());
        assert_eq!(fetched.otp_sent_count, 1);
        assert!(fetched.otp_sent_at.is_some());

        assert_eq!(store.increment_otp_attempts(share.share_id).await.unwrap(), 1);
        assert_eq!(store.increment_otp_attempts(share.share_id).await.unwrap(), 2);

        // A replacement challenge resets attempts and bumps the sent count.
        store
            .set_otp_challenge(share.share_id, "$argon2id$otp2", now + Duration::minutes(10), now)
            .await
            .unwrap();
        let fetched = store.get_share(share.share_id).await.unwrap().unwrap();
        assert_eq!(fetched.otp_attempts, 0);
        assert_eq!(fetched.otp_sent_count, 2);

        store.clear_otp_challenge(share.share_id, now).await.unwrap();
        let fetched = store.get_share(share.share_id).await.unwrap().unwrap();
        assert_eq!(fetched.otp_hash, None);
        assert_eq!(fetched.otp_expires_at, None);
        assert_eq!(fetched.otp_attempts, 0);

        assert_eq!(
            store.increment_times_used(share.share_id, now).await.unwrap(),
            1
        );
        let fetched = store.get_share(share.share_id).await.unwrap().unwrap();
        assert_eq!(fetched.times_used, 1);
    }

    #[tokio::test]
    async fn test_revoke_idempotent_and_delete_cascades_ledger() {
        let (_dir, store) = open_store().await;
        let user = sample_user("frank@example.com");
        store.create_user(&user).await.unwrap();
        let share = sample_share(user.user_id, "revokeme0001");
        store.create_share_with_exams(&share, &[]).await.unwrap();

        let now = OffsetDateTime::now_utc();
        store.revoke_share(share.share_id, now).await.unwrap();
        let first = store.get_share(share.share_id).await.unwrap().unwrap();
        assert!(first.is_revoked());

        // Second revoke succeeds and keeps the original instant.
        store
            .revoke_share(share.share_id, now + Duration::hours(1))
            .await
            .unwrap();
        let second = store.get_share(share.share_id).await.unwrap().unwrap();
        assert_eq!(second.revoked_at, first.revoked_at);

        let event = sample_event(Some(share.share_id), "SHARE_REVOKED", "10.0.0.1");
        store.record_event(&event).await.unwrap();
        let probe = sample_event(None, "OTP_REQUEST_FAILED", "10.0.0.1");
        store.record_event(&probe).await.unwrap();

        store.delete_share(share.share_id, user.user_id).await.unwrap();
        assert!(store.get_share(share.share_id).await.unwrap().is_none());

        // Ledger rows go with the bundle; unresolved-code probes stay.
        let remaining: Vec<(Uuid,)> =
            sqlx::query_as("SELECT event_id FROM share_access_log")
                .fetch_all(store.pool())
                .await
                .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, probe.event_id);
    }

    #[tokio::test]
    async fn test_share_listing_filters() {
        let (_dir, store) = open_store().await;
        let user = sample_user("grace@example.com");
        store.create_user(&user).await.unwrap();
        let exam_a = sample_exam(user.user_id, "A");
        let exam_b = sample_exam(user.user_id, "B");
        store.create_exam(&exam_a).await.unwrap();
        store.create_exam(&exam_b).await.unwrap();

        let now = OffsetDateTime::now_utc();

        let live = sample_share(user.user_id, "livecode0001");
        store
            .create_share_with_exams(&live, &[exam_a.exam_id])
            .await
            .unwrap();

        let mut expired = sample_share(user.user_id, "deadcode0001");
        expired.expires_at = now - Duration::days(1);
        store
            .create_share_with_exams(&expired, &[exam_b.exam_id])
            .await
            .unwrap();

        let revoked = sample_share(user.user_id, "rvkdcode0001");
        store
            .create_share_with_exams(&revoked, &[exam_a.exam_id])
            .await
            .unwrap();
        store.revoke_share(revoked.share_id, now).await.unwrap();

        let all = ShareListFilter::default();
        assert_eq!(store.count_shares_for_user(user.user_id, &all, now).await.unwrap(), 3);

        let active_only = ShareListFilter {
            active: Some(true),
            ..Default::default()
        };
        let rows = store
            .list_shares_for_user(user.user_id, &active_only, now)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].share_id, live.share_id);

        let inactive_only = ShareListFilter {
            active: Some(false),
            ..Default::default()
        };
        assert_eq!(
            store
                .count_shares_for_user(user.user_id, &inactive_only, now)
                .await
                .unwrap(),
            2
        );

        let for_exam_b = ShareListFilter {
            exam_id: Some(exam_b.exam_id),
            ..Default::default()
        };
        let rows = store
            .list_shares_for_user(user.user_id, &for_exam_b, now)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].share_id, expired.share_id);

        let stats = store.share_stats_for_user(user.user_id, now).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn test_ledger_window_counts() {
        let (_dir, store) = open_store().await;
        let user = sample_user("heidi@example.com");
        store.create_user(&user).await.unwrap();
        let share = sample_share(user.user_id, "windowed0001");
        store.create_share_with_exams(&share, &[]).await.unwrap();
        let other = sample_share(user.user_id, "windowed0002");
        store.create_share_with_exams(&other, &[]).await.unwrap();

        let ip = "203.0.113.9";
        for _ in 0..3 {
            store
                .record_event(&sample_event(Some(share.share_id), "OTP_SENT", ip))
                .await
                .unwrap();
        }
        // Different ip, different share, and unrelated kinds stay outside
        // the window count.
        store
            .record_event(&sample_event(Some(share.share_id), "OTP_SENT", "198.51.100.7"))
            .await
            .unwrap();
        store
            .record_event(&sample_event(Some(other.share_id), "OTP_SENT", ip))
            .await
            .unwrap();
        store
            .record_event(&sample_event(Some(share.share_id), "SHARE_VIEWED", ip))
            .await
            .unwrap();

        let since = OffsetDateTime::now_utc() - Duration::minutes(60);
        assert_eq!(
            store
                .count_events_since(share.share_id, ip, "OTP_SENT", since)
                .await
                .unwrap(),
            3
        );

        store
            .record_event(&sample_event(
                Some(share.share_id),
                "OTP_VERIFY_FAILED_INVALID_CODE",
                ip,
            ))
            .await
            .unwrap();
        store
            .record_event(&sample_event(
                Some(share.share_id),
                "OTP_VERIFY_FAILED_WRONG_EMAIL",
                ip,
            ))
            .await
            .unwrap();
        store
            .record_event(&sample_event(Some(share.share_id), "OTP_VERIFIED", ip))
            .await
            .unwrap();

        // Prefix matching is literal: `_` in the prefix must not act as a
        // LIKE wildcard, so OTP_SENT stays outside the OTP_VERIFY window.
        // OTP_VERIFIED diverges from the prefix at its tenth character and
        // stays outside too.
        assert_eq!(
            store
                .count_events_with_prefix_since(share.share_id, ip, "OTP_VERIFY", since)
                .await
                .unwrap(),
            2
        );

        assert!(store.count_events_for_share(share.share_id).await.unwrap() >= 5);
        let events = store
            .list_events_for_share(share.share_id, 2, 0)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_media_in_share_scoping() {
        let (_dir, store) = open_store().await;
        let user = sample_user("ivan@example.com");
        store.create_user(&user).await.unwrap();
        let shared_exam = sample_exam(user.user_id, "Shared");
        let private_exam = sample_exam(user.user_id, "Private");
        store.create_exam(&shared_exam).await.unwrap();
        store.create_exam(&private_exam).await.unwrap();
        let shared_media = sample_media(&shared_exam, "shared.pdf");
        let private_media = sample_media(&private_exam, "private.pdf");
        store.create_media(&shared_media).await.unwrap();
        store.create_media(&private_media).await.unwrap();

        let share = sample_share(user.user_id, "mediacode001");
        store
            .create_share_with_exams(&share, &[shared_exam.exam_id])
            .await
            .unwrap();

        assert!(store
            .get_media_in_share(share.share_id, shared_media.media_id)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_media_in_share(share.share_id, private_media.media_id)
            .await
            .unwrap()
            .is_none());

        let deleted = store
            .delete_media(shared_media.media_id, user.user_id)
            .await
            .unwrap();
        assert_eq!(deleted.object_key, shared_media.object_key);
        assert!(store
            .get_media(shared_media.media_id)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_event_like_prefix_escapes_wildcards() {
        assert_eq!(event_like_prefix("OTP_VERIFY"), "OTP\\_VERIFY%");
        assert_eq!(event_like_prefix("100%"), "100\\%%");
    }
}
