//! Share bundle repository.

use crate::error::MetadataResult;
use crate::models::{ExamRow, ShareLinkRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Filter and pagination for a user's share listing.
#[derive(Debug, Clone)]
pub struct ShareListFilter {
    /// 1-based page number.
    pub page: u32,
    /// Page size, already clamped by the caller.
    pub limit: u32,
    /// When set, keep only active (`true`) or inactive (`false`) bundles.
    /// Active means not revoked and not expired.
    pub active: Option<bool>,
    /// When set, keep only bundles that include this exam.
    pub exam_id: Option<Uuid>,
}

impl Default for ShareListFilter {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            active: None,
            exam_id: None,
        }
    }
}

impl ShareListFilter {
    /// Row offset for the current page.
    pub fn offset(&self) -> u32 {
        self.page.saturating_sub(1) * self.limit
    }
}

/// Aggregate share counts for a user's dashboard.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ShareStats {
    pub total: u64,
    pub active: u64,
    pub expired: u64,
}

/// Repository for share bundle operations.
#[async_trait]
pub trait ShareRepo: Send + Sync {
    /// Create a share bundle together with its exam attachments, atomically.
    /// Fails with `AlreadyExists` when the code collides.
    async fn create_share_with_exams(
        &self,
        share: &ShareLinkRow,
        exam_ids: &[Uuid],
    ) -> MetadataResult<()>;

    /// Get a share bundle by ID.
    async fn get_share(&self, share_id: Uuid) -> MetadataResult<Option<ShareLinkRow>>;

    /// Get a share bundle by ID, scoped to its owner.
    async fn get_share_for_user(
        &self,
        share_id: Uuid,
        user_id: Uuid,
    ) -> MetadataResult<Option<ShareLinkRow>>;

    /// Get a share bundle by its public code.
    async fn get_share_by_code(&self, code: &str) -> MetadataResult<Option<ShareLinkRow>>;

    /// Whether a code is already taken. Used by the creation retry loop.
    async fn code_exists(&self, code: &str) -> MetadataResult<bool>;

    /// List a user's share bundles, newest first, honoring the filter.
    async fn list_shares_for_user(
        &self,
        user_id: Uuid,
        filter: &ShareListFilter,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<ShareLinkRow>>;

    /// Count the bundles `list_shares_for_user` would match, ignoring
    /// pagination.
    async fn count_shares_for_user(
        &self,
        user_id: Uuid,
        filter: &ShareListFilter,
        now: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// List the exams attached to a bundle.
    async fn list_exams_for_share(&self, share_id: Uuid) -> MetadataResult<Vec<ExamRow>>;

    /// Install a fresh OTP challenge: hash, expiry, attempts reset to zero,
    /// lifetime sent counter bumped. Replaces any outstanding challenge.
    /// `now` becomes both the sent instant and `updated_at`.
    async fn set_otp_challenge(
        &self,
        share_id: Uuid,
        otp_hash: &str,
        otp_expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Atomically add one to the attempt counter and return the new value.
    async fn increment_otp_attempts(&self, share_id: Uuid) -> MetadataResult<i64>;

    /// Clear the challenge: hash and expiry to null, attempts to zero.
    async fn clear_otp_challenge(
        &self,
        share_id: Uuid,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Atomically add one to the use counter and return the new value.
    async fn increment_times_used(
        &self,
        share_id: Uuid,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<i64>;

    /// Mark a bundle revoked at `now`. Revoking an already revoked bundle
    /// succeeds and keeps the original revocation instant.
    async fn revoke_share(&self, share_id: Uuid, now: OffsetDateTime) -> MetadataResult<()>;

    /// Move the expiry instant. Used to extend or shorten a bundle's life.
    async fn update_share_expiration(
        &self,
        share_id: Uuid,
        expires_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete a bundle, scoped to its owner. Its exam links and ledger rows
    /// go with it.
    async fn delete_share(&self, share_id: Uuid, user_id: Uuid) -> MetadataResult<()>;

    /// Aggregate counts over all of a user's bundles.
    async fn share_stats_for_user(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<ShareStats>;
}
