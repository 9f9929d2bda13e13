//! Access ledger repository.

use crate::error::MetadataResult;
use crate::models::AccessEventRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for the share access ledger.
///
/// The ledger is append-only. Besides serving as the audit trail it backs
/// the OTP rate-limit windows, which count recent entries per bundle and
/// client address.
#[async_trait]
pub trait AccessLogRepo: Send + Sync {
    /// Append one ledger entry.
    async fn record_event(&self, event: &AccessEventRow) -> MetadataResult<()>;

    /// Count entries of exactly `event` for (`share_id`, `ip`) at or after
    /// `since`.
    async fn count_events_since(
        &self,
        share_id: Uuid,
        ip: &str,
        event: &str,
        since: OffsetDateTime,
    ) -> MetadataResult<i64>;

    /// Count entries whose kind starts with `prefix` for (`share_id`, `ip`)
    /// at or after `since`. Backs the verification window, which counts the
    /// `OTP_VERIFY_FAILED_*` family.
    async fn count_events_with_prefix_since(
        &self,
        share_id: Uuid,
        ip: &str,
        prefix: &str,
        since: OffsetDateTime,
    ) -> MetadataResult<i64>;

    /// List a bundle's ledger entries, newest first.
    async fn list_events_for_share(
        &self,
        share_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> MetadataResult<Vec<AccessEventRow>>;

    /// Total ledger entries for a bundle.
    async fn count_events_for_share(&self, share_id: Uuid) -> MetadataResult<u64>;
}
