//! Exam media repository.

use crate::error::MetadataResult;
use crate::models::ExamMediaRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for uploaded exam files.
#[async_trait]
pub trait MediaRepo: Send + Sync {
    /// Create a media record.
    async fn create_media(&self, media: &ExamMediaRow) -> MetadataResult<()>;

    /// Get a media record by ID.
    async fn get_media(&self, media_id: Uuid) -> MetadataResult<Option<ExamMediaRow>>;

    /// Get a media record by ID, scoped to its owner.
    async fn get_media_for_user(
        &self,
        media_id: Uuid,
        user_id: Uuid,
    ) -> MetadataResult<Option<ExamMediaRow>>;

    /// Get a media record that is reachable through a share bundle, i.e.
    /// whose exam is attached to `share_id`. This is the ownership check for
    /// recipient downloads; the bundle itself has already been authorized.
    async fn get_media_in_share(
        &self,
        share_id: Uuid,
        media_id: Uuid,
    ) -> MetadataResult<Option<ExamMediaRow>>;

    /// List media for one exam, oldest first.
    async fn list_media_for_exam(&self, exam_id: Uuid) -> MetadataResult<Vec<ExamMediaRow>>;

    /// Delete a media record, scoped to its owner. Returns the deleted row
    /// so the caller can remove the blob from object storage.
    async fn delete_media(&self, media_id: Uuid, user_id: Uuid) -> MetadataResult<ExamMediaRow>;
}
