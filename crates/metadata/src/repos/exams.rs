//! Exam repository.

use crate::error::MetadataResult;
use crate::models::{ExamRow, ExamUpdate};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for exam operations.
#[async_trait]
pub trait ExamRepo: Send + Sync {
    /// Create an exam.
    async fn create_exam(&self, exam: &ExamRow) -> MetadataResult<()>;

    /// Get an exam by ID.
    async fn get_exam(&self, exam_id: Uuid) -> MetadataResult<Option<ExamRow>>;

    /// Get an exam by ID, scoped to its owner. Returns `None` when the exam
    /// exists but belongs to someone else.
    async fn get_exam_for_user(
        &self,
        exam_id: Uuid,
        user_id: Uuid,
    ) -> MetadataResult<Option<ExamRow>>;

    /// List a user's exams, newest first.
    async fn list_exams_for_user(&self, user_id: Uuid) -> MetadataResult<Vec<ExamRow>>;

    /// Fetch the subset of `exam_ids` that exist and belong to `user_id`.
    /// Callers compare the result length against the input to detect
    /// missing or foreign exams.
    async fn list_exams_by_ids_for_user(
        &self,
        user_id: Uuid,
        exam_ids: &[Uuid],
    ) -> MetadataResult<Vec<ExamRow>>;

    /// Apply a partial update. Fails with `NotFound` when the exam does not
    /// exist or is not owned by `user_id`.
    async fn update_exam(
        &self,
        exam_id: Uuid,
        user_id: Uuid,
        update: &ExamUpdate,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete an exam and (via cascade) its media rows and its memberships
    /// in share bundles. The bundles themselves survive.
    async fn delete_exam(&self, exam_id: Uuid, user_id: Uuid) -> MetadataResult<()>;
}
