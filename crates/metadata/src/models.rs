//! Database models mapping to the metadata schema.

use satchel_core::MediaKind;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Accounts
// =============================================================================

/// Account holder record.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    /// Normalized (trimmed, lowercased) email. Unique.
    pub email: String,
    /// Argon2id hash in PHC string format.
    pub password_hash: String,
    pub display_name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Exams and their media
// =============================================================================

/// Exam record owned by a single user.
#[derive(Debug, Clone, FromRow)]
pub struct ExamRow {
    pub exam_id: Uuid,
    pub user_id: Uuid,
    pub exam_name: String,
    pub exam_date: Option<Date>,
    pub notes: Option<String>,
    /// Free-form labels, stored as opaque text.
    pub tags: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Partial update for an exam.
///
/// The outer `Option` distinguishes "field absent from the request" from an
/// explicit value; the inner `Option` on nullable columns carries an explicit
/// null that clears the field.
#[derive(Debug, Clone, Default)]
pub struct ExamUpdate {
    pub exam_name: Option<String>,
    pub exam_date: Option<Option<Date>>,
    pub notes: Option<Option<String>>,
    pub tags: Option<Option<String>>,
}

impl ExamUpdate {
    /// True when no field is set, i.e. the update would be a no-op.
    pub fn is_empty(&self) -> bool {
        self.exam_name.is_none()
            && self.exam_date.is_none()
            && self.notes.is_none()
            && self.tags.is_none()
    }
}

/// Uploaded file attached to an exam.
#[derive(Debug, Clone, FromRow)]
pub struct ExamMediaRow {
    pub media_id: Uuid,
    pub exam_id: Uuid,
    pub user_id: Uuid,
    /// Original file name as supplied by the uploader.
    pub file_name: String,
    pub mime_type: String,
    /// Coarse classification derived from the MIME type, stored as text.
    pub media_kind: String,
    pub size_bytes: i64,
    /// Key of the blob in object storage.
    pub object_key: String,
    /// SHA-256 of the blob contents, hex encoded. Used as a weak ETag.
    pub checksum: Option<String>,
    pub created_at: OffsetDateTime,
}

impl ExamMediaRow {
    /// Parsed media kind. Unknown stored values degrade to `Document`.
    pub fn kind(&self) -> MediaKind {
        self.media_kind.parse().unwrap_or(MediaKind::Document)
    }
}

// =============================================================================
// Share bundles
// =============================================================================

/// Share bundle record: a set of exams shared with one recipient email
/// behind an opaque code and an email OTP challenge.
#[derive(Debug, Clone, FromRow)]
pub struct ShareLinkRow {
    pub share_id: Uuid,
    pub user_id: Uuid,
    /// Opaque base62 code embedded in the public URL. Unique.
    pub code: String,
    /// Normalized recipient email; OTP verification compares against this.
    pub recipient_email: String,
    pub message: Option<String>,
    pub expires_at: OffsetDateTime,
    pub max_uses: i64,
    pub times_used: i64,
    /// Set once by the owner; a revoked bundle never comes back.
    pub revoked_at: Option<OffsetDateTime>,
    /// Argon2id hash of the outstanding OTP, if a challenge is open.
    pub otp_hash: Option<String>,
    pub otp_expires_at: Option<OffsetDateTime>,
    pub otp_attempts: i64,
    pub otp_sent_at: Option<OffsetDateTime>,
    /// Lifetime count of OTP emails sent for this bundle.
    pub otp_sent_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ShareLinkRow {
    /// Whether the bundle's expiry instant has passed.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at < now
    }

    /// Whether verified sessions have consumed the configured use budget.
    /// Informational only; access is not refused on this basis.
    pub fn is_max_uses_reached(&self) -> bool {
        self.times_used >= self.max_uses
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Not revoked and not expired.
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }

    /// Whether an OTP challenge is currently open.
    pub fn has_otp_challenge(&self) -> bool {
        self.otp_hash.is_some()
    }
}

// =============================================================================
// Access ledger
// =============================================================================

/// One entry in the share access ledger.
///
/// The ledger doubles as the audit trail and the source of truth for the
/// OTP rate-limit windows. `share_id` is null when the requested code did
/// not resolve to a bundle, so probing attempts are still recorded.
#[derive(Debug, Clone, FromRow)]
pub struct AccessEventRow {
    pub event_id: Uuid,
    pub share_id: Option<Uuid>,
    /// Event kind in its canonical SCREAMING_SNAKE_CASE form.
    pub event: String,
    /// The email the caller claimed, recorded as given.
    pub email_input: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: OffsetDateTime,
}
