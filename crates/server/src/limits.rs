//! OTP budget policies computed from the access ledger.
//!
//! Unlike the token-bucket middleware in [`crate::ratelimit`], these windows
//! are read straight from persisted ledger rows, so they survive restarts and
//! apply per (bundle, client address) rather than per request. Both budgets
//! are checked before the guarded operation runs; the ledger rows the
//! operation itself appends then count against the next window.

use crate::error::{ApiError, ApiResult};
use satchel_core::{
    AccessEventKind, OTP_SEND_LIMIT, OTP_SEND_WINDOW, OTP_VERIFY_LIMIT, OTP_VERIFY_WINDOW,
};
use satchel_metadata::MetadataStore;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Allow at most [`OTP_SEND_LIMIT`] OTP emails per (bundle, address) within
/// the trailing [`OTP_SEND_WINDOW`].
pub async fn check_send_allowance(
    metadata: &Arc<dyn MetadataStore>,
    share_id: Uuid,
    ip: &str,
    now: OffsetDateTime,
) -> ApiResult<()> {
    let sent = metadata
        .count_events_since(
            share_id,
            ip,
            AccessEventKind::OtpSent.as_str(),
            now - OTP_SEND_WINDOW,
        )
        .await?;

    if sent >= OTP_SEND_LIMIT {
        return Err(ApiError::RateLimited {
            reset_at: now + OTP_SEND_WINDOW,
        });
    }
    Ok(())
}

/// Allow at most [`OTP_VERIFY_LIMIT`] failed verification attempts per
/// (bundle, address) within the trailing [`OTP_VERIFY_WINDOW`].
///
/// The window counts ledger rows whose kind starts with `OTP_VERIFY`, which
/// is the `OTP_VERIFY_FAILED_*` family; a successful `OTP_VERIFIED` row does
/// not consume budget. This window is wall-clock based and independent of the
/// per-challenge `otp_attempts` counter, which resets whenever a new code is
/// issued.
pub async fn check_verify_allowance(
    metadata: &Arc<dyn MetadataStore>,
    share_id: Uuid,
    ip: &str,
    now: OffsetDateTime,
) -> ApiResult<()> {
    let attempts = metadata
        .count_events_with_prefix_since(
            share_id,
            ip,
            AccessEventKind::VERIFY_PREFIX,
            now - OTP_VERIFY_WINDOW,
        )
        .await?;

    if attempts >= OTP_VERIFY_LIMIT {
        return Err(ApiError::RateLimited {
            reset_at: now + OTP_VERIFY_WINDOW,
        });
    }
    Ok(())
}
