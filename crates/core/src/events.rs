//! Access-ledger event kinds.
//!
//! Every security-relevant step of the share lifecycle appends one of these
//! to the access ledger. The names are stable and stored as text, so renaming
//! a variant is a schema migration, not a refactor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Kind of an access-ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessEventKind {
    ShareCreated,
    ShareEmailSent,
    ShareEmailFailed,
    ShareViewed,
    ShareRevoked,
    /// Request-access against an unknown code (no bundle to attribute).
    OtpRequestFailed,
    OtpRequestFailedRevoked,
    OtpRequestFailedExpired,
    OtpRequestFailedWrongEmail,
    OtpRequestFailedRateLimit,
    OtpSent,
    OtpSendFailed,
    /// Validate-OTP against an unknown code (no bundle to attribute).
    OtpVerifyFailedInvalidCode,
    OtpVerifyFailedRevoked,
    OtpVerifyFailedExpired,
    OtpVerifyFailedWrongEmail,
    OtpVerifyFailedOtpExpired,
    OtpVerifyFailedMaxAttempts,
    OtpVerifyFailedRateLimit,
    OtpVerifyFailedNoOtp,
    OtpVerifyFailedInvalid,
    OtpVerified,
    FileDownloaded,
    AllFilesDownloaded,
}

impl AccessEventKind {
    /// Prefix shared by the `OTP_VERIFY_FAILED_*` family. The verify
    /// rate-limit window counts by this prefix; the `OTP_VERIFIED`
    /// success event deliberately falls outside it.
    pub const VERIFY_PREFIX: &'static str = "OTP_VERIFY";

    /// Stable string form, as stored in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShareCreated => "SHARE_CREATED",
            Self::ShareEmailSent => "SHARE_EMAIL_SENT",
            Self::ShareEmailFailed => "SHARE_EMAIL_FAILED",
            Self::ShareViewed => "SHARE_VIEWED",
            Self::ShareRevoked => "SHARE_REVOKED",
            Self::OtpRequestFailed => "OTP_REQUEST_FAILED",
            Self::OtpRequestFailedRevoked => "OTP_REQUEST_FAILED_REVOKED",
            Self::OtpRequestFailedExpired => "OTP_REQUEST_FAILED_EXPIRED",
            Self::OtpRequestFailedWrongEmail => "OTP_REQUEST_FAILED_WRONG_EMAIL",
            Self::OtpRequestFailedRateLimit => "OTP_REQUEST_FAILED_RATE_LIMIT",
            Self::OtpSent => "OTP_SENT",
            Self::OtpSendFailed => "OTP_SEND_FAILED",
            Self::OtpVerifyFailedInvalidCode => "OTP_VERIFY_FAILED_INVALID_CODE",
            Self::OtpVerifyFailedRevoked => "OTP_VERIFY_FAILED_REVOKED",
            Self::OtpVerifyFailedExpired => "OTP_VERIFY_FAILED_EXPIRED",
            Self::OtpVerifyFailedWrongEmail => "OTP_VERIFY_FAILED_WRONG_EMAIL",
            Self::OtpVerifyFailedOtpExpired => "OTP_VERIFY_FAILED_OTP_EXPIRED",
            Self::OtpVerifyFailedMaxAttempts => "OTP_VERIFY_FAILED_MAX_ATTEMPTS",
            Self::OtpVerifyFailedRateLimit => "OTP_VERIFY_FAILED_RATE_LIMIT",
            Self::OtpVerifyFailedNoOtp => "OTP_VERIFY_FAILED_NO_OTP",
            Self::OtpVerifyFailedInvalid => "OTP_VERIFY_FAILED_INVALID",
            Self::OtpVerified => "OTP_VERIFIED",
            Self::FileDownloaded => "FILE_DOWNLOADED",
            Self::AllFilesDownloaded => "ALL_FILES_DOWNLOADED",
        }
    }
}

impl fmt::Display for AccessEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessEventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "SHARE_CREATED" => Self::ShareCreated,
            "SHARE_EMAIL_SENT" => Self::ShareEmailSent,
            "SHARE_EMAIL_FAILED" => Self::ShareEmailFailed,
            "SHARE_VIEWED" => Self::ShareViewed,
            "SHARE_REVOKED" => Self::ShareRevoked,
            "OTP_REQUEST_FAILED" => Self::OtpRequestFailed,
            "OTP_REQUEST_FAILED_REVOKED" => Self::OtpRequestFailedRevoked,
            "OTP_REQUEST_FAILED_EXPIRED" => Self::OtpRequestFailedExpired,
            "OTP_REQUEST_FAILED_WRONG_EMAIL" => Self::OtpRequestFailedWrongEmail,
            "OTP_REQUEST_FAILED_RATE_LIMIT" => Self::OtpRequestFailedRateLimit,
            "OTP_SENT" => Self::OtpSent,
            "OTP_SEND_FAILED" => Self::OtpSendFailed,
            "OTP_VERIFY_FAILED_INVALID_CODE" => Self::OtpVerifyFailedInvalidCode,
            "OTP_VERIFY_FAILED_REVOKED" => Self::OtpVerifyFailedRevoked,
            "OTP_VERIFY_FAILED_EXPIRED" => Self::OtpVerifyFailedExpired,
            "OTP_VERIFY_FAILED_WRONG_EMAIL" => Self::OtpVerifyFailedWrongEmail,
            "OTP_VERIFY_FAILED_OTP_EXPIRED" => Self::OtpVerifyFailedOtpExpired,
            "OTP_VERIFY_FAILED_MAX_ATTEMPTS" => Self::OtpVerifyFailedMaxAttempts,
            "OTP_VERIFY_FAILED_RATE_LIMIT" => Self::OtpVerifyFailedRateLimit,
            "OTP_VERIFY_FAILED_NO_OTP" => Self::OtpVerifyFailedNoOtp,
            "OTP_VERIFY_FAILED_INVALID" => Self::OtpVerifyFailedInvalid,
            "OTP_VERIFIED" => Self::OtpVerified,
            "FILE_DOWNLOADED" => Self::FileDownloaded,
            "ALL_FILES_DOWNLOADED" => Self::AllFilesDownloaded,
            other => return Err(Error::InvalidEventKind(other.to_string())),
        };
        Ok(kind)
    }
}
