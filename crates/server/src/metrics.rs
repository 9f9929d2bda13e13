//! Prometheus metrics for the Satchel server.
//!
//! Counters cover the share lifecycle, OTP verification, and gated
//! downloads. Nothing recorded here is per-tenant (no share codes,
//! emails, or file names), but aggregate usage is still visible and
//! `/metrics` carries no authentication of its own: keep the endpoint
//! reachable only from the scraper network (firewall, load balancer,
//! or reverse proxy rules), never from the public internet.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Registry gathered by the `/metrics` handler.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Share lifecycle metrics
pub static SHARES_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_shares_created_total",
        "Total number of share links created",
    )
    .expect("metric creation failed")
});

pub static SHARES_REVOKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_shares_revoked_total",
        "Total number of share links revoked",
    )
    .expect("metric creation failed")
});

pub static SHARE_VIEWS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_share_views_total",
        "Total number of share content listings served to verified recipients",
    )
    .expect("metric creation failed")
});

// OTP challenge metrics
pub static OTP_SENT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_otp_sent_total",
        "Total number of OTP challenge emails delivered",
    )
    .expect("metric creation failed")
});

pub static OTP_SEND_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_otp_send_failures_total",
        "Total number of OTP challenge emails that failed to deliver",
    )
    .expect("metric creation failed")
});

pub static OTP_VERIFIED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_otp_verified_total",
        "Total number of successful OTP verifications",
    )
    .expect("metric creation failed")
});

pub static OTP_VERIFY_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "satchel_otp_verify_failures_total",
            "Total OTP verification failures by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

// Gated download metrics
pub static SHARE_FILES_DOWNLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_share_files_downloaded_total",
        "Total number of single files downloaded through share links",
    )
    .expect("metric creation failed")
});

pub static SHARE_ARCHIVES_DOWNLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_share_archives_downloaded_total",
        "Total number of all-files archives downloaded through share links",
    )
    .expect("metric creation failed")
});

pub static ARCHIVE_BUILD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "satchel_archive_build_duration_seconds",
            "Time taken to assemble an all-files zip archive",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

// Upload metrics
pub static FILES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "satchel_files_uploaded_total",
        "Total number of exam files uploaded",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("satchel_upload_bytes_total", "Total bytes uploaded")
        .expect("metric creation failed")
});

/// One-shot latch so repeated registration attempts are no-ops.
static REGISTER_ONCE: Once = Once::new();

/// Register every metric with [`REGISTRY`].
///
/// Idempotent: integration tests build several routers in one process
/// and each build lands here.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(SHARES_CREATED.clone()),
            Box::new(SHARES_REVOKED.clone()),
            Box::new(SHARE_VIEWS.clone()),
            Box::new(OTP_SENT.clone()),
            Box::new(OTP_SEND_FAILURES.clone()),
            Box::new(OTP_VERIFIED.clone()),
            Box::new(OTP_VERIFY_FAILURES.clone()),
            Box::new(SHARE_FILES_DOWNLOADED.clone()),
            Box::new(SHARE_ARCHIVES_DOWNLOADED.clone()),
            Box::new(ARCHIVE_BUILD_DURATION.clone()),
            Box::new(FILES_UPLOADED.clone()),
            Box::new(BYTES_UPLOADED.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record OTP verification failures by reason.
pub fn record_otp_verify_failure(reason: &str) {
    OTP_VERIFY_FAILURES.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // This would panic if any metric creation failed
        register_metrics();
    }
}
