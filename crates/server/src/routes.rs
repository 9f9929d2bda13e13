//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::ratelimit::{ip_rate_limit_middleware, user_rate_limit_middleware};
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, patch, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Accounts
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/me", get(handlers::me))
        // Exams
        .route(
            "/api/exams",
            post(handlers::create_exam).get(handlers::list_exams),
        )
        .route(
            "/api/exams/{exam_id}",
            get(handlers::get_exam)
                .patch(handlers::update_exam)
                .delete(handlers::delete_exam),
        )
        // Exam files
        .route(
            "/api/exams/{exam_id}/files",
            post(handlers::upload_media).get(handlers::list_media),
        )
        .route("/api/files/{media_id}", delete(handlers::delete_media))
        // Share bundles (owner side)
        .route(
            "/api/share-links",
            post(handlers::create_share).get(handlers::list_shares),
        )
        .route("/api/share-links/stats", get(handlers::share_stats))
        .route(
            "/api/share-links/exam/{exam_id}",
            get(handlers::list_shares_for_exam),
        )
        .route("/api/share-links/{share_id}", get(handlers::get_share))
        .route(
            "/api/share-links/{share_id}/expiration",
            patch(handlers::update_share_expiration),
        )
        .route(
            "/api/share-links/{share_id}/revoke",
            post(handlers::revoke_share),
        )
        .route("/api/share-links/{share_id}", delete(handlers::delete_share))
        .route("/api/share-links/{share_id}/logs", get(handlers::share_logs));

    let public_routes = Router::new()
        // Health check (intentionally unauthenticated for load balancers/probes)
        .route("/healthz", get(handlers::health_check))
        // Public share surface, gated by code + OTP + access token
        .route("/s/{code}", get(handlers::public_share_summary))
        .route("/s/{code}/request-access", post(handlers::request_access))
        .route("/s/{code}/validate-otp", post(handlers::validate_otp))
        .route("/s/{code}/files", get(handlers::list_share_files))
        .route(
            "/s/{code}/files/{media_id}/download",
            get(handlers::download_share_file),
        )
        .route("/s/{code}/download-all", get(handlers::download_share_archive));

    let mut router = Router::new().merge(api_routes).merge(public_routes);

    // Conditionally add metrics endpoint based on config.
    // SECURITY: when enabled, this endpoint MUST be network-restricted to
    // authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    let rate_limit_state = state.rate_limit.clone();

    // Middleware layers are applied in reverse order (outermost first).
    // Order of execution: TraceLayer -> IP rate limit -> Auth -> User rate limit -> Handler
    router
        // Per-user rate limiting (runs after auth sets the user extension)
        .layer(middleware::from_fn_with_state(
            rate_limit_state.clone(),
            user_rate_limit_middleware,
        ))
        // Auth middleware (validates session tokens and sets AuthenticatedUser)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        // Per-IP rate limiting (runs before auth, catches unauthenticated abuse)
        .layer(middleware::from_fn_with_state(
            rate_limit_state,
            ip_rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
