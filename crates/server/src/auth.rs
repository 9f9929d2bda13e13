//! Session verification middleware and trace-ID plumbing.

use crate::error::{ApiError, ApiResult};
use crate::ratelimit::UserIdExtension;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

/// Client-supplied trace IDs are clipped to this many characters so a
/// hostile header cannot bloat the logs.
const MAX_TRACE_ID_LEN: usize = 128;

/// Correlation ID carried through logs for one request.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Fresh random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Build a trace ID from a client-provided header value.
    ///
    /// Only printable ASCII survives (log injection), and the result is
    /// capped at [`MAX_TRACE_ID_LEN`] characters. A value with nothing
    /// left after sanitizing gets a generated ID instead.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .take(MAX_TRACE_ID_LEN)
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated request extension carrying the verified session identity.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    /// Account id from the session token.
    pub user_id: Uuid,
    /// Email at token issue time.
    pub email: String,
    /// Display name at token issue time.
    pub name: String,
}

/// Pull the bearer token out of the Authorization header, if any.
/// The scheme comparison is case-insensitive per RFC 6750.
pub(crate) fn extract_bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    match value.split_at_checked(7) {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer ") => Some(token),
        _ => None,
    }
}

/// Authentication middleware that validates session tokens and sets up trace context.
///
/// A bearer token that does not verify as a session token leaves the request
/// unauthenticated rather than failing it: the same Authorization header also
/// carries share-access tokens on the public share routes, which do their own
/// verification downstream. Handlers that need an account call [`require_auth`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = req
        .headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_default();
    let trace_id_str = trace_id.0.clone();

    req.extensions_mut().insert(trace_id);

    if let Some(token) = extract_bearer_token(&req) {
        match state.issuer.verify_session(token) {
            Ok(claims) => {
                if let Ok(user_id) = Uuid::parse_str(&claims.sub) {
                    req.extensions_mut().insert(AuthenticatedUser {
                        user_id,
                        email: claims.email,
                        name: claims.name,
                    });

                    // Keyed rate limiting picks this up downstream
                    req.extensions_mut()
                        .insert(UserIdExtension(user_id.to_string()));
                } else {
                    tracing::warn!("session token subject is not a UUID, ignoring");
                }
            }
            Err(e) => {
                tracing::debug!("bearer token is not a valid session token: {e}");
            }
        }
    }

    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;

    Ok(response)
}

/// Require authentication (a verified session must be present).
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

/// Trace ID stored by the middleware, if the request passed through it.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: &str) -> Request {
        axum::http::Request::builder()
            .header(AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        let req = request_with_auth("BEARER abc123");
        assert_eq!(extract_bearer_token(&req), Some("abc123"));

        let req = request_with_auth("bearer abc123");
        assert_eq!(extract_bearer_token(&req), Some("abc123"));
    }

    #[test]
    fn test_bearer_rejects_other_schemes() {
        let req = request_with_auth("Token abc123");
        assert_eq!(extract_bearer_token(&req), None);

        let req = request_with_auth("Bearer");
        assert_eq!(extract_bearer_token(&req), None);

        let req: Request = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_bearer_token(&req), None);
    }

    #[test]
    fn test_trace_id_sanitizes_client_input() {
        let trace = TraceId::from_client("req-42\r\nfake log line");
        assert_eq!(trace.0, "req-42fake log line");

        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).0.len(), MAX_TRACE_ID_LEN);
    }

    #[test]
    fn test_trace_id_falls_back_when_nothing_survives() {
        let trace = TraceId::from_client("\u{7}\u{8}\n");
        assert!(!trace.0.is_empty());
    }
}
