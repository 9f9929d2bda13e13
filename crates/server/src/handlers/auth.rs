//! Account registration, login, and identity handlers.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{parse_json_body, rfc3339};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use satchel_core::normalize_email;
use satchel_credentials::{hash_secret, verify_secret};
use satchel_metadata::models::UserRow;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_EMAIL_LENGTH: usize = 255;
const MAX_NAME_LENGTH: usize = 255;

/// Registration request.
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Login request.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Account representation returned to its owner.
#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

/// Registration and login response: the account plus a session token.
#[derive(Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

fn user_response(user: &UserRow) -> ApiResult<UserResponse> {
    Ok(UserResponse {
        id: user.user_id.to_string(),
        name: user.display_name.clone(),
        email: user.email.clone(),
        created_at: rfc3339(user.created_at)?,
    })
}

/// POST /api/auth/register - Create an account and issue a session token.
#[tracing::instrument(skip(state, req))]
pub async fn register(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let body: RegisterRequest = parse_json_body(req).await?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ApiError::Validation(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }

    let email = normalize_email(&body.email);
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::Validation("email is invalid".to_string()));
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ApiError::Validation(format!(
            "email must be at most {MAX_EMAIL_LENGTH} characters"
        )));
    }

    if body.password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    if state.metadata.get_user_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict(
            "an account with this email already exists".to_string(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    let user = UserRow {
        user_id: Uuid::new_v4(),
        email,
        password_hash: hash_secret(&body.password)?,
        display_name: name.to_string(),
        created_at: now,
        updated_at: now,
    };

    // A concurrent registration for the same email loses here on the unique
    // constraint and surfaces as a conflict.
    state.metadata.create_user(&user).await?;

    let token = state
        .issuer
        .issue_session(user.user_id, &user.email, &user.display_name)?;

    tracing::info!(user_id = %user.user_id, "account registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user_response(&user)?,
            token,
        }),
    ))
}

/// POST /api/auth/login - Verify credentials and issue a session token.
#[tracing::instrument(skip(state, req))]
pub async fn login(State(state): State<AppState>, req: Request) -> ApiResult<Json<AuthResponse>> {
    let body: LoginRequest = parse_json_body(req).await?;
    let email = normalize_email(&body.email);

    // Unknown email and wrong password produce the same response, so the
    // endpoint cannot be used to probe which addresses have accounts.
    let Some(user) = state.metadata.get_user_by_email(&email).await? else {
        return Err(ApiError::Unauthorized(
            "invalid email or password".to_string(),
        ));
    };
    if !verify_secret(&body.password, &user.password_hash) {
        return Err(ApiError::Unauthorized(
            "invalid email or password".to_string(),
        ));
    }

    let token = state
        .issuer
        .issue_session(user.user_id, &user.email, &user.display_name)?;

    tracing::debug!(user_id = %user.user_id, "login succeeded");

    Ok(Json(AuthResponse {
        user: user_response(&user)?,
        token,
    }))
}

/// GET /api/auth/me - The authenticated account.
pub async fn me(State(state): State<AppState>, req: Request) -> ApiResult<Json<UserResponse>> {
    let auth = require_auth(&req)?;

    let user = state
        .metadata
        .get_user(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    Ok(Json(user_response(&user)?))
}
