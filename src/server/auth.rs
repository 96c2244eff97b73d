//! Account sign-up, sign-in, sessions, password reset and email verification.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, Query, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::{
    RequireUser, SESSION_COOKIE, check_password_policy, generate_token, hash_password,
    token_digest, token_lifetime, verify_password,
};
use crate::error::Error as StoreError;
use crate::ratelimit::client_ip;
use crate::server::AppState;
use crate::server::dto::{
    AuthResponse, EmailRequest, ResetPasswordRequest, SessionResponse, SignInRequest,
    SignUpRequest, TokenParams,
};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::{normalize_email, validate_name};
use crate::types::{
    Preferences, Role, Session, User, UserStatus, Verification, VerificationKind,
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const MAX_SESSION_RETRIES: u32 = 3;

pub fn auth_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sign-up", post(sign_up))
        .route("/sign-in", post(sign_in))
        .route("/sign-out", post(sign_out))
        .route("/session", get(get_session))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/send-verification-email", post(send_verification_email))
        .route("/verify-email", get(verify_email))
}

/// Address and user agent recorded on new sessions.
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(ClientInfo {
            ip_address: client_ip(&parts.headers, peer),
            user_agent: parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
        })
    }
}

fn session_cookie(state: &AppState, token: &str, max_age_secs: i64) -> Result<HeaderValue, ApiError> {
    let secure = if state.config.auth.base_url.starts_with("https://") {
        "; Secure"
    } else {
        ""
    };
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={token}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age_secs}{secure}"
    ))
    .map_err(|_| ApiError::internal("Failed to build session cookie"))
}

/// Creates a session for `user`, retrying on the rare lookup collision.
fn issue_session(
    state: &AppState,
    user: &User,
    client: &ClientInfo,
) -> Result<(String, Session), ApiError> {
    for _ in 0..MAX_SESSION_RETRIES {
        let (raw_token, lookup, hash) = state
            .tokens
            .generate()
            .map_err(|_| ApiError::internal("Failed to generate session token"))?;

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            token_hash: hash,
            token_lookup: lookup,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            created_at: now,
            expires_at: now + state.config.auth.session_ttl,
            last_used_at: None,
        };

        match state.store.create_session(&session) {
            Ok(()) => return Ok((raw_token, session)),
            Err(StoreError::TokenLookupCollision) => continue,
            Err(_) => return Err(ApiError::internal("Failed to create session")),
        }
    }

    Err(ApiError::internal("Failed to create session after retries"))
}

fn session_response(
    state: &AppState,
    status: StatusCode,
    user: User,
    raw_token: String,
    session: &Session,
) -> Result<Response, ApiError> {
    let max_age = state.config.auth.session_ttl.num_seconds();
    let cookie = session_cookie(state, &raw_token, max_age)?;
    let body = ApiResponse::success(AuthResponse {
        user,
        token: raw_token,
        expires_at: session.expires_at,
    });
    Ok((status, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Replaces any outstanding token of `kind` with a fresh one and returns the raw token.
fn issue_verification(
    state: &AppState,
    user: &User,
    kind: VerificationKind,
) -> Result<String, ApiError> {
    state
        .store
        .delete_verifications(&user.id, kind)
        .api_err("Verification")?;

    let token = generate_token();
    let now = Utc::now();
    let verification = Verification {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        kind,
        token_digest: token_digest(&state.config.auth.secret, &token),
        created_at: now,
        expires_at: now + token_lifetime(kind),
        consumed_at: None,
    };
    state
        .store
        .create_verification(&verification)
        .api_err("Verification")?;
    Ok(token)
}

async fn send_verification(state: &AppState, user: &User) -> Result<(), ApiError> {
    let token = issue_verification(state, user, VerificationKind::EmailVerification)?;
    if let Err(e) = state
        .mailer
        .send_verification_email(&user.email, &user.name, &token)
        .await
    {
        tracing::error!(user_id = %user.id, "Failed to send verification email: {e}");
    }
    Ok(())
}

pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    Json(req): Json<SignUpRequest>,
) -> Result<Response, ApiError> {
    let email = normalize_email(&req.email)?;
    let name = validate_name(&req.name, "Account")?;
    check_password_policy(&req.password, state.config.auth.password_min_length)
        .map_err(ApiError::bad_request)?;

    let password_hash =
        hash_password(&req.password).map_err(|_| ApiError::internal("Failed to hash password"))?;

    let require_verification = state.config.auth.require_email_verification;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email,
        name,
        phone: req.phone.filter(|p| !p.trim().is_empty()),
        password_hash,
        role: Role::Customer,
        status: if require_verification {
            UserStatus::PendingVerification
        } else {
            UserStatus::Active
        },
        email_verified: false,
        created_at: now,
        updated_at: now,
    };

    match state.store.create_user(&user) {
        Ok(()) => {}
        Err(StoreError::AlreadyExists(_)) => {
            return Err(ApiError::conflict("An account with this email already exists"));
        }
        Err(e) => return Err(ApiError::from(e)),
    }

    state
        .store
        .upsert_preferences(&Preferences {
            user_id: user.id.clone(),
            currency: state.config.commerce.display_currency,
            locale: "en".to_string(),
            marketing_opt_in: false,
            updated_at: now,
        })
        .api_err("Preferences")?;

    send_verification(&state, &user).await?;

    let (raw_token, session) = issue_session(&state, &user, &client)?;
    tracing::info!(user_id = %user.id, "Account created");
    session_response(&state, StatusCode::CREATED, user, raw_token, &session)
}

pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    Json(req): Json<SignInRequest>,
) -> Result<Response, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = state
        .store
        .get_user_by_email(&email)
        .api_err("User")?
        .ok_or_else(|| ApiError::unauthorized(INVALID_CREDENTIALS))?;

    let password_ok = verify_password(&req.password, &user.password_hash)
        .map_err(|_| ApiError::internal("Failed to verify password"))?;
    if !password_ok {
        return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
    }

    match user.status {
        UserStatus::Suspended => return Err(ApiError::forbidden("Account is suspended")),
        UserStatus::Inactive => return Err(ApiError::forbidden("Account is inactive")),
        UserStatus::PendingVerification if state.config.auth.require_email_verification => {
            return Err(ApiError::forbidden("Email address has not been verified"));
        }
        UserStatus::PendingVerification | UserStatus::Active => {}
    }

    let (raw_token, session) = issue_session(&state, &user, &client)?;
    tracing::info!(user_id = %user.id, "Signed in");
    session_response(&state, StatusCode::OK, user, raw_token, &session)
}

pub async fn sign_out(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    state
        .store
        .delete_session(&auth.session.id)
        .api_err("Session")?;

    let cookie = session_cookie(&state, "", 0)?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::message("Signed out")),
    )
        .into_response())
}

pub async fn get_session(auth: RequireUser) -> impl IntoResponse {
    Json(ApiResponse::success(SessionResponse {
        user: auth.user,
        expires_at: auth.session.expires_at,
    }))
}

const RESET_REQUESTED: &str = "If an account exists for this email, a reset link has been sent";

pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = state.store.get_user_by_email(&email).api_err("User")?;

    if let Some(user) = user.filter(|u| u.status.can_sign_in(false)) {
        let token = issue_verification(&state, &user, VerificationKind::PasswordReset)?;
        if let Err(e) = state
            .mailer
            .send_password_reset_email(&user.email, &user.name, &token)
            .await
        {
            tracing::error!(user_id = %user.id, "Failed to send password reset email: {e}");
        }
    }

    Ok(Json(ApiResponse::message(RESET_REQUESTED)))
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_password_policy(&req.password, state.config.auth.password_min_length)
        .map_err(ApiError::bad_request)?;

    let digest = token_digest(&state.config.auth.secret, &req.token);
    let verification = state
        .store
        .consume_verification(&digest, VerificationKind::PasswordReset)
        .api_err("Verification")?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired reset token"))?;

    let password_hash =
        hash_password(&req.password).map_err(|_| ApiError::internal("Failed to hash password"))?;
    state
        .store
        .set_password(&verification.user_id, &password_hash, true)
        .api_err("User")?;

    tracing::info!(user_id = %verification.user_id, "Password reset");
    Ok(Json(ApiResponse::message(
        "Password has been reset. Please sign in again.",
    )))
}

pub async fn send_verification_email(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = state.store.get_user_by_email(&email).api_err("User")?;

    if let Some(user) = user.filter(|u| !u.email_verified) {
        send_verification(&state, &user).await?;
    }

    Ok(Json(ApiResponse::message(
        "If the account needs verification, an email has been sent",
    )))
}

pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TokenParams>,
) -> Result<impl IntoResponse, ApiError> {
    let digest = token_digest(&state.config.auth.secret, &params.token);
    let verification = state
        .store
        .consume_verification(&digest, VerificationKind::EmailVerification)
        .api_err("Verification")?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired verification token"))?;

    state
        .store
        .mark_email_verified(&verification.user_id)
        .api_err("User")?;

    let user = state
        .store
        .get_user(&verification.user_id)
        .api_err("User")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(user_id = %user.id, "Email verified");
    Ok(Json(ApiResponse::with_message(user, "Email verified")))
}
