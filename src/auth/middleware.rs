use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};

use super::helpers::{SessionError, ValidatedSession, extract_session_token, validate_session};
use crate::server::AppState;
use crate::server::response::ApiError;
use crate::types::{Role, Session, User};

/// Extractor that requires a signed-in user of any role
pub struct RequireUser {
    pub session: Session,
    pub user: User,
}

/// A signed-in user when credentials are present, otherwise a guest.
/// Invalid credentials are still rejected.
pub struct OptionalUser(pub Option<User>);

/// Extractor that requires the admin role
pub struct RequireAdmin(pub User);

/// Extractor for catalog writes (admin or vendor)
pub struct RequireCatalogManager(pub User);

/// Extractor for order operations (admin or support)
pub struct RequireOrderManager(pub User);

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    SessionExpired,
    AccountDisabled,
    Forbidden(&'static str),
    InternalError,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuth => ApiError::unauthorized("Authentication required"),
            AuthError::InvalidScheme => ApiError::unauthorized("Invalid authorization scheme"),
            AuthError::InvalidToken => ApiError::unauthorized("Invalid session"),
            AuthError::SessionExpired => ApiError::unauthorized("Session expired"),
            AuthError::AccountDisabled => ApiError::forbidden("Account is not active"),
            AuthError::Forbidden(message) => ApiError::forbidden(message),
            AuthError::InternalError => ApiError::internal("Internal server error"),
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidScheme => AuthError::InvalidScheme,
            SessionError::InvalidToken => AuthError::InvalidToken,
            SessionError::SessionExpired => AuthError::SessionExpired,
            SessionError::AccountDisabled => AuthError::AccountDisabled,
            SessionError::InternalError => AuthError::InternalError,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

async fn authenticate(
    parts: &mut Parts,
    state: &Arc<AppState>,
) -> Result<Option<ValidatedSession>, AuthError> {
    let Some(raw_token) = extract_session_token(&parts.headers)? else {
        return Ok(None);
    };
    Ok(Some(validate_session(state, &raw_token)?))
}

async fn require_role(
    parts: &mut Parts,
    state: &Arc<AppState>,
    allowed: fn(Role) -> bool,
    message: &'static str,
) -> Result<User, AuthError> {
    let validated = authenticate(parts, state)
        .await?
        .ok_or(AuthError::MissingAuth)?;
    if !allowed(validated.user.role) {
        return Err(AuthError::Forbidden(message));
    }
    Ok(validated.user)
}

impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let validated = authenticate(parts, state)
            .await?
            .ok_or(AuthError::MissingAuth)?;
        Ok(RequireUser {
            session: validated.session,
            user: validated.user,
        })
    }
}

impl FromRequestParts<Arc<AppState>> for OptionalUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let validated = authenticate(parts, state).await?;
        Ok(OptionalUser(validated.map(|v| v.user)))
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        require_role(
            parts,
            state,
            |role| role == Role::Admin,
            "Admin access required",
        )
        .await
        .map(RequireAdmin)
    }
}

impl FromRequestParts<Arc<AppState>> for RequireCatalogManager {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        require_role(
            parts,
            state,
            Role::can_manage_catalog,
            "Catalog access required",
        )
        .await
        .map(RequireCatalogManager)
    }
}

impl FromRequestParts<Arc<AppState>> for RequireOrderManager {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        require_role(
            parts,
            state,
            Role::can_manage_orders,
            "Order management access required",
        )
        .await
        .map(RequireOrderManager)
    }
}
