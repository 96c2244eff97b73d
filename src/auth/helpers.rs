use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use chrono::Utc;

use super::parse_token;
use crate::server::AppState;
use crate::types::{Session, User};

/// Cookie carrying the session token for browser clients.
pub const SESSION_COOKIE: &str = "souq_session";

#[derive(Debug)]
pub enum SessionError {
    InvalidScheme,
    InvalidToken,
    SessionExpired,
    AccountDisabled,
    InternalError,
}

pub struct ValidatedSession {
    pub session: Session,
    pub user: User,
}

/// Reads a cookie value from the `Cookie` headers.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Extracts the session token from `Authorization: Bearer` or the session cookie.
/// Returns None if neither is present.
/// Returns Err if the Authorization header uses another scheme.
pub fn extract_session_token(headers: &HeaderMap) -> Result<Option<String>, SessionError> {
    match headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        Some(header) => match header.strip_prefix("Bearer ") {
            Some(token) => Ok(Some(token.trim().to_string())),
            None => Err(SessionError::InvalidScheme),
        },
        None => Ok(cookie_value(headers, SESSION_COOKIE)),
    }
}

/// Validates a raw session token against the store.
/// Expired sessions are deleted as they are seen.
pub fn validate_session(state: &AppState, raw_token: &str) -> Result<ValidatedSession, SessionError> {
    let (lookup, _secret) = parse_token(raw_token).map_err(|_| SessionError::InvalidToken)?;

    let session = state
        .store
        .get_session_by_lookup(&lookup)
        .map_err(|_| SessionError::InternalError)?
        .ok_or(SessionError::InvalidToken)?;

    if !state
        .tokens
        .verify(raw_token, &session.token_hash)
        .map_err(|_| SessionError::InternalError)?
    {
        return Err(SessionError::InvalidToken);
    }

    if session.expires_at < Utc::now() {
        if let Err(e) = state.store.delete_session(&session.id) {
            tracing::warn!("Failed to delete expired session: {e}");
        }
        return Err(SessionError::SessionExpired);
    }

    let user = state
        .store
        .get_user(&session.user_id)
        .map_err(|_| SessionError::InternalError)?
        .ok_or(SessionError::InvalidToken)?;

    if !user
        .status
        .can_sign_in(state.config.auth.require_email_verification)
    {
        return Err(SessionError::AccountDisabled);
    }

    if let Err(e) = state.store.touch_session(&session.id) {
        tracing::warn!("Failed to update session last_used_at: {e}");
    }

    Ok(ValidatedSession { session, user })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_bearer_token_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer souq_abc_def"));
        headers.insert(COOKIE, HeaderValue::from_static("souq_session=other"));
        assert_eq!(
            extract_session_token(&headers).unwrap().as_deref(),
            Some("souq_abc_def")
        );
    }

    #[test]
    fn test_cookie_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; souq_session=souq_abc_def; lang=ar"),
        );
        assert_eq!(
            extract_session_token(&headers).unwrap().as_deref(),
            Some("souq_abc_def")
        );
    }

    #[test]
    fn test_other_scheme_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(matches!(
            extract_session_token(&headers),
            Err(SessionError::InvalidScheme)
        ));
    }

    #[test]
    fn test_no_credentials() {
        assert!(extract_session_token(&HeaderMap::new()).unwrap().is_none());
    }
}
