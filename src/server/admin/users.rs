use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use crate::auth::RequireAdmin;
use crate::error::Error as StoreError;
use crate::server::AppState;
use crate::server::dto::{PaginationParams, UpdateUserRequest};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::validation::validate_name;

pub async fn list_users(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let users = state
        .store
        .list_users(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("User")?;

    let (users, next_cursor, has_more) =
        paginate(users, DEFAULT_PAGE_SIZE as usize, |u| u.id.clone());

    Ok(Json(PaginatedResponse::new(users, next_cursor, has_more)))
}

pub async fn get_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .store
        .get_user(&id)
        .api_err("User")?
        .or_not_found("User not found")?;

    Ok(Json(ApiResponse::success(user)))
}

/// Changes name, role or status. Disabling an account ends its sessions.
pub async fn update_user(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut user = state
        .store
        .get_user(&id)
        .api_err("User")?
        .or_not_found("User not found")?;

    if user.id == admin.id && (req.role.is_some() || req.status.is_some()) {
        return Err(ApiError::bad_request(
            "Admins cannot change their own role or status",
        ));
    }

    if let Some(name) = req.name {
        user.name = validate_name(&name, "Account")?;
    }
    if let Some(role) = req.role {
        user.role = role;
    }
    if let Some(status) = req.status {
        user.status = status;
    }
    user.updated_at = Utc::now();

    state.store.update_user(&user).api_err("User")?;

    if !user.status.can_sign_in(false) {
        for session in state.store.list_user_sessions(&user.id).api_err("Session")? {
            state.store.delete_session(&session.id).api_err("Session")?;
        }
    }

    tracing::info!(
        admin_id = %admin.id,
        user_id = %user.id,
        role = %user.role,
        status = %user.status,
        "User updated"
    );
    Ok(Json(ApiResponse::success(user)))
}

pub async fn delete_user(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if id == admin.id {
        return Err(ApiError::bad_request("Admins cannot delete themselves"));
    }

    match state.store.delete_user(&id) {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(ApiError::not_found("User not found")),
        Err(StoreError::Referenced(_)) => Err(ApiError::conflict(
            "User has orders and cannot be deleted; suspend the account instead",
        )),
        Err(e) => Err(ApiError::from(e)),
    }
}
