use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::{RequireUser, check_password_policy, hash_password, verify_password};
use crate::server::AppState;
use crate::server::dto::{
    AddressRequest, ChangePasswordRequest, UpdateAccountRequest, UpdatePreferencesRequest,
};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::validate_name;
use crate::types::{Address, Preferences, User};

#[derive(Debug, Serialize)]
pub struct AccountView {
    #[serde(flatten)]
    pub user: User,
    pub preferences: Preferences,
}

fn preferences_or_default(state: &AppState, user_id: &str) -> Result<Preferences, ApiError> {
    let prefs = state
        .store
        .get_preferences(user_id)
        .api_err("Preferences")?
        .unwrap_or_else(|| Preferences {
            user_id: user_id.to_string(),
            currency: state.config.commerce.display_currency,
            locale: "en".to_string(),
            marketing_opt_in: false,
            updated_at: Utc::now(),
        });
    Ok(prefs)
}

fn owned_address(state: &AppState, user: &User, id: &str) -> Result<Address, ApiError> {
    state
        .store
        .get_address(id)
        .api_err("Address")?
        .filter(|a| a.user_id == user.id)
        .or_not_found("Address not found")
}

fn required(value: String, field: &str) -> Result<String, ApiError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(value)
}

pub async fn get_account(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let preferences = preferences_or_default(&state, &auth.user.id)?;
    Ok(Json(ApiResponse::success(AccountView {
        user: auth.user,
        preferences,
    })))
}

pub async fn update_account(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut user = auth.user;
    if let Some(name) = req.name {
        user.name = validate_name(&name, "Account")?;
    }
    if let Some(phone) = req.phone {
        let phone = phone.trim().to_string();
        user.phone = (!phone.is_empty()).then_some(phone);
    }
    user.updated_at = Utc::now();

    state.store.update_user(&user).api_err("User")?;
    Ok(Json(ApiResponse::success(user)))
}

/// Changes the password and signs out every other session.
pub async fn change_password(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let current_ok = verify_password(&req.current_password, &auth.user.password_hash)
        .map_err(|_| ApiError::internal("Failed to verify password"))?;
    if !current_ok {
        return Err(ApiError::bad_request("Current password is incorrect"));
    }
    check_password_policy(&req.new_password, state.config.auth.password_min_length)
        .map_err(ApiError::bad_request)?;

    let password_hash = hash_password(&req.new_password)
        .map_err(|_| ApiError::internal("Failed to hash password"))?;
    state
        .store
        .set_password(&auth.user.id, &password_hash, false)
        .api_err("User")?;

    for session in state
        .store
        .list_user_sessions(&auth.user.id)
        .api_err("Session")?
    {
        if session.id != auth.session.id {
            state.store.delete_session(&session.id).api_err("Session")?;
        }
    }

    tracing::info!(user_id = %auth.user.id, "Password changed");
    Ok(Json(ApiResponse::message("Password changed")))
}

pub async fn list_addresses(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let addresses = state
        .store
        .list_addresses(&auth.user.id)
        .api_err("Address")?;
    Ok(Json(ApiResponse::success(addresses)))
}

pub async fn create_address(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let address = Address {
        id: Uuid::new_v4().to_string(),
        user_id: auth.user.id.clone(),
        label: req.label,
        full_name: required(req.full_name, "Full name")?,
        phone: req.phone,
        line1: required(req.line1, "Address line")?,
        line2: req.line2,
        city: required(req.city, "City")?,
        region: req.region,
        postal_code: req.postal_code,
        country: required(req.country, "Country")?,
        is_default: req.is_default,
        created_at: now,
        updated_at: now,
    };

    state.store.create_address(&address).api_err("Address")?;
    let address = owned_address(&state, &auth.user, &address.id)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(address))))
}

pub async fn update_address(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AddressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = owned_address(&state, &auth.user, &id)?;
    let address = Address {
        label: req.label,
        full_name: required(req.full_name, "Full name")?,
        phone: req.phone,
        line1: required(req.line1, "Address line")?,
        line2: req.line2,
        city: required(req.city, "City")?,
        region: req.region,
        postal_code: req.postal_code,
        country: required(req.country, "Country")?,
        is_default: req.is_default,
        updated_at: Utc::now(),
        ..existing
    };

    state.store.update_address(&address).api_err("Address")?;
    let address = owned_address(&state, &auth.user, &id)?;
    Ok(Json(ApiResponse::success(address)))
}

pub async fn delete_address(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let address = owned_address(&state, &auth.user, &id)?;
    state.store.delete_address(&address.id).api_err("Address")?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_preferences(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let prefs = preferences_or_default(&state, &auth.user.id)?;
    Ok(Json(ApiResponse::success(prefs)))
}

pub async fn update_preferences(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdatePreferencesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut prefs = preferences_or_default(&state, &auth.user.id)?;
    if let Some(currency) = req.currency {
        prefs.currency = currency;
    }
    if let Some(locale) = req.locale {
        prefs.locale = required(locale, "Locale")?;
    }
    if let Some(opt_in) = req.marketing_opt_in {
        prefs.marketing_opt_in = opt_in;
    }
    prefs.updated_at = Utc::now();

    state.store.upsert_preferences(&prefs).api_err("Preferences")?;
    Ok(Json(ApiResponse::success(prefs)))
}
