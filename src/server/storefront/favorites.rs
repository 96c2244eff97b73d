use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::RequireUser;
use crate::error::Error as StoreError;
use crate::server::AppState;
use crate::server::dto::{AddFavoriteRequest, CurrencyParams, ProductView};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::types::Favorite;

use super::resolve_prices;

#[derive(Debug, Serialize)]
pub struct FavoriteView {
    #[serde(flatten)]
    pub favorite: Favorite,
    pub product: ProductView,
}

pub async fn list_favorites(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<CurrencyParams>,
) -> Result<impl IntoResponse, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), Some(&auth.user))?;
    let favorites = state
        .store
        .list_favorites(&auth.user.id)
        .api_err("Favorite")?;

    let mut views = Vec::with_capacity(favorites.len());
    for favorite in favorites {
        if let Some(summary) = state
            .store
            .get_product_summary(&favorite.product_id)
            .api_err("Product")?
        {
            views.push(FavoriteView {
                favorite,
                product: ProductView::new(summary, prices),
            });
        }
    }

    Ok(Json(ApiResponse::success(views)))
}

pub async fn add_favorite(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddFavoriteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .store
        .get_product(&req.product_id)
        .api_err("Product")?
        .or_not_found("Product not found")?;
    if let Some(variant_id) = req.variant_id.as_deref() {
        state
            .store
            .get_variant(variant_id)
            .api_err("Variant")?
            .filter(|v| v.product_id == product.id)
            .or_not_found("Variant not found")?;
    }

    let favorite = Favorite {
        id: Uuid::new_v4().to_string(),
        user_id: auth.user.id.clone(),
        product_id: product.id,
        variant_id: req.variant_id,
        created_at: Utc::now(),
    };

    match state.store.add_favorite(&favorite) {
        Ok(()) => Ok((StatusCode::CREATED, Json(ApiResponse::success(favorite)))),
        Err(StoreError::AlreadyExists(_)) => {
            Err(ApiError::conflict("Product is already in favorites"))
        }
        Err(e) => Err(ApiError::from(e)),
    }
}

pub async fn delete_favorite(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .store
        .delete_favorite(&auth.user.id, &id)
        .api_err("Favorite")?;
    if !deleted {
        return Err(ApiError::not_found("Favorite not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}
