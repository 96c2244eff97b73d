use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::{OptionalUser, RequireUser};
use crate::error::Error as StoreError;
use crate::server::AppState;
use crate::server::dto::{
    AddCartItemRequest, CartView, CurrencyParams, MergeCartRequest, PriceFormatter,
    UpdateCartItemRequest,
};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::router::CART_SESSION_HEADER;
use crate::server::validation::validate_quantity;
use crate::types::{Cart, CartItem, ProductStatus, User};

use super::resolve_prices;

fn guest_session(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CART_SESSION_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// The caller's cart: the user cart when signed in, else the guest cart named by
/// the `X-Cart-Session` header.
fn find_cart(
    state: &AppState,
    user: Option<&User>,
    headers: &HeaderMap,
) -> Result<Option<Cart>, ApiError> {
    match user {
        Some(user) => state.store.get_cart_for_user(&user.id).api_err("Cart"),
        None => match guest_session(headers) {
            Some(session_id) => state.store.get_cart_for_session(&session_id).api_err("Cart"),
            None => Ok(None),
        },
    }
}

fn find_or_create_cart(
    state: &AppState,
    user: Option<&User>,
    headers: &HeaderMap,
) -> Result<Cart, ApiError> {
    if let Some(cart) = find_cart(state, user, headers)? {
        return Ok(cart);
    }

    let now = Utc::now();
    let cart = Cart {
        id: Uuid::new_v4().to_string(),
        user_id: user.map(|u| u.id.clone()),
        // Guest ids are always minted here, never taken from the client.
        session_id: user.is_none().then(|| Uuid::new_v4().to_string()),
        created_at: now,
        updated_at: now,
    };

    match state.store.create_cart(&cart) {
        Ok(()) => Ok(cart),
        // Another request created the user cart first.
        Err(StoreError::AlreadyExists(_)) => find_cart(state, user, headers)?
            .or_not_found("Cart not found"),
        Err(e) => Err(ApiError::from(e)),
    }
}

fn cart_response(
    state: &AppState,
    cart: Option<&Cart>,
    prices: PriceFormatter,
    status: StatusCode,
) -> Result<Response, ApiError> {
    let lines = match cart {
        Some(cart) => state.store.list_cart_lines(&cart.id).api_err("Cart")?,
        None => Vec::new(),
    };
    let view = CartView::new(cart, lines, prices);

    let mut response = (status, Json(ApiResponse::success(view))).into_response();
    if let Some(session_id) = cart.and_then(|c| c.session_id.as_deref()) {
        if let Ok(value) = HeaderValue::from_str(session_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(CART_SESSION_HEADER), value);
        }
    }
    Ok(response)
}

/// Rejects a quantity the tracked stock cannot cover.
fn ensure_stock(
    state: &AppState,
    product_id: &str,
    variant_id: Option<&str>,
    sku: &str,
    quantity: i64,
) -> Result<(), ApiError> {
    if let Some(inventory) = state
        .store
        .get_inventory(product_id, variant_id)
        .api_err("Inventory")?
    {
        if !inventory.can_supply(quantity) {
            return Err(ApiError::from(StoreError::InsufficientStock {
                sku: sku.to_string(),
                available: inventory.available().max(0),
            }));
        }
    }
    Ok(())
}

pub async fn get_cart(
    OptionalUser(user): OptionalUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<CurrencyParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), user.as_ref())?;
    let cart = find_cart(&state, user.as_ref(), &headers)?;
    cart_response(&state, cart.as_ref(), prices, StatusCode::OK)
}

pub async fn add_item(
    OptionalUser(user): OptionalUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<CurrencyParams>,
    headers: HeaderMap,
    Json(req): Json<AddCartItemRequest>,
) -> Result<Response, ApiError> {
    validate_quantity(req.quantity)?;
    let prices = resolve_prices(&state, params.currency.as_deref(), user.as_ref())?;

    let product = state
        .store
        .get_product(&req.product_id)
        .api_err("Product")?
        .or_not_found("Product not found")?;
    if product.status != ProductStatus::Active {
        return Err(ApiError::bad_request("Product is not available for purchase"));
    }

    let mut sku = product.sku.clone();
    if let Some(variant_id) = req.variant_id.as_deref() {
        let variant = state
            .store
            .get_variant(variant_id)
            .api_err("Variant")?
            .filter(|v| v.product_id == product.id)
            .or_not_found("Variant not found")?;
        sku = variant.sku;
    }

    let cart = find_or_create_cart(&state, user.as_ref(), &headers)?;

    let already_in_cart: i64 = state
        .store
        .list_cart_lines(&cart.id)
        .api_err("Cart")?
        .iter()
        .filter(|l| {
            l.item.product_id == product.id && l.item.variant_id.as_deref() == req.variant_id.as_deref()
        })
        .map(|l| l.item.quantity)
        .sum();
    validate_quantity(already_in_cart + req.quantity)?;
    ensure_stock(
        &state,
        &product.id,
        req.variant_id.as_deref(),
        &sku,
        already_in_cart + req.quantity,
    )?;

    let now = Utc::now();
    state
        .store
        .add_cart_item(&CartItem {
            id: Uuid::new_v4().to_string(),
            cart_id: cart.id.clone(),
            product_id: product.id,
            variant_id: req.variant_id,
            quantity: req.quantity,
            created_at: now,
            updated_at: now,
        })
        .api_err("Cart item")?;

    cart_response(&state, Some(&cart), prices, StatusCode::CREATED)
}

pub async fn update_item(
    OptionalUser(user): OptionalUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<CurrencyParams>,
    headers: HeaderMap,
    Json(req): Json<UpdateCartItemRequest>,
) -> Result<Response, ApiError> {
    validate_quantity(req.quantity)?;
    let prices = resolve_prices(&state, params.currency.as_deref(), user.as_ref())?;

    let cart = find_cart(&state, user.as_ref(), &headers)?.or_not_found("Cart not found")?;
    let line = state
        .store
        .list_cart_lines(&cart.id)
        .api_err("Cart")?
        .into_iter()
        .find(|l| l.item.id == id)
        .or_not_found("Cart item not found")?;

    ensure_stock(
        &state,
        &line.item.product_id,
        line.item.variant_id.as_deref(),
        &line.sku,
        req.quantity,
    )?;

    state
        .store
        .set_cart_item_quantity(&id, req.quantity)
        .api_err("Cart item")?;

    cart_response(&state, Some(&cart), prices, StatusCode::OK)
}

pub async fn remove_item(
    OptionalUser(user): OptionalUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<CurrencyParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), user.as_ref())?;
    let cart = find_cart(&state, user.as_ref(), &headers)?.or_not_found("Cart not found")?;

    let item = state
        .store
        .get_cart_item(&id)
        .api_err("Cart item")?
        .filter(|item| item.cart_id == cart.id)
        .or_not_found("Cart item not found")?;
    state.store.remove_cart_item(&item.id).api_err("Cart item")?;

    cart_response(&state, Some(&cart), prices, StatusCode::OK)
}

pub async fn clear_cart(
    OptionalUser(user): OptionalUser,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(cart) = find_cart(&state, user.as_ref(), &headers)? {
        state.store.clear_cart(&cart.id).api_err("Cart")?;
    }
    Ok(Json(ApiResponse::message("Cart cleared")))
}

/// Folds a guest cart into the signed-in user's cart.
pub async fn merge_cart(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<CurrencyParams>,
    headers: HeaderMap,
    body: Option<Json<MergeCartRequest>>,
) -> Result<Response, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), Some(&auth.user))?;

    let session_id = body
        .and_then(|Json(req)| req.session_id)
        .or_else(|| guest_session(&headers))
        .ok_or_else(|| ApiError::bad_request("Guest cart session is required"))?;

    let guest = state
        .store
        .get_cart_for_session(&session_id)
        .api_err("Cart")?
        .or_not_found("Guest cart not found")?;

    let cart = find_or_create_cart(&state, Some(&auth.user), &headers)?;
    state
        .store
        .merge_carts(&guest.id, &cart.id)
        .api_err("Cart")?;

    tracing::info!(user_id = %auth.user.id, "Merged guest cart");
    cart_response(&state, Some(&cart), prices, StatusCode::OK)
}
