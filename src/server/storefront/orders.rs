use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::auth::RequireUser;
use crate::error::Error as StoreError;
use crate::server::AppState;
use crate::server::dto::{
    CancelOrderRequest, CheckoutRequest, CurrencyParams, OrderDetailView, OrderListParams,
    OrderView,
};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::store::OrderDraft;
use crate::types::{Order, OrderStatus, ShippingAddress, User};

use super::resolve_prices;

const ORDER_NUMBER_ATTEMPTS: u32 = 3;
const ORDER_SUFFIX_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// `ORD-YYYYMMDD-XXXXXX`
pub(crate) fn generate_order_number(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ORDER_SUFFIX_CHARS[rng.gen_range(0..ORDER_SUFFIX_CHARS.len())] as char)
        .collect();
    format!("ORD-{}-{suffix}", now.format("%Y%m%d"))
}

fn require_field(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("Shipping address {field} is required")));
    }
    Ok(())
}

fn shipping_address(
    state: &AppState,
    user: &User,
    req: &CheckoutRequest,
) -> Result<ShippingAddress, ApiError> {
    if let Some(address_id) = req.address_id.as_deref() {
        let address = state
            .store
            .get_address(address_id)
            .api_err("Address")?
            .filter(|a| a.user_id == user.id)
            .or_not_found("Address not found")?;
        return Ok(ShippingAddress::from(&address));
    }

    if let Some(address) = &req.shipping_address {
        require_field(&address.full_name, "full_name")?;
        require_field(&address.line1, "line1")?;
        require_field(&address.city, "city")?;
        require_field(&address.country, "country")?;
        return Ok(address.clone());
    }

    state
        .store
        .list_addresses(&user.id)
        .api_err("Address")?
        .iter()
        .find(|a| a.is_default)
        .map(ShippingAddress::from)
        .ok_or_else(|| ApiError::bad_request("A shipping address is required"))
}

fn owned_order(state: &AppState, user: &User, id: &str) -> Result<Order, ApiError> {
    state
        .store
        .get_order(id)
        .api_err("Order")?
        .filter(|o| o.user_id == user.id)
        .or_not_found("Order not found")
}

/// Checkout: turns the user's cart into an order.
pub async fn checkout(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<CurrencyParams>,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), Some(&auth.user))?;
    let user = &auth.user;

    let cart = state
        .store
        .get_cart_for_user(&user.id)
        .api_err("Cart")?
        .ok_or_else(|| ApiError::bad_request("Cart is empty"))?;
    let address = shipping_address(&state, user, &req)?;
    let commerce = &state.config.commerce;

    let mut order = None;
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let now = Utc::now();
        let draft = OrderDraft {
            id: Uuid::new_v4().to_string(),
            order_number: generate_order_number(now),
            user_id: user.id.clone(),
            cart_id: cart.id.clone(),
            currency: commerce.base_currency,
            shipping_address: address.clone(),
            notes: req.notes.clone().filter(|n| !n.trim().is_empty()),
            payment_method: req.payment_method,
            shipping_flat_rate: commerce.shipping_flat_rate,
            tax_rate: commerce.tax_rate,
            created_at: now,
        };

        match state.store.place_order(&draft) {
            Ok(placed) => {
                order = Some(placed);
                break;
            }
            Err(StoreError::AlreadyExists(_)) => continue,
            Err(e) => return Err(ApiError::from(e)),
        }
    }
    let order = order.ok_or_else(|| ApiError::internal("Failed to allocate an order number"))?;

    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        total = %order.total,
        "Order placed"
    );

    let detail = state
        .store
        .get_order_detail(&order.id)
        .api_err("Order")?
        .or_not_found("Order not found")?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderDetailView::new(detail, prices))),
    ))
}

pub async fn list_orders(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<OrderListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), Some(&auth.user))?;
    let cursor = params.cursor.as_deref().unwrap_or("");

    let orders = state
        .store
        .list_user_orders(&auth.user.id, cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Order")?;

    let (orders, next_cursor, has_more) =
        paginate(orders, DEFAULT_PAGE_SIZE as usize, |o| o.id.clone());
    let views = orders
        .into_iter()
        .map(|order| OrderView::new(order, prices))
        .collect();

    Ok(Json(PaginatedResponse::new(views, next_cursor, has_more)))
}

pub async fn get_order(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<CurrencyParams>,
) -> Result<impl IntoResponse, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), Some(&auth.user))?;
    let detail = state
        .store
        .get_order_detail(&id)
        .api_err("Order")?
        .filter(|d| d.order.user_id == auth.user.id)
        .or_not_found("Order not found")?;

    Ok(Json(ApiResponse::success(OrderDetailView::new(detail, prices))))
}

pub async fn cancel_order(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<CurrencyParams>,
    body: Option<Json<CancelOrderRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), Some(&auth.user))?;
    let order = owned_order(&state, &auth.user, &id)?;
    if !order.status.customer_cancellable() {
        return Err(ApiError::conflict("Order can no longer be cancelled"));
    }

    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "Cancelled by customer".to_string());
    let order = state
        .store
        .cancel_order(
            &order.id,
            OrderStatus::CUSTOMER_CANCELLABLE,
            Some(&reason),
            Some(&auth.user.id),
        )
        .api_err("Order")?;

    tracing::info!(order_id = %order.id, "Order cancelled by customer");
    Ok(Json(ApiResponse::with_message(
        OrderView::new(order, prices),
        "Order cancelled",
    )))
}

pub async fn list_order_shipments(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order = owned_order(&state, &auth.user, &id)?;
    let shipments = state.store.list_shipments(&order.id).api_err("Shipment")?;
    Ok(Json(ApiResponse::success(shipments)))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_order_number_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        let number = generate_order_number(now);
        assert!(number.starts_with("ORD-20260309-"));
        let suffix = &number["ORD-20260309-".len()..];
        assert_eq!(suffix.len(), 6);
        assert!(suffix.bytes().all(|b| ORDER_SUFFIX_CHARS.contains(&b)));
    }
}
