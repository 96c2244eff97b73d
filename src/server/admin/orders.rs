use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::RequireOrderManager;
use crate::server::AppState;
use crate::server::dto::{
    CreateShipmentRequest, CurrencyParams, OrderDetailView, OrderListParams, OrderView,
    TrackingEventRequest, UpdateOrderStatusRequest, UpdatePaymentRequest,
};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::storefront::resolve_prices;
use crate::store::StatusUpdate;
use crate::types::{Shipment, ShipmentStatus, TrackingEvent};

pub async fn list_orders(
    RequireOrderManager(manager): RequireOrderManager,
    State(state): State<Arc<AppState>>,
    Query(params): Query<OrderListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), Some(&manager))?;
    let cursor = params.cursor.as_deref().unwrap_or("");

    let orders = state
        .store
        .list_orders(params.status, cursor, DEFAULT_PAGE_SIZE + 1)
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
    RequireOrderManager(manager): RequireOrderManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<CurrencyParams>,
) -> Result<impl IntoResponse, ApiError> {
    let prices = resolve_prices(&state, params.currency.as_deref(), Some(&manager))?;
    let detail = state
        .store
        .get_order_detail(&id)
        .api_err("Order")?
        .or_not_found("Order not found")?;

    Ok(Json(ApiResponse::success(OrderDetailView::new(detail, prices))))
}

/// Moves the order and fulfilment status columns. Each change is checked against
/// its own transition table and lands in the history. Payment status follows the
/// order's payments and is changed through `PATCH /payments/{id}`.
pub async fn update_status(
    RequireOrderManager(manager): RequireOrderManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.payment_status.is_some() {
        return Err(ApiError::bad_request(
            "Payment status is changed through the order's payment",
        ));
    }
    if req.status.is_none() && req.fulfillment_status.is_none() {
        return Err(ApiError::bad_request("No status change requested"));
    }

    let order = state
        .store
        .update_order_status(
            &id,
            &StatusUpdate {
                status: req.status,
                fulfillment_status: req.fulfillment_status,
                note: req.note.filter(|n| !n.trim().is_empty()),
                changed_by: Some(manager.id.clone()),
            },
        )
        .api_err("Order")?;

    tracing::info!(
        user_id = %manager.id,
        order_id = %order.id,
        status = %order.status,
        payment_status = %order.payment_status,
        fulfillment_status = %order.fulfillment_status,
        "Order status updated"
    );
    Ok(Json(ApiResponse::success(order)))
}

pub async fn list_history(
    _manager: RequireOrderManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_order(&id)
        .api_err("Order")?
        .or_not_found("Order not found")?;
    let history = state.store.list_status_history(&id).api_err("Order")?;
    Ok(Json(ApiResponse::success(history)))
}

pub async fn update_payment(
    RequireOrderManager(manager): RequireOrderManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .store
        .update_payment_status(
            &id,
            req.status,
            req.transaction_ref.as_deref().filter(|r| !r.trim().is_empty()),
            Some(&manager.id),
        )
        .api_err("Payment")?;

    tracing::info!(
        user_id = %manager.id,
        payment_id = %payment.id,
        order_id = %payment.order_id,
        status = %payment.status,
        "Payment updated"
    );
    Ok(Json(ApiResponse::success(payment)))
}

/// Ships the whole order. The order must be processing.
pub async fn create_shipment(
    RequireOrderManager(manager): RequireOrderManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateShipmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let carrier = req.carrier.trim().to_string();
    if carrier.is_empty() {
        return Err(ApiError::bad_request("Carrier is required"));
    }

    let now = Utc::now();
    let shipment = state
        .store
        .create_shipment(
            &Shipment {
                id: Uuid::new_v4().to_string(),
                order_id: id,
                carrier,
                tracking_number: req.tracking_number.filter(|t| !t.trim().is_empty()),
                status: ShipmentStatus::InTransit,
                shipped_at: req.shipped_at,
                delivered_at: None,
                created_at: now,
                updated_at: now,
            },
            Some(&manager.id),
        )
        .api_err("Order")?;

    tracing::info!(
        user_id = %manager.id,
        order_id = %shipment.order_id,
        shipment_id = %shipment.id,
        carrier = %shipment.carrier,
        "Order shipped"
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::success(shipment))))
}

pub async fn add_tracking_event(
    RequireOrderManager(manager): RequireOrderManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TrackingEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let shipment = state
        .store
        .add_tracking_event(
            &TrackingEvent {
                id: Uuid::new_v4().to_string(),
                shipment_id: id,
                status: req.status,
                location: req.location,
                description: req.description,
                occurred_at: req.occurred_at.unwrap_or_else(Utc::now),
            },
            Some(&manager.id),
        )
        .api_err("Shipment")?;

    tracing::info!(
        shipment_id = %shipment.id,
        status = %shipment.status,
        "Tracking event recorded"
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::success(shipment))))
}
