mod catalog;
mod orders;
mod users;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};

use crate::server::AppState;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        // Users (admin only)
        .route("/users", get(users::list_users))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}", patch(users::update_user))
        .route("/users/{id}", delete(users::delete_user))
        // Brands
        .route("/brands", get(catalog::list_brands))
        .route("/brands", post(catalog::create_brand))
        .route("/brands/{id}", patch(catalog::update_brand))
        .route("/brands/{id}", delete(catalog::delete_brand))
        // Categories (tree)
        .route("/categories", get(catalog::list_categories))
        .route("/categories", post(catalog::create_category))
        .route("/categories/{id}", patch(catalog::update_category))
        .route("/categories/{id}", delete(catalog::delete_category))
        .route("/categories/{id}/move", post(catalog::move_category))
        // Products and their children
        .route("/products", get(catalog::list_products))
        .route("/products", post(catalog::create_product))
        .route("/products/{id}", get(catalog::get_product))
        .route("/products/{id}", patch(catalog::update_product))
        .route("/products/{id}", delete(catalog::delete_product))
        .route("/products/{id}/images", post(catalog::add_image))
        .route(
            "/products/{id}/images/{image_id}",
            delete(catalog::delete_image),
        )
        .route(
            "/products/{id}/specifications",
            put(catalog::set_specifications),
        )
        .route("/products/{id}/variants", post(catalog::create_variant))
        .route(
            "/products/{id}/variants/{variant_id}",
            delete(catalog::delete_variant),
        )
        .route("/products/{id}/inventory", put(catalog::set_inventory))
        .route("/inventory/low-stock", get(catalog::list_low_stock))
        // Orders, payments and shipments
        .route("/orders", get(orders::list_orders))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/status", patch(orders::update_status))
        .route("/orders/{id}/history", get(orders::list_history))
        .route("/orders/{id}/shipments", post(orders::create_shipment))
        .route("/payments/{id}", patch(orders::update_payment))
        .route(
            "/shipments/{id}/events",
            post(orders::add_tracking_event),
        )
}
