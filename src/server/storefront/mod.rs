mod account;
mod cart;
mod catalog;
mod currency;
mod favorites;
mod orders;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post},
};

use crate::server::AppState;

pub(crate) use currency::resolve_prices;

pub fn storefront_router() -> Router<Arc<AppState>> {
    Router::new()
        // Catalog
        .route("/products", get(catalog::list_products))
        .route("/products/{slug}", get(catalog::get_product))
        .route("/categories", get(catalog::list_categories))
        .route("/categories/{slug}", get(catalog::get_category))
        .route("/brands", get(catalog::list_brands))
        .route("/brands/{slug}", get(catalog::get_brand))
        // Cart (guest or signed in)
        .route("/cart", get(cart::get_cart))
        .route("/cart", delete(cart::clear_cart))
        .route("/cart/items", post(cart::add_item))
        .route("/cart/items/{id}", patch(cart::update_item))
        .route("/cart/items/{id}", delete(cart::remove_item))
        .route("/cart/merge", post(cart::merge_cart))
        // Orders
        .route("/orders", post(orders::checkout))
        .route("/orders", get(orders::list_orders))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/cancel", post(orders::cancel_order))
        .route("/orders/{id}/shipments", get(orders::list_order_shipments))
        // Favorites
        .route("/favorites", get(favorites::list_favorites))
        .route("/favorites", post(favorites::add_favorite))
        .route("/favorites/{id}", delete(favorites::delete_favorite))
        // Account
        .route("/account", get(account::get_account))
        .route("/account", patch(account::update_account))
        .route("/account/change-password", post(account::change_password))
        .route("/account/addresses", get(account::list_addresses))
        .route("/account/addresses", post(account::create_address))
        .route("/account/addresses/{id}", patch(account::update_address))
        .route("/account/addresses/{id}", delete(account::delete_address))
        .route("/account/preferences", get(account::get_preferences))
        .route("/account/preferences", patch(account::update_preferences))
        // Currency
        .route("/currency/convert", get(currency::convert_amount))
}
