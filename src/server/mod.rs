mod admin;
mod auth;
pub mod dto;
pub mod response;
mod router;
mod storefront;
pub mod validation;

pub use admin::admin_router;
pub use auth::auth_router;
pub use router::{AppState, CART_SESSION_HEADER, create_router};
pub use storefront::storefront_router;
