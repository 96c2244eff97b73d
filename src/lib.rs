//! # Souq
//!
//! A storefront and admin API server, usable both as a standalone binary and as a
//! library: catalog, guest and signed-in carts, checkout with atomic stock
//! reservation, order lifecycle, payments and shipment tracking.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! souq = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use souq::config::ServerConfig;
//! use souq::email::Mailer;
//! use souq::server::{AppState, create_router};
//! use souq::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::from_env().unwrap();
//! let store = SqliteStore::new(&config.database_path).unwrap();
//! store.initialize().unwrap();
//!
//! let mailer = Mailer::from_config(&config).unwrap();
//! let state = Arc::new(AppState::new(Arc::new(store), config, mailer));
//! let router = create_router(state);
//! // Serve with axum, using `into_make_service_with_connect_info::<SocketAddr>()`
//! // so rate limiting can see client addresses.
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `souq` binary. Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod ratelimit;
pub mod server;
pub mod store;
pub mod types;
