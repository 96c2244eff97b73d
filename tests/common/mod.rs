#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use chrono::Utc;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use souq::auth::hash_password;
use souq::config::ServerConfig;
use souq::email::{Mailer, OutgoingEmail};
use souq::server::{AppState, create_router};
use souq::store::{SqliteStore, Store};
use souq::types::{Role, User, UserStatus};

pub const PASSWORD: &str = "correct horse battery 9";
pub const BASE_URL: &str = "http://shop.test";

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|h| h.to_str().ok())
    }
}

/// An in-process server over a temporary database. Every request gets its own
/// client address unless the caller sets one, so rate limits only bite in tests
/// that ask for them.
pub struct TestApp {
    _temp_dir: TempDir,
    pub state: Arc<AppState>,
    router: Router,
    next_client: AtomicU32,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_env(&[])
    }

    pub fn with_env(overrides: &[(&str, &str)]) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let db_path = temp_dir.path().join("souq.db");

        let mut env: HashMap<String, String> = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                format!("sqlite://{}", db_path.display()),
            ),
            ("AUTH_SECRET".to_string(), "test-secret".to_string()),
            ("AUTH_BASE_URL".to_string(), BASE_URL.to_string()),
            ("DEFAULT_CURRENCY".to_string(), "USD".to_string()),
        ]);
        for (key, value) in overrides {
            env.insert((*key).to_string(), (*value).to_string());
        }
        let config =
            ServerConfig::from_lookup(|key| env.get(key).cloned()).expect("test config");

        let store = SqliteStore::new(&config.database_path).expect("open store");
        store.initialize().expect("initialize store");

        let mailer = Mailer::outbox(&config.auth.base_url);
        let state = Arc::new(AppState::new(Arc::new(store), config, mailer));
        let router = create_router(state.clone());

        Self {
            _temp_dir: temp_dir,
            state,
            router,
            next_client: AtomicU32::new(1),
        }
    }

    fn client_address(&self) -> String {
        let n = self.next_client.fetch_add(1, Ordering::Relaxed);
        format!("10.{}.{}.{}", (n >> 16) & 0xff, (n >> 8) & 0xff, n & 0xff)
    }

    pub async fn send(&self, mut request: Request<Body>) -> TestResponse {
        if !request.headers().contains_key("x-forwarded-for") {
            let address = self.client_address();
            request
                .headers_mut()
                .insert("x-forwarded-for", address.parse().expect("header value"));
        }

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible router");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("JSON body")
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        self.request_with_headers(method, uri, token, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::PATCH, uri, token, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::PUT, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::DELETE, uri, token, None).await
    }

    /// Inserts an active, verified account straight into the store.
    pub fn create_user(&self, email: &str, role: Role) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: format!("{role} user"),
            phone: None,
            password_hash: hash_password(PASSWORD).expect("hash password"),
            role,
            status: UserStatus::Active,
            email_verified: true,
            created_at: now,
            updated_at: now,
        };
        self.state.store.create_user(&user).expect("create user");
        user
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> String {
        let resp = self
            .post(
                "/api/auth/sign-in",
                None,
                json!({ "email": email, "password": password }),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK, "sign in failed: {}", resp.body);
        resp.data()["token"]
            .as_str()
            .expect("session token")
            .to_string()
    }

    /// Creates a user with `role` and returns a session token for it.
    pub async fn user_token(&self, email: &str, role: Role) -> String {
        self.create_user(email, role);
        self.sign_in(email, PASSWORD).await
    }

    pub fn sent_emails(&self) -> Vec<OutgoingEmail> {
        self.state.mailer.sent()
    }

    /// Creates a brand, a root category with one child, and an active product in
    /// the child category with `stock` tracked units.
    pub async fn seed_catalog(&self, admin: &str, stock: i64) -> SeededCatalog {
        let brand = self
            .post(
                "/api/admin/brands",
                Some(admin),
                json!({ "name": "Acme", "slug": "acme" }),
            )
            .await;
        assert_eq!(brand.status, StatusCode::CREATED, "{}", brand.body);

        let root = self
            .post(
                "/api/admin/categories",
                Some(admin),
                json!({ "name": "Electronics", "slug": "electronics" }),
            )
            .await;
        assert_eq!(root.status, StatusCode::CREATED, "{}", root.body);
        let root_id = root.data()["id"].as_str().expect("root id").to_string();

        let child = self
            .post(
                "/api/admin/categories",
                Some(admin),
                json!({ "name": "Phones", "slug": "phones", "parent_id": root_id }),
            )
            .await;
        assert_eq!(child.status, StatusCode::CREATED, "{}", child.body);

        let product = self
            .post(
                "/api/admin/products",
                Some(admin),
                json!({
                    "brand_id": brand.data()["id"],
                    "category_id": child.data()["id"],
                    "name": "Phone X",
                    "slug": "phone-x",
                    "sku": "PHX-1",
                    "price": "10.00",
                    "status": "active",
                }),
            )
            .await;
        assert_eq!(product.status, StatusCode::CREATED, "{}", product.body);
        let product_id = product.data()["id"].as_str().expect("product id").to_string();

        let inventory = self
            .put(
                &format!("/api/admin/products/{product_id}/inventory"),
                Some(admin),
                json!({ "quantity": stock, "policy": "track" }),
            )
            .await;
        assert_eq!(inventory.status, StatusCode::OK, "{}", inventory.body);

        SeededCatalog {
            brand_id: brand.data()["id"].as_str().expect("brand id").to_string(),
            root_category_id: root_id,
            category_id: child.data()["id"].as_str().expect("category id").to_string(),
            product_id,
        }
    }

    /// `(quantity, reserved)` of the product-level stock row.
    pub fn stock(&self, product_id: &str) -> (i64, i64) {
        let inventory = self
            .state
            .store
            .get_inventory(product_id, None)
            .expect("read inventory")
            .expect("inventory row");
        (inventory.quantity, inventory.reserved)
    }
}

pub struct SeededCatalog {
    pub brand_id: String,
    pub root_category_id: String,
    pub category_id: String,
    pub product_id: String,
}

pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        other => Decimal::from_str(&other.to_string()).expect("decimal number"),
    }
}

/// Pulls the `token` query parameter out of the link in an email body.
pub fn link_token(email: &OutgoingEmail) -> String {
    let start = email.text.find("token=").expect("link with token") + "token=".len();
    let encoded: String = email.text[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '"' && *c != '<')
        .collect();
    urlencoding::decode(&encoded)
        .expect("url-encoded token")
        .into_owned()
}

pub fn shipping_address() -> Value {
    json!({
        "full_name": "Sara Ali",
        "line1": "12 Palestine St",
        "city": "Baghdad",
        "country": "IQ",
    })
}
