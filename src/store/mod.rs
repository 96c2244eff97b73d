mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::*;

/// Narrows a product listing. Category matches include every descendant category.
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub category_id: Option<String>,
    pub brand_id: Option<String>,
    /// Case-insensitive substring of name or SKU.
    pub search: Option<String>,
    pub featured: Option<bool>,
    pub status: Option<ProductStatus>,
}

/// Everything checkout needs besides the cart contents, which are read inside the
/// order transaction.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub id: String,
    pub order_number: String,
    pub user_id: String,
    pub cart_id: String,
    pub currency: Currency,
    pub shipping_address: ShippingAddress,
    pub notes: Option<String>,
    pub payment_method: PaymentMethod,
    pub shipping_flat_rate: Decimal,
    pub tax_rate: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A requested change to an order's status or fulfilment status. The payment
/// status column follows the order's payments and is not set directly.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub status: Option<OrderStatus>,
    pub fulfillment_status: Option<FulfillmentStatus>,
    pub note: Option<String>,
    pub changed_by: Option<String>,
}

pub trait UserStore: Send + Sync {
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn delete_user(&self, id: &str) -> Result<bool>;
    /// Replaces the password hash and optionally revokes every session of the user.
    fn set_password(&self, user_id: &str, password_hash: &str, revoke_sessions: bool)
    -> Result<()>;
    /// Marks the email verified and activates a pending account.
    fn mark_email_verified(&self, user_id: &str) -> Result<()>;

    // Sessions
    fn create_session(&self, session: &Session) -> Result<()>;
    fn get_session_by_lookup(&self, lookup: &str) -> Result<Option<Session>>;
    fn list_user_sessions(&self, user_id: &str) -> Result<Vec<Session>>;
    fn touch_session(&self, id: &str) -> Result<()>;
    fn delete_session(&self, id: &str) -> Result<bool>;
    fn delete_expired_sessions(&self) -> Result<usize>;

    // One-time verification tokens
    fn create_verification(&self, verification: &Verification) -> Result<()>;
    /// Marks a live, unconsumed token as used and returns it. Each token can be
    /// consumed at most once.
    fn consume_verification(
        &self,
        token_digest: &str,
        kind: VerificationKind,
    ) -> Result<Option<Verification>>;
    fn delete_verifications(&self, user_id: &str, kind: VerificationKind) -> Result<usize>;

    // Address book
    fn create_address(&self, address: &Address) -> Result<()>;
    fn get_address(&self, id: &str) -> Result<Option<Address>>;
    fn list_addresses(&self, user_id: &str) -> Result<Vec<Address>>;
    fn update_address(&self, address: &Address) -> Result<()>;
    fn delete_address(&self, id: &str) -> Result<bool>;

    // Preferences
    fn get_preferences(&self, user_id: &str) -> Result<Option<Preferences>>;
    fn upsert_preferences(&self, prefs: &Preferences) -> Result<()>;

    // Favorites
    fn add_favorite(&self, favorite: &Favorite) -> Result<()>;
    fn list_favorites(&self, user_id: &str) -> Result<Vec<Favorite>>;
    fn delete_favorite(&self, user_id: &str, id: &str) -> Result<bool>;
}

pub trait CatalogStore: Send + Sync {
    // Brands
    fn create_brand(&self, brand: &Brand) -> Result<()>;
    fn get_brand(&self, id: &str) -> Result<Option<Brand>>;
    fn get_brand_by_slug(&self, slug: &str) -> Result<Option<Brand>>;
    fn list_brands(&self, include_inactive: bool) -> Result<Vec<Brand>>;
    fn update_brand(&self, brand: &Brand) -> Result<()>;
    fn delete_brand(&self, id: &str) -> Result<bool>;

    // Categories (materialized path tree)
    fn create_category(&self, category: &Category) -> Result<()>;
    fn get_category(&self, id: &str) -> Result<Option<Category>>;
    fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>>;
    fn list_categories(&self, include_inactive: bool) -> Result<Vec<Category>>;
    fn update_category(&self, category: &Category) -> Result<()>;
    /// Re-parents a category and rewrites level/path for its whole subtree.
    fn move_category(&self, id: &str, new_parent_id: Option<&str>) -> Result<Category>;
    fn delete_category(&self, id: &str) -> Result<bool>;

    // Products
    fn create_product(&self, product: &Product) -> Result<()>;
    fn get_product(&self, id: &str) -> Result<Option<Product>>;
    fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>>;
    fn list_products(&self, filter: &ProductFilter, cursor: &str, limit: i32)
    -> Result<Vec<Product>>;
    fn update_product(&self, product: &Product) -> Result<()>;
    fn delete_product(&self, id: &str) -> Result<bool>;
    fn get_product_summary(&self, id: &str) -> Result<Option<ProductSummary>>;
    fn get_product_detail(&self, id: &str) -> Result<Option<ProductDetail>>;

    // Product children
    fn add_product_image(&self, image: &ProductImage) -> Result<()>;
    fn list_product_images(&self, product_id: &str) -> Result<Vec<ProductImage>>;
    fn delete_product_image(&self, product_id: &str, image_id: &str) -> Result<bool>;
    fn set_product_specifications(&self, product_id: &str, specs: &[Specification])
    -> Result<()>;
    fn create_variant(&self, variant: &Variant) -> Result<()>;
    fn get_variant(&self, id: &str) -> Result<Option<Variant>>;
    fn list_variants(&self, product_id: &str) -> Result<Vec<Variant>>;
    fn delete_variant(&self, id: &str) -> Result<bool>;

    // Inventory
    fn upsert_inventory(&self, inventory: &Inventory) -> Result<Inventory>;
    fn get_inventory(&self, product_id: &str, variant_id: Option<&str>)
    -> Result<Option<Inventory>>;
    fn list_low_stock(&self) -> Result<Vec<Inventory>>;
}

pub trait CartStore: Send + Sync {
    fn create_cart(&self, cart: &Cart) -> Result<()>;
    fn get_cart(&self, id: &str) -> Result<Option<Cart>>;
    fn get_cart_for_user(&self, user_id: &str) -> Result<Option<Cart>>;
    fn get_cart_for_session(&self, session_id: &str) -> Result<Option<Cart>>;
    fn delete_cart(&self, id: &str) -> Result<bool>;
    fn list_cart_lines(&self, cart_id: &str) -> Result<Vec<CartLine>>;
    /// Adds a line, or increases the quantity of the existing (product, variant) line.
    fn add_cart_item(&self, item: &CartItem) -> Result<CartItem>;
    fn get_cart_item(&self, id: &str) -> Result<Option<CartItem>>;
    fn set_cart_item_quantity(&self, id: &str, quantity: i64) -> Result<()>;
    fn remove_cart_item(&self, id: &str) -> Result<bool>;
    fn clear_cart(&self, cart_id: &str) -> Result<usize>;
    /// Moves every line of `from_cart_id` into `into_cart_id`, summing quantities,
    /// then deletes the source cart.
    fn merge_carts(&self, from_cart_id: &str, into_cart_id: &str) -> Result<()>;
}

pub trait OrderStore: Send + Sync {
    /// Prices the cart, reserves stock, writes the order and empties the cart in a
    /// single transaction.
    fn place_order(&self, draft: &OrderDraft) -> Result<Order>;
    fn get_order(&self, id: &str) -> Result<Option<Order>>;
    fn get_order_detail(&self, id: &str) -> Result<Option<OrderDetail>>;
    fn list_user_orders(&self, user_id: &str, cursor: &str, limit: i32) -> Result<Vec<Order>>;
    fn list_orders(
        &self,
        status: Option<OrderStatus>,
        cursor: &str,
        limit: i32,
    ) -> Result<Vec<Order>>;
    fn list_order_items(&self, order_id: &str) -> Result<Vec<OrderItem>>;
    /// Applies status changes through their transition tables, records history and
    /// adjusts stock reservations. Cancelling also voids unsettled payments.
    fn update_order_status(&self, order_id: &str, update: &StatusUpdate) -> Result<Order>;
    /// Cancels an order currently in one of `allowed_from`, releasing its stock and
    /// voiding unsettled payments in one transaction.
    fn cancel_order(
        &self,
        order_id: &str,
        allowed_from: &[OrderStatus],
        note: Option<&str>,
        changed_by: Option<&str>,
    ) -> Result<Order>;
    fn list_status_history(&self, order_id: &str) -> Result<Vec<StatusChange>>;

    fn get_payment(&self, id: &str) -> Result<Option<Payment>>;
    fn list_payments(&self, order_id: &str) -> Result<Vec<Payment>>;
    /// Moves a payment to `status` and mirrors it onto the order's payment status,
    /// subject to the transition tables of both.
    fn update_payment_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        transaction_ref: Option<&str>,
        changed_by: Option<&str>,
    ) -> Result<Payment>;

    /// Records a shipment for the whole order, marking it shipped and fulfilled.
    fn create_shipment(&self, shipment: &Shipment, changed_by: Option<&str>) -> Result<Shipment>;
    fn get_shipment(&self, id: &str) -> Result<Option<Shipment>>;
    fn list_shipments(&self, order_id: &str) -> Result<Vec<ShipmentWithEvents>>;
    /// Appends a tracking event; a delivered event also delivers the order.
    fn add_tracking_event(&self, event: &TrackingEvent, changed_by: Option<&str>)
    -> Result<Shipment>;
}

/// Store defines the database interface.
pub trait Store: UserStore + CatalogStore + CartStore + OrderStore {
    /// Creates or upgrades the schema.
    fn initialize(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}
