use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    Currency, FulfillmentStatus, InventoryPolicy, OrderStatus, PaymentMethod, PaymentStatus,
    ProductStatus, Role, ShipmentStatus, UserStatus, VerificationKind,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_lookup: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub id: String,
    pub user_id: String,
    pub kind: VerificationKind,
    pub token_digest: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    pub country: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Address copied onto an order, independent of later address book edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    pub country: String,
}

impl From<&Address> for ShippingAddress {
    fn from(address: &Address) -> Self {
        Self {
            full_name: address.full_name.clone(),
            phone: address.phone.clone(),
            line1: address.line1.clone(),
            line2: address.line2.clone(),
            city: address.city.clone(),
            region: address.region.clone(),
            postal_code: address.postal_code.clone(),
            country: address.country.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub user_id: String,
    pub currency: Currency,
    pub locale: String,
    pub marketing_opt_in: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brand {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Depth in the tree; roots are level 0.
    pub level: i32,
    /// Ancestor ids, root first. Empty for roots.
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub sort_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    /// Level and path a direct child of this category gets.
    #[must_use]
    pub fn child_position(&self) -> (i32, Vec<String>) {
        let mut path = self.path.clone();
        path.push(self.id.clone());
        (self.level + 1, path)
    }

    #[must_use]
    pub fn is_ancestor_of(&self, other: &Category) -> bool {
        other.path.iter().any(|id| id == &self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub brand_id: String,
    pub category_id: String,
    pub name: String,
    pub slug: String,
    pub sku: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_at_price: Option<Decimal>,
    pub status: ProductStatus,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductImage {
    pub id: String,
    pub product_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specification {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub value: String,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub product_id: String,
    pub sku: String,
    pub name: String,
    /// Overrides the product price when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub options: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    pub id: String,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub reserved: i64,
    pub policy: InventoryPolicy,
    pub low_stock_threshold: i64,
    pub updated_at: DateTime<Utc>,
}

impl Inventory {
    #[must_use]
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    /// Whether `requested` more units can be promised to a buyer.
    #[must_use]
    pub fn can_supply(&self, requested: i64) -> bool {
        match self.policy {
            InventoryPolicy::NoTrack | InventoryPolicy::TrackButAllowOversell => true,
            InventoryPolicy::Track => self.available() >= requested,
        }
    }

    #[must_use]
    pub fn is_low_stock(&self) -> bool {
        self.policy != InventoryPolicy::NoTrack && self.available() <= self.low_stock_threshold
    }
}

/// A product with its brand and category resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ProductSummary {
    #[serde(flatten)]
    pub product: Product,
    pub brand: Brand,
    pub category: Category,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub summary: ProductSummary,
    pub images: Vec<ProductImage>,
    pub specifications: Vec<Specification>,
    pub variants: Vec<Variant>,
    pub inventory: Vec<Inventory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upper bound on the quantity of a single cart line.
pub const MAX_LINE_QUANTITY: i64 = 99;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub cart_id: String,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart item joined with the current catalog data needed to price it.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    #[serde(flatten)]
    pub item: CartItem,
    pub product_name: String,
    pub product_slug: String,
    pub product_status: ProductStatus,
    pub sku: String,
    pub unit_price: Decimal,
}

impl CartLine {
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price
            .saturating_mul(Decimal::from(self.item.quantity))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub currency: Currency,
    pub subtotal: Decimal,
    pub shipping_amount: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub shipping_address: ShippingAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    /// NULL once the product has been removed from the catalog.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub product_name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: i64,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItemDetail {
    #[serde(flatten)]
    pub item: OrderItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: String,
    pub order_id: String,
    pub carrier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    pub status: ShipmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: String,
    pub shipment_id: String,
    pub status: ShipmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipmentWithEvents {
    #[serde(flatten)]
    pub shipment: Shipment,
    pub events: Vec<TrackingEvent>,
}

/// One row of an order's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: String,
    pub order_id: String,
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<String>,
    pub to_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItemDetail>,
    pub payments: Vec<Payment>,
    pub shipments: Vec<ShipmentWithEvents>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory(quantity: i64, reserved: i64, policy: InventoryPolicy) -> Inventory {
        Inventory {
            id: "inv".to_string(),
            product_id: "p".to_string(),
            variant_id: None,
            quantity,
            reserved,
            policy,
            low_stock_threshold: 2,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_inventory_availability() {
        let inv = inventory(10, 7, InventoryPolicy::Track);
        assert_eq!(inv.available(), 3);
        assert!(inv.can_supply(3));
        assert!(!inv.can_supply(4));
        assert!(!inv.is_low_stock());
    }

    #[test]
    fn test_oversell_policies_always_supply() {
        assert!(inventory(0, 0, InventoryPolicy::TrackButAllowOversell).can_supply(5));
        assert!(inventory(0, 0, InventoryPolicy::NoTrack).can_supply(5));
        assert!(!inventory(0, 0, InventoryPolicy::NoTrack).is_low_stock());
    }

    #[test]
    fn test_category_child_position() {
        let now = Utc::now();
        let root = Category {
            id: "root".to_string(),
            name: "Electronics".to_string(),
            slug: "electronics".to_string(),
            parent_id: None,
            level: 0,
            path: vec![],
            description: None,
            sort_order: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let (level, path) = root.child_position();
        assert_eq!(level, 1);
        assert_eq!(path, vec!["root".to_string()]);

        let child = Category {
            id: "phones".to_string(),
            parent_id: Some("root".to_string()),
            level,
            path,
            ..root.clone()
        };
        assert!(root.is_ancestor_of(&child));
        assert!(!child.is_ancestor_of(&root));
    }
}
