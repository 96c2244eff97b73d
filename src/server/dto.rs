use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    Cart, CartLine, Currency, FulfillmentStatus, InventoryPolicy, Order, OrderDetail, OrderStatus,
    PaymentMethod, PaymentStatus, ProductDetail, ProductStatus, ProductSummary, Role,
    ShipmentStatus, ShippingAddress, User, UserStatus, convert, format_price,
};

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CurrencyParams {
    #[serde(default)]
    pub currency: Option<String>,
}

/// Renders base-currency amounts in the caller's display currency.
#[derive(Debug, Clone, Copy)]
pub struct PriceFormatter {
    pub base: Currency,
    pub display: Currency,
}

impl PriceFormatter {
    #[must_use]
    pub fn format(&self, amount: Decimal) -> String {
        self.format_from(amount, self.base)
    }

    /// Formats an amount recorded in `currency` rather than the base currency.
    /// Amounts too large to convert stay in their own currency.
    #[must_use]
    pub fn format_from(&self, amount: Decimal, currency: Currency) -> String {
        match convert(amount, currency, self.display) {
            Some(converted) => format_price(converted, self.display),
            None => format_price(amount, currency),
        }
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenParams {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ProductListParams {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub featured: Option<bool>,
    #[serde(default)]
    pub status: Option<ProductStatus>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub summary: ProductSummary,
    pub formatted_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_compare_at_price: Option<String>,
    pub display_currency: Currency,
}

impl ProductView {
    #[must_use]
    pub fn new(summary: ProductSummary, prices: PriceFormatter) -> Self {
        Self {
            formatted_price: prices.format(summary.product.price),
            formatted_compare_at_price: summary.product.compare_at_price.map(|p| prices.format(p)),
            display_currency: prices.display,
            summary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductDetailView {
    #[serde(flatten)]
    pub detail: ProductDetail,
    pub formatted_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_compare_at_price: Option<String>,
    pub display_currency: Currency,
    /// False only when every tracked stock row is exhausted.
    pub in_stock: bool,
}

impl ProductDetailView {
    #[must_use]
    pub fn new(detail: ProductDetail, prices: PriceFormatter) -> Self {
        let product = &detail.summary.product;
        let in_stock = detail.inventory.is_empty() || detail.inventory.iter().any(|i| i.can_supply(1));
        Self {
            formatted_price: prices.format(product.price),
            formatted_compare_at_price: product.compare_at_price.map(|p| prices.format(p)),
            display_currency: prices.display,
            in_stock,
            detail,
        }
    }
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AddCartItemRequest {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateCartItemRequest {
    pub quantity: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct MergeCartRequest {
    /// Guest cart session; falls back to the `X-Cart-Session` header.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CartLineView {
    #[serde(flatten)]
    pub line: CartLine,
    pub line_total: Decimal,
    pub formatted_unit_price: String,
    pub formatted_line_total: String,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub items: Vec<CartLineView>,
    pub item_count: i64,
    pub subtotal: Decimal,
    pub formatted_subtotal: String,
    pub currency: Currency,
    pub display_currency: Currency,
}

impl CartView {
    #[must_use]
    pub fn new(cart: Option<&Cart>, lines: Vec<CartLine>, prices: PriceFormatter) -> Self {
        let item_count = lines.iter().map(|l| l.item.quantity).sum();
        let subtotal = lines
            .iter()
            .map(CartLine::line_total)
            .fold(Decimal::ZERO, Decimal::saturating_add);
        let items = lines
            .into_iter()
            .map(|line| {
                let line_total = line.line_total();
                CartLineView {
                    formatted_unit_price: prices.format(line.unit_price),
                    formatted_line_total: prices.format(line_total),
                    line_total,
                    line,
                }
            })
            .collect();

        Self {
            id: cart.map(|c| c.id.clone()),
            session_id: cart.and_then(|c| c.session_id.clone()),
            items,
            item_count,
            subtotal,
            formatted_subtotal: prices.format(subtotal),
            currency: prices.base,
            display_currency: prices.display,
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Saved address to ship to. Takes precedence over `shipping_address`.
    #[serde(default)]
    pub address_id: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::CashOnDelivery
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FormattedTotals {
    pub formatted_subtotal: String,
    pub formatted_shipping_amount: String,
    pub formatted_tax_amount: String,
    pub formatted_total: String,
    pub display_currency: Currency,
}

impl FormattedTotals {
    #[must_use]
    pub fn new(order: &Order, prices: PriceFormatter) -> Self {
        let format = |amount| prices.format_from(amount, order.currency);
        Self {
            formatted_subtotal: format(order.subtotal),
            formatted_shipping_amount: format(order.shipping_amount),
            formatted_tax_amount: format(order.tax_amount),
            formatted_total: format(order.total),
            display_currency: prices.display,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    #[serde(flatten)]
    pub formatted: FormattedTotals,
}

impl OrderView {
    #[must_use]
    pub fn new(order: Order, prices: PriceFormatter) -> Self {
        Self {
            formatted: FormattedTotals::new(&order, prices),
            order,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderDetailView {
    #[serde(flatten)]
    pub detail: OrderDetail,
    #[serde(flatten)]
    pub formatted: FormattedTotals,
}

impl OrderDetailView {
    #[must_use]
    pub fn new(detail: OrderDetail, prices: PriceFormatter) -> Self {
        Self {
            formatted: FormattedTotals::new(&detail.order, prices),
            detail,
        }
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    #[serde(default)]
    pub label: Option<String>,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePreferencesRequest {
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub marketing_opt_in: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AddFavoriteRequest {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ConvertParams {
    pub amount: Decimal,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub amount: Decimal,
    pub from: Currency,
    pub to: Currency,
    pub converted: Decimal,
    pub formatted: String,
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub status: Option<UserStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBrandRequest {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBrandRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCategoryRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i32>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MoveCategoryRequest {
    /// New parent; `null` makes the category a root.
    #[serde(default)]
    pub parent_id: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub brand_id: String,
    pub category_id: String,
    pub name: String,
    pub slug: String,
    pub sku: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub compare_at_price: Option<Decimal>,
    #[serde(default = "default_product_status")]
    pub status: ProductStatus,
    #[serde(default)]
    pub is_featured: bool,
}

fn default_product_status() -> ProductStatus {
    ProductStatus::Draft
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub compare_at_price: Option<Decimal>,
    #[serde(default)]
    pub status: Option<ProductStatus>,
    #[serde(default)]
    pub is_featured: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminProductParams {
    #[serde(default)]
    pub status: Option<ProductStatus>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddImageRequest {
    pub url: String,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub position: i32,
}

#[derive(Debug, Deserialize)]
pub struct SpecificationInput {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct SetSpecificationsRequest {
    pub specifications: Vec<SpecificationInput>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVariantRequest {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SetInventoryRequest {
    #[serde(default)]
    pub variant_id: Option<String>,
    pub quantity: i64,
    #[serde(default = "default_inventory_policy")]
    pub policy: InventoryPolicy,
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i64,
}

fn default_inventory_policy() -> InventoryPolicy {
    InventoryPolicy::Track
}

fn default_low_stock_threshold() -> i64 {
    5
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderListParams {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateOrderStatusRequest {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default)]
    pub fulfillment_status: Option<FulfillmentStatus>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentRequest {
    pub status: PaymentStatus,
    #[serde(default)]
    pub transaction_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateShipmentRequest {
    pub carrier: String,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub shipped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TrackingEventRequest {
    pub status: ShipmentStatus,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_price_formatter_converts_from_base() {
        let prices = PriceFormatter {
            base: Currency::Usd,
            display: Currency::Iqd,
        };
        assert_eq!(prices.format(dec!(196.97)), "260,000 د.ع.");
        assert_eq!(prices.format_from(dec!(1320), Currency::Iqd), "1,320 د.ع.");

        let usd = PriceFormatter {
            base: Currency::Usd,
            display: Currency::Usd,
        };
        assert_eq!(usd.format(dec!(1234.5)), "$1,234.50");
    }

    #[test]
    fn test_price_formatter_keeps_unconvertible_amounts() {
        let prices = PriceFormatter {
            base: Currency::Usd,
            display: Currency::Iqd,
        };
        assert_eq!(
            prices.format(Decimal::MAX),
            format_price(Decimal::MAX, Currency::Usd)
        );
    }

    #[test]
    fn test_checkout_request_defaults() {
        let req: CheckoutRequest = serde_json::from_str(r#"{"address_id":"a1"}"#).unwrap();
        assert_eq!(req.payment_method, PaymentMethod::CashOnDelivery);
        assert!(req.shipping_address.is_none());
    }

    #[test]
    fn test_add_cart_item_defaults_to_one() {
        let req: AddCartItemRequest = serde_json::from_str(r#"{"product_id":"p1"}"#).unwrap();
        assert_eq!(req.quantity, 1);
    }
}
