use std::fmt;

use crate::error::{Error, Result};

/// A status column with an explicit allowed-transitions table.
pub trait Lifecycle: Copy + Eq + fmt::Display + 'static {
    /// Column name reported when a transition is rejected.
    const FIELD: &'static str;

    fn allowed_next(self) -> &'static [Self];

    fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next().contains(&next)
    }

    fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Returns `next` if the move is allowed, otherwise `Error::InvalidTransition`.
    fn transition(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                field: Self::FIELD,
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

text_enum! {
    pub enum OrderStatus {
        Pending => "pending",
        Paid => "paid",
        Processing => "processing",
        Shipped => "shipped",
        Delivered => "delivered",
        Cancelled => "cancelled",
        Refunded => "refunded",
    }
}

impl Lifecycle for OrderStatus {
    const FIELD: &'static str = "status";

    fn allowed_next(self) -> &'static [Self] {
        use OrderStatus::*;
        match self {
            Pending => &[Paid, Processing, Cancelled],
            Paid => &[Processing, Cancelled, Refunded],
            Processing => &[Shipped, Cancelled, Refunded],
            Shipped => &[Delivered],
            Delivered => &[Refunded],
            Cancelled | Refunded => &[],
        }
    }
}

/// What a status change does to the order's stock reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryEffect {
    None,
    /// Give reserved units back to the available pool.
    Release,
    /// Units left the warehouse: decrement both on-hand and reserved.
    Commit,
}

impl OrderStatus {
    /// Reservations are outstanding while the order has not shipped.
    #[must_use]
    pub const fn holds_reservation(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Paid | OrderStatus::Processing
        )
    }

    #[must_use]
    pub fn inventory_effect(from: OrderStatus, to: OrderStatus) -> InventoryEffect {
        match to {
            OrderStatus::Shipped if from.holds_reservation() => InventoryEffect::Commit,
            OrderStatus::Cancelled | OrderStatus::Refunded if from.holds_reservation() => {
                InventoryEffect::Release
            }
            _ => InventoryEffect::None,
        }
    }

    /// Customers may cancel their own order until it is being prepared.
    pub const CUSTOMER_CANCELLABLE: &'static [OrderStatus] = &[OrderStatus::Pending, OrderStatus::Paid];

    #[must_use]
    pub fn customer_cancellable(self) -> bool {
        Self::CUSTOMER_CANCELLABLE.contains(&self)
    }
}

text_enum! {
    pub enum PaymentStatus {
        Pending => "pending",
        Authorized => "authorized",
        Paid => "paid",
        Failed => "failed",
        PartiallyRefunded => "partially_refunded",
        Refunded => "refunded",
        Cancelled => "cancelled",
    }
}

impl Lifecycle for PaymentStatus {
    const FIELD: &'static str = "payment_status";

    fn allowed_next(self) -> &'static [Self] {
        use PaymentStatus::*;
        match self {
            Pending => &[Authorized, Paid, Failed, Cancelled],
            Authorized => &[Paid, Failed, Cancelled],
            Failed => &[Pending],
            Paid => &[PartiallyRefunded, Refunded],
            PartiallyRefunded => &[Refunded],
            Refunded | Cancelled => &[],
        }
    }
}

text_enum! {
    pub enum FulfillmentStatus {
        Unfulfilled => "unfulfilled",
        PartiallyFulfilled => "partially_fulfilled",
        Fulfilled => "fulfilled",
        Returned => "returned",
    }
}

impl Lifecycle for FulfillmentStatus {
    const FIELD: &'static str = "fulfillment_status";

    fn allowed_next(self) -> &'static [Self] {
        use FulfillmentStatus::*;
        match self {
            Unfulfilled => &[PartiallyFulfilled, Fulfilled],
            PartiallyFulfilled => &[Fulfilled],
            Fulfilled => &[Returned],
            Returned => &[],
        }
    }
}

text_enum! {
    pub enum ShipmentStatus {
        Pending => "pending",
        InTransit => "in_transit",
        OutForDelivery => "out_for_delivery",
        Delivered => "delivered",
        Failed => "failed",
    }
}

impl Lifecycle for ShipmentStatus {
    const FIELD: &'static str = "shipment_status";

    fn allowed_next(self) -> &'static [Self] {
        use ShipmentStatus::*;
        match self {
            Pending => &[InTransit, Failed],
            InTransit => &[InTransit, OutForDelivery, Delivered, Failed],
            OutForDelivery => &[InTransit, Delivered, Failed],
            Delivered | Failed => &[],
        }
    }
}

text_enum! {
    pub enum ProductStatus {
        Draft => "draft",
        Active => "active",
        Archived => "archived",
    }
}

text_enum! {
    pub enum InventoryPolicy {
        Track => "track",
        NoTrack => "no_track",
        TrackButAllowOversell => "track_but_allow_oversell",
    }
}

text_enum! {
    pub enum PaymentMethod {
        CashOnDelivery => "cash_on_delivery",
        Card => "card",
        BankTransfer => "bank_transfer",
        Wallet => "wallet",
    }
}

text_enum! {
    pub enum VerificationKind {
        EmailVerification => "email_verification",
        PasswordReset => "password_reset",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_happy_path() {
        let status = OrderStatus::Pending;
        let status = status.transition(OrderStatus::Paid).unwrap();
        let status = status.transition(OrderStatus::Processing).unwrap();
        let status = status.transition(OrderStatus::Shipped).unwrap();
        let status = status.transition(OrderStatus::Delivered).unwrap();
        assert_eq!(status, OrderStatus::Delivered);
    }

    #[test]
    fn test_cancelled_order_cannot_be_paid() {
        let result = OrderStatus::Cancelled.transition(OrderStatus::Paid);
        match result {
            Err(Error::InvalidTransition { field, from, to }) => {
                assert_eq!(field, "status");
                assert_eq!(from, "cancelled");
                assert_eq!(to, "paid");
            }
            other => panic!("expected invalid transition, got {other:?}"),
        }
    }

    #[test]
    fn test_same_state_is_rejected() {
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Paid));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Paid));
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Refunded.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(FulfillmentStatus::Returned.is_terminal());
        assert!(!OrderStatus::Delivered.is_terminal());
    }

    #[test]
    fn test_payment_retry_after_failure() {
        assert!(PaymentStatus::Failed.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Paid));
    }

    #[test]
    fn test_inventory_effects() {
        assert_eq!(
            OrderStatus::inventory_effect(OrderStatus::Pending, OrderStatus::Cancelled),
            InventoryEffect::Release
        );
        assert_eq!(
            OrderStatus::inventory_effect(OrderStatus::Processing, OrderStatus::Shipped),
            InventoryEffect::Commit
        );
        assert_eq!(
            OrderStatus::inventory_effect(OrderStatus::Delivered, OrderStatus::Refunded),
            InventoryEffect::None
        );
        assert_eq!(
            OrderStatus::inventory_effect(OrderStatus::Pending, OrderStatus::Paid),
            InventoryEffect::None
        );
    }

    #[test]
    fn test_text_round_trip_for_stored_values() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(*status));
        }
        assert_eq!(
            InventoryPolicy::parse("track_but_allow_oversell"),
            Some(InventoryPolicy::TrackButAllowOversell)
        );
        assert_eq!(PaymentMethod::parse("cheque"), None);
    }
}
