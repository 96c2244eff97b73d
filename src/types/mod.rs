/// Declares a fieldless enum stored as snake_case text, with `as_str`, `parse`,
/// `Display` and serde support.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<$name> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

mod currency;
mod models;
mod pricing;
mod role;
mod status;

pub use currency::{Currency, IQD_PER_USD, MAX_AMOUNT, convert, format_price};
pub use models::*;
pub use pricing::{PricedLine, Totals, compute_totals};
pub use role::{Role, UserStatus};
pub use status::{
    FulfillmentStatus, InventoryEffect, InventoryPolicy, Lifecycle, OrderStatus, PaymentMethod,
    PaymentStatus, ProductStatus, ShipmentStatus, VerificationKind,
};
