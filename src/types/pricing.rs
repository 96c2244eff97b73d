use rust_decimal::Decimal;
use serde::Serialize;

/// A cart line priced at checkout time.
#[derive(Debug, Clone, Serialize)]
pub struct PricedLine {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: i64,
}

impl PricedLine {
    /// `None` when the product does not fit in a `Decimal`.
    #[must_use]
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Sums the lines and applies a flat shipping fee and a tax rate on the subtotal.
/// An empty order is free of shipping. Returns `None` if any step overflows.
#[must_use]
pub fn compute_totals(
    lines: &[PricedLine],
    shipping_flat: Decimal,
    tax_rate: Decimal,
) -> Option<Totals> {
    let mut subtotal = Decimal::ZERO;
    for line in lines {
        subtotal = subtotal.checked_add(line.line_total()?)?;
    }
    let shipping = if lines.is_empty() {
        Decimal::ZERO
    } else {
        shipping_flat
    };
    let tax = subtotal.checked_mul(tax_rate)?.round_dp(2);

    Some(Totals {
        subtotal,
        shipping,
        tax,
        total: subtotal.checked_add(shipping)?.checked_add(tax)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(price: Decimal, quantity: i64) -> PricedLine {
        PricedLine {
            product_id: "p".to_string(),
            variant_id: None,
            name: "Widget".to_string(),
            sku: "W-1".to_string(),
            unit_price: price,
            quantity,
        }
    }

    #[test]
    fn test_totals_with_shipping_and_tax() {
        let totals = compute_totals(
            &[line(dec!(10.00), 2), line(dec!(5.50), 1)],
            dec!(4.00),
            dec!(0.10),
        )
        .unwrap();
        assert_eq!(totals.subtotal, dec!(25.50));
        assert_eq!(totals.shipping, dec!(4.00));
        assert_eq!(totals.tax, dec!(2.55));
        assert_eq!(totals.total, dec!(32.05));
    }

    #[test]
    fn test_empty_order_has_no_shipping() {
        let totals = compute_totals(&[], dec!(4.00), dec!(0.10)).unwrap();
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn test_overflowing_totals_are_rejected() {
        let huge = line(Decimal::MAX, 2);
        assert_eq!(huge.line_total(), None);
        assert!(compute_totals(&[huge], dec!(4.00), dec!(0.10)).is_none());

        let single = line(Decimal::MAX, 1);
        assert!(compute_totals(&[single.clone(), single], Decimal::ZERO, Decimal::ZERO).is_none());
        assert!(compute_totals(&[line(dec!(10), 1)], Decimal::ZERO, Decimal::MAX).is_none());
    }
}
