//! Display currencies and the fixed USD/IQD exchange rate.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Iraqi dinars per US dollar.
pub const IQD_PER_USD: Decimal = Decimal::from_parts(1320, 0, 0, false, 0);

/// Largest amount accepted for a price or a conversion: one trillion.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "IQD")]
    Iqd,
}

impl Currency {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Iqd => "IQD",
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Currency::Usd => "$",
            Currency::Iqd => "د.ع.",
        }
    }

    #[must_use]
    pub const fn decimal_places(self) -> u32 {
        match self {
            Currency::Usd => 2,
            Currency::Iqd => 0,
        }
    }

    /// Case-insensitive ISO 4217 code lookup.
    pub fn parse(s: &str) -> Option<Currency> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Some(Currency::Usd),
            "IQD" => Some(Currency::Iqd),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Converts `amount` between currencies. No rounding is applied; `None` when the
/// result does not fit in a `Decimal`.
#[must_use]
pub fn convert(amount: Decimal, from: Currency, to: Currency) -> Option<Decimal> {
    match (from, to) {
        (Currency::Usd, Currency::Iqd) => amount.checked_mul(IQD_PER_USD),
        (Currency::Iqd, Currency::Usd) => amount.checked_div(IQD_PER_USD),
        _ => Some(amount),
    }
}

/// Formats a price for display: `$1,234.50` or `260,000 د.ع.`.
#[must_use]
pub fn format_price(amount: Decimal, currency: Currency) -> String {
    let places = currency.decimal_places();
    let rounded = amount.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };

    let digits = format!("{:.*}", places as usize, rounded.abs());
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits.as_str(), None),
    };

    let mut number = group_thousands(whole);
    if let Some(fraction) = fraction {
        number.push('.');
        number.push_str(fraction);
    }

    match currency {
        Currency::Usd => format!("{sign}{}{number}", currency.symbol()),
        Currency::Iqd => format!("{sign}{number} {}", currency.symbol()),
    }
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_convert_iqd_to_usd() {
        assert_eq!(convert(dec!(1320), Currency::Iqd, Currency::Usd), Some(dec!(1)));
    }

    #[test]
    fn test_convert_usd_to_iqd() {
        assert_eq!(convert(dec!(1), Currency::Usd, Currency::Iqd), Some(dec!(1320)));
        assert_eq!(
            convert(dec!(19.99), Currency::Usd, Currency::Iqd),
            Some(dec!(26386.8))
        );
    }

    #[test]
    fn test_convert_same_currency_is_identity() {
        assert_eq!(convert(dec!(42.5), Currency::Usd, Currency::Usd), Some(dec!(42.5)));
        assert_eq!(convert(dec!(1000), Currency::Iqd, Currency::Iqd), Some(dec!(1000)));
    }

    #[test]
    fn test_convert_overflow_is_none() {
        assert_eq!(convert(Decimal::MAX, Currency::Usd, Currency::Iqd), None);
        assert_eq!(convert(Decimal::MIN, Currency::Usd, Currency::Iqd), None);
        assert_eq!(
            convert(Decimal::MAX, Currency::Usd, Currency::Usd),
            Some(Decimal::MAX)
        );
    }

    #[test]
    fn test_max_amount_converts() {
        assert_eq!(MAX_AMOUNT, dec!(1000000000000));
        assert_eq!(
            convert(MAX_AMOUNT, Currency::Usd, Currency::Iqd),
            Some(dec!(1320000000000000))
        );
    }

    #[test]
    fn test_format_iqd() {
        assert_eq!(format_price(dec!(260000), Currency::Iqd), "260,000 د.ع.");
        assert_eq!(format_price(dec!(999.5), Currency::Iqd), "1,000 د.ع.");
        assert_eq!(format_price(dec!(0), Currency::Iqd), "0 د.ع.");
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_price(dec!(196.97), Currency::Usd), "$196.97");
        assert_eq!(format_price(dec!(1234.5), Currency::Usd), "$1,234.50");
        assert_eq!(format_price(dec!(1000000), Currency::Usd), "$1,000,000.00");
        assert_eq!(format_price(dec!(0.005), Currency::Usd), "$0.01");
    }

    #[test]
    fn test_format_negative() {
        assert_eq!(format_price(dec!(-5), Currency::Usd), "-$5.00");
        assert_eq!(format_price(dec!(-1320), Currency::Iqd), "-1,320 د.ع.");
    }

    #[test]
    fn test_parse_currency_code() {
        assert_eq!(Currency::parse("usd"), Some(Currency::Usd));
        assert_eq!(Currency::parse(" IQD "), Some(Currency::Iqd));
        assert_eq!(Currency::parse("EUR"), None);
    }
}
