use rust_decimal::Decimal;

use crate::server::response::ApiError;
use crate::types::{MAX_AMOUNT, MAX_LINE_QUANTITY};

const MAX_SLUG_LEN: usize = 100;
const MAX_NAME_LEN: usize = 200;
const MAX_EMAIL_LEN: usize = 254;

fn is_valid_slug_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}

pub fn validate_slug(slug: &str, entity: &str) -> Result<(), ApiError> {
    if slug.is_empty() {
        return Err(ApiError::bad_request(format!("{entity} slug cannot be empty")));
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(ApiError::bad_request(format!(
            "{entity} slug cannot exceed {MAX_SLUG_LEN} characters"
        )));
    }
    if !slug.chars().all(is_valid_slug_char) {
        return Err(ApiError::bad_request(format!(
            "{entity} slug can only contain lowercase letters, digits, and hyphens"
        )));
    }
    if slug.starts_with('-') || slug.ends_with('-') || slug.contains("--") {
        return Err(ApiError::bad_request(format!(
            "{entity} slug cannot start or end with a hyphen or repeat hyphens"
        )));
    }
    Ok(())
}

/// Trims a display name and checks its length.
pub fn validate_name(name: &str, entity: &str) -> Result<String, ApiError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(format!("{entity} name cannot be empty")));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "{entity} name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Case-folds an email address after a structural check.
pub fn normalize_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_lowercase();
    let valid = email.len() <= MAX_EMAIL_LEN
        && !email.chars().any(char::is_whitespace)
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        });
    if !valid {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    Ok(email)
}

pub fn validate_quantity(quantity: i64) -> Result<(), ApiError> {
    if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(ApiError::bad_request(format!(
            "Quantity must be between 1 and {MAX_LINE_QUANTITY}"
        )));
    }
    Ok(())
}

pub fn validate_price(price: Decimal, field: &str) -> Result<(), ApiError> {
    if price.is_sign_negative() {
        return Err(ApiError::bad_request(format!("{field} cannot be negative")));
    }
    if price > MAX_AMOUNT {
        return Err(ApiError::bad_request(format!(
            "{field} cannot exceed {MAX_AMOUNT}"
        )));
    }
    Ok(())
}

/// Bounds a free-form amount, such as one to convert, to +/- `MAX_AMOUNT`.
pub fn validate_amount(amount: Decimal) -> Result<(), ApiError> {
    if amount.abs() > MAX_AMOUNT {
        return Err(ApiError::bad_request(format!(
            "Amount must be between -{MAX_AMOUNT} and {MAX_AMOUNT}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_slugs() {
        assert!(validate_slug("iphone-15-pro", "Product").is_ok());
        assert!(validate_slug("", "Product").is_err());
        assert!(validate_slug("Phones", "Category").is_err());
        assert!(validate_slug("-phones", "Category").is_err());
        assert!(validate_slug("phones--cases", "Category").is_err());
        assert!(validate_slug(&"a".repeat(101), "Brand").is_err());
    }

    #[test]
    fn test_emails() {
        assert_eq!(
            normalize_email("  Buyer@Example.COM ").unwrap(),
            "buyer@example.com"
        );
        assert!(normalize_email("no-at-sign.com").is_err());
        assert!(normalize_email("a@b@c.com").is_err());
        assert!(normalize_email("a b@c.com").is_err());
        assert!(normalize_email("a@localhost").is_err());
    }

    #[test]
    fn test_names_are_trimmed() {
        assert_eq!(validate_name("  Acme ", "Brand").unwrap(), "Acme");
        assert!(validate_name("   ", "Brand").is_err());
    }

    #[test]
    fn test_quantity_and_price() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(99).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(100).is_err());
        assert!(validate_price(dec!(0), "Price").is_ok());
        assert!(validate_price(dec!(-1), "Price").is_err());
        assert!(validate_price(MAX_AMOUNT, "Price").is_ok());
        assert!(validate_price(dec!(1000000000000.01), "Price").is_err());
        assert!(validate_price(Decimal::MAX, "Price").is_err());
    }

    #[test]
    fn test_amount_bounds() {
        assert!(validate_amount(dec!(-1000000000000)).is_ok());
        assert!(validate_amount(dec!(0)).is_ok());
        assert!(validate_amount(dec!(1000000000001)).is_err());
        assert!(validate_amount(Decimal::MIN).is_err());
    }
}
