use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;
use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;

use crate::types::Currency;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Keys the HMAC digests of email verification and password reset tokens.
    pub secret: SecretString,
    /// Public URL of the storefront, used for links in emails.
    pub base_url: String,
    pub session_ttl: Duration,
    pub password_min_length: usize,
    pub require_email_verification: bool,
}

#[derive(Debug, Clone)]
pub struct CommerceConfig {
    /// Currency catalog prices and orders are recorded in.
    pub base_currency: Currency,
    /// Display currency when neither the request nor the user picks one.
    pub display_currency: Currency,
    pub shipping_flat_rate: Decimal,
    pub tax_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub auth: AuthConfig,
    pub commerce: CommerceConfig,
    /// Emails are kept in an in-memory outbox when SMTP is not configured.
    pub smtp: Option<SmtpConfig>,
}

impl ServerConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from any key lookup. Required keys are only checked for
    /// presence; optional keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let database_url = require("DATABASE_URL")?;
        let secret = require("AUTH_SECRET")?;
        let base_url = require("AUTH_BASE_URL")?;

        let auth = AuthConfig {
            secret: SecretString::from(secret),
            base_url: base_url.trim_end_matches('/').to_string(),
            session_ttl: Duration::hours(parse_or(&get, "SESSION_TTL_HOURS", 24 * 7)?),
            password_min_length: parse_or(&get, "PASSWORD_MIN_LENGTH", 8)?,
            require_email_verification: parse_or(&get, "REQUIRE_EMAIL_VERIFICATION", false)?,
        };

        let commerce = CommerceConfig {
            base_currency: currency_or(&get, "BASE_CURRENCY", Currency::Usd)?,
            display_currency: currency_or(&get, "DEFAULT_CURRENCY", Currency::Iqd)?,
            shipping_flat_rate: parse_or(&get, "SHIPPING_FLAT_RATE", Decimal::ZERO)?,
            tax_rate: parse_or(&get, "TAX_RATE", Decimal::ZERO)?,
        };

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or(&get, "SMTP_PORT", 587)?,
                username: require("SMTP_USERNAME")?,
                password: SecretString::from(require("SMTP_PASSWORD")?),
                from_address: require("SMTP_FROM")?,
            }),
            None => None,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&get, "PORT", 8080)?,
            database_path: database_path(&database_url),
            auth,
            commerce,
            smtp,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Accepts `sqlite://path`, `sqlite:path` or a bare path.
fn database_path(url: &str) -> PathBuf {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    PathBuf::from(path)
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn currency_or<G>(get: &G, key: &'static str, default: Currency) -> Result<Currency, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => Currency::parse(&value).ok_or(ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal_macros::dec;
    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DATABASE_URL", "sqlite://data/souq.db"),
        ("AUTH_SECRET", "s3cret"),
        ("AUTH_BASE_URL", "https://shop.example.com/"),
    ];

    #[test]
    fn test_defaults_with_required_keys() {
        let config = ServerConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.database_path, PathBuf::from("data/souq.db"));
        assert_eq!(config.auth.base_url, "https://shop.example.com");
        assert_eq!(config.auth.secret.expose_secret(), "s3cret");
        assert_eq!(config.auth.session_ttl, Duration::hours(168));
        assert_eq!(config.port, 8080);
        assert_eq!(config.commerce.display_currency, Currency::Iqd);
        assert!(config.smtp.is_none());
    }

    #[test]
    fn test_missing_required_key() {
        let result = ServerConfig::from_lookup(lookup(&REQUIRED[..2]));
        assert!(matches!(result, Err(ConfigError::Missing("AUTH_BASE_URL"))));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[1] = ("AUTH_SECRET", "  ");
        let result = ServerConfig::from_lookup(lookup(&pairs));
        assert!(matches!(result, Err(ConfigError::Missing("AUTH_SECRET"))));
    }

    #[test]
    fn test_invalid_optional_value() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "eighty"));
        let result = ServerConfig::from_lookup(lookup(&pairs));
        assert!(matches!(result, Err(ConfigError::Invalid { key: "PORT", .. })));
    }

    #[test]
    fn test_commerce_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("SHIPPING_FLAT_RATE", "4.50"),
            ("TAX_RATE", "0.15"),
            ("DEFAULT_CURRENCY", "usd"),
        ]);
        let config = ServerConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.commerce.shipping_flat_rate, dec!(4.50));
        assert_eq!(config.commerce.tax_rate, dec!(0.15));
        assert_eq!(config.commerce.display_currency, Currency::Usd);
    }

    #[test]
    fn test_smtp_requires_credentials_once_host_is_set() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SMTP_HOST", "smtp.example.com"));
        let result = ServerConfig::from_lookup(lookup(&pairs));
        assert!(matches!(result, Err(ConfigError::Missing("SMTP_USERNAME"))));
    }
}
