use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Duration;
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::types::VerificationKind;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 32;

/// How long a one-time token of each kind stays valid.
#[must_use]
pub fn token_lifetime(kind: VerificationKind) -> Duration {
    match kind {
        VerificationKind::EmailVerification => Duration::hours(24),
        VerificationKind::PasswordReset => Duration::hours(1),
    }
}

/// A random url-safe token for an emailed link.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Keyed digest stored in place of the raw token. Lookups recompute it from the
/// presented token, so a leaked table does not yield usable links.
#[must_use]
pub fn token_digest(secret: &SecretString, token: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_digest_depends_on_secret() {
        let one = SecretString::from("one".to_string());
        let two = SecretString::from("two".to_string());
        assert_eq!(token_digest(&one, "abc"), token_digest(&one, "abc"));
        assert_ne!(token_digest(&one, "abc"), token_digest(&two, "abc"));
        assert_eq!(token_digest(&one, "abc").len(), 64);
    }

    #[test]
    fn test_lifetimes() {
        assert_eq!(
            token_lifetime(VerificationKind::PasswordReset),
            Duration::hours(1)
        );
        assert_eq!(
            token_lifetime(VerificationKind::EmailVerification),
            Duration::hours(24)
        );
    }
}
