use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::Rng;

use crate::error::{Error, Result};

const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_PARALLELISM: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;

const TOKEN_PREFIX: &str = "souq";
const LOOKUP_LENGTH: usize = 8;
const SECRET_LENGTH: usize = 24;
const SECRET_BYTES: usize = 12;

/// Issues and checks session tokens of the form `souq_<lookup>_<secret>`.
///
/// The lookup half is stored in clear and indexed so a session can be found without
/// scanning; the full token is only ever stored as an argon2id hash.
pub struct SessionTokens {
    argon2: Argon2<'static>,
}

impl Default for SessionTokens {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTokens {
    #[must_use]
    pub fn new() -> Self {
        let params = Params::new(
            ARGON2_MEMORY_KIB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(ARGON2_OUTPUT_LEN),
        )
        .expect("invalid argon2 params");

        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Generates a new token.
    /// Returns (raw_token, lookup, hash)
    pub fn generate(&self) -> Result<(String, String, String)> {
        let lookup = generate_lookup();
        let secret = generate_secret();
        let raw_token = build_token(&lookup, &secret);
        let hash = self.hash(&raw_token)?;
        Ok((raw_token, lookup, hash))
    }

    pub fn hash(&self, token: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(token.as_bytes(), &salt)
            .map_err(|e| Error::Hash(format!("failed to hash token: {e}")))?;
        Ok(hash.to_string())
    }

    pub fn verify(&self, token: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::Corrupt(format!("invalid token hash: {e}")))?;

        match self.argon2.verify_password(token.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Hash(format!("failed to verify token: {e}"))),
        }
    }
}

/// First 8 hex chars of a UUID
fn generate_lookup() -> String {
    let uuid = uuid::Uuid::new_v4();
    uuid.simple().to_string()[..LOOKUP_LENGTH].to_string()
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)[..SECRET_LENGTH].to_string()
}

fn build_token(lookup: &str, secret: &str) -> String {
    format!("{TOKEN_PREFIX}_{lookup}_{secret}")
}

/// Parses a token string into its components (lookup, secret)
pub fn parse_token(token: &str) -> Result<(String, String)> {
    let rest = token
        .strip_prefix(TOKEN_PREFIX)
        .and_then(|r| r.strip_prefix('_'))
        .ok_or(Error::InvalidTokenFormat)?;

    let (lookup, secret) = rest.split_once('_').ok_or(Error::InvalidTokenFormat)?;
    if lookup.len() != LOOKUP_LENGTH || secret.len() != SECRET_LENGTH || secret.contains('_') {
        return Err(Error::InvalidTokenFormat);
    }

    Ok((lookup.to_string(), secret.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_generation_format() {
        let tokens = SessionTokens::new();
        let (token, lookup, _hash) = tokens.generate().unwrap();

        assert!(token.starts_with("souq_"));
        assert_eq!(lookup.len(), 8);

        let parts: Vec<&str> = token.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "souq");
        assert_eq!(parts[1], lookup);
        assert_eq!(parts[2].len(), 24);
    }

    #[test]
    fn test_token_verification() {
        let tokens = SessionTokens::new();
        let (token, _, hash) = tokens.generate().unwrap();

        assert!(tokens.verify(&token, &hash).unwrap());

        let wrong = format!("{}00000", &token[..token.len() - 5]);
        assert!(!tokens.verify(&wrong, &hash).unwrap());
    }

    #[test]
    fn test_parse_token_valid() {
        let (lookup, secret) = parse_token("souq_12345678_123456789012345678901234").unwrap();
        assert_eq!(lookup, "12345678");
        assert_eq!(secret, "123456789012345678901234");
    }

    #[test]
    fn test_parse_token_rejects_malformed() {
        assert!(parse_token("cutlet_12345678_123456789012345678901234").is_err());
        assert!(parse_token("souq_12345678").is_err());
        assert!(parse_token("souq_1234_123456789012345678901234").is_err());
        assert!(parse_token("souq_12345678_1234567890_234567890123").is_err());
    }

    #[test]
    fn test_hash_is_phc_format() {
        let tokens = SessionTokens::new();
        let (_, _, hash) = tokens.generate().unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("$m=65536,t=1,p=4$"));
    }

    #[test]
    fn test_malformed_hash_is_corrupt() {
        let tokens = SessionTokens::new();
        assert!(matches!(
            tokens.verify("souq_12345678_123456789012345678901234", "not-a-hash"),
            Err(Error::Corrupt(_))
        ));
    }
}
