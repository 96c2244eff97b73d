use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::error::{Error, Result};

pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Checks a candidate password against the account password policy.
pub fn check_password_policy(password: &str, min_length: usize) -> std::result::Result<(), String> {
    let length = password.chars().count();
    if length < min_length {
        return Err(format!("Password must be at least {min_length} characters"));
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password cannot exceed {MAX_PASSWORD_LENGTH} characters"
        ));
    }
    if !password.chars().any(char::is_alphabetic) || !password.chars().any(|c| c.is_ascii_digit())
    {
        return Err("Password must contain at least one letter and one number".to_string());
    }
    Ok(())
}

/// Argon2id with the crate's default cost parameters.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Hash(format!("failed to hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| Error::Corrupt(format!("invalid password hash: {e}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(Error::Hash(format!("failed to verify password: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_accepts_letters_and_digits() {
        assert!(check_password_policy("hunter22", 8).is_ok());
        assert!(check_password_policy("كلمةسر99", 8).is_ok());
    }

    #[test]
    fn test_policy_rejects_weak_passwords() {
        assert!(check_password_policy("short1", 8).is_err());
        assert!(check_password_policy("allletters", 8).is_err());
        assert!(check_password_policy("1234567890", 8).is_err());
        assert!(check_password_policy(&format!("a1{}", "x".repeat(127)), 8).is_err());
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(verify_password("hunter22", "not-a-hash").is_err());
    }
}
