mod helpers;
mod middleware;
mod password;
mod token;
mod verification;

pub use helpers::{SESSION_COOKIE, cookie_value, extract_session_token, validate_session};
pub use middleware::{
    AuthError, OptionalUser, RequireAdmin, RequireCatalogManager, RequireOrderManager,
    RequireUser,
};
pub use password::{MAX_PASSWORD_LENGTH, check_password_policy, hash_password, verify_password};
pub use token::{SessionTokens, parse_token};
pub use verification::{generate_token, token_digest, token_lifetime};
