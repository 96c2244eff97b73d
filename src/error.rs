use rusqlite::ffi;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("still referenced: {0}")]
    Referenced(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("session lookup collision")]
    TokenLookupCollision,

    #[error("insufficient stock for {sku}: {available} available")]
    InsufficientStock { sku: String, available: i64 },

    #[error("cannot move {field} from {from} to {to}")]
    InvalidTransition {
        field: &'static str,
        from: String,
        to: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hashing failed: {0}")]
    Hash(String),

    #[error("invalid token format")]
    InvalidTokenFormat,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// SQLite reports every constraint failure as `SQLITE_CONSTRAINT`; the extended
/// code tells unique, foreign key and check violations apart.
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
            let detail = message.clone().unwrap_or_default();
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return Error::AlreadyExists(detail);
                }
                // An `ON DELETE RESTRICT` action fails as a trigger constraint.
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY | ffi::SQLITE_CONSTRAINT_TRIGGER => {
                    return Error::Referenced(detail);
                }
                ffi::SQLITE_CONSTRAINT_CHECK | ffi::SQLITE_CONSTRAINT_NOTNULL => {
                    return Error::Constraint(detail);
                }
                _ => {}
            }
        }
        Error::Database(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
