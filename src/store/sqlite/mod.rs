mod cart;
mod catalog;
mod orders;
mod users;

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;

use super::Store;
use super::schema::{MIGRATIONS, MIGRATIONS_TABLE};
use crate::error::{Error, Result};
use crate::types::Currency;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private database for tests and one-shot tooling.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }

    /// Versions already applied to this database, ascending.
    pub fn applied_migrations(&self) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

pub(super) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

pub(super) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(super) fn get_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(parse_datetime(&row.get::<_, String>(idx)?))
}

pub(super) fn get_opt_datetime(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .map(|s| parse_datetime(&s)))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// Money is stored as decimal text to avoid float rounding.
pub(super) fn get_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, format!("bad decimal '{text}': {e}")))
}

pub(super) fn get_opt_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => Decimal::from_str(&text)
            .map(Some)
            .map_err(|e| conversion_error(idx, format!("bad decimal '{text}': {e}"))),
        None => Ok(None),
    }
}

/// Reads a text column through one of the `parse` functions generated for status enums.
pub(super) fn get_enum<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or_else(|| conversion_error(idx, format!("unknown value '{text}'")))
}

pub(super) fn get_currency(row: &Row<'_>, idx: usize) -> rusqlite::Result<Currency> {
    get_enum(row, idx, Currency::parse)
}

pub(super) fn get_json<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, format!("bad json: {e}")))
}

pub(super) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Corrupt(e.to_string()))
}

pub(super) fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        let mut conn = self.conn();
        conn.execute_batch(MIGRATIONS_TABLE)?;

        for (version, sql) in MIGRATIONS {
            let applied = conn
                .query_row(
                    "SELECT version FROM schema_migrations WHERE version = ?1",
                    params![version],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
                .is_some();
            if applied {
                continue;
            }

            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO schema_migrations (version) VALUES (?1)",
                params![version],
            )?;
            tx.commit()?;
            tracing::info!("Applied schema migration {version}");
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::{CatalogStore, UserStore};
    use crate::types::*;
    use tempfile::TempDir;

    /// A migrated store on a temporary file; keep the `TempDir` alive for the test.
    pub(crate) fn test_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    pub(crate) fn user(id: &str, email: &str) -> User {
        let now = Utc::now();
        User {
            id: id.to_string(),
            email: email.to_string(),
            name: "Test User".to_string(),
            phone: None,
            password_hash: "hash".to_string(),
            role: Role::Customer,
            status: UserStatus::PendingVerification,
            email_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn brand(id: &str, slug: &str) -> Brand {
        let now = Utc::now();
        Brand {
            id: id.to_string(),
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            description: None,
            logo_url: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn category(id: &str, slug: &str, parent: Option<&Category>) -> Category {
        let now = Utc::now();
        let (level, path) = parent.map_or((0, Vec::new()), Category::child_position);
        Category {
            id: id.to_string(),
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            parent_id: parent.map(|p| p.id.clone()),
            level,
            path,
            description: None,
            sort_order: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn product(id: &str, sku: &str, price: Decimal) -> Product {
        let now = Utc::now();
        Product {
            id: id.to_string(),
            brand_id: "b1".to_string(),
            category_id: "c1".to_string(),
            name: format!("Product {sku}"),
            slug: sku.to_lowercase(),
            sku: sku.to_string(),
            description: None,
            price,
            compare_at_price: None,
            status: ProductStatus::Active,
            is_featured: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn stock(product_id: &str, quantity: i64, policy: InventoryPolicy) -> Inventory {
        Inventory {
            id: format!("inv-{product_id}"),
            product_id: product_id.to_string(),
            variant_id: None,
            quantity,
            reserved: 0,
            policy,
            low_stock_threshold: 2,
            updated_at: Utc::now(),
        }
    }

    /// Store with user `u1`, brand `b1` and category `c1` in place.
    pub(crate) fn seeded_store() -> (TempDir, SqliteStore) {
        let (temp, store) = test_store();
        store.create_user(&user("u1", "buyer@example.com")).unwrap();
        store.create_brand(&brand("b1", "acme")).unwrap();
        store.create_category(&category("c1", "phones", None)).unwrap();
        (temp, store)
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = test_store();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "users",
            "sessions",
            "verifications",
            "addresses",
            "user_preferences",
            "brands",
            "categories",
            "products",
            "product_images",
            "product_specifications",
            "product_variants",
            "inventory",
            "carts",
            "cart_items",
            "orders",
            "order_items",
            "payments",
            "shipments",
            "shipment_tracking_events",
            "order_status_history",
            "favorites",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_temp, store) = test_store();
        store.initialize().unwrap();
        assert_eq!(store.applied_migrations().unwrap(), vec![1]);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let (_temp, store) = test_store();
        let enabled: i64 = store
            .conn()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
