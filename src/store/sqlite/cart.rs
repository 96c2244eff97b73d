use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{SqliteStore, collect, format_datetime, get_datetime, get_decimal, get_enum};
use crate::error::{Error, Result};
use crate::store::CartStore;
use crate::types::*;

const CART_COLUMNS: &str = "id, user_id, session_id, created_at, updated_at";

fn cart_from_row(row: &Row<'_>) -> rusqlite::Result<Cart> {
    Ok(Cart {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        created_at: get_datetime(row, 3)?,
        updated_at: get_datetime(row, 4)?,
    })
}

const ITEM_COLUMNS: &str = "id, cart_id, product_id, variant_id, quantity, created_at, updated_at";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<CartItem> {
    Ok(CartItem {
        id: row.get(0)?,
        cart_id: row.get(1)?,
        product_id: row.get(2)?,
        variant_id: row.get(3)?,
        quantity: row.get(4)?,
        created_at: get_datetime(row, 5)?,
        updated_at: get_datetime(row, 6)?,
    })
}

/// Cart lines priced from the live catalog. A variant price overrides the product price.
pub(super) const LINE_QUERY: &str = "
    SELECT ci.id, ci.cart_id, ci.product_id, ci.variant_id, ci.quantity, ci.created_at,
           ci.updated_at,
           CASE WHEN v.id IS NULL THEN p.name ELSE p.name || ' - ' || v.name END,
           p.slug, p.status, COALESCE(v.sku, p.sku), COALESCE(v.price, p.price)
    FROM cart_items ci
    JOIN products p ON p.id = ci.product_id
    LEFT JOIN product_variants v ON v.id = ci.variant_id
    WHERE ci.cart_id = ?1
    ORDER BY ci.created_at, ci.id";

pub(super) fn line_from_row(row: &Row<'_>) -> rusqlite::Result<CartLine> {
    Ok(CartLine {
        item: item_from_row(row)?,
        product_name: row.get(7)?,
        product_slug: row.get(8)?,
        product_status: get_enum(row, 9, ProductStatus::parse)?,
        sku: row.get(10)?,
        unit_price: get_decimal(row, 11)?,
    })
}

fn find_line(
    conn: &Connection,
    cart_id: &str,
    product_id: &str,
    variant_id: Option<&str>,
) -> Result<Option<CartItem>> {
    conn.query_row(
        &format!(
            "SELECT {ITEM_COLUMNS} FROM cart_items
             WHERE cart_id = ?1 AND product_id = ?2 AND COALESCE(variant_id, '') = COALESCE(?3, '')"
        ),
        params![cart_id, product_id, variant_id],
        item_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn query_item(conn: &Connection, id: &str) -> Result<Option<CartItem>> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM cart_items WHERE id = ?1"),
        params![id],
        item_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn touch_cart(conn: &Connection, cart_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE carts SET updated_at = ?1 WHERE id = ?2",
        params![format_datetime(&Utc::now()), cart_id],
    )?;
    Ok(())
}

fn check_quantity(quantity: i64) -> Result<()> {
    if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(Error::Validation(format!(
            "quantity must be between 1 and {MAX_LINE_QUANTITY}"
        )));
    }
    Ok(())
}

impl CartStore for SqliteStore {
    fn create_cart(&self, cart: &Cart) -> Result<()> {
        self.conn().execute(
            "INSERT INTO carts (id, user_id, session_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cart.id,
                cart.user_id,
                cart.session_id,
                format_datetime(&cart.created_at),
                format_datetime(&cart.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_cart(&self, id: &str) -> Result<Option<Cart>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CART_COLUMNS} FROM carts WHERE id = ?1"),
            params![id],
            cart_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_cart_for_user(&self, user_id: &str) -> Result<Option<Cart>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CART_COLUMNS} FROM carts WHERE user_id = ?1"),
            params![user_id],
            cart_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_cart_for_session(&self, session_id: &str) -> Result<Option<Cart>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CART_COLUMNS} FROM carts WHERE session_id = ?1 AND user_id IS NULL"),
            params![session_id],
            cart_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn delete_cart(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM carts WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn list_cart_lines(&self, cart_id: &str) -> Result<Vec<CartLine>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(LINE_QUERY)?;
        let rows = stmt.query_map(params![cart_id], line_from_row)?;
        collect(rows)
    }

    fn add_cart_item(&self, item: &CartItem) -> Result<CartItem> {
        check_quantity(item.quantity)?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = format_datetime(&Utc::now());

        let id = match find_line(&tx, &item.cart_id, &item.product_id, item.variant_id.as_deref())? {
            Some(existing) => {
                let quantity = existing.quantity + item.quantity;
                check_quantity(quantity)?;
                tx.execute(
                    "UPDATE cart_items SET quantity = ?1, updated_at = ?2 WHERE id = ?3",
                    params![quantity, now, existing.id],
                )?;
                existing.id
            }
            None => {
                tx.execute(
                    "INSERT INTO cart_items (id, cart_id, product_id, variant_id, quantity,
                                             created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        item.id,
                        item.cart_id,
                        item.product_id,
                        item.variant_id,
                        item.quantity,
                        format_datetime(&item.created_at),
                        format_datetime(&item.updated_at),
                    ],
                )?;
                item.id.clone()
            }
        };
        touch_cart(&tx, &item.cart_id)?;

        let stored = query_item(&tx, &id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(stored)
    }

    fn get_cart_item(&self, id: &str) -> Result<Option<CartItem>> {
        query_item(&self.conn(), id)
    }

    fn set_cart_item_quantity(&self, id: &str, quantity: i64) -> Result<()> {
        check_quantity(quantity)?;
        let rows = self.conn().execute(
            "UPDATE cart_items SET quantity = ?1, updated_at = ?2 WHERE id = ?3",
            params![quantity, format_datetime(&Utc::now()), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn remove_cart_item(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM cart_items WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn clear_cart(&self, cart_id: &str) -> Result<usize> {
        let rows = self
            .conn()
            .execute("DELETE FROM cart_items WHERE cart_id = ?1", params![cart_id])?;
        Ok(rows)
    }

    fn merge_carts(&self, from_cart_id: &str, into_cart_id: &str) -> Result<()> {
        if from_cart_id == into_cart_id {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = format_datetime(&Utc::now());

        let incoming = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM cart_items WHERE cart_id = ?1"
            ))?;
            let rows = stmt.query_map(params![from_cart_id], item_from_row)?;
            collect(rows)?
        };

        for line in incoming {
            match find_line(&tx, into_cart_id, &line.product_id, line.variant_id.as_deref())? {
                Some(existing) => {
                    let quantity = (existing.quantity + line.quantity).min(MAX_LINE_QUANTITY);
                    tx.execute(
                        "UPDATE cart_items SET quantity = ?1, updated_at = ?2 WHERE id = ?3",
                        params![quantity, now, existing.id],
                    )?;
                }
                None => {
                    tx.execute(
                        "UPDATE cart_items SET cart_id = ?1, updated_at = ?2 WHERE id = ?3",
                        params![into_cart_id, now, line.id],
                    )?;
                }
            }
        }

        tx.execute("DELETE FROM carts WHERE id = ?1", params![from_cart_id])?;
        touch_cart(&tx, into_cart_id)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::super::tests::{product, seeded_store};
    use super::*;
    use crate::store::CatalogStore;

    fn cart(id: &str, user_id: Option<&str>, session_id: Option<&str>) -> Cart {
        let now = Utc::now();
        Cart {
            id: id.to_string(),
            user_id: user_id.map(str::to_string),
            session_id: session_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    fn item(id: &str, cart_id: &str, product_id: &str, quantity: i64) -> CartItem {
        let now = Utc::now();
        CartItem {
            id: id.to_string(),
            cart_id: cart_id.to_string(),
            product_id: product_id.to_string(),
            variant_id: None,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_cart_requires_owner() {
        let (_temp, store) = seeded_store();
        assert!(matches!(
            store.create_cart(&cart("c", None, None)),
            Err(Error::Constraint(_))
        ));
    }

    #[test]
    fn test_add_same_product_increments_line() {
        let (_temp, store) = seeded_store();
        store.create_product(&product("p1", "SKU-1", dec!(2.50))).unwrap();
        store.create_cart(&cart("cart1", Some("u1"), None)).unwrap();

        store.add_cart_item(&item("i1", "cart1", "p1", 2)).unwrap();
        let merged = store.add_cart_item(&item("i2", "cart1", "p1", 3)).unwrap();
        assert_eq!(merged.id, "i1");
        assert_eq!(merged.quantity, 5);

        let lines = store.list_cart_lines("cart1").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].unit_price, dec!(2.50));
        assert_eq!(lines[0].line_total(), dec!(12.50));
        assert_eq!(lines[0].sku, "SKU-1");
    }

    #[test]
    fn test_quantity_bounds() {
        let (_temp, store) = seeded_store();
        store.create_product(&product("p1", "SKU-1", dec!(1))).unwrap();
        store.create_cart(&cart("cart1", Some("u1"), None)).unwrap();

        assert!(matches!(
            store.add_cart_item(&item("i0", "cart1", "p1", 0)),
            Err(Error::Validation(_))
        ));
        store.add_cart_item(&item("i1", "cart1", "p1", 98)).unwrap();
        assert!(matches!(
            store.add_cart_item(&item("i2", "cart1", "p1", 2)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.set_cart_item_quantity("i1", 100),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.set_cart_item_quantity("missing", 1),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_merge_guest_cart_into_user_cart() {
        let (_temp, store) = seeded_store();
        store.create_product(&product("p1", "SKU-1", dec!(1))).unwrap();
        store.create_product(&product("p2", "SKU-2", dec!(1))).unwrap();
        store.create_cart(&cart("guest", None, Some("sess-1"))).unwrap();
        store.create_cart(&cart("mine", Some("u1"), None)).unwrap();

        store.add_cart_item(&item("g1", "guest", "p1", 2)).unwrap();
        store.add_cart_item(&item("g2", "guest", "p2", 1)).unwrap();
        store.add_cart_item(&item("m1", "mine", "p1", 3)).unwrap();

        store.merge_carts("guest", "mine").unwrap();

        assert!(store.get_cart("guest").unwrap().is_none());
        let lines = store.list_cart_lines("mine").unwrap();
        assert_eq!(lines.len(), 2);
        let p1 = lines.iter().find(|l| l.item.product_id == "p1").unwrap();
        assert_eq!(p1.item.quantity, 5);
    }

    #[test]
    fn test_delete_product_removes_cart_lines() {
        let (_temp, store) = seeded_store();
        store.create_product(&product("p1", "SKU-1", dec!(1))).unwrap();
        store.create_cart(&cart("cart1", Some("u1"), None)).unwrap();
        store.add_cart_item(&item("i1", "cart1", "p1", 1)).unwrap();

        store.delete_product("p1").unwrap();
        assert!(store.list_cart_lines("cart1").unwrap().is_empty());
    }
}
