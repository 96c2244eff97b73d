use chrono::Utc;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{
    SqliteStore, collect, format_datetime, get_datetime, get_decimal, get_enum, get_json,
    get_opt_decimal, to_json,
};
use crate::error::{Error, Result};
use crate::store::{CatalogStore, ProductFilter};
use crate::types::*;

const BRAND_COLUMNS: &str =
    "id, name, slug, description, logo_url, is_active, created_at, updated_at";

fn brand_from_row(row: &Row<'_>) -> rusqlite::Result<Brand> {
    Ok(Brand {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        logo_url: row.get(4)?,
        is_active: row.get(5)?,
        created_at: get_datetime(row, 6)?,
        updated_at: get_datetime(row, 7)?,
    })
}

const CATEGORY_COLUMNS: &str = "id, name, slug, parent_id, level, path, description, sort_order, \
                                is_active, created_at, updated_at";

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        parent_id: row.get(3)?,
        level: row.get(4)?,
        path: get_json(row, 5)?,
        description: row.get(6)?,
        sort_order: row.get(7)?,
        is_active: row.get(8)?,
        created_at: get_datetime(row, 9)?,
        updated_at: get_datetime(row, 10)?,
    })
}

const PRODUCT_COLUMNS: &str = "id, brand_id, category_id, name, slug, sku, description, price, \
                               compare_at_price, status, is_featured, created_at, updated_at";

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        brand_id: row.get(1)?,
        category_id: row.get(2)?,
        name: row.get(3)?,
        slug: row.get(4)?,
        sku: row.get(5)?,
        description: row.get(6)?,
        price: get_decimal(row, 7)?,
        compare_at_price: get_opt_decimal(row, 8)?,
        status: get_enum(row, 9, ProductStatus::parse)?,
        is_featured: row.get(10)?,
        created_at: get_datetime(row, 11)?,
        updated_at: get_datetime(row, 12)?,
    })
}

fn variant_from_row(row: &Row<'_>) -> rusqlite::Result<Variant> {
    Ok(Variant {
        id: row.get(0)?,
        product_id: row.get(1)?,
        sku: row.get(2)?,
        name: row.get(3)?,
        price: get_opt_decimal(row, 4)?,
        options: get_json(row, 5)?,
        created_at: get_datetime(row, 6)?,
    })
}

const INVENTORY_COLUMNS: &str =
    "id, product_id, variant_id, quantity, reserved, policy, low_stock_threshold, updated_at";

pub(super) fn inventory_from_row(row: &Row<'_>) -> rusqlite::Result<Inventory> {
    Ok(Inventory {
        id: row.get(0)?,
        product_id: row.get(1)?,
        variant_id: row.get(2)?,
        quantity: row.get(3)?,
        reserved: row.get(4)?,
        policy: get_enum(row, 5, InventoryPolicy::parse)?,
        low_stock_threshold: row.get(6)?,
        updated_at: get_datetime(row, 7)?,
    })
}

pub(super) fn query_inventory(
    conn: &Connection,
    product_id: &str,
    variant_id: Option<&str>,
) -> Result<Option<Inventory>> {
    conn.query_row(
        &format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory
             WHERE product_id = ?1 AND COALESCE(variant_id, '') = COALESCE(?2, '')"
        ),
        params![product_id, variant_id],
        inventory_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn query_category(conn: &Connection, id: &str) -> Result<Option<Category>> {
    conn.query_row(
        &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1"),
        params![id],
        category_from_row,
    )
    .optional()
    .map_err(Error::from)
}

/// Loads a product with its brand and category. Shared with order reads.
pub(super) fn query_product_summary(conn: &Connection, id: &str) -> Result<Option<ProductSummary>> {
    let product = conn
        .query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
            params![id],
            product_from_row,
        )
        .optional()?;
    let Some(product) = product else {
        return Ok(None);
    };

    let brand = conn.query_row(
        &format!("SELECT {BRAND_COLUMNS} FROM brands WHERE id = ?1"),
        params![product.brand_id],
        brand_from_row,
    )?;
    let category = query_category(conn, &product.category_id)?.ok_or_else(|| {
        Error::Corrupt(format!("product {} has no category", product.id))
    })?;

    Ok(Some(ProductSummary {
        product,
        brand,
        category,
    }))
}

/// Escapes `%`, `_` and `\` for a LIKE pattern using `\` as the escape character.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl CatalogStore for SqliteStore {
    // Brands

    fn create_brand(&self, brand: &Brand) -> Result<()> {
        self.conn().execute(
            "INSERT INTO brands (id, name, slug, description, logo_url, is_active, created_at,
                                 updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                brand.id,
                brand.name,
                brand.slug,
                brand.description,
                brand.logo_url,
                brand.is_active,
                format_datetime(&brand.created_at),
                format_datetime(&brand.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_brand(&self, id: &str) -> Result<Option<Brand>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {BRAND_COLUMNS} FROM brands WHERE id = ?1"),
            params![id],
            brand_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_brand_by_slug(&self, slug: &str) -> Result<Option<Brand>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {BRAND_COLUMNS} FROM brands WHERE slug = ?1"),
            params![slug],
            brand_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_brands(&self, include_inactive: bool) -> Result<Vec<Brand>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BRAND_COLUMNS} FROM brands WHERE ?1 OR is_active = 1 ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![include_inactive], brand_from_row)?;
        collect(rows)
    }

    fn update_brand(&self, brand: &Brand) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE brands SET name = ?1, slug = ?2, description = ?3, logo_url = ?4,
                               is_active = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                brand.name,
                brand.slug,
                brand.description,
                brand.logo_url,
                brand.is_active,
                format_datetime(&Utc::now()),
                brand.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_brand(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM brands WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Categories

    fn create_category(&self, category: &Category) -> Result<()> {
        self.conn().execute(
            "INSERT INTO categories (id, name, slug, parent_id, level, path, description,
                                     sort_order, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                category.id,
                category.name,
                category.slug,
                category.parent_id,
                category.level,
                to_json(&category.path)?,
                category.description,
                category.sort_order,
                category.is_active,
                format_datetime(&category.created_at),
                format_datetime(&category.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_category(&self, id: &str) -> Result<Option<Category>> {
        query_category(&self.conn(), id)
    }

    fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE slug = ?1"),
            params![slug],
            category_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_categories(&self, include_inactive: bool) -> Result<Vec<Category>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE ?1 OR is_active = 1
             ORDER BY level, sort_order, name"
        ))?;
        let rows = stmt.query_map(params![include_inactive], category_from_row)?;
        collect(rows)
    }

    fn update_category(&self, category: &Category) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE categories SET name = ?1, slug = ?2, description = ?3, sort_order = ?4,
                                   is_active = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                category.name,
                category.slug,
                category.description,
                category.sort_order,
                category.is_active,
                format_datetime(&Utc::now()),
                category.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn move_category(&self, id: &str, new_parent_id: Option<&str>) -> Result<Category> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let category = query_category(&tx, id)?.ok_or(Error::NotFound)?;
        let (level, path) = match new_parent_id {
            Some(parent_id) => {
                let parent = query_category(&tx, parent_id)?.ok_or(Error::NotFound)?;
                if parent.id == category.id || category.is_ancestor_of(&parent) {
                    return Err(Error::Validation(
                        "a category cannot be moved under itself or its descendants".to_string(),
                    ));
                }
                parent.child_position()
            }
            None => (0, Vec::new()),
        };

        let now = format_datetime(&Utc::now());
        tx.execute(
            "UPDATE categories SET parent_id = ?1, level = ?2, path = ?3, updated_at = ?4
             WHERE id = ?5",
            params![new_parent_id, level, to_json(&path)?, now, id],
        )?;

        let descendants = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {CATEGORY_COLUMNS} FROM categories
                 WHERE EXISTS (SELECT 1 FROM json_each(categories.path) WHERE value = ?1)"
            ))?;
            let rows = stmt.query_map(params![id], category_from_row)?;
            collect(rows)?
        };

        for descendant in descendants {
            // Keep everything below the moved node, re-root everything above it.
            let Some(pos) = descendant.path.iter().position(|a| a == id) else {
                continue;
            };
            let mut new_path = path.clone();
            new_path.extend_from_slice(&descendant.path[pos..]);
            let new_level = i32::try_from(new_path.len())
                .map_err(|_| Error::Corrupt("category tree too deep".to_string()))?;
            tx.execute(
                "UPDATE categories SET level = ?1, path = ?2, updated_at = ?3 WHERE id = ?4",
                params![new_level, to_json(&new_path)?, now, descendant.id],
            )?;
        }

        let moved = query_category(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(moved)
    }

    fn delete_category(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM categories WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Products

    fn create_product(&self, product: &Product) -> Result<()> {
        self.conn().execute(
            "INSERT INTO products (id, brand_id, category_id, name, slug, sku, description, price,
                                   compare_at_price, status, is_featured, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                product.id,
                product.brand_id,
                product.category_id,
                product.name,
                product.slug,
                product.sku,
                product.description,
                product.price.to_string(),
                product.compare_at_price.map(|p| p.to_string()),
                product.status.as_str(),
                product.is_featured,
                format_datetime(&product.created_at),
                format_datetime(&product.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_product(&self, id: &str) -> Result<Option<Product>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
            params![id],
            product_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE slug = ?1"),
            params![slug],
            product_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_products(
        &self,
        filter: &ProductFilter,
        cursor: &str,
        limit: i32,
    ) -> Result<Vec<Product>> {
        let mut sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id > ?");
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(cursor.to_string())];

        if let Some(category_id) = &filter.category_id {
            sql.push_str(
                " AND category_id IN (SELECT id FROM categories WHERE id = ? OR EXISTS
                    (SELECT 1 FROM json_each(categories.path) WHERE value = ?))",
            );
            args.push(Box::new(category_id.clone()));
            args.push(Box::new(category_id.clone()));
        }
        if let Some(brand_id) = &filter.brand_id {
            sql.push_str(" AND brand_id = ?");
            args.push(Box::new(brand_id.clone()));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR sku LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            args.push(Box::new(pattern.clone()));
            args.push(Box::new(pattern));
        }
        if let Some(featured) = filter.featured {
            sql.push_str(" AND is_featured = ?");
            args.push(Box::new(featured));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str()));
        }
        sql.push_str(" ORDER BY id LIMIT ?");
        args.push(Box::new(limit));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            product_from_row,
        )?;
        collect(rows)
    }

    fn update_product(&self, product: &Product) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE products SET brand_id = ?1, category_id = ?2, name = ?3, slug = ?4, sku = ?5,
                                 description = ?6, price = ?7, compare_at_price = ?8,
                                 status = ?9, is_featured = ?10, updated_at = ?11
             WHERE id = ?12",
            params![
                product.brand_id,
                product.category_id,
                product.name,
                product.slug,
                product.sku,
                product.description,
                product.price.to_string(),
                product.compare_at_price.map(|p| p.to_string()),
                product.status.as_str(),
                product.is_featured,
                format_datetime(&Utc::now()),
                product.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_product(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM products WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn get_product_summary(&self, id: &str) -> Result<Option<ProductSummary>> {
        query_product_summary(&self.conn(), id)
    }

    fn get_product_detail(&self, id: &str) -> Result<Option<ProductDetail>> {
        let conn = self.conn();
        let Some(summary) = query_product_summary(&conn, id)? else {
            return Ok(None);
        };

        let images = {
            let mut stmt = conn.prepare(
                "SELECT id, product_id, url, alt_text, position FROM product_images
                 WHERE product_id = ?1 ORDER BY position, id",
            )?;
            let rows = stmt.query_map(params![id], image_from_row)?;
            collect(rows)?
        };
        let specifications = {
            let mut stmt = conn.prepare(
                "SELECT id, product_id, name, value, position FROM product_specifications
                 WHERE product_id = ?1 ORDER BY position, id",
            )?;
            let rows = stmt.query_map(params![id], specification_from_row)?;
            collect(rows)?
        };
        let variants = {
            let mut stmt = conn.prepare(
                "SELECT id, product_id, sku, name, price, options, created_at
                 FROM product_variants WHERE product_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![id], variant_from_row)?;
            collect(rows)?
        };
        let inventory = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE product_id = ?1
                 ORDER BY COALESCE(variant_id, '')"
            ))?;
            let rows = stmt.query_map(params![id], inventory_from_row)?;
            collect(rows)?
        };

        Ok(Some(ProductDetail {
            summary,
            images,
            specifications,
            variants,
            inventory,
        }))
    }

    // Product children

    fn add_product_image(&self, image: &ProductImage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO product_images (id, product_id, url, alt_text, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                image.id,
                image.product_id,
                image.url,
                image.alt_text,
                image.position
            ],
        )?;
        Ok(())
    }

    fn list_product_images(&self, product_id: &str) -> Result<Vec<ProductImage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, product_id, url, alt_text, position FROM product_images
             WHERE product_id = ?1 ORDER BY position, id",
        )?;
        let rows = stmt.query_map(params![product_id], image_from_row)?;
        collect(rows)
    }

    fn delete_product_image(&self, product_id: &str, image_id: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM product_images WHERE id = ?1 AND product_id = ?2",
            params![image_id, product_id],
        )?;
        Ok(rows > 0)
    }

    fn set_product_specifications(
        &self,
        product_id: &str,
        specs: &[Specification],
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM product_specifications WHERE product_id = ?1",
            params![product_id],
        )?;
        for spec in specs {
            tx.execute(
                "INSERT INTO product_specifications (id, product_id, name, value, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![spec.id, product_id, spec.name, spec.value, spec.position],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn create_variant(&self, variant: &Variant) -> Result<()> {
        self.conn().execute(
            "INSERT INTO product_variants (id, product_id, sku, name, price, options, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                variant.id,
                variant.product_id,
                variant.sku,
                variant.name,
                variant.price.map(|p| p.to_string()),
                to_json(&variant.options)?,
                format_datetime(&variant.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_variant(&self, id: &str) -> Result<Option<Variant>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, product_id, sku, name, price, options, created_at
             FROM product_variants WHERE id = ?1",
            params![id],
            variant_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_variants(&self, product_id: &str) -> Result<Vec<Variant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, product_id, sku, name, price, options, created_at
             FROM product_variants WHERE product_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![product_id], variant_from_row)?;
        collect(rows)
    }

    fn delete_variant(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM product_variants WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Inventory

    fn upsert_inventory(&self, inventory: &Inventory) -> Result<Inventory> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existing = query_inventory(&tx, &inventory.product_id, inventory.variant_id.as_deref())?;
        let now = format_datetime(&Utc::now());

        match existing {
            Some(current) => {
                if inventory.policy == InventoryPolicy::Track && inventory.quantity < current.reserved
                {
                    return Err(Error::Validation(format!(
                        "quantity {} is below the {} units reserved by open orders",
                        inventory.quantity, current.reserved
                    )));
                }
                tx.execute(
                    "UPDATE inventory SET quantity = ?1, policy = ?2, low_stock_threshold = ?3,
                                          updated_at = ?4
                     WHERE id = ?5",
                    params![
                        inventory.quantity,
                        inventory.policy.as_str(),
                        inventory.low_stock_threshold,
                        now,
                        current.id,
                    ],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO inventory (id, product_id, variant_id, quantity, reserved, policy,
                                            low_stock_threshold, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)",
                    params![
                        inventory.id,
                        inventory.product_id,
                        inventory.variant_id,
                        inventory.quantity,
                        inventory.policy.as_str(),
                        inventory.low_stock_threshold,
                        now,
                    ],
                )?;
            }
        }

        let stored = query_inventory(&tx, &inventory.product_id, inventory.variant_id.as_deref())?
            .ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(stored)
    }

    fn get_inventory(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> Result<Option<Inventory>> {
        query_inventory(&self.conn(), product_id, variant_id)
    }

    fn list_low_stock(&self) -> Result<Vec<Inventory>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory
             WHERE policy != 'no_track' AND quantity - reserved <= low_stock_threshold
             ORDER BY quantity - reserved, product_id"
        ))?;
        let rows = stmt.query_map([], inventory_from_row)?;
        collect(rows)
    }
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ProductImage> {
    Ok(ProductImage {
        id: row.get(0)?,
        product_id: row.get(1)?,
        url: row.get(2)?,
        alt_text: row.get(3)?,
        position: row.get(4)?,
    })
}

fn specification_from_row(row: &Row<'_>) -> rusqlite::Result<Specification> {
    Ok(Specification {
        id: row.get(0)?,
        product_id: row.get(1)?,
        name: row.get(2)?,
        value: row.get(3)?,
        position: row.get(4)?,
    })
}
