use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use super::cart::{LINE_QUERY, line_from_row};
use super::catalog::{query_inventory, query_product_summary};
use super::{
    SqliteStore, collect, format_datetime, get_currency, get_datetime, get_decimal, get_enum,
    get_json, get_opt_datetime, to_json,
};
use crate::error::{Error, Result};
use crate::store::{OrderDraft, OrderStore, StatusUpdate};
use crate::types::*;

const ORDER_COLUMNS: &str = "id, order_number, user_id, status, payment_status, \
                             fulfillment_status, currency, subtotal, shipping_amount, tax_amount, \
                             total, shipping_address, notes, created_at, updated_at";

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        order_number: row.get(1)?,
        user_id: row.get(2)?,
        status: get_enum(row, 3, OrderStatus::parse)?,
        payment_status: get_enum(row, 4, PaymentStatus::parse)?,
        fulfillment_status: get_enum(row, 5, FulfillmentStatus::parse)?,
        currency: get_currency(row, 6)?,
        subtotal: get_decimal(row, 7)?,
        shipping_amount: get_decimal(row, 8)?,
        tax_amount: get_decimal(row, 9)?,
        total: get_decimal(row, 10)?,
        shipping_address: get_json(row, 11)?,
        notes: row.get(12)?,
        created_at: get_datetime(row, 13)?,
        updated_at: get_datetime(row, 14)?,
    })
}

const ITEM_COLUMNS: &str =
    "id, order_id, product_id, variant_id, product_name, sku, unit_price, quantity, total_price";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<OrderItem> {
    Ok(OrderItem {
        id: row.get(0)?,
        order_id: row.get(1)?,
        product_id: row.get(2)?,
        variant_id: row.get(3)?,
        product_name: row.get(4)?,
        sku: row.get(5)?,
        unit_price: get_decimal(row, 6)?,
        quantity: row.get(7)?,
        total_price: get_decimal(row, 8)?,
    })
}

const PAYMENT_COLUMNS: &str =
    "id, order_id, method, status, amount, currency, transaction_ref, created_at, updated_at";

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        order_id: row.get(1)?,
        method: get_enum(row, 2, PaymentMethod::parse)?,
        status: get_enum(row, 3, PaymentStatus::parse)?,
        amount: get_decimal(row, 4)?,
        currency: get_currency(row, 5)?,
        transaction_ref: row.get(6)?,
        created_at: get_datetime(row, 7)?,
        updated_at: get_datetime(row, 8)?,
    })
}

const SHIPMENT_COLUMNS: &str = "id, order_id, carrier, tracking_number, status, shipped_at, \
                                delivered_at, created_at, updated_at";

fn shipment_from_row(row: &Row<'_>) -> rusqlite::Result<Shipment> {
    Ok(Shipment {
        id: row.get(0)?,
        order_id: row.get(1)?,
        carrier: row.get(2)?,
        tracking_number: row.get(3)?,
        status: get_enum(row, 4, ShipmentStatus::parse)?,
        shipped_at: get_opt_datetime(row, 5)?,
        delivered_at: get_opt_datetime(row, 6)?,
        created_at: get_datetime(row, 7)?,
        updated_at: get_datetime(row, 8)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<TrackingEvent> {
    Ok(TrackingEvent {
        id: row.get(0)?,
        shipment_id: row.get(1)?,
        status: get_enum(row, 2, ShipmentStatus::parse)?,
        location: row.get(3)?,
        description: row.get(4)?,
        occurred_at: get_datetime(row, 5)?,
    })
}

fn query_order(conn: &Connection, id: &str) -> Result<Option<Order>> {
    conn.query_row(
        &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
        params![id],
        order_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn query_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ?1 ORDER BY rowid"
    ))?;
    let rows = stmt.query_map(params![order_id], item_from_row)?;
    collect(rows)
}

fn query_payment(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
        params![id],
        payment_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn query_payments(conn: &Connection, order_id: &str) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = ?1 ORDER BY created_at, id"
    ))?;
    let rows = stmt.query_map(params![order_id], payment_from_row)?;
    collect(rows)
}

fn query_shipment(conn: &Connection, id: &str) -> Result<Option<Shipment>> {
    conn.query_row(
        &format!("SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE id = ?1"),
        params![id],
        shipment_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn query_shipments(conn: &Connection, order_id: &str) -> Result<Vec<ShipmentWithEvents>> {
    let shipments = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE order_id = ?1 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![order_id], shipment_from_row)?;
        collect(rows)?
    };

    let mut stmt = conn.prepare(
        "SELECT id, shipment_id, status, location, description, occurred_at
         FROM shipment_tracking_events WHERE shipment_id = ?1 ORDER BY occurred_at, id",
    )?;
    shipments
        .into_iter()
        .map(|shipment| -> Result<ShipmentWithEvents> {
            let rows = stmt.query_map(params![shipment.id], event_from_row)?;
            Ok(ShipmentWithEvents {
                events: collect(rows)?,
                shipment,
            })
        })
        .collect()
}

fn record_change(
    conn: &Connection,
    order_id: &str,
    field: &str,
    from: Option<&str>,
    to: &str,
    note: Option<&str>,
    changed_by: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO order_status_history (id, order_id, field, from_status, to_status, note,
                                           changed_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            uuid::Uuid::new_v4().to_string(),
            order_id,
            field,
            from,
            to,
            note,
            changed_by,
            format_datetime(&Utc::now()),
        ],
    )?;
    Ok(())
}

/// Moves one status column of an order and records the change.
fn set_status<S: Lifecycle>(
    conn: &Connection,
    order_id: &str,
    from: S,
    to: S,
    note: Option<&str>,
    changed_by: Option<&str>,
) -> Result<()> {
    from.transition(to)?;
    conn.execute(
        &format!(
            "UPDATE orders SET {} = ?1, updated_at = ?2 WHERE id = ?3",
            S::FIELD
        ),
        params![to.to_string(), format_datetime(&Utc::now()), order_id],
    )?;
    record_change(
        conn,
        order_id,
        S::FIELD,
        Some(&from.to_string()),
        &to.to_string(),
        note,
        changed_by,
    )
}

/// Holds `quantity` units for an order. Rows with a `track` policy only succeed while
/// enough units are available; a missing row or `no_track` needs no reservation.
fn reserve(
    conn: &Connection,
    product_id: &str,
    variant_id: Option<&str>,
    sku: &str,
    quantity: i64,
) -> Result<()> {
    let rows = conn.execute(
        "UPDATE inventory SET reserved = reserved + ?1, updated_at = ?2
         WHERE product_id = ?3 AND COALESCE(variant_id, '') = COALESCE(?4, '')
           AND policy != 'no_track'
           AND (policy = 'track_but_allow_oversell' OR quantity - reserved >= ?1)",
        params![quantity, format_datetime(&Utc::now()), product_id, variant_id],
    )?;
    if rows > 0 {
        return Ok(());
    }

    match query_inventory(conn, product_id, variant_id)? {
        None => Ok(()),
        Some(inv) if inv.policy == InventoryPolicy::NoTrack => Ok(()),
        Some(inv) => Err(Error::InsufficientStock {
            sku: sku.to_string(),
            available: inv.available().max(0),
        }),
    }
}

/// Applies a reservation release or commit to every line of an order.
fn apply_inventory_effect(conn: &Connection, order_id: &str, effect: InventoryEffect) -> Result<()> {
    let sql = match effect {
        InventoryEffect::None => return Ok(()),
        InventoryEffect::Release => {
            "UPDATE inventory SET reserved = MAX(reserved - ?1, 0), updated_at = ?2
             WHERE product_id = ?3 AND COALESCE(variant_id, '') = COALESCE(?4, '')
               AND policy != 'no_track'"
        }
        InventoryEffect::Commit => {
            "UPDATE inventory SET quantity = MAX(quantity - ?1, 0),
                                  reserved = MAX(reserved - ?1, 0), updated_at = ?2
             WHERE product_id = ?3 AND COALESCE(variant_id, '') = COALESCE(?4, '')
               AND policy != 'no_track'"
        }
    };

    let now = format_datetime(&Utc::now());
    for item in query_items(conn, order_id)? {
        let Some(product_id) = item.product_id.as_deref() else {
            continue;
        };
        conn.execute(
            sql,
            params![item.quantity, now, product_id, item.variant_id],
        )?;
    }
    Ok(())
}

fn order_too_large() -> Error {
    Error::Validation("order total is too large".to_string())
}

fn move_order_status(
    conn: &Connection,
    order: &Order,
    to: OrderStatus,
    note: Option<&str>,
    changed_by: Option<&str>,
) -> Result<()> {
    set_status(conn, &order.id, order.status, to, note, changed_by)?;
    apply_inventory_effect(conn, &order.id, OrderStatus::inventory_effect(order.status, to))
}

/// Moves one payment through its lifecycle and mirrors the new status onto the
/// order. Payments are the only writer of `orders.payment_status`.
fn write_payment_status(
    conn: &Connection,
    payment: &Payment,
    status: PaymentStatus,
    transaction_ref: Option<&str>,
    changed_by: Option<&str>,
) -> Result<()> {
    payment.status.transition(status)?;
    let now = format_datetime(&Utc::now());
    conn.execute(
        "UPDATE payments SET status = ?1, transaction_ref = COALESCE(?2, transaction_ref),
                             updated_at = ?3
         WHERE id = ?4",
        params![status.as_str(), transaction_ref, now, payment.id],
    )?;

    let order = query_order(conn, &payment.order_id)?.ok_or(Error::NotFound)?;
    if order.payment_status != status {
        set_status(conn, &order.id, order.payment_status, status, None, changed_by)?;
    }
    Ok(())
}

/// Cancels every payment of the order that has not settled yet.
fn void_open_payments(conn: &Connection, order_id: &str, changed_by: Option<&str>) -> Result<()> {
    for payment in query_payments(conn, order_id)? {
        if matches!(
            payment.status,
            PaymentStatus::Pending | PaymentStatus::Authorized
        ) {
            write_payment_status(conn, &payment, PaymentStatus::Cancelled, None, changed_by)?;
        }
    }
    Ok(())
}

impl OrderStore for SqliteStore {
    fn place_order(&self, draft: &OrderDraft) -> Result<Order> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let lines = {
            let mut stmt = tx.prepare(LINE_QUERY)?;
            let rows = stmt.query_map(params![draft.cart_id], line_from_row)?;
            collect(rows)?
        };
        if lines.is_empty() {
            return Err(Error::Validation("cart is empty".to_string()));
        }
        if let Some(line) = lines
            .iter()
            .find(|l| l.product_status != ProductStatus::Active)
        {
            return Err(Error::Validation(format!(
                "{} is no longer available",
                line.product_name
            )));
        }

        let priced: Vec<PricedLine> = lines
            .iter()
            .map(|line| PricedLine {
                product_id: line.item.product_id.clone(),
                variant_id: line.item.variant_id.clone(),
                name: line.product_name.clone(),
                sku: line.sku.clone(),
                unit_price: line.unit_price,
                quantity: line.item.quantity,
            })
            .collect();

        let totals = compute_totals(&priced, draft.shipping_flat_rate, draft.tax_rate)
            .ok_or_else(order_too_large)?;

        for line in &priced {
            reserve(
                &tx,
                &line.product_id,
                line.variant_id.as_deref(),
                &line.sku,
                line.quantity,
            )?;
        }

        let created_at = format_datetime(&draft.created_at);

        tx.execute(
            "INSERT INTO orders (id, order_number, user_id, status, payment_status,
                                 fulfillment_status, currency, subtotal, shipping_amount,
                                 tax_amount, total, shipping_address, notes, created_at,
                                 updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            params![
                draft.id,
                draft.order_number,
                draft.user_id,
                OrderStatus::Pending.as_str(),
                PaymentStatus::Pending.as_str(),
                FulfillmentStatus::Unfulfilled.as_str(),
                draft.currency.code(),
                totals.subtotal.to_string(),
                totals.shipping.to_string(),
                totals.tax.to_string(),
                totals.total.to_string(),
                to_json(&draft.shipping_address)?,
                draft.notes,
                created_at,
            ],
        )?;

        for line in &priced {
            let line_total = line.line_total().ok_or_else(order_too_large)?;
            tx.execute(
                "INSERT INTO order_items (id, order_id, product_id, variant_id, product_name, sku,
                                          unit_price, quantity, total_price)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    draft.id,
                    line.product_id,
                    line.variant_id,
                    line.name,
                    line.sku,
                    line.unit_price.to_string(),
                    line.quantity,
                    line_total.to_string(),
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO payments (id, order_id, method, status, amount, currency, created_at,
                                   updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                uuid::Uuid::new_v4().to_string(),
                draft.id,
                draft.payment_method.as_str(),
                PaymentStatus::Pending.as_str(),
                totals.total.to_string(),
                draft.currency.code(),
                created_at,
            ],
        )?;

        record_change(
            &tx,
            &draft.id,
            OrderStatus::FIELD,
            None,
            OrderStatus::Pending.as_str(),
            None,
            Some(&draft.user_id),
        )?;

        tx.execute(
            "DELETE FROM cart_items WHERE cart_id = ?1",
            params![draft.cart_id],
        )?;

        let order = query_order(&tx, &draft.id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(order)
    }

    fn get_order(&self, id: &str) -> Result<Option<Order>> {
        query_order(&self.conn(), id)
    }

    fn get_order_detail(&self, id: &str) -> Result<Option<OrderDetail>> {
        let conn = self.conn();
        let Some(order) = query_order(&conn, id)? else {
            return Ok(None);
        };

        let items = query_items(&conn, id)?
            .into_iter()
            .map(|item| -> Result<OrderItemDetail> {
                let product = match item.product_id.as_deref() {
                    Some(product_id) => query_product_summary(&conn, product_id)?,
                    None => None,
                };
                Ok(OrderItemDetail { item, product })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(OrderDetail {
            items,
            payments: query_payments(&conn, id)?,
            shipments: query_shipments(&conn, id)?,
            order,
        }))
    }

    fn list_user_orders(&self, user_id: &str, cursor: &str, limit: i32) -> Result<Vec<Order>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 AND id > ?2
             ORDER BY id LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![user_id, cursor, limit], order_from_row)?;
        collect(rows)
    }

    fn list_orders(
        &self,
        status: Option<OrderStatus>,
        cursor: &str,
        limit: i32,
    ) -> Result<Vec<Order>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE (?1 IS NULL OR status = ?1) AND id > ?2
             ORDER BY id LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![status.map(OrderStatus::as_str), cursor, limit],
            order_from_row,
        )?;
        collect(rows)
    }

    fn list_order_items(&self, order_id: &str) -> Result<Vec<OrderItem>> {
        query_items(&self.conn(), order_id)
    }

    fn update_order_status(&self, order_id: &str, update: &StatusUpdate) -> Result<Order> {
        if update.status.is_none() && update.fulfillment_status.is_none() {
            return Err(Error::Validation("no status change requested".to_string()));
        }

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let order = query_order(&tx, order_id)?.ok_or(Error::NotFound)?;
        let note = update.note.as_deref();
        let changed_by = update.changed_by.as_deref();

        if let Some(next) = update.status {
            move_order_status(&tx, &order, next, note, changed_by)?;
            if next == OrderStatus::Cancelled {
                void_open_payments(&tx, order_id, changed_by)?;
            }
        }
        if let Some(next) = update.fulfillment_status {
            set_status(&tx, order_id, order.fulfillment_status, next, note, changed_by)?;
        }

        let updated = query_order(&tx, order_id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(updated)
    }

    fn cancel_order(
        &self,
        order_id: &str,
        allowed_from: &[OrderStatus],
        note: Option<&str>,
        changed_by: Option<&str>,
    ) -> Result<Order> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let order = query_order(&tx, order_id)?.ok_or(Error::NotFound)?;
        if !allowed_from.contains(&order.status) {
            return Err(Error::InvalidTransition {
                field: OrderStatus::FIELD,
                from: order.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }

        move_order_status(&tx, &order, OrderStatus::Cancelled, note, changed_by)?;
        void_open_payments(&tx, order_id, changed_by)?;

        let updated = query_order(&tx, order_id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(updated)
    }

    fn list_status_history(&self, order_id: &str) -> Result<Vec<StatusChange>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, order_id, field, from_status, to_status, note, changed_by, created_at
             FROM order_status_history WHERE order_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![order_id], |row| {
            Ok(StatusChange {
                id: row.get(0)?,
                order_id: row.get(1)?,
                field: row.get(2)?,
                from_status: row.get(3)?,
                to_status: row.get(4)?,
                note: row.get(5)?,
                changed_by: row.get(6)?,
                created_at: get_datetime(row, 7)?,
            })
        })?;
        collect(rows)
    }

    fn get_payment(&self, id: &str) -> Result<Option<Payment>> {
        query_payment(&self.conn(), id)
    }

    fn list_payments(&self, order_id: &str) -> Result<Vec<Payment>> {
        query_payments(&self.conn(), order_id)
    }

    fn update_payment_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        transaction_ref: Option<&str>,
        changed_by: Option<&str>,
    ) -> Result<Payment> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let payment = query_payment(&tx, payment_id)?.ok_or(Error::NotFound)?;
        write_payment_status(&tx, &payment, status, transaction_ref, changed_by)?;

        let order = query_order(&tx, &payment.order_id)?.ok_or(Error::NotFound)?;
        if status == PaymentStatus::Paid && order.status == OrderStatus::Pending {
            move_order_status(&tx, &order, OrderStatus::Paid, None, changed_by)?;
        }

        let updated = query_payment(&tx, payment_id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(updated)
    }

    fn create_shipment(&self, shipment: &Shipment, changed_by: Option<&str>) -> Result<Shipment> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let order = query_order(&tx, &shipment.order_id)?.ok_or(Error::NotFound)?;
        move_order_status(&tx, &order, OrderStatus::Shipped, None, changed_by)?;
        set_status(
            &tx,
            &order.id,
            order.fulfillment_status,
            FulfillmentStatus::Fulfilled,
            None,
            changed_by,
        )?;

        let shipped_at = shipment.shipped_at.unwrap_or_else(Utc::now);
        tx.execute(
            "INSERT INTO shipments (id, order_id, carrier, tracking_number, status, shipped_at,
                                    delivered_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?8)",
            params![
                shipment.id,
                shipment.order_id,
                shipment.carrier,
                shipment.tracking_number,
                shipment.status.as_str(),
                format_datetime(&shipped_at),
                format_datetime(&shipment.created_at),
                format_datetime(&shipment.updated_at),
            ],
        )?;

        let stored = query_shipment(&tx, &shipment.id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(stored)
    }

    fn get_shipment(&self, id: &str) -> Result<Option<Shipment>> {
        query_shipment(&self.conn(), id)
    }

    fn list_shipments(&self, order_id: &str) -> Result<Vec<ShipmentWithEvents>> {
        query_shipments(&self.conn(), order_id)
    }

    fn add_tracking_event(
        &self,
        event: &TrackingEvent,
        changed_by: Option<&str>,
    ) -> Result<Shipment> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let shipment = query_shipment(&tx, &event.shipment_id)?.ok_or(Error::NotFound)?;
        shipment.status.transition(event.status)?;

        tx.execute(
            "INSERT INTO shipment_tracking_events (id, shipment_id, status, location, description,
                                                   occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id,
                event.shipment_id,
                event.status.as_str(),
                event.location,
                event.description,
                format_datetime(&event.occurred_at),
            ],
        )?;

        let delivered_at = (event.status == ShipmentStatus::Delivered)
            .then(|| format_datetime(&event.occurred_at));
        tx.execute(
            "UPDATE shipments SET status = ?1, delivered_at = COALESCE(?2, delivered_at),
                                  updated_at = ?3
             WHERE id = ?4",
            params![
                event.status.as_str(),
                delivered_at,
                format_datetime(&Utc::now()),
                shipment.id,
            ],
        )?;

        if event.status == ShipmentStatus::Delivered {
            let order = query_order(&tx, &shipment.order_id)?.ok_or(Error::NotFound)?;
            if order.status.can_transition_to(OrderStatus::Delivered) {
                move_order_status(&tx, &order, OrderStatus::Delivered, None, changed_by)?;
            }
        }

        let updated = query_shipment(&tx, &shipment.id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(updated)
    }
}
