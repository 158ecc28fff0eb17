//! Postgres-backed order store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{OrderStore, Page, StoreError};
use crate::domain::aggregates::order::OrderParts;
use crate::domain::aggregates::{ChangedFields, CourierHistoryEntry, CourierStatus, Customer, LineItem, Order, OrderStatus, ParseStatusError};
use crate::domain::value_objects::{Money, OrderNumber, Phone};

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: i16,
    customer_name: String,
    phone: String,
    address: String,
    note: Option<String>,
    currency: String,
    total: Decimal,
    delivery_charge: Decimal,
    pay_to_rider: Decimal,
    status: String,
    courier_status: String,
    courier_tracking_code: Option<String>,
    courier_history: Json<Vec<CourierHistoryEntry>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    name: String,
    quantity: i32,
    unit_price: Decimal,
    variant_options: Json<BTreeMap<String, String>>,
}

const ORDER_COLUMNS: &str = "id, order_number, customer_name, phone, address, note, currency, total, delivery_charge, pay_to_rider, status, courier_status, courier_tracking_code, courier_history, created_at, updated_at";

#[derive(Clone)]
pub struct PgOrderStore { pool: PgPool }

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<ItemRow>>, StoreError> {
        let rows = sqlx::query_as::<_, ItemRow>("SELECT id, order_id, product_id, name, quantity, unit_price, variant_options FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position")
            .bind(order_ids).fetch_all(&self.pool).await?;
        let mut by_order: HashMap<Uuid, Vec<ItemRow>> = HashMap::new();
        for row in rows { by_order.entry(row.order_id).or_default().push(row); }
        Ok(by_order)
    }

    async fn hydrate(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut items = self.load_items(&ids).await?;
        rows.into_iter().map(|row| { let its = items.remove(&row.id).unwrap_or_default(); into_order(row, its) }).collect()
    }
}

fn into_order(row: OrderRow, items: Vec<ItemRow>) -> Result<Order, StoreError> {
    let corrupt = |what: String| StoreError::Corrupt(format!("order {}: {what}", row.id));
    let order_number = u16::try_from(row.order_number).ok().and_then(|n| OrderNumber::new(n).ok()).ok_or_else(|| corrupt(format!("order number {}", row.order_number)))?;
    let phone = Phone::new(row.phone.clone()).map_err(|e| corrupt(e.to_string()))?;
    let status: OrderStatus = row.status.parse().map_err(|e: ParseStatusError| corrupt(e.to_string()))?;
    let courier_status: CourierStatus = row.courier_status.parse().map_err(|e: ParseStatusError| corrupt(e.to_string()))?;
    let items = items.into_iter().map(|i| {
        let quantity = u32::try_from(i.quantity).map_err(|_| corrupt(format!("item {} quantity {}", i.id, i.quantity)))?;
        Ok(LineItem { id: i.id, product_id: i.product_id, name: i.name, quantity, unit_price: Money::new(i.unit_price, &row.currency), variant_options: i.variant_options.0 })
    }).collect::<Result<Vec<_>, StoreError>>()?;

    Ok(Order::restore(OrderParts {
        id: row.id,
        order_number,
        customer: Customer { name: row.customer_name, phone, address: row.address, note: row.note },
        total: Money::new(row.total, &row.currency),
        delivery_charge: Money::new(row.delivery_charge, &row.currency),
        pay_to_rider: Money::new(row.pay_to_rider, &row.currency),
        status,
        courier_status,
        courier_tracking_code: row.courier_tracking_code,
        items,
        courier_history: row.courier_history.0,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

async fn insert_items(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), StoreError> {
    for (position, item) in order.items().iter().enumerate() {
        sqlx::query("INSERT INTO order_items (id, order_id, position, product_id, name, quantity, unit_price, variant_options) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)")
            .bind(item.id).bind(order.id()).bind(position as i32).bind(item.product_id).bind(&item.name)
            .bind(item.quantity as i32).bind(item.unit_price.amount()).bind(Json(&item.variant_options))
            .execute(&mut **tx).await?;
    }
    Ok(())
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let customer = order.customer();
        let inserted = sqlx::query("INSERT INTO orders (id, order_number, customer_name, phone, address, note, currency, total, delivery_charge, pay_to_rider, status, courier_status, courier_tracking_code, courier_history, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)")
            .bind(order.id()).bind(order.order_number().value() as i16).bind(&customer.name).bind(customer.phone.as_str())
            .bind(&customer.address).bind(&customer.note).bind(order.total().currency()).bind(order.total().amount())
            .bind(order.delivery_charge().amount()).bind(order.pay_to_rider().amount()).bind(order.status().as_str())
            .bind(order.courier_status().as_str()).bind(order.courier_tracking_code()).bind(Json(order.courier_history()))
            .bind(order.created_at()).bind(order.updated_at())
            .execute(&mut *tx).await;
        if let Err(sqlx::Error::Database(db)) = &inserted {
            if db.is_unique_violation() { return Err(StoreError::DuplicateOrderNumber(order.order_number())); }
        }
        inserted?;

        insert_items(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn order_number_exists(&self, number: OrderNumber) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM orders WHERE order_number = $1)")
            .bind(number.value() as i16).fetch_one(&self.pool).await?;
        Ok(exists)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ANY($1)"))
            .bind(ids).fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }

    async fn list(&self, page: Page) -> Result<(Vec<Order>, i64), StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"))
            .bind(i64::from(page.per_page)).bind(page.offset() as i64).fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders").fetch_one(&self.pool).await?;
        Ok((self.hydrate(rows).await?, total.0))
    }

    async fn update(&self, order: &Order, fields: ChangedFields, appended: &[CourierHistoryEntry]) -> Result<(), StoreError> {
        let customer = order.customer();
        let mut query = QueryBuilder::<Postgres>::new("UPDATE orders SET updated_at = ");
        query.push_bind(order.updated_at()).push(", courier_history = courier_history || ").push_bind(Json(appended));
        if fields.customer {
            query.push(", customer_name = ").push_bind(&customer.name).push(", phone = ").push_bind(customer.phone.as_str())
                .push(", address = ").push_bind(&customer.address).push(", note = ").push_bind(&customer.note);
        }
        if fields.amounts {
            query.push(", total = ").push_bind(order.total().amount()).push(", delivery_charge = ").push_bind(order.delivery_charge().amount())
                .push(", pay_to_rider = ").push_bind(order.pay_to_rider().amount());
        }
        if fields.status { query.push(", status = ").push_bind(order.status().as_str()); }
        if fields.courier {
            query.push(", courier_status = ").push_bind(order.courier_status().as_str())
                .push(", courier_tracking_code = ").push_bind(order.courier_tracking_code());
        }
        query.push(" WHERE id = ").push_bind(order.id());

        let mut tx = self.pool.begin().await?;
        let result = query.build().execute(&mut *tx).await?;
        if result.rows_affected() == 0 { return Err(StoreError::NotFound(order.id())); }
        if fields.items {
            sqlx::query("DELETE FROM order_items WHERE order_id = $1").bind(order.id()).execute(&mut *tx).await?;
            insert_items(&mut tx, order).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        // order_items cascade
        let result = sqlx::query("DELETE FROM orders WHERE id = $1").bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 { return Err(StoreError::NotFound(id)); }
        Ok(())
    }
}
