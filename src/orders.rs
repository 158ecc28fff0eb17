//! Order administration: creation, reads, status updates and deletion.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{ChangedFields, Customer, LineItem, Order, StatusUpdate};
use crate::domain::value_objects::{Money, OrderNumber, Phone};
use crate::error::{AppError, AppResult};
use crate::events::EventPublisher;
use crate::store::{OrderStore, Page, StoreError};

/// Attempts at drawing an unused short order number before giving up.
pub const MAX_ORDER_NUMBER_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    #[validate(length(min = 1, max = 120))]
    pub customer_name: String,
    #[validate(length(min = 1, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 500))]
    pub address: String,
    pub note: Option<String>,
    #[serde(default)]
    pub delivery_charge: Decimal,
    /// Cash the rider collects; defaults to the order total.
    pub pay_to_rider: Option<Decimal>,
    pub items: Vec<NewLineItem>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewLineItem {
    pub product_id: Uuid,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 1))]
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub variant_options: BTreeMap<String, String>,
}

type NumberSource = Arc<dyn Fn() -> OrderNumber + Send + Sync>;

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    next_number: NumberSource,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher, next_number: Arc::new(|| OrderNumber::random(&mut rand::thread_rng())) }
    }

    pub fn with_number_source(mut self, source: impl Fn() -> OrderNumber + Send + Sync + 'static) -> Self {
        self.next_number = Arc::new(source);
        self
    }

    /// Creates the order and its line items in one insert, retrying the short
    /// number on collision.
    pub async fn create(&self, input: NewOrder) -> AppResult<Order> {
        input.validate()?;
        let phone = Phone::new(input.phone.clone()).map_err(|e| AppError::Validation(e.to_string()))?;
        let customer = Customer {
            name: input.customer_name.trim().to_string(),
            phone,
            address: input.address.trim().to_string(),
            note: input.note.clone().filter(|n| !n.trim().is_empty()),
        };
        let items = line_items(&input.items)?;
        let delivery_charge = Money::bdt(input.delivery_charge);
        let subtotal: Decimal = items.iter().map(|i| i.line_total().amount()).sum();
        let pay_to_rider = Money::bdt(input.pay_to_rider.unwrap_or(subtotal + input.delivery_charge));

        for attempt in 1..=MAX_ORDER_NUMBER_ATTEMPTS {
            let number = (self.next_number)();
            if self.store.order_number_exists(number).await? {
                tracing::debug!(%number, attempt, "order number taken, drawing again");
                continue;
            }
            let mut order = Order::create(number, customer.clone(), items.clone(), delivery_charge.clone(), pay_to_rider.clone())?;
            match self.store.insert(&order).await {
                Ok(()) => {
                    tracing::info!(order_id = %order.id(), order_number = %number, total = %order.total().amount(), "order created");
                    self.publisher.publish(order.take_events()).await;
                    return Ok(order);
                }
                // Lost a race for the number between the check and the insert.
                Err(StoreError::DuplicateOrderNumber(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        tracing::error!(attempts = MAX_ORDER_NUMBER_ATTEMPTS, "could not allocate a unique order number");
        Err(AppError::Conflict(format!("Could not allocate a unique order number after {MAX_ORDER_NUMBER_ATTEMPTS} attempts")))
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Order> {
        self.store.get(id).await?.ok_or(AppError::NotFound(id))
    }

    pub async fn list(&self, page: Page) -> AppResult<(Vec<Order>, i64)> {
        Ok(self.store.list(page).await?)
    }

    /// Applies an administrative status change. Unchanged requests succeed
    /// without writing.
    pub async fn update_status(&self, id: Uuid, update: StatusUpdate) -> AppResult<Order> {
        let mut order = self.get(id).await?;
        let before = order.courier_history().len();
        let previous = order.status();
        let outcome = order.apply_update(update, Utc::now())?;
        if !outcome.changed {
            tracing::debug!(order_id = %id, status = %order.status(), "status update changed nothing");
            return Ok(order);
        }
        self.store.update(&order, outcome.fields, &order.courier_history()[before..]).await?;
        self.publisher.publish(order.take_events()).await;
        tracing::info!(order_id = %id, from = %previous, to = %order.status(), courier_status = %order.courier_status(), audited = outcome.audit_appended, "order updated");
        self.get(id).await
    }

    /// Swaps the line items of a pending order and recomputes its total and,
    /// unless `pay_to_rider` is given, the cash to collect.
    pub async fn replace_items(&self, id: Uuid, items: &[NewLineItem], pay_to_rider: Option<Decimal>) -> AppResult<Order> {
        let items = line_items(items)?;
        let mut order = self.get(id).await?;
        order.replace_items(items, pay_to_rider.map(Money::bdt))?;
        self.store.update(&order, ChangedFields::ITEMS, &[]).await?;
        tracing::info!(order_id = %id, items = order.item_count(), total = %order.total().amount(), pay_to_rider = %order.pay_to_rider().amount(), "order items replaced");
        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let mut order = self.get(id).await?;
        if let Err(e) = order.delete() {
            tracing::warn!(order_id = %id, status = %order.status(), "delete refused");
            return Err(e.into());
        }
        self.store.delete(id).await?;
        self.publisher.publish(order.take_events()).await;
        tracing::info!(order_id = %id, "order deleted");
        Ok(())
    }
}

fn line_items(input: &[NewLineItem]) -> AppResult<Vec<LineItem>> {
    if input.is_empty() { return Err(AppError::Validation("items must not be empty".into())); }
    for item in input { item.validate()?; }
    if input.iter().any(|i| i.unit_price.is_sign_negative()) {
        return Err(AppError::Validation("unitPrice cannot be negative".into()));
    }
    Ok(input.iter().map(|i| LineItem {
        id: Uuid::now_v7(),
        product_id: i.product_id,
        name: i.name.clone(),
        quantity: i.quantity,
        unit_price: Money::bdt(i.unit_price),
        variant_options: i.variant_options.clone(),
    }).collect())
}
