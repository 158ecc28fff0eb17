//! Order persistence.
//!
//! Stores treat the courier history as append-only: `update` appends the given
//! entries and never rewrites earlier ones. Header columns are written per
//! field group, so writers that loaded the order at different times only
//! overwrite what they actually changed.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::aggregates::{ChangedFields, CourierHistoryEntry, Order};
use crate::domain::value_objects::OrderNumber;

pub mod postgres;

pub use postgres::PgOrderStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    NotFound(Uuid),
    #[error("order number {0} is already taken")]
    DuplicateOrderNumber(OrderNumber),
    #[error("stored order is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct Page { pub page: u32, pub per_page: u32 }

impl Page {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self { page: page.unwrap_or(1).max(1), per_page: per_page.unwrap_or(20).clamp(1, 100) }
    }
    pub fn offset(&self) -> u64 { u64::from(self.page - 1) * u64::from(self.per_page) }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts the order together with its line items.
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    async fn order_number_exists(&self, number: OrderNumber) -> Result<bool, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Batch read; missing ids are simply absent from the result.
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Order>, StoreError>;

    /// Newest first, with the total count.
    async fn list(&self, page: Page) -> Result<(Vec<Order>, i64), StoreError>;

    /// Writes the groups named in `fields` from `order` and appends `appended`
    /// to its stored history in a single write. Other columns keep their
    /// stored values.
    async fn update(&self, order: &Order, fields: ChangedFields, appended: &[CourierHistoryEntry]) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Process-local store used for tests and when no database is configured.
#[derive(Default)]
pub struct MemoryOrderStore { orders: RwLock<HashMap<Uuid, Order>> }

impl MemoryOrderStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        if orders.values().any(|o| o.order_number() == order.order_number()) {
            return Err(StoreError::DuplicateOrderNumber(order.order_number()));
        }
        let mut stored = order.clone();
        stored.take_events();
        orders.insert(order.id(), stored);
        Ok(())
    }

    async fn order_number_exists(&self, number: OrderNumber) -> Result<bool, StoreError> {
        Ok(self.orders.read().await.values().any(|o| o.order_number() == number))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(ids.iter().filter_map(|id| orders.get(id).cloned()).collect())
    }

    async fn list(&self, page: Page) -> Result<(Vec<Order>, i64), StoreError> {
        let orders = self.orders.read().await;
        let mut all: Vec<&Order> = orders.values().collect();
        all.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then_with(|| b.id().cmp(&a.id())));
        let total = all.len() as i64;
        let data = all.into_iter().skip(page.offset() as usize).take(page.per_page as usize).cloned().collect();
        Ok((data, total))
    }

    async fn update(&self, order: &Order, fields: ChangedFields, appended: &[CourierHistoryEntry]) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        let stored = orders.get_mut(&order.id()).ok_or(StoreError::NotFound(order.id()))?;
        stored.merge(order, fields, appended);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.orders.write().await.remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
    }
}
