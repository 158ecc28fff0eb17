//! Order Aggregate
//!
//! Owns the order lifecycle (`status`), the courier-side lifecycle
//! (`courier_status`) and the append-only courier history that backs the
//! dispatch guard.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{Money, MoneyError, OrderNumber, Phone};

/// Courier name recorded on history entries written by administrative status updates.
pub const ADMIN_UPDATE_COURIER: &str = "ADMIN_UPDATE";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: Uuid,
    order_number: OrderNumber,
    customer: Customer,
    total: Money,
    delivery_charge: Money,
    pay_to_rider: Money,
    status: OrderStatus,
    courier_status: CourierStatus,
    courier_tracking_code: Option<String>,
    items: Vec<LineItem>,
    courier_history: Vec<CourierHistoryEntry>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<OrderEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "camelCase")] pub struct Customer { pub name: String, pub phone: Phone, pub address: String, pub note: Option<String> }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    #[serde(default)]
    pub variant_options: BTreeMap<String, String>,
}

impl LineItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

/// One row of the courier audit trail. Entries are only ever appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierHistoryEntry {
    pub courier: String,
    pub status: String,
    pub tracking_code: Option<String>,
    pub is_pickup_requested: bool,
    pub requested_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)] #[serde(rename_all = "SCREAMING_SNAKE_CASE")] pub enum OrderStatus { #[default] Pending, Approved, Processing, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)] #[serde(rename_all = "SCREAMING_SNAKE_CASE")] pub enum CourierStatus { #[default] NotRequested, Requested, Accepted, Delivered, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING", Self::Approved => "APPROVED", Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED", Self::Delivered => "DELIVERED", Self::Cancelled => "CANCELLED",
        }
    }
}

impl CourierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequested => "NOT_REQUESTED", Self::Requested => "REQUESTED", Self::Accepted => "ACCEPTED",
            Self::Delivered => "DELIVERED", Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl fmt::Display for CourierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for OrderStatus {
    type Err = ParseStatusError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Pending, Self::Approved, Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled]
            .into_iter().find(|v| v.as_str().eq_ignore_ascii_case(s.trim())).ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

impl FromStr for CourierStatus {
    type Err = ParseStatusError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::NotRequested, Self::Requested, Self::Accepted, Self::Delivered, Self::Cancelled]
            .into_iter().find(|v| v.as_str().eq_ignore_ascii_case(s.trim())).ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Administrative change request. `status` is always present; every other
/// field is applied only when `Some`.
#[derive(Clone, Debug, Default)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    pub customer_name: Option<String>,
    pub phone: Option<Phone>,
    pub address: Option<String>,
    pub note: Option<String>,
    pub delivery_charge: Option<Decimal>,
    pub pay_to_rider: Option<Decimal>,
}

impl StatusUpdate {
    pub fn to(status: OrderStatus) -> Self { Self { status, ..Default::default() } }
}

/// Header field groups touched by a change. Stores write only these groups
/// plus the history append.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangedFields { pub customer: bool, pub amounts: bool, pub status: bool, pub courier: bool, pub items: bool }

impl ChangedFields {
    pub const COURIER: Self = Self { customer: false, amounts: false, status: false, courier: true, items: false };
    pub const ITEMS: Self = Self { customer: false, amounts: true, status: false, courier: false, items: true };

    pub fn any(&self) -> bool { self.customer || self.amounts || self.status || self.courier || self.items }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)] pub struct UpdateOutcome { pub changed: bool, pub fields: ChangedFields, pub audit_appended: bool }

/// Everything needed to rebuild an order from storage.
pub(crate) struct OrderParts {
    pub id: Uuid,
    pub order_number: OrderNumber,
    pub customer: Customer,
    pub total: Money,
    pub delivery_charge: Money,
    pub pay_to_rider: Money,
    pub status: OrderStatus,
    pub courier_status: CourierStatus,
    pub courier_tracking_code: Option<String>,
    pub items: Vec<LineItem>,
    pub courier_history: Vec<CourierHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn create(order_number: OrderNumber, customer: Customer, items: Vec<LineItem>, delivery_charge: Money, pay_to_rider: Money) -> Result<Self, OrderError> {
        if items.is_empty() { return Err(OrderError::NoItems); }
        if let Some(item) = items.iter().find(|i| i.quantity == 0) { return Err(OrderError::InvalidQuantity(item.product_id)); }
        if delivery_charge.is_negative() || pay_to_rider.is_negative() { return Err(OrderError::NegativeAmount); }
        let total = Self::compute_total(&items, &delivery_charge)?;
        let now = Utc::now();
        let mut order = Self {
            id: Uuid::now_v7(), order_number, customer, total, delivery_charge, pay_to_rider,
            status: OrderStatus::Pending, courier_status: CourierStatus::NotRequested, courier_tracking_code: None,
            items, courier_history: vec![], created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(OrderEvent::Created { order_id: order.id, order_number });
        Ok(order)
    }

    pub(crate) fn restore(p: OrderParts) -> Self {
        Self {
            id: p.id, order_number: p.order_number, customer: p.customer, total: p.total,
            delivery_charge: p.delivery_charge, pay_to_rider: p.pay_to_rider, status: p.status,
            courier_status: p.courier_status, courier_tracking_code: p.courier_tracking_code, items: p.items,
            courier_history: p.courier_history, created_at: p.created_at, updated_at: p.updated_at, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> OrderNumber { self.order_number }
    pub fn customer(&self) -> &Customer { &self.customer }
    pub fn total(&self) -> &Money { &self.total }
    pub fn delivery_charge(&self) -> &Money { &self.delivery_charge }
    pub fn pay_to_rider(&self) -> &Money { &self.pay_to_rider }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn courier_status(&self) -> CourierStatus { self.courier_status }
    pub fn courier_tracking_code(&self) -> Option<&str> { self.courier_tracking_code.as_deref() }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn courier_history(&self) -> &[CourierHistoryEntry] { &self.courier_history }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn item_count(&self) -> u32 { self.items.iter().map(|i| i.quantity).sum() }

    /// True once any courier accepted a pickup request for this order.
    pub fn has_pickup_request(&self) -> bool { self.courier_history.iter().any(|h| h.is_pickup_requested) }

    /// Dispatch guard, evaluated before any courier call. `strict` additionally
    /// rejects orders whose courier status already moved past NOT_REQUESTED.
    pub fn ensure_dispatchable(&self, strict: bool) -> Result<(), OrderError> {
        if self.has_pickup_request() { return Err(OrderError::AlreadyDispatched); }
        if strict && self.courier_status != CourierStatus::NotRequested {
            return Err(OrderError::CourierAlreadyEngaged(self.courier_status));
        }
        Ok(())
    }

    /// Records a successful pickup request. Callers must have passed the guard.
    pub fn record_dispatch(&mut self, courier: &str, tracking_code: &str, at: DateTime<Utc>) {
        self.courier_status = CourierStatus::Requested;
        self.courier_tracking_code = Some(tracking_code.to_string());
        self.courier_history.push(CourierHistoryEntry {
            courier: courier.to_string(),
            status: CourierStatus::Requested.as_str().to_string(),
            tracking_code: Some(tracking_code.to_string()),
            is_pickup_requested: true,
            requested_at: at,
        });
        self.updated_at = at;
        self.raise_event(OrderEvent::Dispatched { order_id: self.id, courier: courier.to_string(), tracking_code: tracking_code.to_string() });
    }

    /// Applies an administrative change. Any status may follow any other;
    /// only the courier-side effects depend on the target.
    pub fn apply_update(&mut self, update: StatusUpdate, at: DateTime<Utc>) -> Result<UpdateOutcome, OrderError> {
        let mut customer = self.customer.clone();
        if let Some(name) = update.customer_name { customer.name = name; }
        if let Some(phone) = update.phone { customer.phone = phone; }
        if let Some(address) = update.address { customer.address = address; }
        if let Some(note) = update.note { customer.note = if note.trim().is_empty() { None } else { Some(note) }; }
        let customer_changed = customer != self.customer;
        if customer_changed && self.status == OrderStatus::Delivered { return Err(OrderError::CustomerLocked); }

        let currency = self.total.currency().to_string();
        let delivery_charge = update.delivery_charge.map(|d| Money::new(d, &currency)).unwrap_or_else(|| self.delivery_charge.clone());
        if delivery_charge.is_negative() { return Err(OrderError::NegativeAmount); }
        let total = Self::compute_total(&self.items, &delivery_charge)?;
        let pay_to_rider = self.collectable_for(&total, update.pay_to_rider.map(|d| Money::new(d, &currency)));
        if pay_to_rider.is_negative() { return Err(OrderError::NegativeAmount); }
        let amounts_changed = delivery_charge != self.delivery_charge || pay_to_rider != self.pay_to_rider;

        let previous = self.status;
        let target = update.status;
        let (courier_status, tracking_code) = match target {
            OrderStatus::Cancelled => (CourierStatus::Cancelled, None),
            OrderStatus::Delivered => (CourierStatus::Delivered, self.courier_tracking_code.clone()),
            OrderStatus::Shipped if self.courier_status == CourierStatus::NotRequested => (CourierStatus::Requested, self.courier_tracking_code.clone()),
            _ => (self.courier_status, self.courier_tracking_code.clone()),
        };
        let status_changed = target != previous;
        let courier_changed = courier_status != self.courier_status || tracking_code != self.courier_tracking_code;

        let fields = ChangedFields { customer: customer_changed, amounts: amounts_changed, status: status_changed, courier: courier_changed, items: false };
        if !fields.any() {
            return Ok(UpdateOutcome { changed: false, fields, audit_appended: false });
        }

        if amounts_changed {
            self.total = total;
            self.delivery_charge = delivery_charge;
            self.pay_to_rider = pay_to_rider;
        }
        self.customer = customer;
        self.status = target;
        self.courier_status = courier_status;
        self.courier_tracking_code = tracking_code;

        // Resubmitting the current status only re-applies its side effects; it
        // is audited once per (status, ADMIN_UPDATE) pair.
        let already_audited = self.courier_history.iter().any(|h| h.courier == ADMIN_UPDATE_COURIER && h.status == target.as_str());
        let audit_appended = if status_changed || (courier_changed && !already_audited) {
            self.courier_history.push(CourierHistoryEntry {
                courier: ADMIN_UPDATE_COURIER.to_string(),
                status: target.as_str().to_string(),
                tracking_code: None,
                is_pickup_requested: false,
                requested_at: at,
            });
            true
        } else { false };

        self.updated_at = at;
        if status_changed || courier_changed {
            self.raise_event(OrderEvent::StatusChanged { order_id: self.id, from: previous, to: target, courier_status: self.courier_status });
        }
        Ok(UpdateOutcome { changed: true, fields, audit_appended })
    }

    /// Line items are frozen once the order leaves PENDING. `pay_to_rider`
    /// overrides the cash to collect; without it the amount follows the new
    /// total when it matched the old one.
    pub fn replace_items(&mut self, items: Vec<LineItem>, pay_to_rider: Option<Money>) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending { return Err(OrderError::ItemsLocked(self.status)); }
        if items.is_empty() { return Err(OrderError::NoItems); }
        if let Some(item) = items.iter().find(|i| i.quantity == 0) { return Err(OrderError::InvalidQuantity(item.product_id)); }
        let total = Self::compute_total(&items, &self.delivery_charge)?;
        let pay_to_rider = self.collectable_for(&total, pay_to_rider);
        if pay_to_rider.is_negative() { return Err(OrderError::NegativeAmount); }
        self.pay_to_rider = pay_to_rider;
        self.total = total;
        self.items = items;
        self.touch();
        Ok(())
    }

    pub fn is_deletable(&self) -> bool {
        match self.status {
            OrderStatus::Shipped | OrderStatus::Delivered | OrderStatus::Approved => false,
            OrderStatus::Pending => !self.has_pickup_request() && self.courier_status == CourierStatus::NotRequested,
            OrderStatus::Processing | OrderStatus::Cancelled => true,
        }
    }

    /// Marks the order for removal; the store performs the physical delete.
    pub fn delete(&mut self) -> Result<(), OrderError> {
        if !self.is_deletable() { return Err(OrderError::NotDeletable(self.status)); }
        self.raise_event(OrderEvent::Deleted { order_id: self.id });
        Ok(())
    }

    fn compute_total(items: &[LineItem], delivery_charge: &Money) -> Result<Money, OrderError> {
        let subtotal = items.iter().try_fold(Money::zero(delivery_charge.currency()), |acc, i| acc.add(&i.line_total()))?;
        Ok(subtotal.add(delivery_charge)?)
    }

    fn collectable_for(&self, new_total: &Money, explicit: Option<Money>) -> Money {
        explicit.unwrap_or_else(|| if self.pay_to_rider == self.total { new_total.clone() } else { self.pay_to_rider.clone() })
    }

    /// Copies the groups named in `fields` from `source` and appends `appended`
    /// to the history. Everything else keeps its current value.
    pub(crate) fn merge(&mut self, source: &Order, fields: ChangedFields, appended: &[CourierHistoryEntry]) {
        if fields.customer { self.customer = source.customer.clone(); }
        if fields.amounts {
            self.total = source.total.clone();
            self.delivery_charge = source.delivery_charge.clone();
            self.pay_to_rider = source.pay_to_rider.clone();
        }
        if fields.status { self.status = source.status; }
        if fields.courier {
            self.courier_status = source.courier_status;
            self.courier_tracking_code = source.courier_tracking_code.clone();
        }
        if fields.items { self.items = source.items.clone(); }
        self.courier_history.extend_from_slice(appended);
        self.updated_at = source.updated_at;
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order must contain at least one item")]
    NoItems,
    #[error("Item {0} has zero quantity")]
    InvalidQuantity(Uuid),
    #[error("Amounts cannot be negative")]
    NegativeAmount,
    #[error("Already pickup requested")]
    AlreadyDispatched,
    #[error("Courier already engaged (courier status {0})")]
    CourierAlreadyEngaged(CourierStatus),
    #[error("Customer details cannot change after delivery")]
    CustomerLocked,
    #[error("Items cannot change once the order is {0}")]
    ItemsLocked(OrderStatus),
    #[error("Order in status {0} cannot be deleted")]
    NotDeletable(OrderStatus),
    #[error(transparent)]
    Money(#[from] MoneyError),
}
