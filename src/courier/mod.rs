//! Courier network adapters.
//!
//! Each provider turns a [`DispatchRequest`] into its own HTTP call. The
//! orchestrators only see the [`CourierProvider`] trait.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::domain::value_objects::OrderNumber;
use crate::retry::IsTransient;

pub mod pathao;
pub mod response;
pub mod steadfast;
pub mod token;

pub use pathao::{PathaoClient, PathaoConfig};
pub use steadfast::{SteadfastClient, SteadfastConfig};
pub use token::TokenCache;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourierKind { Pathao, Steadfast }

impl CourierKind {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pathao => "pathao", Self::Steadfast => "steadfast" }
    }
    /// Name written to the courier history.
    pub fn label(&self) -> &'static str {
        match self { Self::Pathao => "PATHAO", Self::Steadfast => "STEADFAST" }
    }
}

impl fmt::Display for CourierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for CourierKind {
    type Err = CourierError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pathao" => Ok(Self::Pathao),
            "steadfast" => Ok(Self::Steadfast),
            other => Err(CourierError::UnknownCourier(other.to_string())),
        }
    }
}

/// Provider-agnostic pickup request built from an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DispatchRequest {
    pub order_id: Uuid,
    pub order_number: OrderNumber,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub recipient_address: String,
    pub amount_to_collect: Decimal,
    pub item_quantity: u32,
    pub item_weight_kg: Decimal,
    pub item_description: String,
    pub note: String,
}

impl DispatchRequest {
    pub fn from_order(order: &Order, item_weight_kg: Decimal) -> Self {
        let customer = order.customer();
        let note = match customer.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(extra) => format!("Order #{} | {}", order.order_number(), extra),
            None => format!("Order #{}", order.order_number()),
        };
        let item_description = order.items().iter().map(|i| format!("{} x{}", i.name, i.quantity)).collect::<Vec<_>>().join(", ");
        Self {
            order_id: order.id(),
            order_number: order.order_number(),
            recipient_name: customer.name.clone(),
            recipient_phone: customer.phone.to_string(),
            recipient_address: customer.address.clone(),
            amount_to_collect: order.pay_to_rider().amount(),
            item_quantity: order.item_count().max(1),
            item_weight_kg,
            item_description,
            note,
        }
    }

    /// Merchant-side reference sent to providers.
    pub fn invoice(&self) -> String { format!("ORD-{}", self.order_number) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CourierError {
    /// The request never reached the provider.
    #[error("courier unreachable: {message}")]
    Network { message: String, connect: bool },
    #[error("courier request timed out")]
    Timeout,
    #[error("{0}")]
    ProviderRejected(String),
    #[error("malformed provider response (HTTP {status}): {snippet}")]
    MalformedResponse { status: u16, snippet: String },
    #[error("courier authentication failed: {0}")]
    Authentication(String),
    #[error("unknown courier: {0}")]
    UnknownCourier(String),
    #[error("courier {0} is not configured")]
    NotConfigured(CourierKind),
}

impl From<reqwest::Error> for CourierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() { return Self::Timeout; }
        Self::Network { message: e.to_string(), connect: e.is_connect() }
    }
}

impl IsTransient for CourierError {
    // Only failures where nothing was sent are safe to repeat.
    fn is_transient(&self) -> bool { matches!(self, Self::Network { connect: true, .. }) }
}

#[async_trait]
pub trait CourierProvider: Send + Sync {
    fn kind(&self) -> CourierKind;

    /// Also refuse dispatch when the order's courier status has moved past NOT_REQUESTED.
    fn strict_guard(&self) -> bool { false }

    /// Whether bulk runs must pass [`CourierProvider::test_connection`] first.
    fn requires_preflight(&self) -> bool { false }

    async fn test_connection(&self) -> Result<(), CourierError> { Ok(()) }

    /// Books a pickup and returns the provider's tracking code.
    async fn dispatch(&self, request: &DispatchRequest) -> Result<String, CourierError>;
}

/// Configured providers, keyed by kind.
#[derive(Clone, Default)]
pub struct CourierRegistry { providers: HashMap<CourierKind, Arc<dyn CourierProvider>> }

impl CourierRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, provider: Arc<dyn CourierProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn get(&self, kind: CourierKind) -> Result<Arc<dyn CourierProvider>, CourierError> {
        self.providers.get(&kind).cloned().ok_or(CourierError::NotConfigured(kind))
    }

    pub fn kinds(&self) -> Vec<CourierKind> { self.providers.keys().copied().collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::tests::sample_order;

    #[test]
    fn test_courier_kind_parsing() {
        assert_eq!("Pathao".parse::<CourierKind>().unwrap(), CourierKind::Pathao);
        assert_eq!(" steadfast ".parse::<CourierKind>().unwrap(), CourierKind::Steadfast);
        assert!(matches!("redx".parse::<CourierKind>(), Err(CourierError::UnknownCourier(_))));
    }

    #[test]
    fn test_request_from_order() {
        let order = sample_order(321);
        let request = DispatchRequest::from_order(&order, Decimal::new(5, 1));
        assert_eq!(request.recipient_name, "Rahim Uddin");
        assert_eq!(request.recipient_phone, "01712345678");
        assert_eq!(request.amount_to_collect, Decimal::new(2460, 0));
        assert_eq!(request.item_quantity, 2);
        assert_eq!(request.note, "Order #321");
        assert_eq!(request.invoice(), "ORD-321");
        assert_eq!(request.item_description, "Cotton Panjabi x2");
    }

    #[test]
    fn test_only_connect_errors_are_transient() {
        assert!(CourierError::Network { message: "refused".into(), connect: true }.is_transient());
        assert!(!CourierError::Network { message: "reset".into(), connect: false }.is_transient());
        assert!(!CourierError::Timeout.is_transient());
        assert!(!CourierError::ProviderRejected("bad phone".into()).is_transient());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = CourierRegistry::new();
        assert_eq!(registry.get(CourierKind::Pathao).err(), Some(CourierError::NotConfigured(CourierKind::Pathao)));
    }
}
