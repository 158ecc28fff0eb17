//! Storefront fulfillment service
//!
//! Order lifecycle and courier dispatch for the storefront back office.
//!
//! ## Features
//! - Order creation with short order numbers
//! - Administrative status changes with an append-only courier audit trail
//! - Single and bulk pickup requests to Pathao and Steadfast
//! - Postgres or in-memory persistence

pub mod api;
pub mod config;
pub mod courier;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod events;
pub mod orders;
pub mod retry;
pub mod store;

pub use courier::{CourierError, CourierKind, CourierProvider, CourierRegistry, DispatchRequest};
pub use dispatch::{DispatchService, PerOrderResult};
pub use domain::aggregates::{CourierHistoryEntry, CourierStatus, Order, OrderStatus, StatusUpdate};
pub use error::{AppError, AppResult};
pub use orders::{NewLineItem, NewOrder, OrderService};
pub use store::{MemoryOrderStore, OrderStore, PgOrderStore, StoreError};
