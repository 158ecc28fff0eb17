//! Aggregates module
pub mod order;

pub use order::{
    ChangedFields, CourierHistoryEntry, CourierStatus, Customer, LineItem, Order, OrderError, OrderStatus, ParseStatusError, StatusUpdate, UpdateOutcome,
    ADMIN_UPDATE_COURIER,
};
