//! Domain events
use crate::domain::aggregates::order::{CourierStatus, OrderStatus};
use crate::domain::value_objects::OrderNumber;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, order_number: OrderNumber },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus, courier_status: CourierStatus },
    Dispatched { order_id: Uuid, courier: String, tracking_code: String },
    Deleted { order_id: Uuid },
}

impl OrderEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Created { order_id, .. }
            | Self::StatusChanged { order_id, .. }
            | Self::Dispatched { order_id, .. }
            | Self::Deleted { order_id } => *order_id,
        }
    }

    /// Short name used as the subject suffix when publishing.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::StatusChanged { .. } => "status_changed",
            Self::Dispatched { .. } => "dispatched",
            Self::Deleted { .. } => "deleted",
        }
    }
}
