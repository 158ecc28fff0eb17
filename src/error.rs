//! Service-level errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::courier::CourierError;
use crate::domain::aggregates::OrderError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Order {0} not found")]
    NotFound(Uuid),
    #[error("{0}")]
    AlreadyDispatched(String),
    #[error("{0}")]
    ProviderRejected(String),
    #[error("{0}")]
    MalformedProviderResponse(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    ConnectivityFailure(String),
    #[error("{0}")]
    Network(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyDispatched(_) => "ALREADY_DISPATCHED",
            Self::ProviderRejected(_) => "PROVIDER_REJECTED",
            Self::MalformedProviderResponse(_) => "MALFORMED_PROVIDER_RESPONSE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ConnectivityFailure(_) => "CONNECTIVITY_FAILURE",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyDispatched(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ProviderRejected(_) | Self::MalformedProviderResponse(_) => StatusCode::BAD_GATEWAY,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ConnectivityFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Network(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OrderError> for AppError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::AlreadyDispatched | OrderError::CourierAlreadyEngaged(_) => Self::AlreadyDispatched(e.to_string()),
            OrderError::NotDeletable(_) | OrderError::CustomerLocked | OrderError::ItemsLocked(_) => Self::Conflict(e.to_string()),
            OrderError::NoItems | OrderError::InvalidQuantity(_) | OrderError::NegativeAmount | OrderError::Money(_) => Self::Validation(e.to_string()),
        }
    }
}

impl From<CourierError> for AppError {
    fn from(e: CourierError) -> Self {
        match e {
            CourierError::ProviderRejected(_) | CourierError::Authentication(_) => Self::ProviderRejected(e.to_string()),
            CourierError::MalformedResponse { .. } => Self::MalformedProviderResponse(e.to_string()),
            CourierError::Network { .. } | CourierError::Timeout => Self::Network(e.to_string()),
            CourierError::UnknownCourier(_) | CourierError::NotConfigured(_) => Self::Validation(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::DuplicateOrderNumber(_) => Self::Conflict(e.to_string()),
            StoreError::Corrupt(_) | StoreError::Database(_) => {
                tracing::error!(error = %e, "order store failure");
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e.to_string()) }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            // Do not leak driver details to clients.
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (self.status_code(), Json(json!({"error": self.code(), "message": message}))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_errors_map_to_conflict() {
        let e: AppError = OrderError::AlreadyDispatched.into();
        assert_eq!(e.status_code(), StatusCode::CONFLICT);
        assert_eq!(e.to_string(), "Already pickup requested");
    }

    #[test]
    fn test_courier_errors_keep_message() {
        let e: AppError = CourierError::ProviderRejected("Invalid recipient phone".into()).into();
        assert_eq!(e.to_string(), "Invalid recipient phone");
        assert_eq!(e.code(), "PROVIDER_REJECTED");
        let e: AppError = CourierError::MalformedResponse { status: 200, snippet: "<html>".into() }.into();
        assert_eq!(e.code(), "MALFORMED_PROVIDER_RESPONSE");
        assert_eq!(AppError::from(CourierError::Timeout).status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_store_not_found() {
        let id = Uuid::new_v4();
        assert!(matches!(AppError::from(StoreError::NotFound(id)), AppError::NotFound(x) if x == id));
    }
}
