//! HTTP surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::courier::CourierKind;
use crate::dispatch::{DispatchService, PerOrderResult};
use crate::domain::aggregates::{Order, OrderStatus, StatusUpdate};
use crate::domain::value_objects::Phone;
use crate::error::{AppError, AppResult};
use crate::orders::{NewLineItem, NewOrder, OrderService};
use crate::store::Page;

#[derive(Clone)]
pub struct AppState { pub orders: Arc<OrderService>, pub dispatch: Arc<DispatchService> }

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront-fulfillment"})) }))
        .route("/api/v1/orders", get(list_orders).post(create_order))
        .route("/api/v1/orders/dispatch", post(bulk_dispatch))
        .route("/api/v1/orders/:id", get(get_order).delete(delete_order))
        .route("/api/v1/orders/:id/status", patch(update_status))
        .route("/api/v1/orders/:id/items", put(replace_items))
        .route("/api/v1/orders/:id/dispatch", post(dispatch_order))
        .route("/api/v1/couriers/:courier/health", get(courier_health))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ListParams { pub page: Option<u32>, #[serde(alias = "perPage")] pub per_page: Option<u32> }
#[derive(Debug, Serialize)] pub struct PaginatedResponse<T> { pub data: Vec<T>, pub total: i64, pub page: u32 }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub note: Option<String>,
    pub delivery_charge: Option<Decimal>,
    pub pay_to_rider: Option<Decimal>,
}

impl TryFrom<StatusUpdateRequest> for StatusUpdate {
    type Error = AppError;
    fn try_from(r: StatusUpdateRequest) -> Result<Self, Self::Error> {
        let phone = r.phone.map(Phone::new).transpose().map_err(|e| AppError::Validation(e.to_string()))?;
        if let Some(name) = &r.customer_name { if name.trim().is_empty() { return Err(AppError::Validation("customerName cannot be empty".into())); } }
        if let Some(address) = &r.address { if address.trim().is_empty() { return Err(AppError::Validation("address cannot be empty".into())); } }
        Ok(StatusUpdate {
            status: r.status,
            customer_name: r.customer_name.map(|n| n.trim().to_string()),
            phone,
            address: r.address.map(|a| a.trim().to_string()),
            note: r.note,
            delivery_charge: r.delivery_charge,
            pay_to_rider: r.pay_to_rider,
        })
    }
}

#[derive(Debug, Deserialize)] #[serde(rename_all = "camelCase")] pub struct ReplaceItemsBody { pub items: Vec<NewLineItem>, pub pay_to_rider: Option<Decimal> }

#[derive(Debug, Deserialize)] pub struct DispatchBody { pub courier: Option<String> }
#[derive(Debug, Serialize)] #[serde(rename_all = "camelCase")] pub struct DispatchResponse { pub tracking_code: String }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDispatchBody { pub courier: Option<String>, #[serde(default)] pub order_ids: Vec<String> }
#[derive(Debug, Serialize)] pub struct BulkDispatchResponse { pub results: Vec<PerOrderResult> }

fn courier_kind(courier: Option<String>) -> AppResult<CourierKind> {
    Ok(courier.ok_or_else(|| AppError::Validation("courier is required".into()))?.parse::<CourierKind>()?)
}

async fn create_order(State(s): State<AppState>, Json(r): Json<NewOrder>) -> AppResult<(StatusCode, Json<Order>)> {
    Ok((StatusCode::CREATED, Json(s.orders.create(r).await?)))
}

async fn list_orders(State(s): State<AppState>, Query(p): Query<ListParams>) -> AppResult<Json<PaginatedResponse<Order>>> {
    let page = Page::new(p.page, p.per_page);
    let (data, total) = s.orders.list(page).await?;
    Ok(Json(PaginatedResponse { data, total, page: page.page }))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Order>> {
    Ok(Json(s.orders.get(id).await?))
}

async fn update_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<StatusUpdateRequest>) -> AppResult<Json<Order>> {
    Ok(Json(s.orders.update_status(id, r.try_into()?).await?))
}

async fn replace_items(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ReplaceItemsBody>) -> AppResult<Json<Order>> {
    Ok(Json(s.orders.replace_items(id, &r.items, r.pay_to_rider).await?))
}

async fn delete_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    s.orders.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn dispatch_order(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<DispatchBody>) -> AppResult<Json<DispatchResponse>> {
    let tracking_code = s.dispatch.dispatch_one(id, courier_kind(r.courier)?).await?;
    Ok(Json(DispatchResponse { tracking_code }))
}

async fn bulk_dispatch(State(s): State<AppState>, Json(r): Json<BulkDispatchBody>) -> AppResult<Json<BulkDispatchResponse>> {
    if r.order_ids.is_empty() { return Err(AppError::Validation("orderIds must not be empty".into())); }
    let results = s.dispatch.dispatch_many(courier_kind(r.courier)?, &r.order_ids).await?;
    Ok(Json(BulkDispatchResponse { results }))
}

async fn courier_health(State(s): State<AppState>, Path(courier): Path<String>) -> AppResult<Json<serde_json::Value>> {
    let courier: CourierKind = courier.parse()?;
    s.dispatch.test_connection(courier).await?;
    Ok(Json(serde_json::json!({"courier": courier, "status": "ok"})))
}
