//! Courier dispatch orchestration.
//!
//! The guard relies on the persisted courier history alone: it is checked
//! right before the courier call and no lock is held across that call. Two
//! requests for the same order arriving at the same instant can both pass it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::courier::{CourierKind, CourierProvider, CourierRegistry, DispatchRequest};
use crate::domain::aggregates::{ChangedFields, Order};
use crate::error::{AppError, AppResult};
use crate::events::EventPublisher;
use crate::retry::{retry_on_transient, RetryConfig};
use crate::store::OrderStore;

pub const DEFAULT_BULK_CONCURRENCY: usize = 16;

/// Outcome for one id of a bulk request, at the same position as the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerOrderResult {
    pub order_id: String,
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_code: Option<String>,
}

impl PerOrderResult {
    fn success(order_id: String, tracking_code: String) -> Self {
        Self { order_id, ok: true, message: format!("Pickup requested, tracking code {tracking_code}"), tracking_code: Some(tracking_code) }
    }
    fn failure(order_id: String, message: impl Into<String>) -> Self {
        Self { order_id, ok: false, message: message.into(), tracking_code: None }
    }
}

pub struct DispatchService {
    store: Arc<dyn OrderStore>,
    couriers: CourierRegistry,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryConfig,
    item_weight_kg: Decimal,
    bulk_concurrency: usize,
}

impl DispatchService {
    pub fn new(store: Arc<dyn OrderStore>, couriers: CourierRegistry, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, couriers, publisher, retry: RetryConfig::default(), item_weight_kg: Decimal::new(5, 1), bulk_concurrency: DEFAULT_BULK_CONCURRENCY }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self { self.retry = retry; self }

    pub fn with_item_weight(mut self, kg: Decimal) -> Self { self.item_weight_kg = kg; self }

    pub fn with_bulk_concurrency(mut self, limit: usize) -> Self { self.bulk_concurrency = limit.max(1); self }

    /// Books a pickup for one order and returns the tracking code.
    pub async fn dispatch_one(&self, order_id: Uuid, courier: CourierKind) -> AppResult<String> {
        let provider = self.couriers.get(courier)?;
        let order = self.store.get(order_id).await?.ok_or(AppError::NotFound(order_id))?;
        self.dispatch_loaded(provider.as_ref(), order).await
    }

    /// Dispatches every id independently. The result has one entry per input
    /// id, in input order; only an empty request or a failed connectivity
    /// check fails the call as a whole.
    pub async fn dispatch_many(&self, courier: CourierKind, order_ids: &[String]) -> AppResult<Vec<PerOrderResult>> {
        if order_ids.is_empty() { return Err(AppError::Validation("orderIds must not be empty".into())); }
        let provider = self.couriers.get(courier)?;

        if provider.requires_preflight() {
            if let Err(e) = provider.test_connection().await {
                tracing::error!(%courier, error = %e, "connectivity check failed, aborting bulk dispatch");
                return Err(AppError::ConnectivityFailure(format!("{courier} connectivity check failed: {e}")));
            }
        }

        let parsed: Vec<Option<Uuid>> = order_ids.iter().map(|raw| Uuid::parse_str(raw.trim()).ok()).collect();
        let unique: Vec<Uuid> = parsed.iter().flatten().copied().collect::<HashSet<_>>().into_iter().collect();
        let mut loaded: HashMap<Uuid, Order> = self.store.get_many(&unique).await?.into_iter().map(|o| (o.id(), o)).collect();

        let mut seen = HashSet::new();
        let prepared: Vec<(String, Result<Order, String>)> = order_ids.iter().zip(parsed).map(|(raw, id)| {
            let outcome = match id {
                None => Err("Invalid order id".to_string()),
                Some(id) if !seen.insert(id) => Err("Duplicate order id in request".to_string()),
                Some(id) => loaded.remove(&id).ok_or_else(|| "Order not found".to_string()),
            };
            (raw.clone(), outcome)
        }).collect();

        let provider = provider.as_ref();
        let results: Vec<PerOrderResult> = stream::iter(prepared)
            .map(|(order_id, outcome)| async move {
                match outcome {
                    Err(message) => PerOrderResult::failure(order_id, message),
                    Ok(order) => match self.dispatch_loaded(provider, order).await {
                        Ok(tracking_code) => PerOrderResult::success(order_id, tracking_code),
                        Err(e) => PerOrderResult::failure(order_id, e.to_string()),
                    },
                }
            })
            .buffered(self.bulk_concurrency)
            .collect()
            .await;

        let succeeded = results.iter().filter(|r| r.ok).count();
        tracing::info!(%courier, total = results.len(), succeeded, failed = results.len() - succeeded, "bulk dispatch finished");
        Ok(results)
    }

    /// Connectivity check for providers that support one.
    pub async fn test_connection(&self, courier: CourierKind) -> AppResult<()> {
        let provider = self.couriers.get(courier)?;
        provider.test_connection().await.map_err(|e| AppError::ConnectivityFailure(format!("{courier} connectivity check failed: {e}")))
    }

    async fn dispatch_loaded(&self, provider: &dyn CourierProvider, mut order: Order) -> AppResult<String> {
        let courier = provider.kind();
        if let Err(e) = order.ensure_dispatchable(provider.strict_guard()) {
            tracing::warn!(order_id = %order.id(), %courier, reason = %e, "dispatch refused by guard");
            return Err(e.into());
        }

        let request = DispatchRequest::from_order(&order, self.item_weight_kg);
        let tracking_code = match retry_on_transient(&self.retry, |_| provider.dispatch(&request)).await {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(order_id = %order.id(), %courier, error = %e, "courier dispatch failed");
                return Err(e.into());
            }
        };

        let before = order.courier_history().len();
        order.record_dispatch(courier.label(), &tracking_code, Utc::now());
        if let Err(e) = self.store.update(&order, ChangedFields::COURIER, &order.courier_history()[before..]).await {
            // Booked with the courier but not recorded here; needs manual reconciliation.
            tracing::error!(order_id = %order.id(), %courier, %tracking_code, error = %e, "failed to persist dispatch");
            return Err(e.into());
        }
        self.publisher.publish(order.take_events()).await;
        tracing::info!(order_id = %order.id(), order_number = %order.order_number(), %courier, %tracking_code, "pickup requested");
        Ok(tracking_code)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::courier::CourierError;
    use crate::domain::aggregates::order::tests::sample_order;
    use crate::domain::aggregates::{CourierStatus, OrderStatus, StatusUpdate};
    use crate::domain::events::OrderEvent;
    use crate::events::tests::RecordingPublisher;
    use crate::orders::{NewLineItem, OrderService};
    use crate::store::MemoryOrderStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Barrier, Mutex};

    /// Scripted courier: tracking code is `STF<order number>`.
    #[derive(Default)]
    pub(crate) struct FakeCourier {
        pub calls: AtomicUsize,
        pub strict: bool,
        pub preflight_error: Option<CourierError>,
        pub reject: HashSet<u16>,
        pub fail_first_with: Mutex<HashMap<u16, CourierError>>,
        pub barrier: Option<Barrier>,
    }

    #[async_trait]
    impl CourierProvider for FakeCourier {
        fn kind(&self) -> CourierKind { CourierKind::Steadfast }
        fn strict_guard(&self) -> bool { self.strict }
        fn requires_preflight(&self) -> bool { true }
        async fn test_connection(&self) -> Result<(), CourierError> {
            match &self.preflight_error { Some(e) => Err(e.clone()), None => Ok(()) }
        }
        async fn dispatch(&self, request: &DispatchRequest) -> Result<String, CourierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(barrier) = &self.barrier { barrier.wait().await; }
            let number = request.order_number.value();
            if let Some(e) = self.fail_first_with.lock().await.remove(&number) { return Err(e); }
            if self.reject.contains(&number) { return Err(CourierError::ProviderRejected("Invalid recipient address".into())); }
            Ok(format!("STF{number}"))
        }
    }

    struct Harness { store: Arc<MemoryOrderStore>, courier: Arc<FakeCourier>, publisher: Arc<RecordingPublisher>, service: DispatchService }

    fn harness(courier: FakeCourier) -> Harness {
        let store = Arc::new(MemoryOrderStore::new());
        let courier = Arc::new(courier);
        let publisher = Arc::new(RecordingPublisher::default());
        let fast_retry = RetryConfig { max_attempts: 3, initial_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2), multiplier: 2.0 };
        let service = DispatchService::new(store.clone(), CourierRegistry::new().with(courier.clone()), publisher.clone()).with_retry(fast_retry);
        Harness { store, courier, publisher, service }
    }

    async fn seed(store: &MemoryOrderStore, number: u16) -> Order {
        let order = sample_order(number);
        store.insert(&order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_single_dispatch_records_pickup() {
        let h = harness(FakeCourier::default());
        let order = seed(&h.store, 123).await;

        let tracking = h.service.dispatch_one(order.id(), CourierKind::Steadfast).await.unwrap();
        assert_eq!(tracking, "STF123");

        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Pending);
        assert_eq!(stored.courier_status(), CourierStatus::Requested);
        assert_eq!(stored.courier_tracking_code(), Some("STF123"));
        assert_eq!(stored.courier_history().len(), 1);
        let entry = &stored.courier_history()[0];
        assert!(entry.is_pickup_requested);
        assert_eq!(entry.courier, "STEADFAST");
        assert_eq!(entry.tracking_code.as_deref(), Some("STF123"));
        assert!(matches!(h.publisher.events.lock().await.as_slice(), [OrderEvent::Dispatched { .. }]));
    }

    #[tokio::test]
    async fn test_second_dispatch_is_refused_without_courier_call() {
        let h = harness(FakeCourier::default());
        let order = seed(&h.store, 124).await;
        h.service.dispatch_one(order.id(), CourierKind::Steadfast).await.unwrap();
        let before = h.store.get(order.id()).await.unwrap().unwrap();

        let err = h.service.dispatch_one(order.id(), CourierKind::Steadfast).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyDispatched(ref m) if m == "Already pickup requested"), "{err:?}");
        assert_eq!(h.courier.calls.load(Ordering::SeqCst), 1);

        let after = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(after.courier_history(), before.courier_history());
        assert_eq!(after.courier_history().iter().filter(|e| e.is_pickup_requested).count(), 1);
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let h = harness(FakeCourier::default());
        let id = Uuid::new_v4();
        assert!(matches!(h.service.dispatch_one(id, CourierKind::Steadfast).await, Err(AppError::NotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn test_unconfigured_courier_is_validation_error() {
        let h = harness(FakeCourier::default());
        let order = seed(&h.store, 125).await;
        assert!(matches!(h.service.dispatch_one(order.id(), CourierKind::Pathao).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_provider_rejection_leaves_order_untouched() {
        let h = harness(FakeCourier { reject: HashSet::from([126]), ..Default::default() });
        let order = seed(&h.store, 126).await;

        let err = h.service.dispatch_one(order.id(), CourierKind::Steadfast).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid recipient address");
        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.courier_status(), CourierStatus::NotRequested);
        assert!(stored.courier_history().is_empty());
        assert!(h.publisher.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_strict_guard_refuses_engaged_courier() {
        let h = harness(FakeCourier { strict: true, ..Default::default() });
        let mut order = seed(&h.store, 127).await;
        let outcome = order.apply_update(StatusUpdate::to(OrderStatus::Shipped), Utc::now()).unwrap();
        h.store.update(&order, outcome.fields, &order.courier_history()[..]).await.unwrap();

        assert!(matches!(h.service.dispatch_one(order.id(), CourierKind::Steadfast).await, Err(AppError::AlreadyDispatched(_))));
        assert_eq!(h.courier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_retried() {
        let failing = HashMap::from([(128, CourierError::Network { message: "connection refused".into(), connect: true })]);
        let h = harness(FakeCourier { fail_first_with: Mutex::new(failing), ..Default::default() });
        let order = seed(&h.store, 128).await;

        assert_eq!(h.service.dispatch_one(order.id(), CourierKind::Steadfast).await.unwrap(), "STF128");
        assert_eq!(h.courier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.store.get(order.id()).await.unwrap().unwrap().courier_history().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let h = harness(FakeCourier { fail_first_with: Mutex::new(HashMap::from([(129, CourierError::Timeout)])), ..Default::default() });
        let order = seed(&h.store, 129).await;

        assert!(matches!(h.service.dispatch_one(order.id(), CourierKind::Steadfast).await, Err(AppError::Network(_))));
        assert_eq!(h.courier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bulk_skips_already_dispatched() {
        let h = harness(FakeCourier::default());
        let a = seed(&h.store, 131).await;
        let b = seed(&h.store, 132).await;
        let c = seed(&h.store, 133).await;
        h.service.dispatch_one(b.id(), CourierKind::Steadfast).await.unwrap();

        let ids = vec![a.id().to_string(), b.id().to_string(), c.id().to_string()];
        let results = h.service.dispatch_many(CourierKind::Steadfast, &ids).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().map(|r| r.order_id.as_str()).collect::<Vec<_>>(), ids.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(results[0].ok);
        assert_eq!(results[1], PerOrderResult::failure(b.id().to_string(), "Already pickup requested"));
        assert!(results[2].ok);
        assert_eq!(results[2].tracking_code.as_deref(), Some("STF133"));
    }

    #[tokio::test]
    async fn test_bulk_reports_every_input() {
        let h = harness(FakeCourier::default());
        let a = seed(&h.store, 141).await;
        let ids = vec![
            Uuid::new_v4().to_string(),
            a.id().to_string(),
            "not-a-uuid".to_string(),
            a.id().to_string(),
        ];
        let results = h.service.dispatch_many(CourierKind::Steadfast, &ids).await.unwrap();

        assert_eq!(results.len(), ids.len());
        for (result, id) in results.iter().zip(&ids) { assert_eq!(&result.order_id, id); }
        assert_eq!(results[0].message, "Order not found");
        assert!(results[1].ok);
        assert_eq!(results[2].message, "Invalid order id");
        assert_eq!(results[3].message, "Duplicate order id in request");
        assert_eq!(h.courier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bulk_failures_are_isolated() {
        let h = harness(FakeCourier { reject: HashSet::from([154]), ..Default::default() });
        let mut orders = vec![];
        for n in 151..=155 { orders.push(seed(&h.store, n).await); }
        h.service.dispatch_one(orders[1].id(), CourierKind::Steadfast).await.unwrap();

        let ids: Vec<String> = orders.iter().map(|o| o.id().to_string()).collect();
        let results = h.service.dispatch_many(CourierKind::Steadfast, &ids).await.unwrap();

        assert_eq!(results.iter().map(|r| r.ok).collect::<Vec<_>>(), vec![true, false, true, false, true]);
        assert_eq!(results[3].message, "Invalid recipient address");
        for (i, order) in orders.iter().enumerate() {
            let stored = h.store.get(order.id()).await.unwrap().unwrap();
            let expected = if i == 3 { CourierStatus::NotRequested } else { CourierStatus::Requested };
            assert_eq!(stored.courier_status(), expected);
        }
    }

    #[tokio::test]
    async fn test_bulk_rejects_empty_input() {
        let h = harness(FakeCourier::default());
        assert!(matches!(h.service.dispatch_many(CourierKind::Steadfast, &[]).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_bulk_aborts_on_failed_connectivity_check() {
        let h = harness(FakeCourier { preflight_error: Some(CourierError::MalformedResponse { status: 200, snippet: "<html>".into() }), ..Default::default() });
        let order = seed(&h.store, 161).await;

        let err = h.service.dispatch_many(CourierKind::Steadfast, &[order.id().to_string()]).await.unwrap_err();
        assert!(matches!(err, AppError::ConnectivityFailure(_)));
        assert_eq!(h.courier.calls.load(Ordering::SeqCst), 0);
    }

    /// Accepted gap: the guard is not transactional, so two dispatches of the
    /// same order that both load it before either writes back will both book.
    #[tokio::test]
    async fn test_simultaneous_dispatch_of_one_order_is_not_serialized() {
        let h = harness(FakeCourier { barrier: Some(Barrier::new(2)), ..Default::default() });
        let order = seed(&h.store, 171).await;

        let (first, second) = tokio::join!(
            h.service.dispatch_one(order.id(), CourierKind::Steadfast),
            h.service.dispatch_one(order.id(), CourierKind::Steadfast),
        );
        assert!(first.is_ok() && second.is_ok());
        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.courier_history().iter().filter(|e| e.is_pickup_requested).count(), 2);
    }

    /// Cancels the order through the admin path while the pickup request is in flight.
    struct CancellingCourier { orders: Arc<OrderService> }

    #[async_trait]
    impl CourierProvider for CancellingCourier {
        fn kind(&self) -> CourierKind { CourierKind::Steadfast }
        async fn dispatch(&self, request: &DispatchRequest) -> Result<String, CourierError> {
            self.orders.update_status(request.order_id, StatusUpdate::to(OrderStatus::Cancelled)).await.map_err(|e| CourierError::ProviderRejected(e.to_string()))?;
            Ok(format!("STF{}", request.order_number.value()))
        }
    }

    #[tokio::test]
    async fn test_cancel_during_dispatch_is_kept() {
        let store = Arc::new(MemoryOrderStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let orders = Arc::new(OrderService::new(store.clone(), publisher.clone()));
        let courier = Arc::new(CancellingCourier { orders });
        let service = DispatchService::new(store.clone(), CourierRegistry::new().with(courier), publisher);
        let order = seed(&store, 140).await;

        assert_eq!(service.dispatch_one(order.id(), CourierKind::Steadfast).await.unwrap(), "STF140");

        let stored = store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Cancelled);
        assert_eq!(stored.courier_tracking_code(), Some("STF140"));
        let history: Vec<(&str, &str)> = stored.courier_history().iter().map(|h| (h.courier.as_str(), h.status.as_str())).collect();
        assert_eq!(history, vec![("ADMIN_UPDATE", "CANCELLED"), ("STEADFAST", "REQUESTED")]);
    }

    #[tokio::test]
    async fn test_admin_update_after_dispatch_keeps_tracking_code() {
        let h = harness(FakeCourier::default());
        let order = seed(&h.store, 141).await;
        let orders = OrderService::new(h.store.clone(), h.publisher.clone());

        let mut stale = h.store.get(order.id()).await.unwrap().unwrap();
        h.service.dispatch_one(order.id(), CourierKind::Steadfast).await.unwrap();
        let outcome = stale.apply_update(StatusUpdate::to(OrderStatus::Approved), Utc::now()).unwrap();
        h.store.update(&stale, outcome.fields, &stale.courier_history()[..]).await.unwrap();

        let stored = orders.get(order.id()).await.unwrap();
        assert_eq!(stored.status(), OrderStatus::Approved);
        assert_eq!(stored.courier_status(), CourierStatus::Requested);
        assert_eq!(stored.courier_tracking_code(), Some("STF141"));
        assert!(stored.has_pickup_request());
    }

    #[tokio::test]
    async fn test_replaced_items_change_amount_to_collect() {
        let h = harness(FakeCourier::default());
        let order = seed(&h.store, 142).await;
        let orders = OrderService::new(h.store.clone(), h.publisher.clone());
        let items = vec![NewLineItem { product_id: Uuid::new_v4(), name: "Lungi".into(), quantity: 4, unit_price: Decimal::new(450, 0), variant_options: Default::default() }];
        orders.replace_items(order.id(), &items, None).await.unwrap();

        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        let request = DispatchRequest::from_order(&stored, Decimal::new(5, 1));
        assert_eq!(request.amount_to_collect, Decimal::new(1860, 0));
        assert_eq!(request.item_quantity, 4);
    }
}
