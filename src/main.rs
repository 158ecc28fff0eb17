//! Storefront fulfillment service

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_fulfillment::api::{self, AppState};
use storefront_fulfillment::config::Config;
use storefront_fulfillment::courier::{CourierRegistry, PathaoClient, SteadfastClient};
use storefront_fulfillment::dispatch::DispatchService;
use storefront_fulfillment::events::{EventPublisher, NatsPublisher, NoopPublisher};
use storefront_fulfillment::orders::OrderService;
use storefront_fulfillment::retry::RetryConfig;
use storefront_fulfillment::store::{MemoryOrderStore, OrderStore, PgOrderStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let store: Arc<dyn OrderStore> = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(config.database_max_connections).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Arc::new(PgOrderStore::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            Arc::new(MemoryOrderStore::new())
        }
    };

    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsPublisher::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, order events are dropped");
                Arc::new(NoopPublisher)
            }
        },
        None => Arc::new(NoopPublisher),
    };

    let mut couriers = CourierRegistry::new();
    if let Some(pathao) = config.pathao.clone() { couriers = couriers.with(Arc::new(PathaoClient::new(pathao)?)); }
    if let Some(steadfast) = config.steadfast.clone() { couriers = couriers.with(Arc::new(SteadfastClient::new(steadfast)?)); }
    tracing::info!(couriers = ?couriers.kinds(), "courier providers configured");

    let orders = OrderService::new(store.clone(), publisher.clone());
    let dispatch = DispatchService::new(store, couriers, publisher)
        .with_retry(RetryConfig::with_attempts(config.courier_retry_attempts))
        .with_item_weight(config.default_item_weight_kg)
        .with_bulk_concurrency(config.bulk_concurrency);
    let app = api::router(AppState { orders: Arc::new(orders), dispatch: Arc::new(dispatch) });

    let port = config.port;
    tracing::info!("🚚 Storefront fulfillment listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}
