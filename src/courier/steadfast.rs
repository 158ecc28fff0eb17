//! Steadfast courier: static `Api-Key` / `Secret-Key` headers.
//!
//! Wrong keys or a wrong base URL make the portal answer with its HTML login
//! page, so bulk runs call [`SteadfastClient::test_connection`] first.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::response::{classify_failure, looks_like_markup, parse_success, snippet};
use super::{CourierError, CourierKind, CourierProvider, DispatchRequest};

pub const DEFAULT_BASE_URL: &str = "https://portal.packzy.com/api/v1";
const CREATE_ORDER_PATH: &str = "/create_order";
const BALANCE_PATH: &str = "/get_balance";

#[derive(Clone, Debug)]
pub struct SteadfastConfig { pub base_url: String, pub api_key: String, pub secret_key: String, pub timeout: Duration }

#[derive(Debug, Serialize)]
struct CreateOrderRequest { invoice: String, recipient_name: String, recipient_phone: String, recipient_address: String, cod_amount: i64, note: String }

/// Steadfast reports business failures in the body `status`, sometimes with HTTP 200.
#[derive(Deserialize)]
struct CreateOrderResponse { status: u16, message: Option<String>, consignment: Option<Consignment> }

#[derive(Deserialize)]
struct Consignment { tracking_code: String }

#[derive(Deserialize)]
struct BalanceResponse { status: u16, message: Option<String> }

pub struct SteadfastClient { http: Client, base_url: String }

impl SteadfastClient {
    pub fn new(config: SteadfastConfig) -> Result<Self, CourierError> {
        let mut headers = HeaderMap::new();
        headers.insert("Api-Key", header_value(&config.api_key)?);
        headers.insert("Secret-Key", header_value(&config.secret_key)?);
        let http = Client::builder().timeout(config.timeout).default_headers(headers).build()?;
        Ok(Self { http, base_url: config.base_url.trim_end_matches('/').to_string() })
    }

    fn payload(request: &DispatchRequest) -> CreateOrderRequest {
        CreateOrderRequest {
            invoice: request.invoice(),
            recipient_name: request.recipient_name.clone(),
            recipient_phone: request.recipient_phone.clone(),
            recipient_address: request.recipient_address.clone(),
            cod_amount: request.amount_to_collect.round().to_i64().unwrap_or_default(),
            note: request.note.clone(),
        }
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, CourierError> {
    HeaderValue::from_str(raw).map_err(|_| CourierError::Authentication("API key contains invalid header characters".into()))
}

#[async_trait]
impl CourierProvider for SteadfastClient {
    fn kind(&self) -> CourierKind { CourierKind::Steadfast }

    fn requires_preflight(&self) -> bool { true }

    /// Minimal authenticated read. Markup means the endpoint or keys are wrong;
    /// JSON with a failing status is a genuine API error.
    async fn test_connection(&self) -> Result<(), CourierError> {
        let response = self.http.get(format!("{}{}", self.base_url, BALANCE_PATH)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if looks_like_markup(&body) {
            return Err(CourierError::MalformedResponse { status: status.as_u16(), snippet: snippet(&body) });
        }
        if !status.is_success() { return Err(classify_failure(status, &body)); }
        let balance: BalanceResponse = parse_success(status, &body)?;
        if balance.status != 200 {
            return Err(CourierError::ProviderRejected(balance.message.unwrap_or_else(|| format!("status {}", balance.status))));
        }
        Ok(())
    }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<String, CourierError> {
        let response = self.http.post(format!("{}{}", self.base_url, CREATE_ORDER_PATH)).json(&Self::payload(request)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() { return Err(classify_failure(status, &body)); }

        let parsed: CreateOrderResponse = parse_success(status, &body)?;
        match parsed.consignment {
            Some(c) if parsed.status == 200 && !c.tracking_code.is_empty() => Ok(c.tracking_code),
            _ => Err(CourierError::ProviderRejected(parsed.message.unwrap_or_else(|| format!("Steadfast rejected the order (status {})", parsed.status)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::tests::sample_order;
    use axum::{http::HeaderMap as AxumHeaders, response::Html, routing::{get, post}, Json, Router};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};

    async fn create_order(headers: AxumHeaders, Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(headers.get("api-key").unwrap(), "key");
        assert_eq!(headers.get("secret-key").unwrap(), "secret");
        if body["cod_amount"] == 0 {
            return Json(json!({"status": 400, "message": "COD amount is required"}));
        }
        Json(json!({"status": 200, "message": "Consignment has been created successfully.",
            "consignment": {"consignment_id": 1424107, "invoice": body["invoice"], "tracking_code": "STF123", "status": "in_review"}}))
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> SteadfastClient {
        SteadfastClient::new(SteadfastConfig { base_url, api_key: "key".into(), secret_key: "secret".into(), timeout: Duration::from_secs(5) }).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_returns_tracking_code() {
        let base = spawn(Router::new().route(CREATE_ORDER_PATH, post(create_order))).await;
        let request = DispatchRequest::from_order(&sample_order(200), Decimal::new(5, 1));
        assert_eq!(client(base).dispatch(&request).await.unwrap(), "STF123");
    }

    #[tokio::test]
    async fn test_body_status_rejection() {
        let base = spawn(Router::new().route(CREATE_ORDER_PATH, post(create_order))).await;
        let mut request = DispatchRequest::from_order(&sample_order(201), Decimal::new(5, 1));
        request.amount_to_collect = Decimal::ZERO;
        let err = client(base).dispatch(&request).await.unwrap_err();
        assert_eq!(err, CourierError::ProviderRejected("COD amount is required".into()));
    }

    #[tokio::test]
    async fn test_connection_classifies_markup() {
        let base = spawn(Router::new().route(BALANCE_PATH, get(|| async { Html("<!DOCTYPE html><html><body>Login</body></html>") }))).await;
        let err = client(base).test_connection().await.unwrap_err();
        assert!(matches!(err, CourierError::MalformedResponse { status: 200, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_connection_classifies_api_error() {
        let base = spawn(Router::new().route(BALANCE_PATH, get(|| async {
            (axum::http::StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid API credentials"})))
        }))).await;
        let err = client(base).test_connection().await.unwrap_err();
        assert_eq!(err, CourierError::Authentication("Invalid API credentials".into()));
    }

    #[tokio::test]
    async fn test_connection_ok() {
        let base = spawn(Router::new().route(BALANCE_PATH, get(|| async { Json(json!({"status": 200, "current_balance": 0})) }))).await;
        assert!(client(base).test_connection().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let request = DispatchRequest::from_order(&sample_order(202), Decimal::new(5, 1));
        let err = client(format!("http://{addr}")).dispatch(&request).await.unwrap_err();
        assert!(matches!(err, CourierError::Network { connect: true, .. }), "{err:?}");
    }
}
