//! Pathao courier: OAuth password-grant token, cached until shortly before expiry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::response::{classify_failure, parse_success};
use super::token::{IssuedToken, TokenCache};
use super::{CourierError, CourierKind, CourierProvider, DispatchRequest};

pub const DEFAULT_BASE_URL: &str = "https://api-hermes.pathao.com";
const ISSUE_TOKEN_PATH: &str = "/aladdin/api/v1/issue-token";
const CREATE_ORDER_PATH: &str = "/aladdin/api/v1/orders";
/// Normal (48 hour) delivery.
const DELIVERY_TYPE_NORMAL: u8 = 48;
/// Parcel, as opposed to document.
const ITEM_TYPE_PARCEL: u8 = 2;

#[derive(Clone, Debug)]
pub struct PathaoConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub store_id: u64,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct IssueTokenRequest<'a> { client_id: &'a str, client_secret: &'a str, grant_type: &'a str, username: &'a str, password: &'a str }

#[derive(Deserialize)]
struct IssueTokenResponse { access_token: String, expires_in: i64 }

#[derive(Debug, Serialize)]
struct CreateOrderRequest {
    store_id: u64,
    merchant_order_id: String,
    recipient_name: String,
    recipient_phone: String,
    recipient_address: String,
    delivery_type: u8,
    item_type: u8,
    special_instruction: String,
    item_quantity: u32,
    item_weight: f64,
    amount_to_collect: i64,
    item_description: String,
}

#[derive(Deserialize)]
struct CreateOrderResponse { message: Option<String>, data: Option<Consignment> }

#[derive(Deserialize)]
struct Consignment { consignment_id: String }

pub struct PathaoClient { http: Client, config: PathaoConfig, tokens: TokenCache }

impl PathaoClient {
    pub fn new(config: PathaoConfig) -> Result<Self, CourierError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config, tokens: TokenCache::new() })
    }

    fn url(&self, path: &str) -> String { format!("{}{}", self.config.base_url.trim_end_matches('/'), path) }

    async fn issue_token(&self) -> Result<IssuedToken, CourierError> {
        let body = IssueTokenRequest {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            grant_type: "password",
            username: &self.config.username,
            password: &self.config.password,
        };
        let response = self.http.post(self.url(ISSUE_TOKEN_PATH)).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(match classify_failure(status, &text) {
                CourierError::ProviderRejected(message) => CourierError::Authentication(message),
                other => other,
            });
        }
        let issued: IssueTokenResponse = parse_success(status, &text)?;
        tracing::info!(courier = "pathao", expires_in = issued.expires_in, "issued courier access token");
        Ok(IssuedToken { access_token: issued.access_token, expires_in_secs: issued.expires_in })
    }

    async fn token(&self) -> Result<String, CourierError> { self.tokens.get(|| self.issue_token()).await }

    fn payload(&self, request: &DispatchRequest) -> CreateOrderRequest {
        CreateOrderRequest {
            store_id: self.config.store_id,
            merchant_order_id: request.invoice(),
            recipient_name: request.recipient_name.clone(),
            recipient_phone: request.recipient_phone.clone(),
            recipient_address: request.recipient_address.clone(),
            delivery_type: DELIVERY_TYPE_NORMAL,
            item_type: ITEM_TYPE_PARCEL,
            special_instruction: request.note.clone(),
            item_quantity: request.item_quantity,
            item_weight: request.item_weight_kg.to_f64().unwrap_or(0.5),
            amount_to_collect: request.amount_to_collect.round().to_i64().unwrap_or_default(),
            item_description: request.item_description.clone(),
        }
    }

    async fn post_order(&self, token: &str, payload: &CreateOrderRequest) -> Result<(StatusCode, String), CourierError> {
        let response = self.http.post(self.url(CREATE_ORDER_PATH)).bearer_auth(token).json(payload).send().await?;
        let status = response.status();
        Ok((status, response.text().await?))
    }
}

#[async_trait]
impl CourierProvider for PathaoClient {
    fn kind(&self) -> CourierKind { CourierKind::Pathao }

    fn strict_guard(&self) -> bool { true }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<String, CourierError> {
        let payload = self.payload(request);
        let (mut status, mut body) = self.post_order(&self.token().await?, &payload).await?;
        if status == StatusCode::UNAUTHORIZED {
            // Token revoked before its advertised expiry; nothing was booked.
            tracing::warn!(order_id = %request.order_id, "courier token rejected, re-issuing");
            self.tokens.invalidate().await;
            (status, body) = self.post_order(&self.token().await?, &payload).await?;
        }
        if !status.is_success() { return Err(classify_failure(status, &body)); }

        let parsed: CreateOrderResponse = parse_success(status, &body)?;
        match parsed.data {
            Some(consignment) if !consignment.consignment_id.is_empty() => Ok(consignment.consignment_id),
            _ => Err(CourierError::ProviderRejected(parsed.message.unwrap_or_else(|| "Pathao returned no consignment".into()))),
        }
    }
}
