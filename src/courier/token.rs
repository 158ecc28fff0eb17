//! Cached bearer token for providers that issue short-lived credentials.
//!
//! The lock is only held to read or store the cached value, never across the
//! credential exchange. Callers that race on an expired token may each run an
//! exchange; the provider re-issues tokens idempotently so the last writer wins.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::CourierError;

/// Refresh this long before the provider-reported expiry.
pub const SAFETY_MARGIN_SECS: i64 = 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken { pub access_token: String, pub expires_in_secs: i64 }

#[derive(Clone, Debug)]
struct CachedToken { token: String, expires_at: DateTime<Utc> }

#[derive(Debug, Default)]
pub struct TokenCache { cached: RwLock<Option<CachedToken>> }

impl TokenCache {
    pub fn new() -> Self { Self::default() }

    pub async fn get<F, Fut>(&self, exchange: F) -> Result<String, CourierError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IssuedToken, CourierError>>,
    {
        self.get_at(Utc::now(), exchange).await
    }

    /// Returns the cached token if it is still valid at `now`, otherwise runs
    /// `exchange` and caches the result.
    pub async fn get_at<F, Fut>(&self, now: DateTime<Utc>, exchange: F) -> Result<String, CourierError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IssuedToken, CourierError>>,
    {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if now < cached.expires_at - Duration::seconds(SAFETY_MARGIN_SECS) {
                return Ok(cached.token.clone());
            }
        }

        let issued = exchange().await?;
        if issued.access_token.is_empty() { return Err(CourierError::Authentication("empty access token".into())); }
        let expires_at = now + Duration::seconds(issued.expires_in_secs.max(0));
        tracing::debug!(%expires_at, "courier token refreshed");
        *self.cached.write().await = Some(CachedToken { token: issued.access_token.clone(), expires_at });
        Ok(issued.access_token)
    }

    /// Drops the cached token so the next call re-exchanges credentials.
    pub async fn invalidate(&self) { *self.cached.write().await = None; }

    pub async fn expires_at(&self) -> Option<DateTime<Utc>> { self.cached.read().await.as_ref().map(|c| c.expires_at) }
}
