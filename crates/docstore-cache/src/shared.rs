//! Shared cache tier.
//!
//! [`HttpSharedCache`] talks to a key/value service:
//! - `GET {endpoint}/{key}`: 200 with the payload, 404 when absent
//! - `PUT {endpoint}/{key}`: payload body, `x-ttl-seconds` header
//! - `DELETE {endpoint}/{key}`
//! - `DELETE {endpoint}?pattern={glob}`: optional `{"deleted": n}` body

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::CacheError;

/// Header carrying the entry lifetime on PUT
pub const TTL_HEADER: &str = "x-ttl-seconds";

/// A cache tier shared between processes. Best-effort: callers treat every
/// error as the tier being unavailable.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete keys matching a `*` glob. Returns the count when known.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// HTTP-backed shared tier
pub struct HttpSharedCache {
    client: Client,
    endpoint: String,
}

impl HttpSharedCache {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, CacheError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(CacheError::Config("shared cache endpoint is empty".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Config(e.to_string()))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, key)
    }
}

fn unavailable(status: StatusCode, op: &str) -> CacheError {
    CacheError::TierUnavailable(format!("{} returned {}", op, status))
}

#[async_trait]
impl SharedCache for HttpSharedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let response = self.client.get(self.url(key)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            status => Err(unavailable(status, "GET")),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let response = self
            .client
            .put(self.url(key))
            .header(TTL_HEADER, ttl.as_secs().to_string())
            .header("Content-Type", "application/json")
            .body(value)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(unavailable(response.status(), "PUT"));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let response = self.client.delete(self.url(key)).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(unavailable(status, "DELETE"))
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        #[derive(Deserialize)]
        struct Deleted {
            deleted: u64,
        }

        let response = self
            .client
            .delete(&self.endpoint)
            .query(&[("pattern", pattern)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(unavailable(response.status(), "DELETE pattern"));
        }
        let body = response.bytes().await?;
        let deleted = serde_json::from_slice::<Deleted>(&body)
            .map(|d| d.deleted)
            .unwrap_or(0);
        debug!(pattern, deleted, "Shared cache pattern delete");
        Ok(deleted)
    }
}
