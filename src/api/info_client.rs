//! Thin HTTP client for one /info provider (node or public API).

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::api::types::InfoRequest;
use crate::error::{CopyError, Result};

/// One queryable /info provider. `InfoClient` is the live HTTP
/// implementation; the failover layer is generic over this so its
/// retry ladder can be tested against scripted providers.
pub trait InfoProvider {
    fn info(&self, request: &InfoRequest) -> impl Future<Output = Result<Value>> + Send;

    fn name(&self) -> &'static str;
}

/// A single /info provider. Cloning is cheap; the underlying connection
/// pool is shared.
#[derive(Debug, Clone)]
pub struct InfoClient {
    client: reqwest::Client,
    base_url: String,
    name: &'static str,
}

impl InfoClient {
    pub fn new(base_url: &str, name: &'static str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CopyError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            name,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// POST a query to /info and return the raw JSON body.
    ///
    /// Responses arrive either as a bare object/array or wrapped in
    /// `{"data": ...}`; the wrapper is stripped here so callers never
    /// see it.
    pub async fn info(&self, request: &InfoRequest) -> Result<Value> {
        let url = format!("{}/info", self.base_url);
        debug!(provider = self.name, kind = request.kind(), "info request");

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CopyError::from_status(status, body));
        }

        let mut value: Value = response
            .json()
            .await
            .map_err(|e| CopyError::Fatal(format!("malformed /info response: {e}")))?;
        if let Some(inner) = value.get_mut("data") {
            return Ok(inner.take());
        }
        Ok(value)
    }

    /// POST to /exchange (order placement and cancels).
    pub async fn exchange(&self, body: &Value) -> Result<Value> {
        let url = format!("{}/exchange", self.base_url);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CopyError::from_status(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| CopyError::Fatal(format!("malformed /exchange response: {e}")))
    }
}

impl InfoProvider for InfoClient {
    async fn info(&self, request: &InfoRequest) -> Result<Value> {
        InfoClient::info(self, request).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
