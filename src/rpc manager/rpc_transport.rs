//! JSON-RPC transport over HTTP
//!
//! The transport is the only component that touches the network for ledger
//! reads. Everything above it sees `Result<Value, RpcCallError>`.

use super::rpc_errors::RpcCallError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};

/// Network transport abstraction used by the prober, the ledger client and the signer
#[async_trait]
pub trait RpcTransport: Send + Sync + std::fmt::Debug {
    /// Issue one JSON-RPC request against `url`, bounded by `timeout`
    async fn request(
        &self,
        url: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcCallError>;
}

/// reqwest-backed JSON-RPC 2.0 transport
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            next_id: AtomicU64::new(1),
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, RpcCallError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| RpcCallError::transport(format!("rpc connection failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcCallError::transport(format!(
                "rpc endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(RpcCallError::malformed)?;

        decode_response(payload)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a JSON-RPC envelope into its result or its error object
pub(crate) fn decode_response(payload: Value) -> Result<Value, RpcCallError> {
    if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("rpc error without message")
            .to_string();
        return Err(RpcCallError::response(code, message));
    }

    match payload {
        Value::Object(mut object) => object
            .remove("result")
            .ok_or_else(|| RpcCallError::malformed("missing result field")),
        other => Err(RpcCallError::malformed(format!("unexpected payload {}", other))),
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    #[instrument(skip(self, url, params), fields(url = %url))]
    async fn request(
        &self,
        url: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcCallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        match tokio::time::timeout(timeout, self.post(url, &body)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    debug!(method, error = %e, "JSON-RPC request failed");
                }
                result
            }
            Err(_) => {
                debug!(
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "JSON-RPC request timed out"
                );
                Err(RpcCallError::timeout(timeout))
            }
        }
    }
}
