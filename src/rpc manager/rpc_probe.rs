//! Endpoint capability probe
//!
//! A probe answers two questions within a fixed time budget:
//! - can the endpoint serve a cheap read (`eth_blockNumber`)
//! - does it accept the write method (`eth_sendTransaction`)
//!
//! The write check sends a deliberately invalid transaction from and to the
//! zero address. Any JSON-RPC error other than "not implemented / not found /
//! not supported" means the method exists. This is a best-effort compatibility
//! heuristic; it does not prove the peer is correctly configured.

use super::rpc_errors::{FailureSource, RpcCallError};
use super::rpc_pool::Endpoint;
use super::rpc_transport::RpcTransport;
use crate::types::{parse_quantity, Address};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const UNSUPPORTED_MARKERS: &[&str] = &["not implemented", "method not found", "not supported"];
const METHOD_NOT_FOUND_CODE: i64 = -32601;

/// Result of probing one endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub endpoint: Endpoint,
    pub reachable: bool,
    pub write_capable: bool,
    pub latency: Option<Duration>,
}

impl HealthRecord {
    fn unreachable(endpoint: &Endpoint) -> Self {
        Self {
            endpoint: endpoint.clone(),
            reachable: false,
            write_capable: false,
            latency: None,
        }
    }

    /// Reachable and able to take writes
    pub fn is_usable(&self) -> bool {
        self.reachable && self.write_capable
    }
}

/// Bounded-time capability prober
#[derive(Debug, Clone)]
pub struct HealthProber {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(transport: Arc<dyn RpcTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one request with the probe budget, independent of the transport's own timer
    async fn bounded(&self, url: &str, method: &str, params: Value) -> Result<Value, RpcCallError> {
        match tokio::time::timeout(
            self.timeout,
            self.transport.request(url, method, params, self.timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RpcCallError::timeout(self.timeout)),
        }
    }

    #[instrument(skip(self), fields(url = %endpoint.url()))]
    pub async fn probe(&self, endpoint: &Endpoint) -> HealthRecord {
        let started = Instant::now();

        let reachable = match self.bounded(endpoint.url(), "eth_blockNumber", json!([])).await {
            Ok(Value::String(block)) => match parse_quantity(&block) {
                Ok(height) => {
                    debug!(block = height as u64, "Probe: eth_blockNumber succeeded");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Probe: eth_blockNumber returned a non-numeric block");
                    false
                }
            },
            Ok(other) => {
                warn!(result = %other, "Probe: eth_blockNumber returned an unexpected result");
                false
            }
            Err(e) => {
                warn!(error = %e, "Probe: eth_blockNumber failed");
                false
            }
        };

        if !reachable {
            return HealthRecord::unreachable(endpoint);
        }

        let zero = Address::zero();
        let write_probe = json!([{
            "from": zero.as_str(),
            "to": zero.as_str(),
            "value": "0x0",
        }]);

        let write_result = self
            .bounded(endpoint.url(), "eth_sendTransaction", write_probe)
            .await;
        let write_capable = match write_result {
            Ok(_) => true,
            Err(e) if e.origin == FailureSource::Response => {
                let supported = !signals_unsupported(&e);
                if !supported {
                    warn!(error = %e, "Probe: endpoint does not support writes");
                }
                supported
            }
            Err(e) => {
                warn!(error = %e, "Probe: write capability check failed");
                false
            }
        };

        HealthRecord {
            endpoint: endpoint.clone(),
            reachable,
            write_capable,
            latency: Some(started.elapsed()),
        }
    }
}

fn signals_unsupported(error: &RpcCallError) -> bool {
    let message = error.message.to_lowercase();
    error.code == Some(METHOD_NOT_FOUND_CODE)
        || UNSUPPORTED_MARKERS.iter().any(|marker| message.contains(marker))
}
