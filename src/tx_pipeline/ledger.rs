//! Ledger client: reads through the selected RPC endpoint, writes through the signer

use crate::rpc_manager::{Endpoint, RpcCallError, RpcTransport};
use crate::types::{parse_quantity, Address, Receipt, TxHash, TxRequest};
use crate::wallet::WalletSigner;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Per-step ledger operations used by the pipeline. Each call targets the
/// endpoint chosen by the retry executor for that attempt.
#[async_trait]
pub trait LedgerClient: Send + Sync + std::fmt::Debug {
    /// `eth_call` as the sender; returns the raw return data
    async fn simulate(&self, endpoint: &Endpoint, tx: &TxRequest) -> Result<String, RpcCallError>;

    async fn estimate_gas(&self, endpoint: &Endpoint, tx: &TxRequest) -> Result<u64, RpcCallError>;

    async fn gas_price(&self, endpoint: &Endpoint) -> Result<u128, RpcCallError>;

    /// Hand a fully-priced request to the signer
    async fn send(&self, endpoint: &Endpoint, tx: &TxRequest) -> Result<TxHash, RpcCallError>;

    /// `None` while the transaction is still pending
    async fn receipt(
        &self,
        endpoint: &Endpoint,
        hash: &TxHash,
    ) -> Result<Option<Receipt>, RpcCallError>;

    async fn transaction_count(
        &self,
        endpoint: &Endpoint,
        address: &Address,
    ) -> Result<u64, RpcCallError>;
}

fn quantity(value: &Value, method: &str) -> Result<u128, RpcCallError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcCallError::malformed(format!("{} did not return a quantity", method)))?;
    parse_quantity(raw).map_err(RpcCallError::malformed)
}

fn narrow(value: u128, method: &str) -> Result<u64, RpcCallError> {
    u64::try_from(value)
        .map_err(|_| RpcCallError::malformed(format!("{} result out of range", method)))
}

#[derive(Debug, Clone)]
pub struct JsonRpcLedger {
    transport: Arc<dyn RpcTransport>,
    signer: Arc<dyn WalletSigner>,
    request_timeout: Duration,
}

impl JsonRpcLedger {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        signer: Arc<dyn WalletSigner>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            signer,
            request_timeout,
        }
    }

    pub fn signer(&self) -> &Arc<dyn WalletSigner> {
        &self.signer
    }

    async fn request(
        &self,
        endpoint: &Endpoint,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcCallError> {
        self.transport
            .request(endpoint.url(), method, params, self.request_timeout)
            .await
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    #[instrument(skip(self, tx), fields(url = %endpoint))]
    async fn simulate(&self, endpoint: &Endpoint, tx: &TxRequest) -> Result<String, RpcCallError> {
        let result = self
            .request(endpoint, "eth_call", json!([tx.to_json(), "latest"]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcCallError::malformed("eth_call did not return hex data"))
    }

    #[instrument(skip(self, tx), fields(url = %endpoint))]
    async fn estimate_gas(&self, endpoint: &Endpoint, tx: &TxRequest) -> Result<u64, RpcCallError> {
        let result = self.request(endpoint, "eth_estimateGas", json!([tx.to_json()])).await?;
        narrow(quantity(&result, "eth_estimateGas")?, "eth_estimateGas")
    }

    async fn gas_price(&self, endpoint: &Endpoint) -> Result<u128, RpcCallError> {
        let result = self.request(endpoint, "eth_gasPrice", json!([])).await?;
        quantity(&result, "eth_gasPrice")
    }

    async fn send(&self, _endpoint: &Endpoint, tx: &TxRequest) -> Result<TxHash, RpcCallError> {
        self.signer.sign_and_send(tx).await
    }

    async fn receipt(
        &self,
        endpoint: &Endpoint,
        hash: &TxHash,
    ) -> Result<Option<Receipt>, RpcCallError> {
        let result = self
            .request(endpoint, "eth_getTransactionReceipt", json!([hash.as_str()]))
            .await?;
        if result.is_null() {
            debug!(hash = %hash, "Receipt not available yet");
            return Ok(None);
        }
        Receipt::from_json(&result)
            .map(Some)
            .map_err(RpcCallError::malformed)
    }

    async fn transaction_count(
        &self,
        endpoint: &Endpoint,
        address: &Address,
    ) -> Result<u64, RpcCallError> {
        let result = self
            .request(
                endpoint,
                "eth_getTransactionCount",
                json!([address.as_str(), "pending"]),
            )
            .await?;
        narrow(
            quantity(&result, "eth_getTransactionCount")?,
            "eth_getTransactionCount",
        )
    }
}
