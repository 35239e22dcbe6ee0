//! Shared scripted collaborators for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use ledger_access::biometric::{BiometricGate, GateError, Verification};
use ledger_access::events::EventHub;
use ledger_access::rpc_manager::{
    Endpoint, EndpointPool, HealthProber, RpcCallError, RpcTransport,
};
use ledger_access::tx_pipeline::LedgerClient;
use ledger_access::types::{Address, Receipt, TxHash, TxRequest};
use ledger_access::wallet::WalletSigner;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn address(byte: u8) -> Address {
    Address::parse(&format!("0x{}", hex::encode([byte; 20]))).unwrap()
}

pub fn tx_hash(byte: u8) -> TxHash {
    TxHash::parse(&format!("0x{}", hex::encode([byte; 32]))).unwrap()
}

pub fn receipt(hash: &TxHash, success: bool) -> Receipt {
    Receipt::from_json(&json!({
        "transactionHash": hash.as_str(),
        "blockNumber": "0x64",
        "gasUsed": "0x5208",
        "status": if success { "0x1" } else { "0x0" },
    }))
    .unwrap()
}

#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    RpcError(i64, String),
    Transport(String),
    /// Never answers; the caller's timeout decides
    Hang,
}

/// Transport answering from per-(url, method) scripts. The last reply of a
/// script repeats forever.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<(String, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, method: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .insert((url.to_string(), method.to_string()), replies.into());
    }

    /// Reachable endpoint that accepts writes
    pub fn healthy(&self, url: &str) {
        self.script(url, "eth_blockNumber", vec![Reply::Result(json!("0x10"))]);
        self.script(
            url,
            "eth_sendTransaction",
            vec![Reply::RpcError(-32000, "unknown account".into())],
        );
    }

    /// Reachable endpoint that rejects the write method
    pub fn read_only(&self, url: &str) {
        self.script(url, "eth_blockNumber", vec![Reply::Result(json!("0x10"))]);
        self.script(
            url,
            "eth_sendTransaction",
            vec![Reply::RpcError(-32601, "Method not found".into())],
        );
    }

    pub fn down(&self, url: &str) {
        self.script(url, "eth_blockNumber", vec![Reply::Transport("connection refused".into())]);
    }

    pub fn hanging(&self, url: &str) {
        self.script(url, "eth_blockNumber", vec![Reply::Hang]);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, m)| m == method)
            .map(|(url, _)| url.clone())
            .collect()
    }

    fn next_reply(&self, url: &str, method: &str) -> Option<Reply> {
        let mut scripts = self.scripts.lock();
        let queue = scripts.get_mut(&(url.to_string(), method.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn request(
        &self,
        url: &str,
        method: &str,
        _params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcCallError> {
        self.calls.lock().push((url.to_string(), method.to_string()));
        match self.next_reply(url, method) {
            Some(Reply::Result(value)) => Ok(value),
            Some(Reply::RpcError(code, message)) => {
                Err(RpcCallError::response(Some(code), message))
            }
            Some(Reply::Transport(message)) => Err(RpcCallError::transport(message)),
            Some(Reply::Hang) => {
                tokio::time::sleep(timeout).await;
                Err(RpcCallError::timeout(timeout))
            }
            None => Err(RpcCallError::transport(format!(
                "connection refused: no script for {} {}",
                url, method
            ))),
        }
    }
}

pub fn pool_over(transport: Arc<ScriptedTransport>, urls: &[&str]) -> Arc<EndpointPool> {
    let prober = HealthProber::new(transport, PROBE_TIMEOUT);
    Arc::new(
        EndpointPool::new(
            urls.iter().map(|u| u.to_string()).collect(),
            None,
            prober,
            EventHub::new(),
        )
        .unwrap(),
    )
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub simulate: AtomicU32,
    pub estimate: AtomicU32,
    pub price: AtomicU32,
    pub send: AtomicU32,
    pub receipt: AtomicU32,
    pub nonce: AtomicU32,
}

impl CallCounts {
    pub fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

/// Ledger answering from per-operation queues; an empty queue succeeds with a
/// default value
#[derive(Debug, Default)]
pub struct ScriptedLedger {
    simulate: Mutex<VecDeque<Result<String, RpcCallError>>>,
    estimate: Mutex<VecDeque<Result<u64, RpcCallError>>>,
    price: Mutex<VecDeque<Result<u128, RpcCallError>>>,
    send: Mutex<VecDeque<Result<TxHash, RpcCallError>>>,
    receipts: Mutex<VecDeque<Result<Option<Receipt>, RpcCallError>>>,
    pub counts: CallCounts,
    sent: Mutex<Vec<TxRequest>>,
    endpoints: Mutex<Vec<String>>,
}

pub const DEFAULT_ESTIMATE: u64 = 100_000;
pub const DEFAULT_GAS_PRICE: u128 = 30_000_000_000;

impl ScriptedLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_simulate(&self, replies: Vec<Result<String, RpcCallError>>) {
        *self.simulate.lock() = replies.into();
    }

    pub fn script_estimate(&self, replies: Vec<Result<u64, RpcCallError>>) {
        *self.estimate.lock() = replies.into();
    }

    pub fn script_price(&self, replies: Vec<Result<u128, RpcCallError>>) {
        *self.price.lock() = replies.into();
    }

    pub fn script_send(&self, replies: Vec<Result<TxHash, RpcCallError>>) {
        *self.send.lock() = replies.into();
    }

    pub fn script_receipts(&self, replies: Vec<Result<Option<Receipt>, RpcCallError>>) {
        *self.receipts.lock() = replies.into();
    }

    pub fn sent(&self) -> Vec<TxRequest> {
        self.sent.lock().clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().clone()
    }

    pub fn total_write_side_calls(&self) -> u32 {
        CallCounts::get(&self.counts.estimate)
            + CallCounts::get(&self.counts.price)
            + CallCounts::get(&self.counts.send)
    }

    fn next<T>(
        queue: &Mutex<VecDeque<Result<T, RpcCallError>>>,
        default: T,
    ) -> Result<T, RpcCallError> {
        queue.lock().pop_front().unwrap_or(Ok(default))
    }

    fn seen(&self, endpoint: &Endpoint) {
        self.endpoints.lock().push(endpoint.url().to_string());
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn simulate(&self, endpoint: &Endpoint, _tx: &TxRequest) -> Result<String, RpcCallError> {
        self.seen(endpoint);
        self.counts.simulate.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.simulate, "0x".to_string())
    }

    async fn estimate_gas(
        &self,
        endpoint: &Endpoint,
        _tx: &TxRequest,
    ) -> Result<u64, RpcCallError> {
        self.seen(endpoint);
        self.counts.estimate.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.estimate, DEFAULT_ESTIMATE)
    }

    async fn gas_price(&self, endpoint: &Endpoint) -> Result<u128, RpcCallError> {
        self.seen(endpoint);
        self.counts.price.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.price, DEFAULT_GAS_PRICE)
    }

    async fn send(&self, endpoint: &Endpoint, tx: &TxRequest) -> Result<TxHash, RpcCallError> {
        self.seen(endpoint);
        self.counts.send.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().push(tx.clone());
        Self::next(&self.send, tx_hash(0xab))
    }

    async fn receipt(
        &self,
        endpoint: &Endpoint,
        hash: &TxHash,
    ) -> Result<Option<Receipt>, RpcCallError> {
        self.seen(endpoint);
        self.counts.receipt.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.receipts, Some(receipt(hash, true)))
    }

    async fn transaction_count(
        &self,
        endpoint: &Endpoint,
        _address: &Address,
    ) -> Result<u64, RpcCallError> {
        self.seen(endpoint);
        self.counts.nonce.fetch_add(1, Ordering::SeqCst);
        Ok(7)
    }
}

#[derive(Debug)]
pub struct MockSigner {
    accounts: Vec<Address>,
    pub account_requests: AtomicU32,
}

impl MockSigner {
    pub fn with_accounts(accounts: Vec<Address>) -> Arc<Self> {
        Arc::new(Self {
            accounts,
            account_requests: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl WalletSigner for MockSigner {
    async fn request_accounts(&self) -> Result<Vec<Address>, RpcCallError> {
        self.account_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.accounts.clone())
    }

    async fn sign_and_send(&self, _tx: &TxRequest) -> Result<TxHash, RpcCallError> {
        Ok(tx_hash(0xcd))
    }

    async fn call(&self, _tx: &TxRequest) -> Result<String, RpcCallError> {
        Ok("0x".to_string())
    }
}

#[derive(Debug)]
pub struct MockGate {
    outcome: Result<bool, GateError>,
    pub calls: AtomicU32,
}

impl MockGate {
    pub fn passing() -> Arc<Self> {
        Self::with(Ok(true))
    }

    pub fn rejecting() -> Arc<Self> {
        Self::with(Ok(false))
    }

    pub fn failing(error: GateError) -> Arc<Self> {
        Self::with(Err(error))
    }

    fn with(outcome: Result<bool, GateError>) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl BiometricGate for MockGate {
    async fn verify(
        &self,
        subject_id: &str,
        _timeout: Duration,
    ) -> Result<Verification, GateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let success = self.outcome.clone()?;
        Ok(Verification {
            success,
            payload: json!({ "voterId": subject_id, "success": success }),
        })
    }
}
