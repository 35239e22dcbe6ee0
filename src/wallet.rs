//! Wallet signer interface and a node-backed implementation
//!
//! The access layer never holds keys. It asks a signer for accounts, hands it
//! fully-priced transactions to sign and broadcast, and reacts to the signer's
//! account/chain notifications by tearing its session down.

use crate::rpc_manager::{RpcCallError, RpcTransport};
use crate::types::{Address, TxHash, TxRequest};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Opaque signing collaborator
#[async_trait]
pub trait WalletSigner: Send + Sync + std::fmt::Debug {
    /// Accounts the signer is willing to sign for; may prompt the user
    async fn request_accounts(&self) -> Result<Vec<Address>, RpcCallError>;

    /// Sign and broadcast; returns the transaction hash
    async fn sign_and_send(&self, tx: &TxRequest) -> Result<TxHash, RpcCallError>;

    /// Read-only call through the signer's own provider
    async fn call(&self, tx: &TxRequest) -> Result<String, RpcCallError>;
}

/// Notification pushed by the signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// What the owner of a session must do after a wallet notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Re-run initialization from scratch
    Reinitialize,
    /// The wallet exposes no accounts; stay disconnected
    Disconnected,
}

impl WalletEvent {
    pub fn session_action(&self) -> SessionAction {
        match self {
            WalletEvent::AccountsChanged(accounts) if accounts.is_empty() => {
                SessionAction::Disconnected
            }
            _ => SessionAction::Reinitialize,
        }
    }
}

/// Signer backed by a node that manages unlocked accounts
/// (`eth_accounts`, `eth_sendTransaction`, `eth_call`)
#[derive(Debug)]
pub struct NodeSigner {
    transport: Arc<dyn RpcTransport>,
    url: String,
    timeout: Duration,
    known_accounts: RwLock<Vec<Address>>,
}

impl NodeSigner {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            url: url.into(),
            timeout,
            known_accounts: RwLock::new(Vec::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Accounts returned by the last successful `request_accounts`
    pub async fn known_accounts(&self) -> Vec<Address> {
        self.known_accounts.read().await.clone()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcCallError> {
        self.transport
            .request(&self.url, method, params, self.timeout)
            .await
    }
}

#[async_trait]
impl WalletSigner for NodeSigner {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn request_accounts(&self) -> Result<Vec<Address>, RpcCallError> {
        let result = self.request("eth_accounts", json!([])).await?;
        let raw = result
            .as_array()
            .ok_or_else(|| RpcCallError::malformed("eth_accounts did not return an array"))?;

        let accounts = raw
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .ok_or_else(|| RpcCallError::malformed("account entry is not a string"))
                    .and_then(|s| Address::parse(s).map_err(RpcCallError::malformed))
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(accounts = accounts.len(), "Signer accounts loaded");
        *self.known_accounts.write().await = accounts.clone();
        Ok(accounts)
    }

    #[instrument(skip(self, tx), fields(url = %self.url, from = %tx.from))]
    async fn sign_and_send(&self, tx: &TxRequest) -> Result<TxHash, RpcCallError> {
        let result = self.request("eth_sendTransaction", json!([tx.to_json()])).await?;
        let hash = result
            .as_str()
            .ok_or_else(|| RpcCallError::malformed("eth_sendTransaction did not return a hash"))?;
        let hash = TxHash::parse(hash).map_err(RpcCallError::malformed)?;
        debug!(hash = %hash, "Transaction handed to signer");
        Ok(hash)
    }

    async fn call(&self, tx: &TxRequest) -> Result<String, RpcCallError> {
        let result = self.request("eth_call", json!([tx.to_json(), "latest"])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcCallError::malformed("eth_call did not return hex data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_manager::HttpTransport;
    use crate::types::MethodCall;

    #[test]
    fn test_session_actions() {
        assert_eq!(
            WalletEvent::AccountsChanged(vec![]).session_action(),
            SessionAction::Disconnected
        );
        assert_eq!(
            WalletEvent::AccountsChanged(vec![Address::zero()]).session_action(),
            SessionAction::Reinitialize
        );
        assert_eq!(WalletEvent::ChainChanged(137).session_action(), SessionAction::Reinitialize);
    }

    #[tokio::test]
    async fn test_node_signer_accounts_and_send() {
        let mut server = mockito::Server::new_async().await;
        let account = "0x1111111111111111111111111111111111111111";
        let hash = format!("0x{}", "cd".repeat(32));

        let _accounts = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "eth_accounts"})))
            .with_header("content-type", "application/json")
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": [account]}).to_string())
            .create_async()
            .await;
        let _send = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "eth_sendTransaction"})))
            .with_header("content-type", "application/json")
            .with_body(json!({"jsonrpc": "2.0", "id": 2, "result": hash}).to_string())
            .create_async()
            .await;

        let signer = NodeSigner::new(
            Arc::new(HttpTransport::new()),
            server.url(),
            Duration::from_secs(5),
        );
        let accounts = signer.request_accounts().await.unwrap();
        assert_eq!(accounts, vec![Address::parse(account).unwrap()]);
        assert_eq!(signer.known_accounts().await.len(), 1);

        let call = MethodCall::new(Address::zero(), "0x");
        let tx = TxRequest::from_call(&call, &accounts[0]).with_fees(21_000, 1);
        let sent = signer.sign_and_send(&tx).await.unwrap();
        assert_eq!(sent.as_str(), hash);
    }

    #[tokio::test]
    async fn test_node_signer_surfaces_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": {"code": 4001, "message": "User rejected the request."}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let signer = NodeSigner::new(
            Arc::new(HttpTransport::new()),
            server.url(),
            Duration::from_secs(5),
        );
        let call = MethodCall::new(Address::zero(), "0x");
        let tx = TxRequest::from_call(&call, &Address::zero());
        let err = signer.sign_and_send(&tx).await.unwrap_err();
        assert_eq!(err.code, Some(4001));
    }
}
