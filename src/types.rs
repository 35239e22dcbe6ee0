//! Core ledger-facing types
//!
//! Addresses, transaction hashes, opaque method calls and receipts. The access
//! layer never interprets call data; it only needs to know that something is an
//! address, a hash, or a numeric quantity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Errors raised while decoding ledger values
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid transaction hash: {0}")]
    InvalidHash(String),

    #[error("Invalid hex quantity: {0}")]
    InvalidQuantity(String),

    #[error("Malformed receipt: {0}")]
    MalformedReceipt(String),
}

fn decode_fixed_hex(raw: &str, expected_len: usize) -> Option<String> {
    let body = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    let bytes = hex::decode(body).ok()?;
    if bytes.len() != expected_len {
        return None;
    }
    Some(format!("0x{}", hex::encode(bytes)))
}

/// 20-byte account address, stored lowercase with a `0x` prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        decode_fixed_hex(raw.trim(), 20)
            .map(Self)
            .ok_or_else(|| TypeError::InvalidAddress(raw.to_string()))
    }

    /// The all-zero address used by the write-capability probe
    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(40)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl std::str::FromStr for Address {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// 32-byte transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        decode_fixed_hex(raw.trim(), 32)
            .map(Self)
            .ok_or_else(|| TypeError::InvalidHash(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TxHash {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TxHash> for String {
    fn from(hash: TxHash) -> Self {
        hash.0
    }
}

/// Parse a JSON-RPC hex quantity (`0x1a`). A bare `0x` is rejected.
pub fn parse_quantity(raw: &str) -> Result<u128, TypeError> {
    let body = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| TypeError::InvalidQuantity(raw.to_string()))?;
    if body.is_empty() {
        return Err(TypeError::InvalidQuantity(raw.to_string()));
    }
    u128::from_str_radix(body, 16).map_err(|_| TypeError::InvalidQuantity(raw.to_string()))
}

pub fn format_quantity(value: u128) -> String {
    format!("{:#x}", value)
}

/// An opaque contract invocation: target, pre-encoded call data and value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCall {
    pub to: Address,
    pub data: String,
    #[serde(default)]
    pub value: u128,
}

impl MethodCall {
    pub fn new(to: Address, data: impl Into<String>) -> Self {
        Self {
            to,
            data: data.into(),
            value: 0,
        }
    }

    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }
}

/// Transaction request as handed to the node or the signer
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub data: String,
    pub value: u128,
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
    pub extra: Map<String, Value>,
}

impl TxRequest {
    pub fn from_call(call: &MethodCall, from: &Address) -> Self {
        Self {
            from: from.clone(),
            to: call.to.clone(),
            data: call.data.clone(),
            value: call.value,
            gas: None,
            gas_price: None,
            extra: Map::new(),
        }
    }

    pub fn with_fees(mut self, gas: u64, gas_price: u128) -> Self {
        self.gas = Some(gas);
        self.gas_price = Some(gas_price);
        self
    }

    pub fn with_extra(mut self, extra: &Map<String, Value>) -> Self {
        self.extra.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// JSON-RPC transaction object. Caller-supplied extras are merged last.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("from".into(), Value::String(self.from.to_string()));
        object.insert("to".into(), Value::String(self.to.to_string()));
        object.insert("value".into(), Value::String(format_quantity(self.value)));
        if !self.data.is_empty() {
            object.insert("data".into(), Value::String(self.data.clone()));
        }
        if let Some(gas) = self.gas {
            object.insert("gas".into(), Value::String(format_quantity(gas as u128)));
        }
        if let Some(price) = self.gas_price {
            object.insert("gasPrice".into(), Value::String(format_quantity(price)));
        }
        for (key, value) in &self.extra {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }
}

/// Transaction receipt as returned by `eth_getTransactionReceipt`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub status: Option<bool>,
    pub raw: Value,
}

impl Receipt {
    pub fn from_json(value: &Value) -> Result<Self, TypeError> {
        let object = value
            .as_object()
            .ok_or_else(|| TypeError::MalformedReceipt("receipt is not an object".into()))?;

        let hash = object
            .get("transactionHash")
            .and_then(Value::as_str)
            .ok_or_else(|| TypeError::MalformedReceipt("missing transactionHash".into()))?;

        let quantity = |key: &str| -> Result<Option<u128>, TypeError> {
            match object.get(key).and_then(Value::as_str) {
                Some(raw) => parse_quantity(raw).map(Some),
                None => Ok(None),
            }
        };

        let small = |key: &str| -> Result<Option<u64>, TypeError> {
            quantity(key)?
                .map(|n| {
                    u64::try_from(n)
                        .map_err(|_| TypeError::MalformedReceipt(format!("{} out of range", key)))
                })
                .transpose()
        };

        Ok(Self {
            transaction_hash: TxHash::parse(hash)?,
            block_number: small("blockNumber")?,
            gas_used: small("gasUsed")?,
            status: quantity("status")?.map(|s| s == 1),
            raw: value.clone(),
        })
    }

    pub fn succeeded(&self) -> bool {
        self.status.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_address_normalizes_case() {
        let addr = Address::parse("0xABCDEFabcdef0123456789ABCDEFabcdef012345").unwrap();
        assert_eq!(addr.as_str(), "0xabcdefabcdef0123456789abcdefabcdef012345");
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("abcdefabcdef0123456789abcdefabcdef012345").is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x5208").unwrap(), 21_000);
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("12").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_request_json_merges_extra_params() {
        let call = MethodCall::new(Address::zero(), "0xdeadbeef").with_value(10);
        let mut extra = Map::new();
        extra.insert("nonce".into(), json!("0x7"));

        let request = TxRequest::from_call(&call, &Address::zero())
            .with_fees(50_000, 30_000_000_000)
            .with_extra(&extra);
        let body = request.to_json();

        assert_eq!(body["gas"], "0xc350");
        assert_eq!(body["gasPrice"], "0x6fc23ac00");
        assert_eq!(body["value"], "0xa");
        assert_eq!(body["nonce"], "0x7");
        assert_eq!(body["data"], "0xdeadbeef");
    }

    #[test]
    fn test_receipt_decoding() {
        let hash = format!("0x{}", "ab".repeat(32));
        let receipt = Receipt::from_json(&json!({
            "transactionHash": hash,
            "blockNumber": "0x10",
            "gasUsed": "0x5208",
            "status": "0x1",
        }))
        .unwrap();

        assert_eq!(receipt.block_number, Some(16));
        assert_eq!(receipt.gas_used, Some(21_000));
        assert!(receipt.succeeded());

        assert!(Receipt::from_json(&json!({ "blockNumber": "0x1" })).is_err());
    }

    #[test]
    fn test_receipt_rejects_oversized_quantities() {
        let hash = format!("0x{}", "ab".repeat(32));
        let err = Receipt::from_json(&json!({
            "transactionHash": hash,
            "blockNumber": "0x10000000000000000",
            "status": "0x1",
        }))
        .unwrap_err();

        assert!(matches!(err, TypeError::MalformedReceipt(ref m) if m.contains("blockNumber")));
    }
}
