//! Ledger Access - resilient JSON-RPC access layer for EVM-style ledgers
//!
//! Endpoint discovery and failover, classified retries, and a
//! simulate-estimate-price-submit-confirm write pipeline.

pub mod access;
pub mod biometric;
pub mod config;
pub mod events;
pub mod observability;
pub mod types;
pub mod wallet;

// Component modules with non-standard paths (directories with spaces)
#[path = "rpc manager/mod.rs"]
pub mod rpc_manager;

pub mod tx_pipeline;

// Re-export commonly used types
pub use access::{AccessLayer, AccessSummary, Session};
pub use config::AccessConfig;
pub use events::{AccessEvent, EventHub, Subscription};
pub use rpc_manager::{ClassifiedError, EndpointPool, ErrorKind, RetryExecutor, RetryPolicy};
pub use tx_pipeline::{PipelineError, SubmitOptions, TxPipeline};
pub use types::{Address, MethodCall, TxHash};
