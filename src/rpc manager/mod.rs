//! RPC Manager Module
//!
//! Endpoint pooling with capability probes, failure classification and
//! retry with rotation

// Submodules
pub mod rpc_config;
pub mod rpc_errors;
pub mod rpc_pool;
pub mod rpc_probe;
pub mod rpc_retry;
pub mod rpc_transport;

// Re-exports for convenience
pub use rpc_config::{RetrySettings, RpcSettings, PUBLIC_FALLBACK_ENDPOINTS};
pub use rpc_errors::{
    classify, is_rpc_error, user_message, ClassifiedError, ErrorClassification, ErrorKind,
    FailureSource, RpcCallError, RpcManagerError, Severity,
};
pub use rpc_pool::{Endpoint, EndpointPool, PoolConfigurationInfo, StatusSnapshot};
pub use rpc_probe::{HealthProber, HealthRecord, DEFAULT_PROBE_TIMEOUT};
pub use rpc_retry::{Backoff, RetryExecutor, RetryPolicy};
pub use rpc_transport::{HttpTransport, RpcTransport};
