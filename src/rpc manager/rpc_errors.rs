use std::fmt;
use thiserror::Error;

/// Where a raw failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    /// The request never produced a JSON-RPC response (socket, HTTP status, decode)
    Transport,
    /// The node answered with a JSON-RPC error object
    Response,
    /// The call exceeded its time budget
    Timeout,
}

/// Raw failure from the transport or from a collaborator (signer, device).
///
/// Carries only what the classifier needs: message text and an optional code.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct RpcCallError {
    pub message: String,
    pub code: Option<i64>,
    pub origin: FailureSource,
}

impl RpcCallError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            origin: FailureSource::Transport,
        }
    }

    pub fn response(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            origin: FailureSource::Response,
        }
    }

    pub fn timeout(budget: std::time::Duration) -> Self {
        Self {
            message: format!("request timeout after {}ms", budget.as_millis()),
            code: None,
            origin: FailureSource::Timeout,
        }
    }

    /// A response that arrived but could not be decoded
    pub fn malformed(detail: impl fmt::Display) -> Self {
        Self::transport(format!("malformed rpc response: {}", detail))
    }
}

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RpcTransport,
    UserRejected,
    InsufficientFunds,
    NonceConflict,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::RpcTransport => "RPC_TRANSPORT",
            ErrorKind::UserRejected => "USER_REJECTED",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::NonceConflict => "NONCE_CONFLICT",
            ErrorKind::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Classification verdict for a raw failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub description: &'static str,
}

impl ErrorClassification {
    /// Whether the next attempt should target a different endpoint
    pub fn rotates_endpoint(&self) -> bool {
        self.kind == ErrorKind::RpcTransport
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, retryable: {})",
            self.kind, self.severity, self.retryable
        )
    }
}

const TRANSPORT_MARKERS: &[&str] = &[
    "network",
    "timeout",
    "connection",
    "fetch",
    "rpc",
    "not implemented",
    "method not found",
    "not supported",
];

/// Standard JSON-RPC and EIP-1474 error codes treated as transport-level
const RPC_ERROR_CODES: &[i64] = &[
    -32000, -32001, -32002, -32003, -32004, -32005, -32006, -32007, -32008, -32009, -32010,
    -32600, -32601, -32602, -32603, -32700,
];

/// EIP-1193 "user rejected request"
const USER_REJECTED_CODE: i64 = 4001;

/// True when the failure looks like a transport or endpoint problem
pub fn is_rpc_error(error: &RpcCallError) -> bool {
    let message = error.message.to_lowercase();
    TRANSPORT_MARKERS.iter().any(|marker| message.contains(marker))
        || error.code.is_some_and(|code| RPC_ERROR_CODES.contains(&code))
}

/// Classify a raw failure. Total and deterministic.
///
/// User rejection is checked first so that a cancellation wrapped in a
/// transport-looking message is still never retried.
pub fn classify(error: &RpcCallError) -> ErrorClassification {
    let message = error.message.to_lowercase();

    if message.contains("user rejected")
        || message.contains("user denied")
        || error.code == Some(USER_REJECTED_CODE)
    {
        return ErrorClassification {
            kind: ErrorKind::UserRejected,
            severity: Severity::Low,
            retryable: false,
            description: "User rejected the transaction",
        };
    }

    if message.contains("insufficient funds") {
        return ErrorClassification {
            kind: ErrorKind::InsufficientFunds,
            severity: Severity::Medium,
            retryable: false,
            description: "Insufficient funds for gas",
        };
    }

    if message.contains("nonce") {
        return ErrorClassification {
            kind: ErrorKind::NonceConflict,
            severity: Severity::Medium,
            retryable: true,
            description: "Nonce mismatch, try again",
        };
    }

    if is_rpc_error(error) {
        return ErrorClassification {
            kind: ErrorKind::RpcTransport,
            severity: Severity::High,
            retryable: true,
            description: "Network or RPC connection issue",
        };
    }

    ErrorClassification {
        kind: ErrorKind::Unknown,
        severity: Severity::Medium,
        retryable: true,
        description: "Unknown error occurred",
    }
}

/// A raw failure together with the verdict made where it happened.
///
/// Higher layers read `classification`; they never classify again.
#[derive(Debug, Clone, Error)]
#[error("{error} (endpoint: {endpoint}, {classification}, attempts: {attempts})")]
pub struct ClassifiedError {
    pub endpoint: String,
    pub error: RpcCallError,
    pub classification: ErrorClassification,
    pub attempts: u32,
}

impl ClassifiedError {
    pub fn new(endpoint: impl Into<String>, error: RpcCallError, attempts: u32) -> Self {
        let classification = classify(&error);
        Self {
            endpoint: endpoint.into(),
            error,
            classification,
            attempts,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.classification.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.classification.retryable
    }

    pub fn is_user_rejection(&self) -> bool {
        self.classification.kind == ErrorKind::UserRejected
    }

    pub fn user_message(&self) -> String {
        user_message(self)
    }
}

/// Map a classified failure to a message fit for an end user
pub fn user_message(failure: &ClassifiedError) -> String {
    let raw = failure.error.message.as_str();
    let msg = raw.to_lowercase();

    match failure.classification.kind {
        ErrorKind::UserRejected if msg.contains("user denied") => {
            "Transaction was denied by user.".to_string()
        }
        ErrorKind::UserRejected => "Transaction was rejected by user.".to_string(),
        ErrorKind::InsufficientFunds => "Insufficient funds for gas.".to_string(),
        ErrorKind::NonceConflict => {
            "Nonce mismatch. Try again or reset the account nonce in your wallet.".to_string()
        }
        ErrorKind::RpcTransport => {
            "Network error. Please check your connection and try again.".to_string()
        }
        ErrorKind::Unknown => {
            if msg.contains("only admin") {
                "Only admin can perform this action.".to_string()
            } else if msg.contains("deadline") {
                "Deadline restriction prevents this action.".to_string()
            } else if msg.contains("registration") {
                "Registration deadline has passed.".to_string()
            } else if msg.contains("already") {
                "Action already performed.".to_string()
            } else if msg.contains("replacement fee too low") {
                "Replacement transaction fee too low.".to_string()
            } else if msg.contains("gas required exceeds allowance") {
                "Gas limit too low. Please try again.".to_string()
            } else if msg.contains("execution reverted") {
                "Transaction reverted. Check contract state.".to_string()
            } else if raw.is_empty() {
                "Transaction failed.".to_string()
            } else {
                raw.to_string()
            }
        }
    }
}

/// Endpoint-pool level errors
#[derive(Debug, Clone, Error)]
pub enum RpcManagerError {
    /// Every candidate failed discovery: the environment is unavailable
    #[error("No working RPC endpoints found ({tried} tried); all failed or lack write support")]
    NoWorkingEndpoint { tried: usize },

    #[error("Endpoint pool cannot be empty")]
    EmptyPool,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Classified(#[from] ClassifiedError),
}

impl RpcManagerError {
    /// True when the failure is about the environment rather than one operation
    pub fn is_environment_unavailable(&self) -> bool {
        matches!(self, RpcManagerError::NoWorkingEndpoint { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> RpcCallError {
        RpcCallError::response(None, text)
    }

    #[test]
    fn test_user_rejection_is_terminal() {
        for text in [
            "User rejected the request.",
            "MetaMask Tx Signature: USER DENIED transaction signature",
            "rpc wrapper: user rejected",
        ] {
            let verdict = classify(&msg(text));
            assert_eq!(verdict.kind, ErrorKind::UserRejected, "{text}");
            assert!(!verdict.retryable);
            assert_eq!(verdict.severity, Severity::Low);
        }

        let by_code = classify(&RpcCallError::response(Some(4001), "request refused"));
        assert_eq!(by_code.kind, ErrorKind::UserRejected);
    }

    #[test]
    fn test_insufficient_funds_is_terminal() {
        let verdict = classify(&RpcCallError::response(
            Some(-32000),
            "insufficient funds for gas * price + value",
        ));
        assert_eq!(verdict.kind, ErrorKind::InsufficientFunds);
        assert!(!verdict.retryable);
    }

    #[test]
    fn test_nonce_is_retryable() {
        let verdict = classify(&msg("nonce too low"));
        assert_eq!(verdict.kind, ErrorKind::NonceConflict);
        assert!(verdict.retryable);
        assert!(!verdict.rotates_endpoint());
    }

    #[test]
    fn test_transport_markers_and_codes() {
        for text in [
            "Network request failed",
            "request timeout after 5000ms",
            "connection reset by peer",
            "Failed to fetch",
            "the method eth_sendTransaction does not exist/is not available: Method not found",
            "not supported on this node",
        ] {
            let verdict = classify(&RpcCallError::transport(text));
            assert_eq!(verdict.kind, ErrorKind::RpcTransport, "{text}");
            assert!(verdict.retryable);
            assert_eq!(verdict.severity, Severity::High);
        }

        for code in [-32603, -32000, -32005, -32700, -32601] {
            let verdict = classify(&RpcCallError::response(Some(code), "boom"));
            assert_eq!(verdict.kind, ErrorKind::RpcTransport, "code {code}");
        }
    }

    #[test]
    fn test_unmatched_defaults_to_unknown_retryable() {
        let verdict = classify(&msg("something odd happened"));
        assert_eq!(verdict.kind, ErrorKind::Unknown);
        assert_eq!(verdict.severity, Severity::Medium);
        assert!(verdict.retryable);

        let empty = classify(&msg(""));
        assert_eq!(empty.kind, ErrorKind::Unknown);
    }

    #[test]
    fn test_user_messages() {
        let denied = ClassifiedError::new("http://a", msg("User denied transaction signature"), 1);
        assert_eq!(denied.user_message(), "Transaction was denied by user.");

        let reverted = ClassifiedError::new("http://a", msg("execution reverted: Only admin"), 1);
        assert_eq!(reverted.user_message(), "Only admin can perform this action.");

        let novel = ClassifiedError::new("http://a", msg("Quux overflowed"), 3);
        assert_eq!(novel.user_message(), "Quux overflowed");
    }

    #[test]
    fn test_environment_unavailable() {
        assert!(RpcManagerError::NoWorkingEndpoint { tried: 5 }.is_environment_unavailable());
        assert!(!RpcManagerError::EmptyPool.is_environment_unavailable());
    }
}
