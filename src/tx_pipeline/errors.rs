//! Error types for the transaction pipeline
//!
//! Every step failure arrives already classified by the retry executor. The
//! pipeline only wraps it with the step it happened in; retry decisions and
//! user-facing messages read the carried classification.

use crate::biometric::GateError;
use crate::rpc_manager::{ClassifiedError, ErrorClassification, RpcManagerError};
use crate::types::TxHash;
use std::fmt;
use thiserror::Error;

/// Stage of a write (or session setup) where a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    Accounts,
    Simulate,
    Estimate,
    Price,
    Submit,
    Confirm,
    Read,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStep::Accounts => "accounts",
            PipelineStep::Simulate => "simulate",
            PipelineStep::Estimate => "estimate",
            PipelineStep::Price => "price",
            PipelineStep::Submit => "submit",
            PipelineStep::Confirm => "confirm",
            PipelineStep::Read => "read",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step failed after the executor gave up on it
    #[error("{step} failed: {source}")]
    Step {
        step: PipelineStep,
        #[source]
        source: ClassifiedError,
    },

    /// The write was accepted but no receipt appeared within the poll bound
    #[error("Transaction {hash} not confirmed after {polls} polls")]
    Unconfirmed { hash: TxHash, polls: u32 },

    #[error("Invalid submit options: {0}")]
    InvalidOptions(String),

    #[error("Biometric verification rejected for {subject}")]
    GateRejected { subject: String },

    #[error("Biometric verification unavailable: {0}")]
    GateUnavailable(#[source] GateError),

    #[error("No active session; initialize first")]
    NoSession,

    #[error("Wallet returned no accounts")]
    NoAccounts,

    /// No endpoint could be used at all
    #[error("Environment unavailable: {0}")]
    Environment(#[source] RpcManagerError),
}

impl PipelineError {
    pub fn step(step: PipelineStep, source: ClassifiedError) -> Self {
        Self::Step { step, source }
    }

    /// Classification carried from the failing step, if any
    pub fn classification(&self) -> Option<&ErrorClassification> {
        match self {
            Self::Step { source, .. } => Some(&source.classification),
            _ => None,
        }
    }

    pub fn failed_step(&self) -> Option<PipelineStep> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether restarting the whole pipeline might succeed
    pub fn is_retryable(&self) -> bool {
        self.classification().is_some_and(|c| c.retryable)
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, Self::Step { source, .. } if source.is_user_rejection())
    }

    pub fn is_environment_unavailable(&self) -> bool {
        matches!(self, Self::Environment(inner) if inner.is_environment_unavailable())
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Step { source, .. } => source.user_message(),
            Self::Unconfirmed { .. } => {
                "Transaction submitted but not yet confirmed. Check its status later.".to_string()
            }
            Self::GateRejected { .. } => "Biometric verification failed.".to_string(),
            Self::GateUnavailable(_) => {
                "Biometric device unavailable. Please try again.".to_string()
            }
            Self::NoSession | Self::NoAccounts => "Please connect your wallet.".to_string(),
            Self::Environment(_) => {
                "No working RPC endpoint is reachable. Please try again later.".to_string()
            }
            Self::InvalidOptions(reason) => reason.clone(),
        }
    }
}

impl From<RpcManagerError> for PipelineError {
    fn from(err: RpcManagerError) -> Self {
        Self::Environment(err)
    }
}
