//! Transaction pipeline
//!
//! - **errors**: step-tagged failures carrying the executor's classification
//! - **ledger**: per-endpoint ledger operations (reads over RPC, writes via signer)
//! - **pipeline**: simulate, estimate, margin, price, submit and confirm

pub mod errors;
pub mod ledger;
pub mod pipeline;

pub use errors::{PipelineError, PipelineStep};
pub use ledger::{JsonRpcLedger, LedgerClient};
pub use pipeline::{
    apply_gas_margin, ConfirmOptions, PendingWrite, SubmitOptions, TxPipeline,
    DEFAULT_GAS_MULTIPLIER, SENSITIVE_GAS_MULTIPLIER,
};
