//! Multi-step write pipeline
//!
//! simulate -> estimate -> gas margin -> price -> submit, each step through
//! the retry executor, with a whole-pipeline restart on retryable failures.
//! Restarting from simulate is what keeps nonces and gas prices fresh: a
//! failed submit is never retried on its own.

use super::errors::{PipelineError, PipelineStep};
use super::ledger::LedgerClient;
use crate::config::PipelineSettings;
use crate::events::{AccessEvent, EventHub, OutcomeStatus};
use crate::observability::OperationContext;
use crate::rpc_manager::{Backoff, ErrorKind, RetryExecutor, RetryPolicy, RetrySettings};
use crate::types::{Address, MethodCall, Receipt, TxHash, TxRequest};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_GAS_MULTIPLIER: f64 = 1.2;
pub const SENSITIVE_GAS_MULTIPLIER: f64 = 1.5;

const PPM: u128 = 1_000_000;

/// `floor(estimate * multiplier)`, computed in integer parts-per-million with
/// the multiplier rounded up, so the result never falls below the real product.
pub fn apply_gas_margin(estimate: u64, multiplier: f64) -> u64 {
    let multiplier_ppm = (multiplier * PPM as f64).ceil().max(PPM as f64) as u128;
    let scaled = (estimate as u128).saturating_mul(multiplier_ppm) / PPM;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOptions {
    pub gas_multiplier: f64,
    /// Merged into the signer request after fees
    pub extra_params: Map<String, Value>,
    pub max_outer_attempts: u32,
    pub outer_backoff: Backoff,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            gas_multiplier: DEFAULT_GAS_MULTIPLIER,
            extra_params: Map::new(),
            max_outer_attempts: 3,
            outer_backoff: Backoff::exponential_capped(
                Duration::from_secs(1),
                Duration::from_secs(10),
            ),
        }
    }
}

impl SubmitOptions {
    /// Wider gas margin for writes whose gas use depends on contract state
    pub fn sensitive() -> Self {
        Self::default().with_sensitive_margin()
    }

    /// Switch to the wider margin, keeping the retry settings
    pub fn with_sensitive_margin(self) -> Self {
        self.with_gas_multiplier(SENSITIVE_GAS_MULTIPLIER)
    }

    pub fn from_settings(pipeline: &PipelineSettings, retry: &RetrySettings) -> Self {
        Self {
            gas_multiplier: pipeline.gas_multiplier,
            extra_params: Map::new(),
            max_outer_attempts: pipeline.max_outer_attempts,
            outer_backoff: Backoff::exponential_capped(
                Duration::from_millis(retry.base_delay_ms),
                Duration::from_millis(retry.max_delay_ms),
            ),
        }
    }

    pub fn with_gas_multiplier(mut self, multiplier: f64) -> Self {
        self.gas_multiplier = multiplier;
        self
    }

    pub fn with_extra_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_params.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.gas_multiplier.is_finite() || self.gas_multiplier < 1.0 {
            return Err(PipelineError::InvalidOptions(format!(
                "gas multiplier must be >= 1.0, got {}",
                self.gas_multiplier
            )));
        }
        if self.max_outer_attempts == 0 {
            return Err(PipelineError::InvalidOptions(
                "max_outer_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmOptions {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for ConfirmOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_polls: 50,
        }
    }
}

impl ConfirmOptions {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            interval: settings.confirm_interval(),
            max_polls: settings.confirm_max_attempts,
        }
    }
}

/// A write in flight; fields fill in as steps complete
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub correlation_id: String,
    pub call: MethodCall,
    pub sender: Address,
    pub simulation: Option<String>,
    pub estimated_gas: Option<u64>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub hash: Option<TxHash>,
    pub receipt: Option<Receipt>,
    /// Whole-pipeline attempts it took to get a hash
    pub outer_attempts: u32,
}

impl PendingWrite {
    fn new(correlation_id: &str, call: &MethodCall, sender: &Address, outer_attempts: u32) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            call: call.clone(),
            sender: sender.clone(),
            simulation: None,
            estimated_gas: None,
            gas_limit: None,
            gas_price: None,
            hash: None,
            receipt: None,
            outer_attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TxPipeline {
    executor: RetryExecutor,
    ledger: Arc<dyn LedgerClient>,
    step_policy: RetryPolicy,
    events: Arc<EventHub>,
}

impl TxPipeline {
    /// Steps use the executor's default policy
    pub fn new(executor: RetryExecutor, ledger: Arc<dyn LedgerClient>) -> Self {
        let step_policy = executor.default_policy().clone();
        let events = Arc::clone(executor.pool().events());
        Self {
            executor,
            ledger,
            step_policy,
            events,
        }
    }

    pub fn with_step_policy(mut self, policy: RetryPolicy) -> Self {
        self.step_policy = policy;
        self
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Run simulate through submit, restarting the whole sequence on retryable
    /// failures. Returns once the signer produced a hash.
    pub async fn submit(
        &self,
        call: &MethodCall,
        sender: &Address,
        options: &SubmitOptions,
    ) -> Result<PendingWrite, PipelineError> {
        options.validate()?;
        let ctx = OperationContext::new("submit");
        let result = self
            .submit_with_context(&ctx, call, sender, options)
            .await
            .map(|(pending, _)| pending);
        match &result {
            Ok(pending) => self.publish_outcome(
                &ctx,
                OutcomeStatus::Submitted,
                pending.hash.as_ref().map(TxHash::to_string).unwrap_or_default(),
            ),
            Err(err) => self.publish_outcome(&ctx, OutcomeStatus::Failed, err.to_string()),
        }
        result
    }

    /// Submit, then wait for the receipt
    pub async fn submit_and_confirm(
        &self,
        call: &MethodCall,
        sender: &Address,
        options: &SubmitOptions,
        confirm: &ConfirmOptions,
    ) -> Result<PendingWrite, PipelineError> {
        options.validate()?;
        let ctx = OperationContext::new("submit_and_confirm");

        let outcome = async {
            let (mut pending, hash) = self.submit_with_context(&ctx, call, sender, options).await?;
            pending.receipt = Some(self.confirm(&hash, confirm).await?);
            Ok::<_, PipelineError>(pending)
        }
        .await;

        match &outcome {
            Ok(pending) => {
                let succeeded = pending.receipt.as_ref().is_some_and(Receipt::succeeded);
                self.publish_outcome(
                    &ctx,
                    OutcomeStatus::Confirmed,
                    format!(
                        "{} (status: {})",
                        pending.hash.as_ref().map(TxHash::to_string).unwrap_or_default(),
                        if succeeded { "success" } else { "reverted" }
                    ),
                );
            }
            Err(err @ PipelineError::Unconfirmed { .. }) => {
                self.publish_outcome(&ctx, OutcomeStatus::Unconfirmed, err.to_string())
            }
            Err(err) => self.publish_outcome(&ctx, OutcomeStatus::Failed, err.to_string()),
        }
        outcome
    }

    #[instrument(
        name = "pipeline",
        skip(self, ctx, call, sender, options),
        fields(correlation_id = %ctx.correlation_id, sender = %sender, to = %call.to)
    )]
    async fn submit_with_context(
        &self,
        ctx: &OperationContext,
        call: &MethodCall,
        sender: &Address,
        options: &SubmitOptions,
    ) -> Result<(PendingWrite, TxHash), PipelineError> {
        let mut outer = 1;
        loop {
            match self.run_steps(ctx, call, sender, options, outer).await {
                Ok((pending, hash)) => {
                    info!(
                        hash = %hash,
                        gas_limit = ?pending.gas_limit,
                        outer_attempts = outer,
                        elapsed_ms = ctx.elapsed_ms(),
                        "Transaction submitted"
                    );
                    return Ok((pending, hash));
                }
                Err(err) => {
                    if !err.is_retryable() || outer >= options.max_outer_attempts {
                        warn!(
                            attempt = outer,
                            max_attempts = options.max_outer_attempts,
                            step = ?err.failed_step(),
                            error = %err,
                            "Transaction pipeline failed"
                        );
                        return Err(err);
                    }

                    let kind = err
                        .classification()
                        .map(|c| c.kind)
                        .unwrap_or(ErrorKind::Unknown);
                    let delay = options.outer_backoff.delay(outer);
                    warn!(
                        attempt = outer,
                        max_attempts = options.max_outer_attempts,
                        kind = %kind,
                        step = ?err.failed_step(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transaction attempt failed, restarting pipeline"
                    );
                    self.events.publish(AccessEvent::PipelineRetry {
                        correlation_id: ctx.correlation_id.to_string(),
                        attempt: outer,
                        kind,
                        delay,
                    });
                    sleep(delay).await;
                    outer += 1;
                }
            }
        }
    }

    async fn run_steps(
        &self,
        ctx: &OperationContext,
        call: &MethodCall,
        sender: &Address,
        options: &SubmitOptions,
        outer: u32,
    ) -> Result<(PendingWrite, TxHash), PipelineError> {
        let ledger = self.ledger.as_ref();
        let policy = &self.step_policy;
        let mut pending = PendingWrite::new(ctx.correlation_id.as_str(), call, sender, outer);
        let request = TxRequest::from_call(call, sender);
        let request = &request;

        // 1) Simulate to catch reverts before spending anything
        let simulation = self
            .executor
            .execute("simulate", policy, |endpoint| async move {
                ledger.simulate(&endpoint, request).await
            })
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Simulate, e))?;
        debug!(bytes = simulation.len(), "Simulation passed");
        pending.simulation = Some(simulation);

        // 2) Estimate
        let estimated = self
            .executor
            .execute("estimate_gas", policy, |endpoint| async move {
                ledger.estimate_gas(&endpoint, request).await
            })
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Estimate, e))?;
        pending.estimated_gas = Some(estimated);

        // 3) Margin
        let gas_limit = apply_gas_margin(estimated, options.gas_multiplier);
        pending.gas_limit = Some(gas_limit);

        // 4) Price
        let gas_price = self
            .executor
            .execute("gas_price", policy, |endpoint| async move {
                ledger.gas_price(&endpoint).await
            })
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Price, e))?;
        pending.gas_price = Some(gas_price);
        debug!(estimated, gas_limit, gas_price = gas_price as u64, "Fees resolved");

        // 5) Submit. Only transport failures are retried here; a nonce conflict
        // or any other retryable error goes back to step 1 with fresh fees.
        let priced = request
            .clone()
            .with_fees(gas_limit, gas_price)
            .with_extra(&options.extra_params);
        let priced = &priced;
        let submit_policy = policy.clone().transport_only();
        let hash = self
            .executor
            .execute("send_transaction", &submit_policy, |endpoint| async move {
                ledger.send(&endpoint, priced).await
            })
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Submit, e))?;
        pending.hash = Some(hash.clone());

        Ok((pending, hash))
    }

    /// Poll for the receipt at a fixed interval. A non-retryable poll failure
    /// ends the wait; running out of polls yields `Unconfirmed`.
    #[instrument(skip(self, hash, options), fields(hash = %hash))]
    pub async fn confirm(
        &self,
        hash: &TxHash,
        options: &ConfirmOptions,
    ) -> Result<Receipt, PipelineError> {
        let ledger = self.ledger.as_ref();
        let max_polls = options.max_polls.max(1);

        for poll in 1..=max_polls {
            let result = self
                .executor
                .execute("get_receipt", &self.step_policy, |endpoint| async move {
                    ledger.receipt(&endpoint, hash).await
                })
                .await;

            match result {
                Ok(Some(receipt)) => {
                    info!(
                        poll,
                        block = ?receipt.block_number,
                        success = receipt.succeeded(),
                        "Transaction confirmed"
                    );
                    return Ok(receipt);
                }
                Ok(None) => debug!(poll, "Receipt pending"),
                Err(err) if !err.is_retryable() => {
                    return Err(PipelineError::step(PipelineStep::Confirm, err));
                }
                Err(err) => warn!(poll, error = %err, "Receipt check failed"),
            }

            if poll < max_polls {
                sleep(options.interval).await;
            }
        }

        warn!(polls = max_polls, "Transaction not confirmed within poll bound");
        Err(PipelineError::Unconfirmed {
            hash: hash.clone(),
            polls: max_polls,
        })
    }

    pub async fn estimate_gas(
        &self,
        call: &MethodCall,
        from: &Address,
    ) -> Result<u64, PipelineError> {
        let ledger = self.ledger.as_ref();
        let request = TxRequest::from_call(call, from);
        let request = &request;
        self.executor
            .execute("estimate_gas", &self.step_policy, |endpoint| async move {
                ledger.estimate_gas(&endpoint, request).await
            })
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Estimate, e))
    }

    pub async fn gas_price(&self) -> Result<u128, PipelineError> {
        let ledger = self.ledger.as_ref();
        self.executor
            .execute("gas_price", &self.step_policy, |endpoint| async move {
                ledger.gas_price(&endpoint).await
            })
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Price, e))
    }

    /// Next nonce including pending transactions
    pub async fn pending_nonce(&self, address: &Address) -> Result<u64, PipelineError> {
        let ledger = self.ledger.as_ref();
        self.executor
            .execute("pending_nonce", &self.step_policy, |endpoint| async move {
                ledger.transaction_count(&endpoint, address).await
            })
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Read, e))
    }

    /// Plain read-only call; `from` defaults to the zero address
    pub async fn read(
        &self,
        call: &MethodCall,
        from: Option<&Address>,
    ) -> Result<String, PipelineError> {
        let ledger = self.ledger.as_ref();
        let from = from.cloned().unwrap_or_else(Address::zero);
        let request = TxRequest::from_call(call, &from);
        let request = &request;
        self.executor
            .execute("read", &self.step_policy, |endpoint| async move {
                ledger.simulate(&endpoint, request).await
            })
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Read, e))
    }

    fn publish_outcome(&self, ctx: &OperationContext, status: OutcomeStatus, detail: String) {
        self.events.publish(AccessEvent::PipelineOutcome {
            correlation_id: ctx.correlation_id.to_string(),
            status,
            detail,
        });
    }
}
