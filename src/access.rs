//! Presentation-facing facade
//!
//! Owns the endpoint pool, the pipeline and the session. The presentation
//! layer only sees status snapshots, summaries, pipeline results and events.

use crate::biometric::BiometricGate;
use crate::config::AccessConfig;
use crate::events::{AccessEvent, EventHub, Subscription};
use crate::rpc_manager::{
    Endpoint, EndpointPool, PoolConfigurationInfo, RetryExecutor, RetryPolicy, RpcTransport,
    StatusSnapshot,
};
use crate::tx_pipeline::{
    ConfirmOptions, JsonRpcLedger, LedgerClient, PendingWrite, PipelineError, PipelineStep,
    SubmitOptions, TxPipeline,
};
use crate::types::{Address, MethodCall};
use crate::wallet::{SessionAction, WalletEvent, WalletSigner};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Account and endpoint chosen by `initialize`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub account: Address,
    pub accounts: Vec<Address>,
    pub endpoint: Endpoint,
    pub established_at: DateTime<Utc>,
}

/// What the presentation layer renders
#[derive(Debug, Clone, Serialize)]
pub struct AccessSummary {
    pub session: Option<Session>,
    pub current_endpoint: Endpoint,
    pub snapshot: Option<StatusSnapshot>,
    pub configuration: PoolConfigurationInfo,
    pub updated_at: DateTime<Utc>,
}

pub struct AccessLayer {
    config: AccessConfig,
    pool: Arc<EndpointPool>,
    pipeline: TxPipeline,
    signer: Arc<dyn WalletSigner>,
    gate: Arc<dyn BiometricGate>,
    session: RwLock<Option<Session>>,
    summary: RwLock<Option<AccessSummary>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AccessLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLayer")
            .field("pool", &self.pool)
            .field("session", &*self.session.read())
            .finish_non_exhaustive()
    }
}

impl AccessLayer {
    /// Wire the layer over a real transport: pool from `config.rpc`, reads over
    /// JSON-RPC, writes through `signer`
    pub fn new(
        config: AccessConfig,
        transport: Arc<dyn RpcTransport>,
        signer: Arc<dyn WalletSigner>,
        gate: Arc<dyn BiometricGate>,
    ) -> Result<Self, PipelineError> {
        let pool = Arc::new(EndpointPool::from_settings(
            &config.rpc,
            Arc::clone(&transport),
            EventHub::new(),
        )?);
        let ledger: Arc<dyn LedgerClient> = Arc::new(JsonRpcLedger::new(
            transport,
            Arc::clone(&signer),
            config.rpc.request_timeout(),
        ));
        Ok(Self::from_parts(config, pool, ledger, signer, gate))
    }

    pub fn from_parts(
        config: AccessConfig,
        pool: Arc<EndpointPool>,
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn WalletSigner>,
        gate: Arc<dyn BiometricGate>,
    ) -> Self {
        let policy = RetryPolicy::from_settings(&config.retry);
        let executor = RetryExecutor::new(Arc::clone(&pool), policy);
        let pipeline = TxPipeline::new(executor, ledger);
        Self {
            config,
            pool,
            pipeline,
            signer,
            gate,
            session: RwLock::new(None),
            summary: RwLock::new(None),
            refresh_task: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    pub fn pipeline(&self) -> &TxPipeline {
        &self.pipeline
    }

    pub fn events(&self) -> &Arc<EventHub> {
        self.pool.events()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Discover a working endpoint, load wallet accounts and start the
    /// background health refresh
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<Session, PipelineError> {
        let endpoint = self.pool.find_working().await?;

        let signer = self.signer.as_ref();
        let accounts = self
            .pipeline
            .executor()
            .run("request_accounts", |_endpoint| async move { signer.request_accounts().await })
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Accounts, e))?;

        let account = accounts.first().cloned().ok_or(PipelineError::NoAccounts)?;
        let session = Session {
            account,
            accounts,
            endpoint,
            established_at: Utc::now(),
        };
        info!(
            account = %session.account,
            endpoint = %session.endpoint,
            "Session established"
        );
        *self.session.write() = Some(session.clone());

        self.ensure_health_refresh();
        self.rebuild_summary();
        Ok(session)
    }

    fn ensure_health_refresh(&self) {
        let mut task = self.refresh_task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let interval = self.config.rpc.health_refresh_interval();
        *task = Some(Arc::clone(&self.pool).start_health_refresh(interval));
    }

    /// Probe every endpoint now; observability only
    pub async fn current_endpoint_status(&self) -> StatusSnapshot {
        self.pool.status_snapshot().await
    }

    fn rebuild_summary(&self) -> AccessSummary {
        let summary = AccessSummary {
            session: self.session(),
            current_endpoint: self.pool.current_endpoint(),
            snapshot: self.pool.latest_snapshot(),
            configuration: self.pool.configuration_info(),
            updated_at: Utc::now(),
        };
        *self.summary.write() = Some(summary.clone());
        summary
    }

    /// Rebuild and cache the summary, taking a snapshot if none was cached yet
    pub async fn refresh(&self) -> AccessSummary {
        if self.pool.latest_snapshot().is_none() {
            self.pool.status_snapshot().await;
        }
        self.rebuild_summary()
    }

    /// Last cached summary
    pub fn summary(&self) -> Option<AccessSummary> {
        self.summary.read().clone()
    }

    pub fn subscribe<F>(&self, event_name: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&AccessEvent) + Send + Sync + 'static,
    {
        self.events().subscribe(event_name, handler)
    }

    /// Forward a ledger notification to subscribers
    pub fn publish_ledger_event(&self, name: impl Into<String>, payload: serde_json::Value) {
        self.events().publish(AccessEvent::Ledger {
            name: name.into(),
            payload,
        });
    }

    /// Any wallet notification invalidates the session and the cached summary
    pub fn handle_wallet_event(&self, event: &WalletEvent) -> SessionAction {
        let previous = self.session.write().take();
        self.summary.write().take();

        let action = event.session_action();
        warn!(
            event = ?event,
            had_session = previous.is_some(),
            action = ?action,
            "Wallet changed, session dropped"
        );
        action
    }

    fn session_account(&self) -> Result<Address, PipelineError> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.account.clone())
            .ok_or(PipelineError::NoSession)
    }

    /// Run the full pipeline for the session account and wait for the receipt
    pub async fn submit(
        &self,
        call: &MethodCall,
        options: &SubmitOptions,
    ) -> Result<PendingWrite, PipelineError> {
        let sender = self.session_account()?;
        let confirm = ConfirmOptions::from_settings(&self.config.pipeline);
        self.pipeline
            .submit_and_confirm(call, &sender, options, &confirm)
            .await
    }

    /// Biometric check first; the pipeline never starts unless it passes
    #[instrument(skip(self, call, options))]
    pub async fn submit_gated(
        &self,
        subject_id: &str,
        call: &MethodCall,
        options: &SubmitOptions,
    ) -> Result<PendingWrite, PipelineError> {
        self.session_account()?;

        let verification = self
            .gate
            .verify(subject_id, self.gate.default_timeout())
            .await
            .map_err(PipelineError::GateUnavailable)?;
        if !verification.success {
            warn!("Biometric verification rejected");
            return Err(PipelineError::GateRejected {
                subject: subject_id.to_string(),
            });
        }

        self.submit(call, options).await
    }

    /// Read-only call as the session account (or the zero address without one)
    pub async fn read(&self, call: &MethodCall) -> Result<String, PipelineError> {
        let from = self.session().map(|s| s.account);
        self.pipeline.read(call, from.as_ref()).await
    }

    /// Stop the background refresh
    pub fn shutdown(&self) {
        if let Some(handle) = self.refresh_task.lock().take() {
            handle.abort();
            info!("Health refresh stopped");
        }
    }
}

impl Drop for AccessLayer {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh_task.get_mut().take() {
            handle.abort();
        }
    }
}
