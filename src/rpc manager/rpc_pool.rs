//! Endpoint pool with discovery, rotation and background health snapshots
//!
//! - Priority-ordered candidate list (override endpoint first, public fallbacks after)
//! - Sequential discovery of the first usable endpoint (`find_working`)
//! - Modulo rotation on transport failures (`advance`)
//! - Full probe snapshots for observability, optionally refreshed on an interval
//!
//! The current index is an atomic shared by every in-flight operation. The
//! background refresh only writes the cached snapshot and never touches the
//! index, so it cannot race a pipeline's own rotation decisions.
use super::rpc_config::RpcSettings;
use super::rpc_errors::RpcManagerError;
use super::rpc_probe::{HealthProber, HealthRecord};
use super::rpc_transport::RpcTransport;
use crate::events::{AccessEvent, EventHub};
use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// One candidate RPC endpoint and its position in the priority list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    url: String,
    position: usize,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, position: usize) -> Self {
        Self {
            url: url.into(),
            position,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Probe results for every endpoint, taken in one cycle
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub records: Vec<HealthRecord>,
    pub taken_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Endpoint URL -> usable
    pub fn as_map(&self) -> BTreeMap<String, bool> {
        self.records
            .iter()
            .map(|r| (r.endpoint.url().to_string(), r.is_usable()))
            .collect()
    }

    pub fn is_healthy(&self, url: &str) -> Option<bool> {
        self.records
            .iter()
            .find(|r| r.endpoint.url() == url)
            .map(HealthRecord::is_usable)
    }

    pub fn usable_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_usable()).count()
    }
}

/// Static description of the configured pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolConfigurationInfo {
    pub primary: String,
    pub wss_endpoint: Option<String>,
    pub fallback_endpoints: Vec<String>,
    pub total_endpoints: usize,
}

pub struct EndpointPool {
    endpoints: NonEmpty<Endpoint>,
    current_index: AtomicUsize,
    wss_endpoint: Option<String>,
    prober: HealthProber,
    events: Arc<EventHub>,
    latest_snapshot: RwLock<Option<StatusSnapshot>>,
}

impl std::fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPool")
            .field("endpoints", &self.endpoints.len())
            .field("current_index", &self.current_index)
            .field("wss_endpoint", &self.wss_endpoint)
            .finish_non_exhaustive()
    }
}

impl EndpointPool {
    /// Build a pool from a priority-ordered URL list.
    ///
    /// Blank entries are skipped and duplicates keep their first position.
    pub fn new(
        urls: Vec<String>,
        wss_endpoint: Option<String>,
        prober: HealthProber,
        events: Arc<EventHub>,
    ) -> Result<Self, RpcManagerError> {
        let mut ordered: Vec<Endpoint> = Vec::with_capacity(urls.len());
        for url in urls {
            let url = url.trim().to_string();
            if url.is_empty() || ordered.iter().any(|e| e.url == url) {
                continue;
            }
            let position = ordered.len();
            ordered.push(Endpoint::new(url, position));
        }

        let endpoints = NonEmpty::from_vec(ordered).ok_or(RpcManagerError::EmptyPool)?;

        if let Some(wss) = &wss_endpoint {
            info!(wss = %wss, "Streaming endpoint configured");
        }
        info!(
            endpoints = endpoints.len(),
            primary = %endpoints.first(),
            "Endpoint pool created"
        );

        Ok(Self {
            endpoints,
            current_index: AtomicUsize::new(0),
            wss_endpoint,
            prober,
            events,
            latest_snapshot: RwLock::new(None),
        })
    }

    pub fn from_settings(
        settings: &RpcSettings,
        transport: Arc<dyn RpcTransport>,
        events: Arc<EventHub>,
    ) -> Result<Self, RpcManagerError> {
        let prober = HealthProber::new(transport, settings.probe_timeout());
        Self::new(
            settings.endpoint_list(),
            settings.wss_url.clone(),
            prober,
            events,
        )
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// A pool holds at least one endpoint
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub fn current_index(&self) -> usize {
        self.current_index.load(Ordering::SeqCst)
    }

    fn endpoint_at(&self, index: usize) -> &Endpoint {
        self.endpoints.get(index).unwrap_or(self.endpoints.first())
    }

    pub fn current_endpoint(&self) -> Endpoint {
        self.endpoint_at(self.current_index()).clone()
    }

    /// Move to the next endpoint, wrapping at the end of the list
    pub fn advance(&self) -> Endpoint {
        let len = self.endpoints.len();
        let previous = match self
            .current_index
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        };
        let from = self.endpoint_at(previous).clone();
        let to = self.endpoint_at((previous + 1) % len).clone();

        info!(from = %from, to = %to, "Switched RPC endpoint");
        self.events.publish(AccessEvent::EndpointRotated {
            from: from.url.clone(),
            to: to.url.clone(),
        });
        to
    }

    /// Probe endpoints in priority order from the top of the list and select
    /// the first one that is reachable and accepts writes.
    #[instrument(skip(self))]
    pub async fn find_working(&self) -> Result<Endpoint, RpcManagerError> {
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            info!(url = %endpoint, "Testing RPC endpoint");
            let record = self.prober.probe(endpoint).await;
            if record.is_usable() {
                self.current_index.store(index, Ordering::SeqCst);
                info!(url = %endpoint, latency = ?record.latency, "Found working RPC endpoint");
                return Ok(endpoint.clone());
            }
            warn!(
                url = %endpoint,
                reachable = record.reachable,
                write_capable = record.write_capable,
                "RPC endpoint failed"
            );
        }

        Err(RpcManagerError::NoWorkingEndpoint {
            tried: self.endpoints.len(),
        })
    }

    /// Probe every endpoint (no short circuit) and cache the result.
    /// Never changes the selected endpoint.
    #[instrument(skip(self))]
    pub async fn status_snapshot(&self) -> StatusSnapshot {
        let probes = self.endpoints.iter().map(|endpoint| self.prober.probe(endpoint));
        let records = futures::future::join_all(probes).await;

        let snapshot = StatusSnapshot {
            records,
            taken_at: Utc::now(),
        };
        debug!(
            total = snapshot.records.len(),
            usable = snapshot.usable_count(),
            "Endpoint status snapshot"
        );

        *self.latest_snapshot.write() = Some(snapshot.clone());
        snapshot
    }

    pub fn latest_snapshot(&self) -> Option<StatusSnapshot> {
        self.latest_snapshot.read().clone()
    }

    /// Start the periodic observability refresh. Abort the handle on teardown.
    pub fn start_health_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pool = self;
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Starting endpoint health refresh");
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = pool.status_snapshot().await;
                if snapshot.usable_count() == 0 {
                    warn!("Health refresh found no usable endpoints");
                }
            }
        })
    }

    pub fn wss_endpoint(&self) -> Option<&str> {
        self.wss_endpoint.as_deref()
    }

    pub fn configuration_info(&self) -> PoolConfigurationInfo {
        PoolConfigurationInfo {
            primary: self.endpoints.first().url.clone(),
            wss_endpoint: self.wss_endpoint.clone(),
            fallback_endpoints: self.endpoints.tail().iter().map(|e| e.url.clone()).collect(),
            total_endpoints: self.endpoints.len(),
        }
    }
}
