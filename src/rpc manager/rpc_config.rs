use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Public fallback endpoints, tried after any override in this order
pub const PUBLIC_FALLBACK_ENDPOINTS: &[&str] = &[
    "https://polygon-rpc.com",
    "https://polygon-mainnet.public.blastapi.io",
    "https://polygon.drpc.org",
    "https://rpc.ankr.com/polygon",
    "https://polygon.llamarpc.com",
];

/// RPC endpoint selection and probing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Operator-supplied endpoint, highest priority
    #[serde(default)]
    pub override_url: Option<String>,

    /// Streaming endpoint for notifications; never used for selection
    #[serde(default)]
    pub wss_url: Option<String>,

    /// Fallback endpoints in priority order
    #[serde(default = "default_fallbacks")]
    pub fallback_endpoints: Vec<String>,

    /// Per-probe budget in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Per-request budget for reads and receipt polls in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Background health refresh interval in seconds
    #[serde(default = "default_health_refresh_secs")]
    pub health_refresh_secs: u64,
}

fn default_fallbacks() -> Vec<String> {
    PUBLIC_FALLBACK_ENDPOINTS.iter().map(|s| s.to_string()).collect()
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_health_refresh_secs() -> u64 {
    30
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            override_url: None,
            wss_url: None,
            fallback_endpoints: default_fallbacks(),
            probe_timeout_ms: default_probe_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            health_refresh_secs: default_health_refresh_secs(),
        }
    }
}

impl RpcSettings {
    /// Settings over an explicit URL list, first entry highest priority
    pub fn from_urls(urls: &[String]) -> Self {
        Self {
            fallback_endpoints: urls.to_vec(),
            ..Self::default()
        }
    }

    /// Priority-ordered candidate list: override first, fallbacks after, no duplicates
    pub fn endpoint_list(&self) -> Vec<String> {
        let mut list: Vec<String> = Vec::with_capacity(self.fallback_endpoints.len() + 1);
        let candidates = self
            .override_url
            .iter()
            .chain(self.fallback_endpoints.iter())
            .map(|url| url.trim())
            .filter(|url| !url.is_empty());

        for url in candidates {
            if !list.iter().any(|seen| seen == url) {
                list.push(url.to_string());
            }
        }
        list
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.health_refresh_secs)
    }
}

/// Inner (per-step) retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay; the step executor waits `base * attempt`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for exponential backoff
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
