//! Configuration module for the ledger access layer
//!
//! Loads from TOML files or environment variables and falls back to defaults
//! for everything not given. The RPC and retry sections live with the RPC
//! manager; this module assembles them into one document.

use crate::rpc_manager::{RetrySettings, RpcSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub rpc: RpcSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub biometric: BiometricSettings,
    /// Node that holds unlocked accounts for `NodeSigner`
    #[serde(default)]
    pub signer_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: f64,

    /// Whole-pipeline restarts (simulate through submit)
    #[serde(default = "default_max_outer_attempts")]
    pub max_outer_attempts: u32,

    #[serde(default = "default_confirm_interval_ms")]
    pub confirm_interval_ms: u64,

    #[serde(default = "default_confirm_max_attempts")]
    pub confirm_max_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            gas_multiplier: default_gas_multiplier(),
            max_outer_attempts: default_max_outer_attempts(),
            confirm_interval_ms: default_confirm_interval_ms(),
            confirm_max_attempts: default_confirm_max_attempts(),
        }
    }
}

impl PipelineSettings {
    pub fn confirm_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_interval_ms)
    }
}

/// External verification device; WebSocket wins when both are set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricSettings {
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_biometric_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BiometricSettings {
    fn default() -> Self {
        Self {
            http_url: None,
            ws_url: None,
            timeout_ms: default_biometric_timeout_ms(),
        }
    }
}

impl BiometricSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_configured(&self) -> bool {
        self.http_url.is_some() || self.ws_url.is_some()
    }
}

fn default_gas_multiplier() -> f64 { 1.2 }
fn default_max_outer_attempts() -> u32 { 3 }
fn default_confirm_interval_ms() -> u64 { 2000 }
fn default_confirm_max_attempts() -> u32 { 50 }
fn default_biometric_timeout_ms() -> u64 { 30_000 }

fn env_url(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_url(field: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be an http(s) URL, got {:?}",
            field, url
        )))
    }
}

fn check_ws_url(field: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be a ws(s) URL, got {:?}",
            field, url
        )))
    }
}

impl AccessConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AccessConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Defaults overlaid with `RPC_URL`, `RPC_WSS_URL`, `BIOMETRIC_HTTP_URL`,
    /// `BIOMETRIC_WS_URL` and `SIGNER_URL`. Loads `.env` first when present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Environment variables override whatever the file said
    pub fn apply_env(&mut self) {
        if let Some(url) = env_url("RPC_URL") {
            self.rpc.override_url = Some(url);
        }
        if let Some(url) = env_url("RPC_WSS_URL") {
            self.rpc.wss_url = Some(url);
        }
        if let Some(url) = env_url("BIOMETRIC_HTTP_URL") {
            self.biometric.http_url = Some(url);
        }
        if let Some(url) = env_url("BIOMETRIC_WS_URL") {
            self.biometric.ws_url = Some(url);
        }
        if let Some(url) = env_url("SIGNER_URL") {
            self.signer_url = Some(url);
        }
    }

    /// Priority-ordered, deduplicated RPC endpoint list
    pub fn endpoint_list(&self) -> Vec<String> {
        self.rpc.endpoint_list()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoints = self.endpoint_list();
        if endpoints.is_empty() {
            return Err(ConfigError::Invalid("no RPC endpoints configured".into()));
        }
        for url in &endpoints {
            check_url("rpc endpoint", url)?;
        }
        if let Some(wss) = &self.rpc.wss_url {
            check_ws_url("rpc.wss_url", wss)?;
        }
        if self.rpc.probe_timeout_ms == 0 || self.rpc.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("rpc timeouts must be non-zero".into()));
        }
        if self.rpc.health_refresh_secs == 0 {
            return Err(ConfigError::Invalid("rpc.health_refresh_secs must be non-zero".into()));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }

        if !self.pipeline.gas_multiplier.is_finite() || self.pipeline.gas_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "pipeline.gas_multiplier must be >= 1.0, got {}",
                self.pipeline.gas_multiplier
            )));
        }
        if self.pipeline.max_outer_attempts == 0 || self.pipeline.confirm_max_attempts == 0 {
            return Err(ConfigError::Invalid("pipeline attempt counts must be at least 1".into()));
        }
        if self.pipeline.confirm_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.confirm_interval_ms must be non-zero".into(),
            ));
        }

        if let Some(url) = &self.biometric.http_url {
            check_url("biometric.http_url", url)?;
        }
        if let Some(url) = &self.biometric.ws_url {
            check_ws_url("biometric.ws_url", url)?;
        }
        if self.biometric.timeout_ms == 0 {
            return Err(ConfigError::Invalid("biometric.timeout_ms must be non-zero".into()));
        }

        if let Some(url) = &self.signer_url {
            check_url("signer_url", url)?;
        }
        Ok(())
    }
}
