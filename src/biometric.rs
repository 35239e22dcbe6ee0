//! Biometric verification gate
//!
//! A binary check that must pass before a gated write enters the pipeline.
//! The device is reached over WebSocket when configured, else HTTP. With
//! neither configured the gate fails closed.

use crate::config::BiometricSettings;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GateError {
    #[error("Biometric endpoints not configured")]
    NotConfigured,

    #[error("Subject id is required for biometric verification")]
    MissingSubject,

    #[error("Biometric verification timed out after {0:?}")]
    Timeout(Duration),

    #[error("Biometric transport error: {0}")]
    Transport(String),

    #[error("Biometric protocol error: {0}")]
    Protocol(String),
}

/// Device verdict plus whatever the device sent along
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub success: bool,
    pub payload: Value,
}

#[async_trait]
pub trait BiometricGate: Send + Sync + std::fmt::Debug {
    async fn verify(&self, subject_id: &str, timeout: Duration) -> Result<Verification, GateError>;

    fn default_timeout(&self) -> Duration {
        DEFAULT_GATE_TIMEOUT
    }
}

#[derive(Debug, Clone)]
pub struct BiometricService {
    http_url: Option<String>,
    ws_url: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl BiometricService {
    pub fn new(http_url: Option<String>, ws_url: Option<String>) -> Self {
        Self {
            http_url,
            ws_url,
            timeout: DEFAULT_GATE_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &BiometricSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            ..Self::new(settings.http_url.clone(), settings.ws_url.clone())
        }
    }

    pub fn is_configured(&self) -> bool {
        self.http_url.is_some() || self.ws_url.is_some()
    }

    async fn verify_over_http(
        &self,
        url: &str,
        subject_id: &str,
    ) -> Result<Verification, GateError> {
        let response = self
            .client
            .post(url)
            .json(&json!({ "voterId": subject_id }))
            .send()
            .await
            .map_err(|e| GateError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::Transport(format!(
                "Biometric HTTP error {}",
                status.as_u16()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| GateError::Protocol(e.to_string()))?;
        let success = payload.get("success").and_then(Value::as_bool).unwrap_or(false);
        Ok(Verification { success, payload })
    }

    async fn verify_over_ws(&self, url: &str, subject_id: &str) -> Result<Verification, GateError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GateError::Transport(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let request = json!({ "type": "verify", "voterId": subject_id });
        write
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| GateError::Transport(e.to_string()))?;

        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(verification) = match_result_frame(&text, subject_id) {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(verification);
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => return Err(GateError::Transport(e.to_string())),
            }
        }

        Err(GateError::Protocol(
            "Biometric WebSocket closed before result".into(),
        ))
    }
}

/// Accept only `verification_result` frames addressed to this subject; anything
/// else, non-JSON included, is skipped
fn match_result_frame(text: &str, subject_id: &str) -> Option<Verification> {
    let payload: Value = serde_json::from_str(text).ok()?;
    let is_result = payload.get("type").and_then(Value::as_str) == Some("verification_result");
    let same_subject = payload.get("voterId").and_then(Value::as_str) == Some(subject_id);
    if !(is_result && same_subject) {
        return None;
    }
    let success = payload.get("success").and_then(Value::as_bool).unwrap_or(false);
    Some(Verification { success, payload })
}

#[async_trait]
impl BiometricGate for BiometricService {
    #[instrument(skip(self), fields(ws = self.ws_url.is_some(), http = self.http_url.is_some()))]
    async fn verify(&self, subject_id: &str, timeout: Duration) -> Result<Verification, GateError> {
        if subject_id.trim().is_empty() {
            return Err(GateError::MissingSubject);
        }

        let attempt = async {
            if let Some(url) = &self.ws_url {
                debug!(url = %url, "Verifying over WebSocket");
                self.verify_over_ws(url, subject_id).await
            } else if let Some(url) = &self.http_url {
                debug!(url = %url, "Verifying over HTTP");
                self.verify_over_http(url, subject_id).await
            } else {
                Err(GateError::NotConfigured)
            }
        };

        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(GateError::Timeout(timeout)),
        };

        match &result {
            Ok(v) => info!(success = v.success, "Biometric verification completed"),
            Err(e) => warn!(error = %e, "Biometric verification failed"),
        }
        result
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }
}
