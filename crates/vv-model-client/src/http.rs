// SPDX-License-Identifier: MIT OR Apache-2.0
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use vv_core::{ImageFormat, TokenUsage};

use crate::message::build_messages;
use crate::{ConverseRequest, ConverseResponse, ModelClient, ModelClientError};

/// Configuration for [`HttpModelClient`], built fluently like the bridge
/// configs elsewhere in this workspace.
#[derive(Debug, Clone)]
pub struct HttpModelClientConfig {
    /// Endpoint base URL.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model_id: String,
    /// Connect timeout; must be at least one second.
    pub connect_timeout: Duration,
    /// Total per-call timeout; must exceed `connect_timeout`.
    pub call_timeout: Duration,
    /// Whether to request the "thinking"/reasoning channel.
    pub thinking_enabled: bool,
}

impl HttpModelClientConfig {
    /// Construct a config with the default 5s connect / 60s call timeouts.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_id: model_id.into(),
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(60),
            thinking_enabled: false,
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the per-call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Enable the "thinking"/reasoning channel.
    #[must_use]
    pub fn with_thinking_enabled(mut self, enabled: bool) -> Self {
        self.thinking_enabled = enabled;
        self
    }

    /// Validate the timeout relationship required by §4.4/§4.16.
    pub fn validate(&self) -> Result<(), ModelClientError> {
        if self.connect_timeout < Duration::from_secs(1) {
            return Err(ModelClientError::new(
                "ValidationException: connect timeout must be at least 1s",
            ));
        }
        if self.call_timeout <= self.connect_timeout {
            return Err(ModelClientError::new(
                "ValidationException: call timeout must exceed connect timeout",
            ));
        }
        Ok(())
    }
}

/// The production transport: an HTTP client against a
/// Bedrock-Converse-shaped JSON endpoint.
pub struct HttpModelClient {
    http: reqwest::Client,
    config: HttpModelClientConfig,
}

impl HttpModelClient {
    /// Build a client, validating `config` first.
    pub fn new(config: HttpModelClientConfig) -> Result<Self, ModelClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.call_timeout)
            .build()
            .map_err(|e| ModelClientError::new(format!("server error building http client: {e}")))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn converse(&self, request: ConverseRequest) -> Result<ConverseResponse, ModelClientError> {
        let mut body = json!({
            "modelId": self.config.model_id,
            "system": [{ "text": request.system_prompt }],
            "messages": build_messages(&request),
        });
        if self.config.thinking_enabled {
            body["thinking"] = json!({ "type": "enabled" });
        }

        let started = Instant::now();
        let response = self
            .http
            .post(&self.config.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelClientError::new(classify_transport_error(&e)))?;

        let status = response.status();
        let raw_bytes = response
            .bytes()
            .await
            .map_err(|e| ModelClientError::new(classify_transport_error(&e)))?
            .to_vec();
        let latency_ms = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&raw_bytes).to_string();
            return Err(ModelClientError::new(format!(
                "{status} response from model endpoint: {text}"
            )));
        }

        parse_converse_response(&raw_bytes, latency_ms)
    }
}

fn classify_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timeout: {err}")
    } else if err.is_connect() {
        format!("network error connecting to model endpoint: {err}")
    } else {
        format!("server error calling model endpoint: {err}")
    }
}

fn parse_converse_response(raw_bytes: &[u8], latency_ms: u64) -> Result<ConverseResponse, ModelClientError> {
    let value: Value = serde_json::from_slice(raw_bytes)
        .map_err(|e| ModelClientError::new(format!("server error parsing response: {e}")))?;

    let content = value["output"]["message"]["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let thinking = value["output"]["message"]["content"]
        .as_array()
        .and_then(|blocks| blocks.iter().find_map(|b| b["reasoningContent"]["text"].as_str()))
        .map(str::to_string);

    let usage = &value["usage"];
    let input_tokens = usage["inputTokens"].as_u64().unwrap_or(0);
    let output_tokens = usage["outputTokens"].as_u64().unwrap_or(0);
    let thinking_tokens = usage["thinkingTokens"].as_u64().unwrap_or(0);

    Ok(ConverseResponse {
        raw_bytes: raw_bytes.to_vec(),
        content,
        thinking,
        token_usage: TokenUsage::new(input_tokens, output_tokens, thinking_tokens),
        request_id: value["requestId"].as_str().unwrap_or_default().to_string(),
        stop_reason: value["stopReason"].as_str().unwrap_or_default().to_string(),
        latency_ms,
    })
}

/// Detect an image's wire format from its base-64 prefix (§4.4).
#[must_use]
pub fn detect_image_format(base64_payload: &str) -> ImageFormat {
    ImageFormat::from_base64_prefix(base64_payload)
}
