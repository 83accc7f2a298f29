// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The two-turn multimodal `Converse` contract (§4.4).
//!
//! [`HttpModelClient`] is the production transport (a Bedrock-Converse-shaped
//! JSON endpoint over `reqwest`); [`ScriptedModelClient`] is the in-memory
//! double the test suite and the CLI's local mode use. Both implement
//! [`ModelClient`].

mod classify;
mod http;
mod message;
mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vv_core::{ImageFormat, TokenUsage};

pub use classify::ClassifiedCategory;
pub use http::{HttpModelClient, HttpModelClientConfig};
pub use scripted::ScriptedModelClient;

/// A single image content block, base-64 encoded with an explicit format tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseImage {
    /// Raw base-64 payload.
    pub base64: String,
    /// Detected/declared format, tagged on the wire as `"png"`/`"jpeg"`.
    pub format: ImageFormat,
}

/// The Turn-1 context Turn-2 must replay in full (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorTurn {
    /// The system prompt used in Turn-1 (unchanged for Turn-2).
    pub system_prompt: String,
    /// The Turn-1 user prompt text. MUST be retrievable — storing `null`
    /// here was a historical defect that broke Turn-2 continuity.
    pub user_prompt: String,
    /// The image attached to the Turn-1 user message.
    pub user_image: ConverseImage,
    /// The Turn-1 assistant reply, replayed verbatim.
    pub assistant_reply: String,
}

/// Input to [`ModelClient::converse`].
#[derive(Debug, Clone)]
pub struct ConverseRequest {
    /// System prompt for this call.
    pub system_prompt: String,
    /// User prompt for this call.
    pub user_prompt: String,
    /// Images attached to this call's user message.
    pub images: Vec<ConverseImage>,
    /// Present for Turn-2: the full Turn-1 context to replay.
    pub prior_turn: Option<PriorTurn>,
}

/// Output of [`ModelClient::converse`].
#[derive(Debug, Clone)]
pub struct ConverseResponse {
    /// The raw response bytes as received from the transport.
    pub raw_bytes: Vec<u8>,
    /// The assistant's text content.
    pub content: String,
    /// Reasoning/thinking content, present only when enabled.
    pub thinking: Option<String>,
    /// Token accounting (invariant 8).
    pub token_usage: TokenUsage,
    /// Model-assigned request id.
    pub request_id: String,
    /// Why generation stopped (`"end_turn"`, `"max_tokens"`, ...).
    pub stop_reason: String,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
}

/// Errors the model client can raise, pre-classification.
#[derive(Debug, thiserror::Error)]
#[error("model client error: {message}")]
pub struct ModelClientError {
    /// The raw error message, used for substring-based classification.
    pub message: String,
    /// The classification [`ClassifiedCategory::classify`] derived from it.
    pub category: ClassifiedCategory,
}

impl ModelClientError {
    /// Build an error, classifying it from `message`'s content.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let category = ClassifiedCategory::classify(&message);
        Self { message, category }
    }
}

impl vv_retry::Retryable for ModelClientError {
    fn is_retryable(&self) -> bool {
        self.category.retryable()
    }
}

impl From<ModelClientError> for vv_error::WorkflowError {
    fn from(err: ModelClientError) -> Self {
        let policy = err.category.retry_policy();
        vv_error::WorkflowError::new(vv_error::ErrorCode::BedrockProcessingFailed, err.message)
            .with_component("ModelClient")
            .retryable(err.category.retryable())
            .with_max_retries(policy.max_attempts)
    }
}

/// `Converse(systemPrompt, userPrompt, images[], priorTurn?) -> ConverseResponse` (§4.4).
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Execute one model call.
    async fn converse(&self, request: ConverseRequest) -> Result<ConverseResponse, ModelClientError>;
}
