// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy for the verification pipeline.
//!
//! Every failure that crosses a step boundary is wrapped into a single
//! [`WorkflowError`] carrying a stable [`ErrorCode`], a human message, and the
//! structured fields the record store and `error/error.json` both expect.
//! Classification (category, default retryability, default severity) lives on
//! [`ErrorCode`] itself so call sites never do ad-hoc substring matching.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad family an [`ErrorCode`] belongs to (§7 of the design).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input, wrong verification type, invalid image URL.
    ValidationClient,
    /// Missing state reference or missing historical record.
    NotFound,
    /// Timeouts, 5xx, throttling.
    TransientNetwork,
    /// Missing/invalid env var or template.
    Configuration,
    /// Unexpected, wrapped, non-retryable.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ValidationClient => "client",
            Self::NotFound => "not_found",
            Self::TransientNetwork => "network",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Severity attached to a [`WorkflowError`].
///
/// `Warning` is reserved for conditions the pipeline tolerates and logs but
/// does not fail on (e.g. the Parser's empty `verificationStatus`, S5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Logged, does not abort the step.
    Warning,
    /// Aborts the step; the run proceeds to `FinalizeWithError`.
    Error,
    /// Aborts the step and indicates a contract violation (e.g. S4).
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Machine-readable, stable error code.
///
/// Serializes to `SCREAMING_SNAKE_CASE`; the string form is part of the wire
/// contract (`error/error.json`, `errorTracking.currentError.code`) and must
/// not change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Initialize rejected the request (bad verification type, missing field).
    InitializationFailed,
    /// FetchHistorical could not find `previousVerificationId`.
    HistoricalFetchFailed,
    /// FetchImages could not resolve/download/validate an image.
    ImageFetchFailed,
    /// PrepareSystemPrompt could not render the system prompt.
    PromptPreparationFailed,
    /// ExecuteTurn1/ExecuteTurn2 failed to obtain a usable model response.
    BedrockProcessingFailed,
    /// Generic unclassified verification failure.
    VerificationFailed,
    /// A required state or record-store entry does not exist.
    NotFound,
    /// The model endpoint reported throttling / rate limiting.
    Throttling,
    /// The model endpoint or an I/O call exceeded its timeout.
    NetworkTimeout,
    /// The model endpoint returned a 5xx-equivalent failure.
    ServerError,
    /// The envelope, request, or model response failed schema validation.
    InvalidInput,
    /// A required environment variable or template is missing or invalid.
    ConfigurationInvalid,
    /// Unexpected internal error; always non-retryable.
    Internal,
}

impl ErrorCode {
    /// Returns the [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::InitializationFailed
            | Self::ImageFetchFailed
            | Self::PromptPreparationFailed
            | Self::InvalidInput => ErrorCategory::ValidationClient,

            Self::HistoricalFetchFailed | Self::NotFound => ErrorCategory::NotFound,

            Self::Throttling | Self::NetworkTimeout | Self::ServerError => {
                ErrorCategory::TransientNetwork
            }

            Self::ConfigurationInvalid => ErrorCategory::Configuration,

            Self::BedrockProcessingFailed | Self::VerificationFailed | Self::Internal => {
                ErrorCategory::Internal
            }
        }
    }

    /// Whether this code is retryable by default, absent an explicit override.
    ///
    /// Follows §4.4's classification: throttling/timeout/server errors retry,
    /// everything else (validation, not-found, config, internal) does not.
    #[must_use]
    pub fn default_retryable(self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientNetwork
        )
    }

    /// Default bounded retry count for this code (§4.1, §4.4).
    #[must_use]
    pub fn default_max_retries(self) -> u32 {
        match self {
            Self::Throttling => 5,
            Self::NetworkTimeout => 2,
            Self::ServerError => 3,
            _ => 0,
        }
    }

    /// Default [`Severity`] for this code.
    #[must_use]
    pub fn default_severity(self) -> Severity {
        match self {
            Self::Internal => Severity::Critical,
            _ => Severity::Error,
        }
    }

    /// Stable `&'static str` form (e.g. `"INITIALIZATION_FAILED"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitializationFailed => "INITIALIZATION_FAILED",
            Self::HistoricalFetchFailed => "HISTORICAL_FETCH_FAILED",
            Self::ImageFetchFailed => "IMAGE_FETCH_FAILED",
            Self::PromptPreparationFailed => "PROMPT_PREPARATION_FAILED",
            Self::BedrockProcessingFailed => "BEDROCK_PROCESSING_FAILED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::Throttling => "THROTTLING",
            Self::NetworkTimeout => "NETWORK_TIMEOUT",
            Self::ServerError => "SERVER_ERROR",
            Self::InvalidInput => "INVALID_INPUT",
            Self::ConfigurationInvalid => "CONFIGURATION_INVALID",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured error shape used everywhere a step fails (§7).
///
/// # Builder usage
///
/// ```
/// use vv_error::{WorkflowError, ErrorCode};
///
/// let err = WorkflowError::new(ErrorCode::Throttling, "ThrottlingException")
///     .with_component("ModelClient")
///     .with_operation("ProcessTurn1")
///     .with_context("attempt", 3);
/// assert!(err.retryable);
/// ```
pub struct WorkflowError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Fixed discriminator for the structured-error wire shape.
    pub error_type: &'static str,
    /// Broad error family, mirrors `code.category()` unless overridden.
    pub category: ErrorCategory,
    /// Whether the orchestrator may retry the step that raised this error.
    pub retryable: bool,
    /// Severity level; `Warning` never aborts a step.
    pub severity: Severity,
    /// Bounded retry budget for the raising component.
    pub max_retries: u32,
    /// Component that raised the error (e.g. `"BedrockClient"`, `"StateStore"`).
    pub component: String,
    /// Operation being performed (e.g. `"ProcessTurn1"`, `"Initialize"`).
    pub operation: String,
    /// Arbitrary structured diagnostic context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// Actionable suggestions surfaced to operators.
    pub suggestions: Vec<String>,
    /// Recovery hints (e.g. "retry after N seconds").
    pub recovery_hints: Vec<String>,
    /// When the error was constructed.
    pub timestamp: DateTime<Utc>,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl WorkflowError {
    /// Create a new error with code-derived defaults for category, severity,
    /// retryability, and max retries.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            error_type: "WorkflowError",
            category: code.category(),
            retryable: code.default_retryable(),
            severity: code.default_severity(),
            max_retries: code.default_max_retries(),
            component: "unknown".to_string(),
            operation: "unknown".to_string(),
            context: BTreeMap::new(),
            suggestions: Vec::new(),
            recovery_hints: Vec::new(),
            timestamp: Utc::now(),
            source: None,
        }
    }

    /// Set the component that raised this error.
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    /// Set the operation being performed.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Attach a key-value pair to the diagnostic context.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Append an actionable suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Append a recovery hint.
    #[must_use]
    pub fn with_recovery_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hints.push(hint.into());
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Override the default retryability.
    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Override the default severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Override the default max-retries budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl fmt::Debug for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("WorkflowError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        d.field("component", &self.component);
        d.field("operation", &self.operation);
        d.field("retryable", &self.retryable);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}.{})",
            self.code.as_str(),
            self.message,
            self.component,
            self.operation
        )
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Serializable snapshot of a [`WorkflowError`] (without the opaque source).
///
/// This is the shape written to `error/error.json` and embedded in
/// `errorTracking.currentError`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowErrorDto {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Fixed discriminator, always `"WorkflowError"`.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Broad error family.
    pub category: ErrorCategory,
    /// Whether the step may be retried.
    pub retryable: bool,
    /// Severity level.
    pub severity: Severity,
    /// Bounded retry budget.
    pub max_retries: u32,
    /// Raising component.
    pub component: String,
    /// Operation being performed.
    pub operation: String,
    /// Structured diagnostic context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// Actionable suggestions.
    pub suggestions: Vec<String>,
    /// Recovery hints.
    pub recovery_hints: Vec<String>,
    /// Construction time.
    pub timestamp: DateTime<Utc>,
    /// String form of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&WorkflowError> for WorkflowErrorDto {
    fn from(err: &WorkflowError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            error_type: err.error_type.to_string(),
            category: err.category,
            retryable: err.retryable,
            severity: err.severity,
            max_retries: err.max_retries,
            component: err.component.clone(),
            operation: err.operation.clone(),
            context: err.context.clone(),
            suggestions: err.suggestions.clone(),
            recovery_hints: err.recovery_hints.clone(),
            timestamp: err.timestamp,
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}
