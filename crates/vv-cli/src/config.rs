// SPDX-License-Identifier: MIT OR Apache-2.0
//! Startup-time parsing of the closed environment-variable set (§4.16, §6).
//!
//! Every variable is read once, validated, and folded into an immutable
//! [`Config`]; anything wrong here aborts before a single verification runs
//! rather than surfacing later as a pipeline failure.

use std::env;
use std::time::Duration;

use vv_error::{ErrorCode, WorkflowError};

const COMPONENT: &str = "Config";

/// The fully parsed, validated environment (§6's closed variable set).
#[derive(Debug, Clone)]
pub struct Config {
    /// `STATE_BUCKET` — object-store bucket for all state.
    pub state_bucket: String,
    /// `BEDROCK_MODEL` — model identifier.
    pub bedrock_model: String,
    /// `DYNAMODB_VERIFICATION_TABLE`.
    pub verification_table: String,
    /// `DYNAMODB_CONVERSATION_TABLE`.
    pub conversation_table: String,
    /// `ANTHROPIC_VERSION`, default `"bedrock-2023-05-31"`.
    pub anthropic_version: String,
    /// `MAX_TOKENS`, default `24000`.
    pub max_tokens: u32,
    /// `BUDGET_TOKENS`, default `16000`.
    pub budget_tokens: u32,
    /// `THINKING_TYPE`, `"enable"` or `"disable"`.
    pub thinking_enabled: bool,
    /// `BEDROCK_CONNECT_TIMEOUT_SEC`, default `10`.
    pub bedrock_connect_timeout: Duration,
    /// `BEDROCK_CALL_TIMEOUT_SEC`, default `30`, must exceed the connect timeout.
    pub bedrock_call_timeout: Duration,
    /// `MAX_RETRIES`, default `3`.
    pub max_retries: u32,
    /// `TEMPLATE_BASE_PATH`, default `/opt/templates`.
    pub template_base_path: String,
    /// `TURN1_PROMPT_VERSION`, default `"v1.0"`.
    pub turn1_prompt_version: String,
    /// `TURN2_PROMPT_VERSION`, default `"v1.0"`.
    pub turn2_prompt_version: String,
    /// `DATE_PARTITION_TIMEZONE`, default `"UTC"`. Only `"UTC"` is supported.
    pub date_partition_timezone: String,
    /// `LOG_LEVEL`, default `"INFO"`.
    pub log_level: String,
    /// `LOG_FORMAT`, `"json"` or `"pretty"`, default `"json"`.
    pub log_format: LogFormat,
}

/// `LOG_FORMAT` values (§4.17).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Machine-readable structured logging.
    Json,
    /// Human-readable logging for local development.
    Pretty,
}

impl Config {
    /// Parse and validate the environment, failing fast with a
    /// `Configuration`-category [`WorkflowError`] on the first problem.
    pub fn from_env() -> Result<Self, WorkflowError> {
        let state_bucket = required("STATE_BUCKET")?;
        let bedrock_model = required("BEDROCK_MODEL")?;
        let verification_table = required("DYNAMODB_VERIFICATION_TABLE")?;
        let conversation_table = required("DYNAMODB_CONVERSATION_TABLE")?;

        let anthropic_version = optional("ANTHROPIC_VERSION", "bedrock-2023-05-31");
        let max_tokens = parse_u32("MAX_TOKENS", 24_000)?;
        let budget_tokens = parse_u32("BUDGET_TOKENS", 16_000)?;

        let thinking_type = optional("THINKING_TYPE", "enable");
        let thinking_enabled = match thinking_type.as_str() {
            "enable" => true,
            "disable" => false,
            other => {
                return Err(config_error(format!(
                    "THINKING_TYPE must be \"enable\" or \"disable\", got {other:?}"
                )))
            }
        };

        let connect_secs = parse_u32("BEDROCK_CONNECT_TIMEOUT_SEC", 10)?;
        if connect_secs == 0 {
            return Err(config_error("BEDROCK_CONNECT_TIMEOUT_SEC must be > 0"));
        }
        let call_secs = parse_u32("BEDROCK_CALL_TIMEOUT_SEC", 30)?;
        if call_secs <= connect_secs {
            return Err(config_error(format!(
                "BEDROCK_CALL_TIMEOUT_SEC ({call_secs}) must exceed BEDROCK_CONNECT_TIMEOUT_SEC ({connect_secs})"
            )));
        }

        let max_retries = parse_u32("MAX_RETRIES", 3)?;
        let template_base_path = optional("TEMPLATE_BASE_PATH", "/opt/templates");
        let turn1_prompt_version = optional("TURN1_PROMPT_VERSION", "v1.0");
        let turn2_prompt_version = optional("TURN2_PROMPT_VERSION", "v1.0");

        let date_partition_timezone = optional("DATE_PARTITION_TIMEZONE", "UTC");
        if date_partition_timezone != "UTC" {
            return Err(config_error(format!(
                "DATE_PARTITION_TIMEZONE only supports \"UTC\", got {date_partition_timezone:?}"
            )));
        }

        let log_level = optional("LOG_LEVEL", "INFO");
        let log_format_raw = optional("LOG_FORMAT", "json");
        let log_format = match log_format_raw.as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            other => {
                return Err(config_error(format!(
                    "LOG_FORMAT must be \"json\" or \"pretty\", got {other:?}"
                )))
            }
        };

        Ok(Self {
            state_bucket,
            bedrock_model,
            verification_table,
            conversation_table,
            anthropic_version,
            max_tokens,
            budget_tokens,
            thinking_enabled,
            bedrock_connect_timeout: Duration::from_secs(u64::from(connect_secs)),
            bedrock_call_timeout: Duration::from_secs(u64::from(call_secs)),
            max_retries,
            template_base_path,
            turn1_prompt_version,
            turn2_prompt_version,
            date_partition_timezone,
            log_level,
            log_format,
        })
    }

    /// Load a `KEY=VALUE` `.env`-style file into the process environment
    /// before parsing, for `--env-file` (§6).
    #[allow(unsafe_code)]
    pub fn load_env_file(path: &std::path::Path) -> Result<(), WorkflowError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            config_error(format!("reading env file {}: {e}", path.display()))
        })?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(config_error(format!("malformed line in env file: {line:?}")));
            };
            // SAFETY-adjacent: single-threaded startup, before the runtime is built.
            unsafe {
                env::set_var(key.trim(), value.trim());
            }
        }
        Ok(())
    }
}

fn required(name: &str) -> Result<String, WorkflowError> {
    env::var(name).map_err(|_| config_error(format!("missing required environment variable {name}")))
}

fn optional(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_u32(name: &str, default: u32) -> Result<u32, WorkflowError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u32>()
            .map_err(|_| config_error(format!("{name} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn config_error(message: impl Into<String>) -> WorkflowError {
    WorkflowError::new(ErrorCode::ConfigurationInvalid, message)
        .with_component(COMPONENT)
        .with_operation("FromEnv")
        .retryable(false)
}
