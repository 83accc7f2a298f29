// SPDX-License-Identifier: MIT OR Apache-2.0
//! FinalizeWithError (§4.14): the single terminal error handler every other
//! step's failure routes through.
//!
//! Not a [`crate::Step`] — its signature (partial envelope, failing stage,
//! normalized cause, in; best-effort terminal envelope, no `Result`, out)
//! doesn't fit the uniform envelope-in/envelope-out contract, and it must
//! never itself fail the run further.

use chrono::Utc;
use vv_core::{Category, Envelope, Status};
use vv_error::{ErrorCategory, ErrorCode, Severity, WorkflowErrorDto};

use super::support::load_context;
use crate::RunContext;
use vv_state_store::StateStoreJson;

const COMPONENT: &str = "FinalizeWithError";

/// Normalized failure cause handed to [`FinalizeWithError::handle`].
pub struct ErrorCause {
    dto: WorkflowErrorDto,
}

impl ErrorCause {
    /// Normalize a [`vv_error::WorkflowError`] into the DTO shape persisted
    /// to `error/error.json` and the record store.
    #[must_use]
    pub fn from_error(err: &vv_error::WorkflowError) -> Self {
        Self { dto: err.into() }
    }

    /// Normalize a Step-Functions-style `{ErrorType, Cause}` blob (§4.14
    /// step 1): `cause` may be a plain message, or a JSON object carrying
    /// `errorMessage`/`errorType`/`stackTrace`, as AWS Lambda's default
    /// uncaught-exception shape produces.
    #[must_use]
    pub fn from_step_functions_blob(error_type: &str, cause: &str) -> Self {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct NestedCause {
            error_message: Option<String>,
            error_type: Option<String>,
            #[serde(default)]
            stack_trace: Vec<String>,
        }

        let (message, resolved_type, stack_trace) = match serde_json::from_str::<NestedCause>(cause) {
            Ok(nested) if nested.error_message.is_some() => (
                nested.error_message.unwrap(),
                nested.error_type.unwrap_or_else(|| error_type.to_string()),
                nested.stack_trace,
            ),
            _ => (cause.to_string(), error_type.to_string(), Vec::new()),
        };

        let mut context = std::collections::BTreeMap::new();
        context.insert("externalErrorType".to_string(), serde_json::json!(resolved_type));
        if !stack_trace.is_empty() {
            context.insert("stackTrace".to_string(), serde_json::json!(stack_trace));
        }

        Self {
            dto: WorkflowErrorDto {
                code: ErrorCode::VerificationFailed,
                message,
                error_type: "WorkflowError".to_string(),
                category: ErrorCategory::Internal,
                retryable: false,
                severity: Severity::Critical,
                max_retries: 0,
                component: "External".to_string(),
                operation: "FinalizeWithError".to_string(),
                context,
                suggestions: Vec::new(),
                recovery_hints: Vec::new(),
                timestamp: Utc::now(),
                source_message: None,
            },
        }
    }
}

/// The FinalizeWithError terminal handler.
pub struct FinalizeWithError;

impl FinalizeWithError {
    /// Persist the error, mark the `VerificationResults`/`ConversationHistory`
    /// rows failed, and return the terminal envelope.
    ///
    /// Every write here is best-effort: a record store or state store failure
    /// partway through is logged, not propagated, because there is no further
    /// step to route a second failure to.
    ///
    /// `stage` is the explicit `errorStage` (§4.14 step 2) — the driver
    /// always knows which step failed, so `Runtime` passes `Some`. `None`
    /// is for a raw `{ErrorType, Cause}` blob arriving with no stage
    /// attached, in which case the stage is inferred from the message.
    pub async fn handle(
        &self,
        ctx: &RunContext,
        env: Envelope,
        stage: Option<&str>,
        cause: ErrorCause,
    ) -> Envelope {
        let dto = cause.dto;
        let resolved_stage = stage.map(str::to_string).unwrap_or_else(|| infer_error_stage(&dto.message).to_string());
        let stage = resolved_stage.as_str();
        let failure_status = failure_status_for_stage(stage);

        let loaded_context = load_context(ctx.state_store.as_ref(), &env, COMPONENT, "LoadContext")
            .await
            .ok();
        let verification_at = loaded_context
            .as_ref()
            .map(|context| context.verification_at)
            .or_else(|| vv_core::parse_verification_timestamp(&env.verification_id));

        let mut next = env.clone();
        next.status = failure_status;

        let Some(verification_at) = verification_at else {
            tracing::error!(
                verification_id = %env.verification_id,
                stage,
                code = %dto.code,
                "cannot derive a verification timestamp; error/error.json not persisted"
            );
            return next;
        };

        match ctx
            .state_store
            .put_json(verification_at, &env.verification_id, Category::Error, "error", &dto)
            .await
        {
            Ok(reference) => {
                if next.insert_reference(Category::Error, "error", reference).is_err() {
                    tracing::warn!(verification_id = %env.verification_id, "error reference already present on envelope");
                }
            }
            Err(e) => {
                tracing::error!(verification_id = %env.verification_id, error = %e, "failed to persist error/error.json");
            }
        }

        if let Some(mut context) = loaded_context {
            context.error_tracking.record(dto.clone());
            context.record_transition(
                failure_status,
                format!("ERROR_{stage}"),
                stage,
                Default::default(),
            );
            // `processing/initialization` is write-once; the terminal
            // snapshot lands under its own filename instead of overwriting it.
            if let Err(e) = ctx
                .state_store
                .put_json(
                    verification_at,
                    &env.verification_id,
                    Category::Processing,
                    "initialization-error",
                    &context,
                )
                .await
            {
                tracing::error!(error = %e, "failed to persist terminal context snapshot");
            }
        }

        if let Err(e) = ctx
            .record_store
            .update_on_error(&env.verification_id, verification_at, failure_status, stage, dto.clone())
            .await
        {
            tracing::warn!(error = %e, "update_on_error found no matching VerificationResults row");
        }
        if let Err(e) = ctx
            .record_store
            .mark_conversation_failed(&env.verification_id, verification_at, &dto.message)
            .await
        {
            tracing::debug!(error = %e, "mark_conversation_failed: no conversation rows to mark");
        }

        tracing::error!(
            verification_id = %env.verification_id,
            stage,
            code = %dto.code,
            retryable = dto.retryable,
            "verification failed"
        );
        next
    }
}

/// Maps a failing stage name onto the closed set of terminal `*_FAILED`
/// statuses (§4.1), by substring since stage names carry either a step's
/// `stage_name()` verbatim or one of [`infer_error_stage`]'s buckets, and
/// neither vocabulary is enumerable here without a circular dependency on
/// `vv-runtime`'s step modules. `TURN1_PROCESSING`/`TURN2_PROCESSING` (the
/// inferred buckets) fold into `BedrockProcessingFailed` alongside
/// `BEDROCK_PROCESSING`, since there's no dedicated per-turn status.
fn failure_status_for_stage(stage: &str) -> Status {
    if stage.contains("INITIALIZATION") {
        Status::InitializationFailed
    } else if stage.contains("HISTORICAL") {
        Status::HistoricalFetchFailed
    } else if stage.contains("IMAGE") {
        Status::ImageFetchFailed
    } else if stage.contains("BEDROCK") || stage.contains("TURN1") || stage.contains("TURN2") {
        Status::BedrockProcessingFailed
    } else {
        Status::VerificationFailed
    }
}

/// Infer `errorStage` from an error message (§4.14 step 2) when no
/// explicit stage is supplied, via case-insensitive substring matching in
/// a fixed priority order.
fn infer_error_stage(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("turn2") {
        "TURN2_PROCESSING"
    } else if lower.contains("turn1") {
        "TURN1_PROCESSING"
    } else if lower.contains("initialization") || lower.contains("initialize") {
        "INITIALIZATION"
    } else if lower.contains("fetch") && lower.contains("image") {
        "IMAGE_FETCH"
    } else if lower.contains("prepare") && lower.contains("prompt") {
        "PROMPT_PREPARATION"
    } else if lower.contains("bedrock") {
        "BEDROCK_PROCESSING"
    } else {
        "UNKNOWN"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vv_core::VerificationRequest;
    use vv_error::{ErrorCode, WorkflowError};
    use vv_model_client::ScriptedModelClient;
    use vv_records::InMemoryRecordStore;
    use vv_state_store::InMemoryStateStore;
    use vv_templates::TemplateLoader;

    fn ctx() -> RunContext {
        RunContext::new(
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(ScriptedModelClient::new()),
            Arc::new(TemplateLoader::builtin_only()),
        )
    }

    #[tokio::test]
    async fn writes_error_artifact_and_marks_the_result_row_failed() {
        let run_ctx = ctx();
        let request = VerificationRequest {
            verification_type: vv_core::VerificationType::PreviousVsCurrent,
            reference_image_url: "s3://chk/prev.png".into(),
            checking_image_url: "s3://chk/next.png".into(),
            layout_id: None,
            layout_prefix: None,
            vending_machine_id: None,
            previous_verification_id: Some("verif-20250101120000-AAAA".into()),
            request_id: None,
        };
        let env = super::super::initialize::Initialize.execute(&run_ctx, request).await.unwrap();
        let err = WorkflowError::new(ErrorCode::HistoricalFetchFailed, "no prior verification")
            .with_component("FetchHistorical")
            .with_operation("MostRecentResult");

        let final_env = FinalizeWithError
            .handle(&run_ctx, env, Some("HISTORICAL_FETCH"), ErrorCause::from_error(&err))
            .await;
        assert_eq!(final_env.status, Status::HistoricalFetchFailed);
        assert!(final_env
            .reference(&vv_core::envelope::flat_key(Category::Error, "error"))
            .is_some());

        let context =
            load_context(run_ctx.state_store.as_ref(), &final_env, "test", "test").await.unwrap();
        let row = run_ctx
            .record_store
            .get_result(&final_env.verification_id, context.verification_at)
            .await
            .unwrap();
        assert_eq!(row.verification_status, "FAILED");
        assert_eq!(row.current_status, Status::HistoricalFetchFailed);
    }

    #[tokio::test]
    async fn handles_initialization_failures_with_no_persisted_context() {
        let run_ctx = ctx();
        let request = VerificationRequest {
            verification_type: vv_core::VerificationType::LayoutVsChecking,
            reference_image_url: String::new(),
            checking_image_url: "s3://chk/next.png".into(),
            layout_id: None,
            layout_prefix: None,
            vending_machine_id: None,
            previous_verification_id: None,
            request_id: None,
        };
        let (placeholder, err) = super::super::initialize::Initialize
            .execute(&run_ctx, request)
            .await
            .unwrap_err();

        let final_env = FinalizeWithError
            .handle(&run_ctx, placeholder, Some("INITIALIZATION"), ErrorCause::from_error(&err))
            .await;
        assert_eq!(final_env.status, Status::InitializationFailed);
    }

    #[test]
    fn error_cause_parses_a_nested_json_blob() {
        let cause = ErrorCause::from_step_functions_blob(
            "States.TaskFailed",
            r#"{"errorMessage":"turn2 model call timed out","errorType":"TimeoutError","stackTrace":["at foo","at bar"]}"#,
        );
        assert_eq!(cause.dto.message, "turn2 model call timed out");
        assert_eq!(
            cause.dto.context.get("externalErrorType").and_then(|v| v.as_str()),
            Some("TimeoutError")
        );
        assert!(cause.dto.context.contains_key("stackTrace"));
    }

    #[test]
    fn error_cause_falls_back_to_a_plain_message() {
        let cause = ErrorCause::from_step_functions_blob("States.TaskFailed", "bedrock request failed");
        assert_eq!(cause.dto.message, "bedrock request failed");
        assert_eq!(
            cause.dto.context.get("externalErrorType").and_then(|v| v.as_str()),
            Some("States.TaskFailed")
        );
    }

    #[test]
    fn infer_error_stage_matches_every_bucket_in_priority_order() {
        assert_eq!(infer_error_stage("turn2 processing failed"), "TURN2_PROCESSING");
        assert_eq!(infer_error_stage("turn1 model call failed"), "TURN1_PROCESSING");
        assert_eq!(infer_error_stage("failed to initialize request"), "INITIALIZATION");
        assert_eq!(infer_error_stage("could not fetch reference image"), "IMAGE_FETCH");
        assert_eq!(infer_error_stage("failed to prepare system prompt"), "PROMPT_PREPARATION");
        assert_eq!(infer_error_stage("bedrock throttled the request"), "BEDROCK_PROCESSING");
        assert_eq!(infer_error_stage("disk full"), "UNKNOWN");
    }

    #[tokio::test]
    async fn infers_stage_from_message_when_no_explicit_stage_is_given() {
        let run_ctx = ctx();
        let request = VerificationRequest {
            verification_type: vv_core::VerificationType::LayoutVsChecking,
            reference_image_url: "s3://ref/raw/12345.png".into(),
            checking_image_url: "s3://chk/capture.jpg".into(),
            layout_id: Some("12345".into()),
            layout_prefix: Some("prefix".into()),
            vending_machine_id: Some("VM-1".into()),
            previous_verification_id: None,
            request_id: None,
        };
        let env = super::super::initialize::Initialize.execute(&run_ctx, request).await.unwrap();
        let cause = ErrorCause::from_step_functions_blob("States.TaskFailed", "bedrock turn2 call timed out");

        let final_env = FinalizeWithError.handle(&run_ctx, env, None, cause).await;
        assert_eq!(final_env.status, Status::BedrockProcessingFailed);
    }
}
