// SPDX-License-Identifier: MIT OR Apache-2.0
//! Initialize (§4.7): validates the request, mints a verification id, and
//! writes the first `VerificationContext` and `VerificationResults` row.
//!
//! Not a [`crate::Step`] — it runs before any envelope exists and, on
//! failure, has at most a partially built one to hand `FinalizeWithError`.

use chrono::Utc;
use vv_core::envelope::flat_key;
use vv_core::{
    generate_verification_id, Category, ErrorTracking, Envelope, RequestMetadata,
    ResourceValidation, Status, VerificationContext, VerificationRequest, VerificationType,
};
use vv_error::{ErrorCode, WorkflowError};
use vv_records::VerificationResultRow;

use super::support::parse_object_url;
use crate::RunContext;
use vv_state_store::StateStoreJson;

const COMPONENT: &str = "Initialize";

/// The Initialize step.
pub struct Initialize;

impl Initialize {
    /// Validate `request`, persist the initial context and record, and
    /// return the first envelope of the run.
    ///
    /// On failure, returns the best-effort partial envelope built so far
    /// (carrying just the verification id, if one was minted) alongside the
    /// error, so `FinalizeWithError` can still write an `error/error.json`
    /// under the right key prefix.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        request: VerificationRequest,
    ) -> Result<Envelope, (Envelope, WorkflowError)> {
        let verification_at = Utc::now();
        let verification_id = generate_verification_id(verification_at);
        let placeholder = Envelope::new(verification_id.clone(), Status::VerificationRequested);

        if let Err(message) = validate(&request) {
            return Err((
                placeholder,
                WorkflowError::new(ErrorCode::InitializationFailed, message)
                    .with_component(COMPONENT)
                    .with_operation("Validate"),
            ));
        }

        let reference_check = parse_object_url(&request.reference_image_url);
        let checking_check = parse_object_url(&request.checking_image_url);
        let (reference_valid, checking_valid) = (reference_check.is_ok(), checking_check.is_ok());
        if let Err(message) = reference_check.and(checking_check).map(|_| ()) {
            return Err((
                placeholder,
                WorkflowError::new(ErrorCode::InitializationFailed, message)
                    .with_component(COMPONENT)
                    .with_operation("ValidateImageUrls"),
            ));
        }

        let context = VerificationContext {
            verification_id: verification_id.clone(),
            verification_at,
            verification_type: request.verification_type,
            status: Status::VerificationInitialized,
            vending_machine_id: request.vending_machine_id.clone(),
            layout_id: request.layout_id.clone(),
            layout_prefix: request.layout_prefix.clone(),
            previous_verification_id: request.previous_verification_id.clone(),
            reference_image_url: request.reference_image_url.clone(),
            checking_image_url: request.checking_image_url.clone(),
            request_metadata: RequestMetadata {
                request_id: request.request_id.clone().unwrap_or_else(|| verification_id.clone()),
                received_at: Some(verification_at),
            },
            turn_timestamps: Default::default(),
            resource_validation: ResourceValidation {
                reference_image_valid: reference_valid,
                checking_image_valid: checking_valid,
            },
            error_tracking: ErrorTracking::default(),
            status_history: vec![vv_core::StatusHistoryEntry {
                status: Status::VerificationInitialized,
                timestamp: verification_at,
                function_name: "Initialize".into(),
                stage: "INITIALIZATION".into(),
                metrics: Default::default(),
            }],
        };

        let reference = ctx
            .state_store
            .put_json(
                verification_at,
                &verification_id,
                Category::Processing,
                "initialization",
                &context,
            )
            .await
            .map_err(|e| {
                (
                    placeholder.clone(),
                    WorkflowError::from(e).with_component(COMPONENT).with_operation("PersistContext"),
                )
            })?;

        let row = VerificationResultRow {
            verification_id: verification_id.clone(),
            verification_at,
            verification_type: request.verification_type,
            current_status: Status::VerificationInitialized,
            verification_status: String::new(),
            layout_id: request.layout_id.clone(),
            vending_machine_id: request.vending_machine_id.clone(),
            reference_image_url: request.reference_image_url.clone(),
            checking_image_url: request.checking_image_url.clone(),
            status_history: context.status_history.clone(),
            error_tracking: ErrorTracking::default(),
            summary: None,
            reference_keys: Vec::new(),
            completed_at: None,
            expires_at: None,
        };
        ctx.record_store.create_initial_result(row).await.map_err(|e| {
            (
                placeholder.clone(),
                WorkflowError::from(e).with_component(COMPONENT).with_operation("CreateInitialResult"),
            )
        })?;

        let mut env = Envelope::new(verification_id, Status::VerificationInitialized);
        env.insert_reference(Category::Processing, "initialization", reference)
            .map_err(|e| {
                (
                    placeholder.clone(),
                    WorkflowError::new(ErrorCode::Internal, e.to_string())
                        .with_component(COMPONENT)
                        .with_operation("BuildEnvelope"),
                )
            })?;

        tracing::info!(
            verification_id = %env.verification_id,
            verification_type = %request.verification_type,
            "verification initialized"
        );
        Ok(env)
    }
}

fn validate(request: &VerificationRequest) -> Result<(), String> {
    if request.reference_image_url.trim().is_empty() {
        return Err("referenceImageUrl is required".into());
    }
    if request.checking_image_url.trim().is_empty() {
        return Err("checkingImageUrl is required".into());
    }
    match request.verification_type {
        VerificationType::LayoutVsChecking => {
            if request.layout_id.as_deref().unwrap_or_default().is_empty() {
                return Err("layoutId is required for LAYOUT_VS_CHECKING".into());
            }
            if request.layout_prefix.as_deref().unwrap_or_default().is_empty() {
                return Err("layoutPrefix is required for LAYOUT_VS_CHECKING".into());
            }
            if request.vending_machine_id.as_deref().unwrap_or_default().is_empty() {
                return Err("vendingMachineId is required for LAYOUT_VS_CHECKING".into());
            }
        }
        VerificationType::PreviousVsCurrent => {
            if request
                .previous_verification_id
                .as_deref()
                .unwrap_or_default()
                .is_empty()
            {
                return Err("previousVerificationId is required for PREVIOUS_VS_CURRENT".into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
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

    fn layout_request() -> VerificationRequest {
        VerificationRequest {
            verification_type: VerificationType::LayoutVsChecking,
            reference_image_url: "s3://ref/raw/12345.png".into(),
            checking_image_url: "s3://chk/20240115/capture.jpg".into(),
            layout_id: Some("12345".into()),
            layout_prefix: Some("20240115-143022-XYZ89".into()),
            vending_machine_id: Some("VM-1".into()),
            previous_verification_id: None,
            request_id: None,
        }
    }

    #[tokio::test]
    async fn accepts_a_valid_layout_vs_checking_request() {
        let run_ctx = ctx();
        let env = Initialize.execute(&run_ctx, layout_request()).await.unwrap();
        assert_eq!(env.status, Status::VerificationInitialized);
        assert!(env
            .reference(&flat_key(Category::Processing, "initialization"))
            .is_some());
    }

    #[tokio::test]
    async fn rejects_layout_request_missing_vending_machine_id() {
        let run_ctx = ctx();
        let mut request = layout_request();
        request.vending_machine_id = None;
        let (_, err) = Initialize.execute(&run_ctx, request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InitializationFailed);
    }

    #[tokio::test]
    async fn rejects_previous_vs_current_request_missing_previous_id() {
        let run_ctx = ctx();
        let request = VerificationRequest {
            verification_type: VerificationType::PreviousVsCurrent,
            reference_image_url: "s3://chk/prev.png".into(),
            checking_image_url: "s3://chk/next.png".into(),
            layout_id: None,
            layout_prefix: None,
            vending_machine_id: None,
            previous_verification_id: None,
            request_id: None,
        };
        let (_, err) = Initialize.execute(&run_ctx, request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InitializationFailed);
    }

    #[tokio::test]
    async fn rejects_non_object_store_image_url() {
        let run_ctx = ctx();
        let mut request = layout_request();
        request.reference_image_url = "https://example.com/a.png".into();
        let (_, err) = Initialize.execute(&run_ctx, request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InitializationFailed);
    }

    #[tokio::test]
    async fn persists_a_matching_verification_results_row() {
        let run_ctx = ctx();
        let env = Initialize.execute(&run_ctx, layout_request()).await.unwrap();
        let row = run_ctx
            .record_store
            .get_result(&env.verification_id, row_timestamp(&run_ctx, &env).await)
            .await
            .unwrap();
        assert_eq!(row.current_status, Status::VerificationInitialized);
        assert_eq!(row.layout_id.as_deref(), Some("12345"));
    }

    async fn row_timestamp(run_ctx: &RunContext, env: &Envelope) -> chrono::DateTime<chrono::Utc> {
        let context: VerificationContext = run_ctx
            .state_store
            .get_json(
                env.reference(&flat_key(Category::Processing, "initialization"))
                    .unwrap(),
            )
            .await
            .unwrap();
        context.verification_at
    }
}
