// SPDX-License-Identifier: MIT OR Apache-2.0
//! FinalizeAndStore (§4.13): parses the Turn-2 reply, writes the terminal
//! `VerificationResults` row, and marks the conversation complete.

use chrono::Utc;
use vv_core::{Category, Envelope, Status};
use vv_error::{ErrorCode, WorkflowError};

use super::support::load_context;
use crate::{RunContext, Step};

const STAGE: &str = "RESULT_FINALIZATION";
const COMPONENT: &str = "FinalizeAndStore";

/// The FinalizeAndStore step.
pub struct FinalizeAndStore;

#[async_trait::async_trait]
impl Step for FinalizeAndStore {
    fn stage_name(&self) -> &'static str {
        STAGE
    }

    async fn run(&self, ctx: &RunContext, env: Envelope) -> Result<Envelope, WorkflowError> {
        let context = load_context(ctx.state_store.as_ref(), &env, COMPONENT, "LoadContext").await?;

        let processed_reference = env
            .reference(&vv_core::envelope::flat_key(Category::Responses, "turn2-processed-response"))
            .ok_or_else(|| {
                WorkflowError::new(ErrorCode::Internal, "missing turn2 processed response reference")
                    .with_component(COMPONENT)
                    .with_operation("Run")
            })?;
        let reply_bytes = ctx.state_store.get(processed_reference).await.map_err(|e| {
            WorkflowError::from(e).with_component(COMPONENT).with_operation("LoadTurn2Response")
        })?;
        let reply = String::from_utf8(reply_bytes).map_err(|e| {
            WorkflowError::new(ErrorCode::Internal, e.to_string())
                .with_component(COMPONENT)
                .with_operation("DecodeTurn2Response")
        })?;

        let summary = vv_parser::parse(&reply);
        if summary.is_empty() {
            tracing::warn!(
                verification_id = %context.verification_id,
                "parser found no recognizable verification summary, proceeding with an empty one"
            );
        }
        let summary_json = serde_json::to_value(&summary).map_err(|e| {
            WorkflowError::new(ErrorCode::Internal, e.to_string())
                .with_component(COMPONENT)
                .with_operation("SerializeSummary")
        })?;

        let completed_at = Utc::now();
        let reference_keys: Vec<String> = env.references.keys().cloned().collect();
        ctx.record_store
            .finalize_result(
                &context.verification_id,
                context.verification_at,
                summary_json.clone(),
                reference_keys,
                completed_at,
            )
            .await
            .map_err(|e| WorkflowError::from(e).with_component(COMPONENT).with_operation("FinalizeResult"))?;

        ctx.record_store
            .mark_conversation_completed(&context.verification_id, context.verification_at)
            .await
            .map_err(|e| {
                WorkflowError::from(e).with_component(COMPONENT).with_operation("MarkConversationCompleted")
            })?;

        let mut next = env.clone_forward(Status::Completed).map_err(|e| {
            WorkflowError::new(ErrorCode::Internal, e.to_string())
                .with_component(COMPONENT)
                .with_operation("BuildEnvelope")
        })?;
        next.summary = Some(summary_json);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vv_core::{VerificationRequest, VerificationType};
    use vv_model_client::{ConverseResponse, ScriptedModelClient};
    use vv_records::InMemoryRecordStore;
    use vv_state_store::InMemoryStateStore;
    use vv_templates::TemplateLoader;

    const PNG_1X1: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R', 0, 0,
        0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0, 0x1F, 0x15, 0xC4, 0x89,
    ];

    fn scripted_response(content: &str) -> ConverseResponse {
        ConverseResponse {
            raw_bytes: format!("{{\"content\":\"{content}\"}}").into_bytes(),
            content: content.to_string(),
            thinking: None,
            token_usage: vv_core::TokenUsage::new(50, 25, 0),
            request_id: "req-x".into(),
            stop_reason: "end_turn".into(),
            latency_ms: 200,
        }
    }

    #[tokio::test]
    async fn finalizes_a_completed_run_and_records_the_parsed_summary() {
        let state_store = Arc::new(InMemoryStateStore::new());
        state_store.seed("raw/ref.png", PNG_1X1.to_vec());
        state_store.seed("raw/chk.png", PNG_1X1.to_vec());
        let client = Arc::new(ScriptedModelClient::new());
        client.push_response(scripted_response("reference noted"));
        client.push_response(scripted_response(
            r#"{"verificationStatus": "CORRECT", "discrepantPositions": 0}"#,
        ));
        let ctx = RunContext::new(
            state_store,
            Arc::new(InMemoryRecordStore::new()),
            client,
            Arc::new(TemplateLoader::builtin_only()),
        );
        let request = VerificationRequest {
            verification_type: VerificationType::LayoutVsChecking,
            reference_image_url: "s3://seed/raw/ref.png".into(),
            checking_image_url: "s3://seed/raw/chk.png".into(),
            layout_id: Some("12345".into()),
            layout_prefix: Some("prefix".into()),
            vending_machine_id: Some("VM-1".into()),
            previous_verification_id: None,
            request_id: None,
        };
        let env = super::super::initialize::Initialize.execute(&ctx, request).await.unwrap();
        let env = super::super::fetch_images::FetchImages.run(&ctx, env).await.unwrap();
        let env = super::super::prepare_system_prompt::PrepareSystemPrompt.run(&ctx, env).await.unwrap();
        let env = super::super::execute_turn1::ExecuteTurn1.run(&ctx, env).await.unwrap();
        let env = super::super::execute_turn2::ExecuteTurn2.run(&ctx, env).await.unwrap();

        let verification_id = env.verification_id.clone();
        let next = FinalizeAndStore.run(&ctx, env).await.unwrap();
        assert_eq!(next.status, Status::Completed);
        assert!(next.summary.is_some());

        let context = load_context(ctx.state_store.as_ref(), &next, "test", "test").await.unwrap();
        let row = ctx
            .record_store
            .get_result(&verification_id, context.verification_at)
            .await
            .unwrap();
        assert_eq!(row.verification_status, "CORRECT");
        assert_eq!(row.current_status, Status::ResultsFinalized);
    }
}
