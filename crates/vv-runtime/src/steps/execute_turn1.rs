// SPDX-License-Identifier: MIT OR Apache-2.0
//! ExecuteTurn1 (§4.11): sends the system prompt, Turn-1 user prompt, and
//! the reference image; persists the raw/processed response and the
//! structured reference analysis; appends the conversation row.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use vv_core::{Category, ConversationTurn, Envelope, Status, TurnStatus, VerificationType};
use vv_error::{ErrorCode, WorkflowError};
use vv_model_client::{ConverseImage, ConverseRequest};

use super::support::{converse_with_retry, load_context, record_status_transition};
use crate::{RunContext, Step};
use vv_state_store::StateStoreJson;

const STAGE: &str = "BEDROCK_PROCESSING";
const COMPONENT: &str = "BedrockClient";

/// The ExecuteTurn1 step.
pub struct ExecuteTurn1;

/// Structured reference analysis persisted alongside the Turn-1 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn1Analysis {
    /// Which comparison mode produced this analysis.
    pub verification_type: VerificationType,
    /// `"layoutConfirmation"`, `"historicalEnhancement"`, or `"freshExtraction"`.
    pub mode: String,
    /// The Turn-1 assistant text this analysis summarizes.
    pub reference_description: String,
}

#[async_trait::async_trait]
impl Step for ExecuteTurn1 {
    fn stage_name(&self) -> &'static str {
        STAGE
    }

    async fn run(&self, ctx: &RunContext, env: Envelope) -> Result<Envelope, WorkflowError> {
        let context = load_context(ctx.state_store.as_ref(), &env, COMPONENT, "LoadContext").await?;

        let system_prompt_reference = env
            .reference(&vv_core::envelope::flat_key(Category::Prompts, "system-prompt"))
            .ok_or_else(|| {
                WorkflowError::new(ErrorCode::Internal, "missing system prompt reference")
                    .with_component(COMPONENT)
                    .with_operation("ProcessTurn1")
            })?;
        let system_prompt_bytes = ctx.state_store.get(system_prompt_reference).await.map_err(|e| {
            WorkflowError::from(e).with_component(COMPONENT).with_operation("LoadSystemPrompt")
        })?;
        let system_prompt = String::from_utf8(system_prompt_bytes).map_err(|e| {
            WorkflowError::new(ErrorCode::Internal, e.to_string())
                .with_component(COMPONENT)
                .with_operation("DecodeSystemPrompt")
        })?;

        let metadata_reference = env
            .reference(&vv_core::envelope::flat_key(Category::Images, "metadata"))
            .ok_or_else(|| {
                WorkflowError::new(ErrorCode::Internal, "missing image metadata reference")
                    .with_component(COMPONENT)
                    .with_operation("ProcessTurn1")
            })?;
        let metadata: vv_core::EnhancedImageMetadata = ctx.state_store.get_json(metadata_reference).await.map_err(|e| {
            WorkflowError::from(e).with_component(COMPONENT).with_operation("LoadImageMetadata")
        })?;
        let reference_base64 = ctx.state_store.get(&metadata.reference.base64_reference).await.map_err(|e| {
            WorkflowError::from(e).with_component(COMPONENT).with_operation("LoadReferenceImage")
        })?;
        let reference_base64 = String::from_utf8(reference_base64).map_err(|e| {
            WorkflowError::new(ErrorCode::Internal, e.to_string())
                .with_component(COMPONENT)
                .with_operation("DecodeReferenceImage")
        })?;

        let turn_kind = match context.verification_type {
            VerificationType::LayoutVsChecking => "turn1-layoutVsChecking",
            VerificationType::PreviousVsCurrent => "turn1-previousVsCurrent",
        };
        let mut template_ctx: BTreeMap<String, Value> = BTreeMap::new();
        if let Some(vending_machine_id) = &context.vending_machine_id {
            template_ctx.insert("vendingMachineId".into(), json!(vending_machine_id));
        }
        if let Some(layout_id) = &context.layout_id {
            template_ctx.insert("layoutId".into(), json!(layout_id));
        }
        if let Some(layout_prefix) = &context.layout_prefix {
            template_ctx.insert("layoutPrefix".into(), json!(layout_prefix));
        }
        if let Some(previous_id) = &context.previous_verification_id {
            template_ctx.insert("previousVerificationId".into(), json!(previous_id));
        }
        let user_prompt = ctx.templates.render_latest(turn_kind, &template_ctx).await.map_err(|e| {
            WorkflowError::from(e).with_component(COMPONENT).with_operation("RenderTurn1Prompt")
        })?;

        let request = ConverseRequest {
            system_prompt: system_prompt.clone(),
            user_prompt: user_prompt.clone(),
            images: vec![ConverseImage {
                base64: reference_base64.clone(),
                format: metadata.reference.format,
            }],
            prior_turn: None,
        };

        let start = std::time::Instant::now();
        let response = converse_with_retry(ctx.model_client.as_ref(), COMPONENT, "ProcessTurn1", request).await?;
        let _ = start.elapsed();

        let raw_reference = ctx
            .state_store
            .put(
                context.verification_at,
                &context.verification_id,
                Category::Responses,
                "turn1-raw-response",
                response.raw_bytes.clone(),
            )
            .await
            .map_err(|e| WorkflowError::from(e).with_component(COMPONENT).with_operation("PersistRawResponse"))?;

        let processed_reference = ctx
            .state_store
            .put(
                context.verification_at,
                &context.verification_id,
                Category::Responses,
                "turn1-processed-response",
                response.content.clone().into_bytes(),
            )
            .await
            .map_err(|e| {
                WorkflowError::from(e).with_component(COMPONENT).with_operation("PersistProcessedResponse")
            })?;

        let mode = match context.verification_type {
            VerificationType::LayoutVsChecking => "layoutConfirmation",
            VerificationType::PreviousVsCurrent => {
                if env
                    .reference(&vv_core::envelope::flat_key(Category::Processing, "historical-context"))
                    .is_some()
                {
                    "historicalEnhancement"
                } else {
                    "freshExtraction"
                }
            }
        };
        let analysis = Turn1Analysis {
            verification_type: context.verification_type,
            mode: mode.to_string(),
            reference_description: response.content.clone(),
        };
        let analysis_reference = ctx
            .state_store
            .put_json(
                context.verification_at,
                &context.verification_id,
                Category::Processing,
                "turn1-analysis",
                &analysis,
            )
            .await
            .map_err(|e| WorkflowError::from(e).with_component(COMPONENT).with_operation("PersistAnalysis"))?;

        ctx.record_store
            .append_turn(ConversationTurn {
                verification_id: context.verification_id.clone(),
                turn_id: 1,
                conversation_at: context.verification_at,
                turn_status: TurnStatus::Completed,
                prompt: Some(user_prompt),
                response: Some(response.content.clone()),
                token_usage: response.token_usage,
                model_request_id: response.request_id.clone(),
                latency_ms: response.latency_ms,
                thinking: response.thinking.clone(),
            })
            .await
            .map_err(|e| WorkflowError::from(e).with_component(COMPONENT).with_operation("AppendConversationTurn"))?;

        fn build_envelope_error(e: impl std::fmt::Display) -> WorkflowError {
            WorkflowError::new(ErrorCode::Internal, e.to_string())
                .with_component(COMPONENT)
                .with_operation("BuildEnvelope")
        }
        let mut next = env.clone_forward(Status::Turn1Completed).map_err(build_envelope_error)?;
        next.insert_reference(Category::Responses, "turn1-raw-response", raw_reference)
            .map_err(build_envelope_error)?;
        next.insert_reference(Category::Responses, "turn1-processed-response", processed_reference)
            .map_err(build_envelope_error)?;
        next.insert_reference(Category::Processing, "turn1-analysis", analysis_reference)
            .map_err(build_envelope_error)?;

        record_status_transition(
            ctx.record_store.as_ref(),
            &context.verification_id,
            context.verification_at,
            next.status,
            COMPONENT,
            STAGE,
        )
        .await?;

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
            token_usage: vv_core::TokenUsage::new(100, 40, 0),
            request_id: "req-1".into(),
            stop_reason: "end_turn".into(),
            latency_ms: 250,
        }
    }

    async fn prepared_env(model_client: Arc<ScriptedModelClient>) -> (RunContext, Envelope) {
        let state_store = Arc::new(InMemoryStateStore::new());
        state_store.seed("raw/ref.png", PNG_1X1.to_vec());
        state_store.seed("raw/chk.png", PNG_1X1.to_vec());
        let ctx = RunContext::new(
            state_store,
            Arc::new(InMemoryRecordStore::new()),
            model_client,
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
        (ctx, env)
    }

    #[tokio::test]
    async fn completes_turn1_and_persists_three_artifacts() {
        let client = Arc::new(ScriptedModelClient::new());
        client.push_response(scripted_response("ten positions described"));
        let (ctx, env) = prepared_env(client).await;

        let next = ExecuteTurn1.run(&ctx, env).await.unwrap();
        assert_eq!(next.status, Status::Turn1Completed);

        let turns = ctx.record_store.list_turns(&next.verification_id).await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].prompt.as_deref().map(str::len).unwrap_or(0) > 0, true);
        assert_eq!(turns[0].response.as_deref(), Some("ten positions described"));
    }
}
