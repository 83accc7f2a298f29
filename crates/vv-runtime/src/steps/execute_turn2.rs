// SPDX-License-Identifier: MIT OR Apache-2.0
//! ExecuteTurn2 (§4.12): replays the full Turn-1 context alongside the
//! checking image in a single call, then persists the raw/processed
//! response and appends the Turn-2 conversation row.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use vv_core::{Category, ConversationTurn, Envelope, Status, TurnStatus, VerificationType};
use vv_error::{ErrorCode, WorkflowError};
use vv_model_client::{ConverseImage, ConverseRequest, PriorTurn};

use super::support::{converse_with_retry, load_context, record_status_transition};
use crate::{RunContext, Step};
use vv_state_store::StateStoreJson;

const STAGE: &str = "BEDROCK_PROCESSING";
const COMPONENT: &str = "BedrockClient";

/// The ExecuteTurn2 step.
pub struct ExecuteTurn2;

#[async_trait::async_trait]
impl Step for ExecuteTurn2 {
    fn stage_name(&self) -> &'static str {
        STAGE
    }

    async fn run(&self, ctx: &RunContext, env: Envelope) -> Result<Envelope, WorkflowError> {
        let context = load_context(ctx.state_store.as_ref(), &env, COMPONENT, "LoadContext").await?;

        // Turn-1's prompt/response are a contract, not a transient dependency:
        // if either is missing, this is not worth retrying.
        let system_prompt_reference = env
            .reference(&vv_core::envelope::flat_key(Category::Prompts, "system-prompt"))
            .ok_or_else(|| turn1_contract_violation("missing system prompt reference"))?;
        let system_prompt = read_text(ctx, system_prompt_reference, "LoadSystemPrompt").await?;

        let turn1_raw_reference = env
            .reference(&vv_core::envelope::flat_key(Category::Responses, "turn1-raw-response"))
            .ok_or_else(|| turn1_contract_violation("missing turn1 raw response reference"))?;
        let _ = ctx.state_store.get(turn1_raw_reference).await.map_err(|e| {
            WorkflowError::from(e).with_component(COMPONENT).with_operation("LoadTurn1RawResponse")
        })?;

        let turn1_processed_reference = env
            .reference(&vv_core::envelope::flat_key(Category::Responses, "turn1-processed-response"))
            .ok_or_else(|| turn1_contract_violation("missing turn1 processed response reference"))?;
        let turn1_response = read_text(ctx, turn1_processed_reference, "LoadTurn1ProcessedResponse").await?;

        let turns = ctx.record_store.list_turns(&context.verification_id).await;
        let turn1_prompt = turns
            .iter()
            .find(|t| t.turn_id == 1)
            .and_then(|t| t.prompt.clone())
            .ok_or_else(|| turn1_contract_violation("turn1 conversation row has no prompt"))?;

        let metadata_reference = env
            .reference(&vv_core::envelope::flat_key(Category::Images, "metadata"))
            .ok_or_else(|| {
                WorkflowError::new(ErrorCode::Internal, "missing image metadata reference")
                    .with_component(COMPONENT)
                    .with_operation("ProcessTurn2")
            })?;
        let metadata: vv_core::EnhancedImageMetadata = ctx.state_store.get_json(metadata_reference).await.map_err(|e| {
            WorkflowError::from(e).with_component(COMPONENT).with_operation("LoadImageMetadata")
        })?;

        let reference_base64 = read_text(ctx, &metadata.reference.base64_reference, "LoadReferenceImage").await?;
        let checking_base64 = read_text(ctx, &metadata.checking.base64_reference, "LoadCheckingImage").await?;

        let turn_kind = match context.verification_type {
            VerificationType::LayoutVsChecking => "turn2-layoutVsChecking",
            VerificationType::PreviousVsCurrent => "turn2-previousVsCurrent",
        };
        let mut template_ctx: BTreeMap<String, Value> = BTreeMap::new();
        if let Some(vending_machine_id) = &context.vending_machine_id {
            template_ctx.insert("vendingMachineId".into(), json!(vending_machine_id));
        }
        if let Some(layout_id) = &context.layout_id {
            template_ctx.insert("layoutId".into(), json!(layout_id));
        }
        if let Some(previous_id) = &context.previous_verification_id {
            template_ctx.insert("previousVerificationId".into(), json!(previous_id));
        }
        let user_prompt = ctx.templates.render_latest(turn_kind, &template_ctx).await.map_err(|e| {
            WorkflowError::from(e).with_component(COMPONENT).with_operation("RenderTurn2Prompt")
        })?;

        let request = ConverseRequest {
            system_prompt: system_prompt.clone(),
            user_prompt: user_prompt.clone(),
            images: vec![ConverseImage {
                base64: checking_base64,
                format: metadata.checking.format,
            }],
            prior_turn: Some(PriorTurn {
                system_prompt,
                user_prompt: turn1_prompt,
                user_image: ConverseImage {
                    base64: reference_base64,
                    format: metadata.reference.format,
                },
                assistant_reply: turn1_response,
            }),
        };

        let response = converse_with_retry(ctx.model_client.as_ref(), COMPONENT, "ProcessTurn2", request).await?;

        let raw_reference = ctx
            .state_store
            .put(
                context.verification_at,
                &context.verification_id,
                Category::Responses,
                "turn2-raw-response",
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
                "turn2-processed-response",
                response.content.clone().into_bytes(),
            )
            .await
            .map_err(|e| {
                WorkflowError::from(e).with_component(COMPONENT).with_operation("PersistProcessedResponse")
            })?;

        ctx.record_store
            .append_turn(ConversationTurn {
                verification_id: context.verification_id.clone(),
                turn_id: 2,
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
        let mut next = env.clone_forward(Status::Turn2Completed).map_err(build_envelope_error)?;
        next.insert_reference(Category::Responses, "turn2-raw-response", raw_reference)
            .map_err(build_envelope_error)?;
        next.insert_reference(Category::Responses, "turn2-processed-response", processed_reference)
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

fn turn1_contract_violation(message: &str) -> WorkflowError {
    WorkflowError::new(ErrorCode::InvalidInput, message)
        .with_component(COMPONENT)
        .with_operation("ProcessTurn2")
        .retryable(false)
}

async fn read_text(ctx: &RunContext, reference: &vv_core::Reference, operation: &str) -> Result<String, WorkflowError> {
    let bytes = ctx.state_store.get(reference).await.map_err(|e| {
        WorkflowError::from(e).with_component(COMPONENT).with_operation(operation)
    })?;
    String::from_utf8(bytes).map_err(|e| {
        WorkflowError::new(ErrorCode::Internal, e.to_string())
            .with_component(COMPONENT)
            .with_operation(operation)
    })
}
