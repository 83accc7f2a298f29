// SPDX-License-Identifier: MIT OR Apache-2.0
//! PrepareSystemPrompt (§4.10): renders the system prompt from the
//! verification context plus, if present, layout or historical context.
//! Historical data is reserved for Turn-2 and never embedded here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use vv_core::{Category, Envelope, Status, VerificationType};
use vv_error::{ErrorCode, WorkflowError};

use super::fetch_historical::HistoricalContext;
use super::support::{load_context, record_status_transition};
use crate::{RunContext, Step};
use vv_state_store::StateStoreJson;

const STAGE: &str = "PROMPT_PREPARATION";

/// The PrepareSystemPrompt step.
pub struct PrepareSystemPrompt;

/// Small JSON descriptor stored alongside the rendered prompt text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDescriptor {
    /// Template kind used, e.g. `"systemPrompt-layoutVsChecking"`.
    pub prompt_type: String,
    /// `len(text) / 4`, a rough token estimate (no tokenizer dependency).
    pub estimated_tokens: usize,
    /// Template version rendered.
    pub prompt_version: String,
}

#[async_trait::async_trait]
impl Step for PrepareSystemPrompt {
    fn stage_name(&self) -> &'static str {
        STAGE
    }

    async fn run(&self, ctx: &RunContext, env: Envelope) -> Result<Envelope, WorkflowError> {
        let context = load_context(ctx.state_store.as_ref(), &env, "PrepareSystemPrompt", "LoadContext").await?;

        let kind = match context.verification_type {
            VerificationType::LayoutVsChecking => "systemPrompt-layoutVsChecking",
            VerificationType::PreviousVsCurrent => "systemPrompt-previousVsCurrent",
        };

        let mut template_ctx: BTreeMap<String, Value> = BTreeMap::new();
        if let Some(vending_machine_id) = &context.vending_machine_id {
            template_ctx.insert("vendingMachineId".into(), json!(vending_machine_id));
        }
        if let Some(layout_id) = &context.layout_id {
            template_ctx.insert("layoutId".into(), json!(layout_id));
        }
        if context.verification_type == VerificationType::PreviousVsCurrent {
            if let Some(reference) = env.reference(&vv_core::envelope::flat_key(Category::Processing, "historical-context")) {
                let historical: HistoricalContext = ctx.state_store.get_json(reference).await.map_err(|e| {
                    WorkflowError::from(e)
                        .with_component("PrepareSystemPrompt")
                        .with_operation("LoadHistoricalContext")
                })?;
                template_ctx.insert(
                    "previousVerificationId".into(),
                    json!(historical.previous_verification_id),
                );
                template_ctx.insert(
                    "hoursSinceLastVerification".into(),
                    json!(format!("{:.1}", historical.hours_since_last_verification)),
                );
            } else if let Some(previous_id) = &context.previous_verification_id {
                template_ctx.insert("previousVerificationId".into(), json!(previous_id));
                template_ctx.insert("hoursSinceLastVerification".into(), json!("unknown"));
            }
        }

        let rendered = ctx.templates.render_latest(kind, &template_ctx).await.map_err(|e| {
            WorkflowError::from(e)
                .with_component("PrepareSystemPrompt")
                .with_operation("Render")
        })?;

        let prompt_reference = ctx
            .state_store
            .put(
                context.verification_at,
                &context.verification_id,
                Category::Prompts,
                "system-prompt",
                rendered.clone().into_bytes(),
            )
            .await
            .map_err(|e| {
                WorkflowError::from(e)
                    .with_component("PrepareSystemPrompt")
                    .with_operation("PersistPromptText")
            })?;

        let descriptor = PromptDescriptor {
            prompt_type: kind.to_string(),
            estimated_tokens: rendered.len() / 4,
            prompt_version: "v1".to_string(),
        };
        let descriptor_reference = ctx
            .state_store
            .put_json(
                context.verification_at,
                &context.verification_id,
                Category::Prompts,
                "system-prompt-descriptor",
                &descriptor,
            )
            .await
            .map_err(|e| {
                WorkflowError::from(e)
                    .with_component("PrepareSystemPrompt")
                    .with_operation("PersistDescriptor")
            })?;

        fn build_envelope_error(e: impl std::fmt::Display) -> WorkflowError {
            WorkflowError::new(ErrorCode::Internal, e.to_string())
                .with_component("PrepareSystemPrompt")
                .with_operation("BuildEnvelope")
        }
        let mut next = env.clone_forward(Status::PromptPrepared).map_err(build_envelope_error)?;
        next.insert_reference(Category::Prompts, "system-prompt", prompt_reference)
            .map_err(build_envelope_error)?;
        next.insert_reference(Category::Prompts, "system-prompt-descriptor", descriptor_reference)
            .map_err(build_envelope_error)?;

        record_status_transition(
            ctx.record_store.as_ref(),
            &context.verification_id,
            context.verification_at,
            next.status,
            "PrepareSystemPrompt",
            STAGE,
        )
        .await?;

        Ok(next)
    }
}
