// SPDX-License-Identifier: MIT OR Apache-2.0
//! FetchHistorical (§4.8, `PREVIOUS_VS_CURRENT` only): loads the most recent
//! prior verification and stores it as historical context.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use vv_core::{Category, Envelope, Status};
use vv_error::{ErrorCode, WorkflowError};

use super::support::{load_context, record_status_transition};
use crate::{RunContext, Step};
use vv_state_store::StateStoreJson;

const STAGE: &str = "HISTORICAL_FETCH";

/// The FetchHistorical step.
pub struct FetchHistorical;

/// Persisted shape of `processing/historical-context.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalContext {
    /// The prior verification's id.
    pub previous_verification_id: String,
    /// The prior verification's final status.
    pub previous_status: String,
    /// The prior verification's final judgement, if finalized.
    pub previous_verification_status: String,
    /// Hours elapsed between the prior verification and this one.
    pub hours_since_last_verification: f64,
    /// The prior verification's checking image URL, usable as a comparison
    /// reference for this run.
    pub previous_checking_image_url: String,
}

#[async_trait::async_trait]
impl Step for FetchHistorical {
    fn stage_name(&self) -> &'static str {
        STAGE
    }

    async fn run(&self, ctx: &RunContext, env: Envelope) -> Result<Envelope, WorkflowError> {
        let context = load_context(ctx.state_store.as_ref(), &env, "FetchHistorical", "LoadContext").await?;
        let previous_id = context.previous_verification_id.clone().ok_or_else(|| {
            WorkflowError::new(ErrorCode::HistoricalFetchFailed, "previousVerificationId is missing")
                .with_component("FetchHistorical")
                .with_operation("Run")
        })?;

        let previous_row = ctx
            .record_store
            .most_recent_result(&previous_id)
            .await
            .map_err(|e| {
                WorkflowError::new(ErrorCode::HistoricalFetchFailed, e.to_string())
                    .with_component("FetchHistorical")
                    .with_operation("MostRecentResult")
                    .with_context("previousVerificationId", &previous_id)
            })?;

        let hours_since_last_verification =
            (Utc::now() - previous_row.verification_at).num_seconds() as f64 / 3600.0;

        let historical = HistoricalContext {
            previous_verification_id: previous_id,
            previous_status: previous_row.current_status.as_str().to_string(),
            previous_verification_status: previous_row.verification_status.clone(),
            hours_since_last_verification,
            previous_checking_image_url: previous_row.checking_image_url.clone(),
        };

        let reference = ctx
            .state_store
            .put_json(
                context.verification_at,
                &context.verification_id,
                Category::Processing,
                "historical-context",
                &historical,
            )
            .await
            .map_err(|e| {
                WorkflowError::from(e)
                    .with_component("FetchHistorical")
                    .with_operation("PersistHistoricalContext")
            })?;

        let mut next = env.clone_forward(Status::HistoricalContextLoaded).map_err(|e| {
            WorkflowError::new(ErrorCode::Internal, e.to_string())
                .with_component("FetchHistorical")
                .with_operation("BuildEnvelope")
        })?;
        next.insert_reference(Category::Processing, "historical-context", reference)
            .map_err(|e| {
                WorkflowError::new(ErrorCode::Internal, e.to_string())
                    .with_component("FetchHistorical")
                    .with_operation("BuildEnvelope")
            })?;

        record_status_transition(
            ctx.record_store.as_ref(),
            &context.verification_id,
            context.verification_at,
            next.status,
            "FetchHistorical",
            STAGE,
        )
        .await?;

        Ok(next)
    }
}
