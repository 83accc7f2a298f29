// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The orchestrator: a `Pipeline` of boxed `Step` trait objects driven by a
//! `Runtime` that owns the shared collaborator handles (§4.1, §5).
//!
//! The driver is a pure function of the transition table — it never
//! special-cases a step by name. Initialize builds the first `Envelope` from
//! a request; `FinalizeWithError` is the single terminal error handler every
//! other step's failure routes through.

pub mod steps;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vv_core::{Envelope, VerificationRequest, VerificationType};
use vv_error::WorkflowError;
use vv_model_client::ModelClient;
use vv_records::RecordStore;
use vv_state_store::StateStore;
use vv_templates::TemplateLoader;

pub use steps::finalize_with_error::ErrorCause;

/// Shared collaborator handles threaded through every step call (§5).
#[derive(Clone)]
pub struct RunContext {
    /// Content-addressed object store.
    pub state_store: Arc<dyn StateStore>,
    /// Dual-table record store.
    pub record_store: Arc<dyn RecordStore>,
    /// Two-turn multimodal model client.
    pub model_client: Arc<dyn ModelClient>,
    /// Versioned prompt template loader.
    pub templates: Arc<TemplateLoader>,
    /// Cancellation signal every suspension point observes (§5).
    pub cancellation: CancellationToken,
}

impl RunContext {
    /// Construct a context from the four collaborator handles, with a fresh
    /// (unfired) cancellation token.
    #[must_use]
    pub fn new(
        state_store: Arc<dyn StateStore>,
        record_store: Arc<dyn RecordStore>,
        model_client: Arc<dyn ModelClient>,
        templates: Arc<TemplateLoader>,
    ) -> Self {
        Self {
            state_store,
            record_store,
            model_client,
            templates,
            cancellation: CancellationToken::new(),
        }
    }
}

/// One pipeline stage. Matches the per-step contract in §4.1: receives the
/// envelope the previous step produced, returns a new envelope whose
/// reference map is a superset of the input's (invariant 1).
#[async_trait::async_trait]
pub trait Step: Send + Sync {
    /// Stable name used in tracing spans and `FinalizeWithError`'s stage field.
    fn stage_name(&self) -> &'static str;

    /// Run this step.
    async fn run(&self, ctx: &RunContext, env: Envelope) -> Result<Envelope, WorkflowError>;
}

/// An ordered list of [`Step`]s run without branching inside the pipeline
/// itself; the branch point (whether `FetchHistorical` runs) is decided when
/// the pipeline is assembled, not while running.
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    /// Build a pipeline from an ordered step list.
    #[must_use]
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    /// Run every step in order, short-circuiting on the first failure.
    ///
    /// On failure, returns `Err((envelope_at_failure, stage_name, error))` so
    /// the caller (`Runtime`) can route it to `FinalizeWithError`.
    pub async fn run(
        &self,
        ctx: &RunContext,
        mut env: Envelope,
    ) -> Result<Envelope, (Envelope, &'static str, WorkflowError)> {
        for step in &self.steps {
            let stage = step.stage_name();
            let span = tracing::info_span!(
                "step",
                verification_id = %env.verification_id,
                step = stage,
                status_before = %env.status,
            );
            let _enter = span.enter();
            match step.run(ctx, env.clone()).await {
                Ok(next) => {
                    tracing::info!(status_after = %next.status, "step completed");
                    env = next;
                }
                Err(err) => return Err((env, stage, err)),
            }
        }
        Ok(env)
    }
}

/// Owns a [`RunContext`] and assembles the branch-specific [`Pipeline`] for
/// each request.
pub struct Runtime {
    ctx: RunContext,
}

impl Runtime {
    /// Wrap a [`RunContext`].
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    /// Run Initialize, the branch-specific pipeline, and — on any failure —
    /// `FinalizeWithError`. Returns the terminal envelope; the envelope's
    /// `status` (not a Rust `Err`) carries pipeline-level failure.
    pub async fn run(&self, request: VerificationRequest) -> Result<Envelope, WorkflowError> {
        let verification_type = request.verification_type;
        let init = steps::initialize::Initialize;
        let env = match init.execute(&self.ctx, request).await {
            Ok(env) => env,
            Err((partial_env, err)) => {
                let final_env = steps::finalize_with_error::FinalizeWithError
                    .handle(&self.ctx, partial_env, Some("INITIALIZATION"), ErrorCause::from_error(&err))
                    .await;
                return Ok(final_env);
            }
        };

        match build_pipeline(verification_type).run(&self.ctx, env).await {
            Ok(final_env) => Ok(final_env),
            Err((partial_env, stage, err)) => {
                let final_env = steps::finalize_with_error::FinalizeWithError
                    .handle(&self.ctx, partial_env, Some(stage), ErrorCause::from_error(&err))
                    .await;
                Ok(final_env)
            }
        }
    }
}

fn build_pipeline(verification_type: VerificationType) -> Pipeline {
    let mut list: Vec<Box<dyn Step>> = Vec::new();
    if matches!(verification_type, VerificationType::PreviousVsCurrent) {
        list.push(Box::new(steps::fetch_historical::FetchHistorical));
    }
    list.push(Box::new(steps::fetch_images::FetchImages));
    list.push(Box::new(steps::prepare_system_prompt::PrepareSystemPrompt));
    list.push(Box::new(steps::execute_turn1::ExecuteTurn1));
    list.push(Box::new(steps::execute_turn2::ExecuteTurn2));
    list.push(Box::new(steps::finalize_and_store::FinalizeAndStore));
    Pipeline::new(list)
}
