// SPDX-License-Identifier: MIT OR Apache-2.0
//! FetchImages (§4.9): resolves both image URLs, downloads, validates,
//! encodes, and stores them, concurrently.

use base64::Engine;
use vv_core::{
    Category, EnhancedImageMetadata, Envelope, ImageData, ImageFormat, ImageValidation, Reference,
    Status, MAX_BASE64_SIZE_BYTES,
};
use vv_error::{ErrorCode, WorkflowError};

use super::support::{load_context, parse_object_url, record_status_transition, sniff_dimensions, ObjectUrl};
use crate::{RunContext, Step};
use vv_state_store::StateStoreJson;

const STAGE: &str = "IMAGE_FETCH";

/// The FetchImages step.
pub struct FetchImages;

#[async_trait::async_trait]
impl Step for FetchImages {
    fn stage_name(&self) -> &'static str {
        STAGE
    }

    async fn run(&self, ctx: &RunContext, env: Envelope) -> Result<Envelope, WorkflowError> {
        let context = load_context(ctx.state_store.as_ref(), &env, "FetchImages", "LoadContext").await?;

        let (reference_result, checking_result) = tokio::join!(
            fetch_one(ctx, &context.reference_image_url, &context.verification_id, context.verification_at),
            fetch_one(ctx, &context.checking_image_url, &context.verification_id, context.verification_at),
        );
        let reference = reference_result?;
        let checking = checking_result?;

        let metadata = EnhancedImageMetadata { reference, checking };
        let metadata_reference = ctx
            .state_store
            .put_json(
                context.verification_at,
                &context.verification_id,
                Category::Images,
                "metadata",
                &metadata,
            )
            .await
            .map_err(|e| {
                WorkflowError::from(e)
                    .with_component("FetchImages")
                    .with_operation("PersistMetadata")
            })?;

        let mut next = env.clone_forward(Status::ImagesFetched).map_err(|e| {
            WorkflowError::new(ErrorCode::Internal, e.to_string())
                .with_component("FetchImages")
                .with_operation("BuildEnvelope")
        })?;
        next.insert_reference(Category::Images, "metadata", metadata_reference)
            .map_err(|e| {
                WorkflowError::new(ErrorCode::Internal, e.to_string())
                    .with_component("FetchImages")
                    .with_operation("BuildEnvelope")
            })?;

        record_status_transition(
            ctx.record_store.as_ref(),
            &context.verification_id,
            context.verification_at,
            next.status,
            "FetchImages",
            STAGE,
        )
        .await?;

        Ok(next)
    }
}

async fn fetch_one(
    ctx: &RunContext,
    source_url: &str,
    verification_id: &str,
    verification_at: chrono::DateTime<chrono::Utc>,
) -> Result<ImageData, WorkflowError> {
    let error = |message: String| {
        WorkflowError::new(ErrorCode::ImageFetchFailed, message)
            .with_component("FetchImages")
            .with_operation("FetchOne")
            .with_context("sourceUrl", source_url)
    };

    let ObjectUrl { bucket, key } = parse_object_url(source_url).map_err(error)?;
    let extension = key.rsplit('.').next().unwrap_or_default();
    let format = ImageFormat::from_extension(extension).ok_or_else(|| error(format!("{source_url} has an unrecognized extension")))?;

    let source_reference = Reference {
        bucket,
        key: key.clone(),
        size: 0,
    };
    let bytes = ctx
        .state_store
        .get(&source_reference)
        .await
        .map_err(|e| error(format!("could not download {source_url}: {e}")))?;

    let sniffed = ImageFormat::from_magic_bytes(&bytes)
        .ok_or_else(|| error(format!("{source_url} has an unrecognized magic-byte prefix")))?;
    if !sniffed.matches(format) {
        return Err(error(format!(
            "{source_url} has extension {extension:?} but its magic-byte prefix identifies it as {}",
            sniffed.wire_tag()
        )));
    }

    let size_bytes = bytes.len() as u64;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    let encoded_size_bytes = encoded.len() as u64;
    let size_within_limits = encoded_size_bytes <= MAX_BASE64_SIZE_BYTES;
    if !size_within_limits {
        return Err(error(format!(
            "{source_url} base64-encodes to {encoded_size_bytes} bytes, exceeding the {MAX_BASE64_SIZE_BYTES}-byte limit"
        )));
    }

    let (width, height) = sniff_dimensions(&bytes, format);
    let base64_filename = format!("{}-base64", key.replace(['/', '.'], "_"));
    let base64_reference = ctx
        .state_store
        .put(
            verification_at,
            verification_id,
            Category::Images,
            &base64_filename,
            encoded.into_bytes(),
        )
        .await
        .map_err(|e| error(format!("could not store base64 payload for {source_url}: {e}")))?;

    Ok(ImageData {
        source_url: source_url.to_string(),
        source_bucket: source_reference.bucket.clone(),
        source_key: key,
        content_type: format!("image/{}", format.wire_tag()),
        size_bytes,
        width,
        height,
        format,
        encoded_size_bytes,
        base64_reference,
        validation: ImageValidation {
            is_valid: true,
            bedrock_compatible: true,
            size_within_limits,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vv_core::{VerificationRequest, VerificationType};
    use vv_model_client::ScriptedModelClient;
    use vv_records::InMemoryRecordStore;
    use vv_state_store::InMemoryStateStore;
    use vv_templates::TemplateLoader;

    const PNG_1X1: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R', 0, 0,
        0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0, 0x1F, 0x15, 0xC4, 0x89,
    ];

    fn seeded_ctx() -> RunContext {
        let state_store = Arc::new(InMemoryStateStore::new());
        state_store.seed("raw/ref.png", PNG_1X1.to_vec());
        state_store.seed("raw/chk.png", PNG_1X1.to_vec());
        RunContext::new(
            state_store,
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(ScriptedModelClient::new()),
            Arc::new(TemplateLoader::builtin_only()),
        )
    }

    #[tokio::test]
    async fn fetches_and_stores_both_images() {
        let ctx = seeded_ctx();
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
        let next = FetchImages.run(&ctx, env).await.unwrap();
        assert_eq!(next.status, Status::ImagesFetched);
    }

    #[tokio::test]
    async fn fails_non_fatally_when_source_object_is_missing() {
        let ctx = seeded_ctx();
        let request = VerificationRequest {
            verification_type: VerificationType::LayoutVsChecking,
            reference_image_url: "s3://seed/raw/missing.png".into(),
            checking_image_url: "s3://seed/raw/chk.png".into(),
            layout_id: Some("12345".into()),
            layout_prefix: Some("prefix".into()),
            vending_machine_id: Some("VM-1".into()),
            previous_verification_id: None,
            request_id: None,
        };
        let env = super::super::initialize::Initialize.execute(&ctx, request).await.unwrap();
        let err = FetchImages.run(&ctx, env).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ImageFetchFailed);
    }

    #[tokio::test]
    async fn rejects_a_png_extension_whose_magic_bytes_say_otherwise() {
        let state_store = Arc::new(InMemoryStateStore::new());
        state_store.seed("raw/ref.png", b"not actually a png".to_vec());
        state_store.seed("raw/chk.png", PNG_1X1.to_vec());
        let ctx = RunContext::new(
            state_store,
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(ScriptedModelClient::new()),
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
        let err = FetchImages.run(&ctx, env).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ImageFetchFailed);
        assert!(err.message.contains("magic-byte"));
    }
}
