// SPDX-License-Identifier: MIT OR Apache-2.0
//! Helpers shared by several steps: loading the initialization context back
//! out of the state store, and object-store URL parsing.

use chrono::{DateTime, Utc};
use vv_core::envelope::flat_key;
use vv_core::{Category, Envelope, ImageFormat, Status, StatusHistoryEntry, VerificationContext};
use vv_error::{ErrorCode, WorkflowError};
use vv_model_client::{ConverseRequest, ConverseResponse, ModelClient};
use vv_records::RecordStore;
use vv_state_store::{StateStore, StateStoreJson};

/// Load the `VerificationContext` written by Initialize, keyed off the
/// `processing_initialization` reference every envelope carries from that
/// point on.
pub async fn load_context(
    state_store: &dyn StateStore,
    env: &Envelope,
    component: &str,
    operation: &str,
) -> Result<VerificationContext, WorkflowError> {
    let reference = env
        .reference(&flat_key(Category::Processing, "initialization"))
        .ok_or_else(|| {
            WorkflowError::new(
                ErrorCode::Internal,
                "envelope is missing processing_initialization reference",
            )
            .with_component(component)
            .with_operation(operation)
        })?;
    state_store
        .get_json(reference)
        .await
        .map_err(|e| WorkflowError::from(e).with_component(component).with_operation(operation))
}

/// `(bucket, key)` parsed out of an `s3://bucket/key` style URL.
pub struct ObjectUrl {
    /// Bucket segment.
    pub bucket: String,
    /// Key segment (everything after the bucket).
    pub key: String,
}

/// Parse an object-store URL and check its extension is one of the allowed
/// image formats (§4.7).
pub fn parse_object_url(url: &str) -> Result<ObjectUrl, String> {
    let rest = url
        .strip_prefix("s3://")
        .ok_or_else(|| format!("{url} is not an object-store URL"))?;
    let (bucket, key) = rest.split_once('/').ok_or_else(|| format!("{url} is missing a key"))?;
    if key.is_empty() {
        return Err(format!("{url} is missing a key"));
    }
    let extension = key.rsplit('.').next().unwrap_or_default();
    if ImageFormat::from_extension(extension).is_none() {
        return Err(format!("{url} has an unsupported extension"));
    }
    Ok(ObjectUrl {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}

/// Best-effort pixel dimensions sniffed directly from the encoded bytes.
///
/// Reads the PNG `IHDR` chunk or the first JPEG `SOFn` marker; returns
/// `(0, 0)` if the header cannot be parsed, which callers treat as a
/// non-fatal degraded measurement rather than an error.
#[must_use]
pub fn sniff_dimensions(bytes: &[u8], format: ImageFormat) -> (u32, u32) {
    match format {
        ImageFormat::Png => sniff_png_dimensions(bytes).unwrap_or((0, 0)),
        ImageFormat::Jpeg | ImageFormat::Jpg => sniff_jpeg_dimensions(bytes).unwrap_or((0, 0)),
    }
}

fn sniff_png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    if bytes.len() < 24 || &bytes[0..8] != SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    Some((width, height))
}

fn sniff_jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut offset = 2;
    while offset + 9 <= bytes.len() {
        if bytes[offset] != 0xFF {
            offset += 1;
            continue;
        }
        let marker = bytes[offset + 1];
        let is_sof = matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF);
        let segment_len = u16::from_be_bytes(bytes[offset + 2..offset + 4].try_into().ok()?) as usize;
        if is_sof {
            let height = u16::from_be_bytes(bytes[offset + 5..offset + 7].try_into().ok()?);
            let width = u16::from_be_bytes(bytes[offset + 7..offset + 9].try_into().ok()?);
            return Some((u32::from(width), u32::from(height)));
        }
        if marker == 0xD8 || marker == 0xD9 {
            offset += 2;
            continue;
        }
        offset += 2 + segment_len;
    }
    None
}

/// Call `converse`, retrying per the category the *current* attempt's
/// failure classifies into (§4.4, §4.15).
///
/// Unlike [`vv_retry::retry`], which fixes its policy for the whole call,
/// the model client's policy depends on the error each attempt raises — a
/// throttling response wants a jittered backoff up to 5 attempts, a timeout
/// wants linear backoff up to 2 — so the loop re-derives the policy every
/// time and bounds itself by that attempt's budget.
pub async fn converse_with_retry(
    model_client: &dyn ModelClient,
    component: &str,
    operation: &str,
    request: ConverseRequest,
) -> Result<ConverseResponse, WorkflowError> {
    let mut attempt = 1u32;
    loop {
        match model_client.converse(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                let policy = err.category.retry_policy();
                let retryable = err.category.retryable();
                if retryable && attempt < policy.max_attempts {
                    tracing::warn!(attempt, component, operation, "model call failed, retrying");
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                    attempt += 1;
                    continue;
                }
                return Err(WorkflowError::from(err)
                    .with_component(component)
                    .with_operation(operation));
            }
        }
    }
}

/// Mirror a step's successful transition into `VerificationResults.statusHistory`
/// (§4.3's append-only status history), so intermediate statuses
/// (`IMAGES_FETCHED`, `PROMPT_PREPARED`, …) are visible on the row, not just
/// the initial and terminal ones.
pub async fn record_status_transition(
    record_store: &dyn RecordStore,
    verification_id: &str,
    verification_at: DateTime<Utc>,
    status: Status,
    function_name: &str,
    stage: &str,
) -> Result<(), WorkflowError> {
    let entry = StatusHistoryEntry {
        status,
        timestamp: Utc::now(),
        function_name: function_name.to_string(),
        stage: stage.to_string(),
        metrics: Default::default(),
    };
    record_store
        .update_status(verification_id, verification_at, status, entry)
        .await
        .map_err(|e| WorkflowError::from(e).with_component(function_name).with_operation("UpdateStatus"))
}

/// Flat-key lookup that also maps a missing reference to a `NotFound` error.
pub fn require_reference<'a>(
    env: &'a Envelope,
    category: Category,
    filename: &str,
    component: &str,
    operation: &str,
) -> Result<&'a vv_core::Reference, WorkflowError> {
    env.reference(&flat_key(category, filename))
        .ok_or_else(|| {
            WorkflowError::new(ErrorCode::NotFound, format!("missing reference {category}/{filename}"))
                .with_component(component)
                .with_operation(operation)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_object_url_accepts_bucket_and_key() {
        let parsed = parse_object_url("s3://ref-bucket/raw/12345.png").unwrap();
        assert_eq!(parsed.bucket, "ref-bucket");
        assert_eq!(parsed.key, "raw/12345.png");
    }

    #[test]
    fn parse_object_url_rejects_non_s3_scheme() {
        assert!(parse_object_url("https://example.com/a.png").is_err());
    }

    #[test]
    fn parse_object_url_rejects_unsupported_extension() {
        assert!(parse_object_url("s3://b/a.gif").is_err());
    }

    #[test]
    fn sniff_png_dimensions_reads_ihdr() {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0, 0, 0, 13]); // chunk length
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&100u32.to_be_bytes());
        bytes.extend_from_slice(&50u32.to_be_bytes());
        assert_eq!(sniff_dimensions(&bytes, ImageFormat::Png), (100, 50));
    }

    #[test]
    fn sniff_dimensions_degrades_to_zero_on_garbage() {
        assert_eq!(sniff_dimensions(b"not an image", ImageFormat::Png), (0, 0));
    }

    #[tokio::test]
    async fn record_status_transition_appends_to_the_row_history() {
        use vv_core::VerificationType;
        use vv_records::{InMemoryRecordStore, VerificationResultRow};

        let store = InMemoryRecordStore::new();
        let at = Utc::now();
        store
            .create_initial_result(VerificationResultRow {
                verification_id: "verif-x".into(),
                verification_at: at,
                verification_type: VerificationType::LayoutVsChecking,
                current_status: Status::VerificationRequested,
                verification_status: String::new(),
                layout_id: None,
                vending_machine_id: None,
                reference_image_url: "s3://ref/a.png".into(),
                checking_image_url: "s3://chk/b.png".into(),
                status_history: Vec::new(),
                error_tracking: Default::default(),
                summary: None,
                reference_keys: Vec::new(),
                completed_at: None,
                expires_at: None,
            })
            .await
            .unwrap();

        record_status_transition(&store, "verif-x", at, Status::ImagesFetched, "FetchImages", "IMAGE_FETCH")
            .await
            .unwrap();

        let row = store.get_result("verif-x", at).await.unwrap();
        assert_eq!(row.current_status, Status::ImagesFetched);
        assert_eq!(row.status_history.len(), 1);
    }
}
