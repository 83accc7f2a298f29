// SPDX-License-Identifier: MIT OR Apache-2.0
use serde::{Deserialize, Serialize};

use crate::status::VerificationType;

/// Inbound request to Initialize (§4.7).
///
/// Type-specific fields are optional at this layer; Initialize enforces
/// which ones are required for each `verification_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    /// Which comparison mode to run.
    pub verification_type: VerificationType,
    /// Reference image URL (semantics depend on `verification_type`).
    pub reference_image_url: String,
    /// Checking image URL.
    pub checking_image_url: String,
    /// Required for `LayoutVsChecking`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub layout_id: Option<String>,
    /// Required for `LayoutVsChecking`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub layout_prefix: Option<String>,
    /// Required for `LayoutVsChecking`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vending_machine_id: Option<String>,
    /// Required for `PreviousVsCurrent`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous_verification_id: Option<String>,
    /// Caller-supplied request id; generated if absent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
}
