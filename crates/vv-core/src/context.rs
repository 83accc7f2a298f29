// SPDX-License-Identifier: MIT OR Apache-2.0
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{Status, StatusHistoryEntry, VerificationType};
use vv_error::WorkflowErrorDto;

/// Request metadata captured at Initialize (§3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    /// Caller-supplied or generated request id.
    pub request_id: String,
    /// When the request was received.
    pub received_at: Option<DateTime<Utc>>,
}

/// Per-turn wall-clock timestamps, keyed by turn id as a string (`"1"`, `"2"`).
pub type TurnTimestamps = BTreeMap<String, DateTime<Utc>>;

/// Flags describing whether referenced resources were confirmed to exist
/// before use (bucket reachability, URL well-formedness, etc).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceValidation {
    /// Reference image URL passed validation.
    pub reference_image_valid: bool,
    /// Checking image URL passed validation.
    pub checking_image_valid: bool,
}

/// Error bookkeeping embedded in `VerificationContext` (§7).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErrorTracking {
    /// The most recent error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_error: Option<WorkflowErrorDto>,
    /// Every error this verification has raised, oldest first.
    #[serde(default)]
    pub history: Vec<WorkflowErrorDto>,
}

impl ErrorTracking {
    /// Record a new error as current and append it to history.
    pub fn record(&mut self, error: WorkflowErrorDto) {
        self.history.push(error.clone());
        self.current_error = Some(error);
    }
}

/// Per-verification control data (§3).
///
/// Created exactly once by Initialize; immutable thereafter except for
/// `status`, `status_history`, `error_tracking`, and terminal summary fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationContext {
    /// Globally unique id, format `verif-YYYYMMDDHHMMSS-XXXX`.
    pub verification_id: String,
    /// Equals the timestamp encoded in `verification_id`.
    pub verification_at: DateTime<Utc>,
    /// Which comparison mode this verification runs.
    pub verification_type: VerificationType,
    /// Current status.
    pub status: Status,
    /// Present iff `verification_type == LayoutVsChecking`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vending_machine_id: Option<String>,
    /// Present iff `verification_type == LayoutVsChecking`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_id: Option<String>,
    /// Present iff `verification_type == LayoutVsChecking`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_prefix: Option<String>,
    /// Present iff `verification_type == PreviousVsCurrent`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_verification_id: Option<String>,
    /// Object-store URL for the reference image.
    pub reference_image_url: String,
    /// Object-store URL for the checking image.
    pub checking_image_url: String,
    /// Request-scoped metadata.
    #[serde(default)]
    pub request_metadata: RequestMetadata,
    /// Per-turn wall-clock timestamps.
    #[serde(default)]
    pub turn_timestamps: TurnTimestamps,
    /// Resource validation flags.
    #[serde(default)]
    pub resource_validation: ResourceValidation,
    /// Error bookkeeping.
    #[serde(default)]
    pub error_tracking: ErrorTracking,
    /// Ordered status transitions.
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
}

impl VerificationContext {
    /// Append a status-history entry and update `status` to match.
    ///
    /// Does not itself validate the transition — callers advance the
    /// companion `Envelope` (which does validate, see
    /// [`vv_core::envelope::Envelope::advance`]) and mirror the result here.
    pub fn record_transition(
        &mut self,
        status: Status,
        function_name: impl Into<String>,
        stage: impl Into<String>,
        metrics: BTreeMap<String, serde_json::Value>,
    ) {
        self.status = status;
        self.status_history.push(StatusHistoryEntry {
            status,
            timestamp: Utc::now(),
            function_name: function_name.into(),
            stage: stage.into(),
            metrics,
        });
    }
}
