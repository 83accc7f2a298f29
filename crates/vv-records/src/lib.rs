// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The dual-table record store (§4.3): `VerificationResults` (one row per
//! verification) and `ConversationHistory` (one row per turn).
//!
//! The core only ever appends or updates rows by primary key; it never
//! deletes. TTL-based expiry (`expiresAt`) is a backend concern the in-memory
//! reference implementation tracks but never acts on.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vv_core::{ConversationTurn, ErrorTracking, Status, StatusHistoryEntry, VerificationType};

pub use memory::InMemoryRecordStore;

/// Errors a [`RecordStore`] implementation can raise.
#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    /// No row exists for the requested primary key.
    #[error("no verification result for {verification_id} at {verification_at}")]
    NotFound {
        /// The missing verification id.
        verification_id: String,
        /// The missing verification timestamp.
        verification_at: DateTime<Utc>,
    },
    /// A row already exists for a primary key `createInitialResult` was
    /// called with.
    #[error("verification result already exists for {verification_id} at {verification_at}")]
    AlreadyExists {
        /// The colliding verification id.
        verification_id: String,
        /// The colliding verification timestamp.
        verification_at: DateTime<Utc>,
    },
}

impl From<RecordStoreError> for vv_error::WorkflowError {
    fn from(err: RecordStoreError) -> Self {
        let code = match &err {
            RecordStoreError::NotFound { .. } => vv_error::ErrorCode::NotFound,
            RecordStoreError::AlreadyExists { .. } => vv_error::ErrorCode::InvalidInput,
        };
        vv_error::WorkflowError::new(code, err.to_string()).with_component("RecordStore")
    }
}

/// A row of the `VerificationResults` table (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResultRow {
    /// Primary key part 1.
    pub verification_id: String,
    /// Primary key part 2.
    pub verification_at: DateTime<Utc>,
    /// Which comparison mode this verification runs.
    pub verification_type: VerificationType,
    /// Current orchestrator status.
    pub current_status: Status,
    /// Final judgement once `FinalizeAndStore` runs; empty until then.
    #[serde(default)]
    pub verification_status: String,
    /// Present iff `verification_type == LayoutVsChecking`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_id: Option<String>,
    /// Present iff `verification_type == LayoutVsChecking`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vending_machine_id: Option<String>,
    /// Object-store URL for the reference image.
    pub reference_image_url: String,
    /// Object-store URL for the checking image.
    pub checking_image_url: String,
    /// Ordered status transitions.
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
    /// Error bookkeeping.
    #[serde(default)]
    pub error_tracking: ErrorTracking,
    /// Parsed summary, attached by `finalizeResult`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
    /// Flat envelope reference keys persisted by `finalizeResult`.
    #[serde(default)]
    pub reference_keys: Vec<String>,
    /// When `finalizeResult` ran, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// TTL marker; the core never acts on this itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Two tables — `VerificationResults` and `ConversationHistory` — accessed
/// through the operations the orchestrator steps actually need (§4.3).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// First write at Initialize. Fails if a row already exists for this
    /// primary key.
    async fn create_initial_result(
        &self,
        row: VerificationResultRow,
    ) -> Result<(), RecordStoreError>;

    /// Fetch a `VerificationResults` row by primary key.
    async fn get_result(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
    ) -> Result<VerificationResultRow, RecordStoreError>;

    /// Append-only status history update.
    async fn update_status(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
        new_status: Status,
        history_entry: StatusHistoryEntry,
    ) -> Result<(), RecordStoreError>;

    /// One row per conversation turn.
    async fn append_turn(&self, turn: ConversationTurn) -> Result<(), RecordStoreError>;

    /// All turns recorded for a verification, ordered by `turnId`.
    async fn list_turns(&self, verification_id: &str) -> Vec<ConversationTurn>;

    /// Most recent `VerificationResults` row for `previous_verification_id`,
    /// used by `FetchHistorical`.
    async fn most_recent_result(
        &self,
        verification_id: &str,
    ) -> Result<VerificationResultRow, RecordStoreError>;

    /// Sets final status, accuracy/discrepancy counts, and reference
    /// pointers.
    #[allow(clippy::too_many_arguments)]
    async fn finalize_result(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
        summary: serde_json::Value,
        reference_keys: Vec<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), RecordStoreError>;

    /// Marks the conversation's final turn as completed.
    async fn mark_conversation_completed(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
    ) -> Result<(), RecordStoreError>;

    /// Marks the conversation as failed with a reason.
    async fn mark_conversation_failed(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), RecordStoreError>;

    /// Sets `currentStatus = failure_status`, `verificationStatus = FAILED`,
    /// and appends to `errorTracking`/`statusHistory`. `stage` names the step
    /// that failed (e.g. `"IMAGE_FETCH"`) and is recorded on the history
    /// entry; `failure_status` is the terminal `*_FAILED` [`Status`] the
    /// closed status set maps that stage onto.
    async fn update_on_error(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
        failure_status: Status,
        stage: &str,
        error_info: vv_error::WorkflowErrorDto,
    ) -> Result<(), RecordStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(at: DateTime<Utc>) -> VerificationResultRow {
        VerificationResultRow {
            verification_id: "verif-x".into(),
            verification_at: at,
            verification_type: VerificationType::LayoutVsChecking,
            current_status: Status::VerificationRequested,
            verification_status: String::new(),
            layout_id: Some("12345".into()),
            vending_machine_id: Some("VM-1".into()),
            reference_image_url: "s3://ref/a.png".into(),
            checking_image_url: "s3://chk/b.png".into(),
            status_history: Vec::new(),
            error_tracking: ErrorTracking::default(),
            summary: None,
            reference_keys: Vec::new(),
            completed_at: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn create_initial_result_rejects_duplicate_primary_key() {
        let store = InMemoryRecordStore::new();
        let at = Utc::now();
        store.create_initial_result(sample_row(at)).await.unwrap();
        let err = store.create_initial_result(sample_row(at)).await.unwrap_err();
        assert!(matches!(err, RecordStoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn update_status_is_append_only_on_history() {
        let store = InMemoryRecordStore::new();
        let at = Utc::now();
        store.create_initial_result(sample_row(at)).await.unwrap();
        let entry = StatusHistoryEntry {
            status: Status::VerificationInitialized,
            timestamp: at,
            function_name: "Initialize".into(),
            stage: "INITIALIZATION".into(),
            metrics: Default::default(),
        };
        store
            .update_status("verif-x", at, Status::VerificationInitialized, entry)
            .await
            .unwrap();
        let row = store.get_result("verif-x", at).await.unwrap();
        assert_eq!(row.current_status, Status::VerificationInitialized);
        assert_eq!(row.status_history.len(), 1);
    }

    #[tokio::test]
    async fn most_recent_result_picks_latest_verification_at() {
        let store = InMemoryRecordStore::new();
        let earlier = Utc::now() - chrono::Duration::hours(5);
        let later = Utc::now();
        let mut older = sample_row(earlier);
        older.verification_id = "verif-prev".into();
        let mut newer = sample_row(later);
        newer.verification_id = "verif-prev".into();
        store.create_initial_result(older).await.unwrap();
        store.create_initial_result(newer).await.unwrap();

        let found = store.most_recent_result("verif-prev").await.unwrap();
        assert_eq!(found.verification_at, later);
    }

    #[tokio::test]
    async fn update_on_error_sets_failed_status_and_appends_tracking() {
        let store = InMemoryRecordStore::new();
        let at = Utc::now();
        store.create_initial_result(sample_row(at)).await.unwrap();
        let err = vv_error::WorkflowError::new(vv_error::ErrorCode::ImageFetchFailed, "boom");
        store
            .update_on_error("verif-x", at, Status::ImageFetchFailed, "IMAGE_FETCH", (&err).into())
            .await
            .unwrap();
        let row = store.get_result("verif-x", at).await.unwrap();
        assert_eq!(row.verification_status, "FAILED");
        assert_eq!(row.current_status, Status::ImageFetchFailed);
        assert_eq!(row.error_tracking.history.len(), 1);
    }

    #[tokio::test]
    async fn append_and_list_turns_preserves_order() {
        let store = InMemoryRecordStore::new();
        let turn1 = ConversationTurn {
            verification_id: "verif-x".into(),
            turn_id: 1,
            conversation_at: Utc::now(),
            turn_status: vv_core::TurnStatus::Completed,
            prompt: Some("p1".into()),
            response: Some("r1".into()),
            token_usage: vv_core::TokenUsage::new(10, 5, 0),
            model_request_id: "req-1".into(),
            latency_ms: 120,
            thinking: None,
        };
        let mut turn2 = turn1.clone();
        turn2.turn_id = 2;
        store.append_turn(turn2.clone()).await.unwrap();
        store.append_turn(turn1.clone()).await.unwrap();

        let turns = store.list_turns("verif-x").await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].turn_id, 1);
        assert_eq!(turns[1].turn_id, 2);
    }
}
