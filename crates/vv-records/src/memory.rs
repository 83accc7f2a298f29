// SPDX-License-Identifier: MIT OR Apache-2.0
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use vv_core::{ConversationTurn, Status, StatusHistoryEntry};

use crate::{RecordStore, RecordStoreError, VerificationResultRow};

type ResultKey = (String, DateTime<Utc>);
type TurnKey = (String, u8, DateTime<Utc>);

/// A [`RecordStore`] backed by two in-process `BTreeMap`s keyed by primary
/// key, guarded by an async mutex. Secondary indices (by layout, by turn
/// status, ...) are recomputed on read rather than maintained incrementally,
/// which is sufficient for the orchestrator's access patterns and for tests.
#[derive(Default)]
pub struct InMemoryRecordStore {
    results: Mutex<BTreeMap<ResultKey, VerificationResultRow>>,
    turns: Mutex<BTreeMap<TurnKey, ConversationTurn>>,
}

impl InMemoryRecordStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(verification_id: &str, verification_at: DateTime<Utc>) -> RecordStoreError {
        RecordStoreError::NotFound {
            verification_id: verification_id.to_string(),
            verification_at,
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_initial_result(
        &self,
        row: VerificationResultRow,
    ) -> Result<(), RecordStoreError> {
        let key = (row.verification_id.clone(), row.verification_at);
        let mut results = self.results.lock().await;
        if results.contains_key(&key) {
            return Err(RecordStoreError::AlreadyExists {
                verification_id: key.0,
                verification_at: key.1,
            });
        }
        results.insert(key, row);
        Ok(())
    }

    async fn get_result(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
    ) -> Result<VerificationResultRow, RecordStoreError> {
        let results = self.results.lock().await;
        results
            .get(&(verification_id.to_string(), verification_at))
            .cloned()
            .ok_or_else(|| Self::not_found(verification_id, verification_at))
    }

    async fn update_status(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
        new_status: Status,
        history_entry: StatusHistoryEntry,
    ) -> Result<(), RecordStoreError> {
        let mut results = self.results.lock().await;
        let row = results
            .get_mut(&(verification_id.to_string(), verification_at))
            .ok_or_else(|| Self::not_found(verification_id, verification_at))?;
        row.current_status = new_status;
        row.status_history.push(history_entry);
        Ok(())
    }

    async fn append_turn(&self, turn: ConversationTurn) -> Result<(), RecordStoreError> {
        let key = (turn.verification_id.clone(), turn.turn_id, turn.conversation_at);
        self.turns.lock().await.insert(key, turn);
        Ok(())
    }

    async fn list_turns(&self, verification_id: &str) -> Vec<ConversationTurn> {
        let turns = self.turns.lock().await;
        let mut matching: Vec<ConversationTurn> = turns
            .values()
            .filter(|t| t.verification_id == verification_id)
            .cloned()
            .collect();
        matching.sort_by_key(|t| t.turn_id);
        matching
    }

    async fn most_recent_result(
        &self,
        verification_id: &str,
    ) -> Result<VerificationResultRow, RecordStoreError> {
        let results = self.results.lock().await;
        results
            .values()
            .filter(|row| row.verification_id == verification_id)
            .max_by_key(|row| row.verification_at)
            .cloned()
            .ok_or_else(|| Self::not_found(verification_id, Utc::now()))
    }

    async fn finalize_result(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
        summary: serde_json::Value,
        reference_keys: Vec<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), RecordStoreError> {
        let mut results = self.results.lock().await;
        let row = results
            .get_mut(&(verification_id.to_string(), verification_at))
            .ok_or_else(|| Self::not_found(verification_id, verification_at))?;
        row.current_status = Status::ResultsFinalized;
        row.verification_status = summary
            .get("verificationStatus")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        row.summary = Some(summary);
        row.reference_keys = reference_keys;
        row.completed_at = Some(completed_at);
        Ok(())
    }

    async fn mark_conversation_completed(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
    ) -> Result<(), RecordStoreError> {
        let mut turns = self.turns.lock().await;
        for turn in turns.values_mut() {
            if turn.verification_id == verification_id && turn.conversation_at <= verification_at {
                turn.turn_status = vv_core::TurnStatus::Completed;
            }
        }
        Ok(())
    }

    async fn mark_conversation_failed(
        &self,
        verification_id: &str,
        _verification_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), RecordStoreError> {
        let mut turns = self.turns.lock().await;
        for turn in turns.values_mut() {
            if turn.verification_id == verification_id {
                turn.turn_status = vv_core::TurnStatus::FailedWorkflow;
                turn.response = Some(reason.to_string());
            }
        }
        Ok(())
    }

    async fn update_on_error(
        &self,
        verification_id: &str,
        verification_at: DateTime<Utc>,
        failure_status: Status,
        stage: &str,
        error_info: vv_error::WorkflowErrorDto,
    ) -> Result<(), RecordStoreError> {
        let mut results = self.results.lock().await;
        let row = results
            .get_mut(&(verification_id.to_string(), verification_at))
            .ok_or_else(|| Self::not_found(verification_id, verification_at))?;
        row.verification_status = "FAILED".to_string();
        row.current_status = failure_status;
        row.status_history.push(StatusHistoryEntry {
            status: failure_status,
            timestamp: error_info.timestamp,
            function_name: format!("ERROR_{stage}"),
            stage: stage.to_string(),
            metrics: Default::default(),
        });
        row.error_tracking.record(error_info);
        Ok(())
    }
}
