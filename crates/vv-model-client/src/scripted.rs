// SPDX-License-Identifier: MIT OR Apache-2.0
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{ConverseRequest, ConverseResponse, ModelClient, ModelClientError};

/// An in-memory [`ModelClient`] double that replays scripted responses (or
/// injected failures) in order. Backs the test suite and the CLI's local
/// mode so a run never needs real network access.
#[derive(Default)]
pub struct ScriptedModelClient {
    script: Mutex<VecDeque<Result<ConverseResponse, ModelClientError>>>,
}

impl ScriptedModelClient {
    /// Construct a client with no scripted calls queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for the next `converse` call.
    pub fn push_response(&self, response: ConverseResponse) {
        self.script.lock().expect("scripted client mutex poisoned").push_back(Ok(response));
    }

    /// Queue a failure for the next `converse` call.
    pub fn push_failure(&self, error: ModelClientError) {
        self.script.lock().expect("scripted client mutex poisoned").push_back(Err(error));
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn converse(&self, _request: ConverseRequest) -> Result<ConverseResponse, ModelClientError> {
        self.script
            .lock()
            .expect("scripted client mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(ModelClientError::new("scripted client has no queued response")))
    }
}
