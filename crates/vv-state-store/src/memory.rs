// SPDX-License-Identifier: MIT OR Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vv_core::{build_key, validate_key, Category, Reference};

use crate::{StateStore, StateStoreError};

const BUCKET: &str = "in-memory";

/// A [`StateStore`] backed by a process-local map. Used by unit tests and the
/// scripted integration scenarios; never persisted across runs.
#[derive(Default)]
pub struct InMemoryStateStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStateStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object at an arbitrary key, bypassing the date/verification
    /// partitioning `put` enforces.
    ///
    /// Models a source bucket populated by something outside this
    /// pipeline (an upload, a rasterization collaborator) that FetchImages
    /// then reads by the URL the request names — not an object this store
    /// itself produced, so it does not go through the normative key shape.
    pub fn seed(&self, key: impl Into<String>, bytes: Vec<u8>) {
        let mut objects = self.objects.lock().expect("state store mutex poisoned");
        objects.insert(key.into(), bytes);
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put(
        &self,
        verification_at: DateTime<Utc>,
        verification_id: &str,
        category: Category,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Reference, StateStoreError> {
        let key = build_key(verification_at, verification_id, category, filename);
        validate_key(&key, verification_id)?;

        let mut objects = self.objects.lock().expect("state store mutex poisoned");
        if objects.contains_key(&key) {
            return Err(StateStoreError::AlreadyExists { key });
        }
        let size = bytes.len() as u64;
        objects.insert(key.clone(), bytes);
        Ok(Reference {
            bucket: BUCKET.to_string(),
            key,
            size,
        })
    }

    async fn get(&self, reference: &Reference) -> Result<Vec<u8>, StateStoreError> {
        let objects = self.objects.lock().expect("state store mutex poisoned");
        objects
            .get(&reference.key)
            .cloned()
            .ok_or_else(|| StateStoreError::NotFound {
                key: reference.key.clone(),
            })
    }
}
