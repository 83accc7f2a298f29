// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The content-addressed object store (§4.2).
//!
//! `StateStore` is the trait every orchestrator step programs against;
//! [`FilesystemStateStore`] is the implementation used by the CLI and the
//! integration tests, storing one file per object under a root directory
//! with the normative `{yyyy}/{mm}/{dd}/{verificationId}/{category}/{filename}`
//! layout (§9 open question 2: the rasterization service's alternate key
//! shape is out of scope; this store only ever produces the shape above).

mod filesystem;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vv_core::{Category, Reference};

pub use filesystem::FilesystemStateStore;
pub use memory::InMemoryStateStore;

/// Errors a [`StateStore`] implementation can raise.
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    /// The constructed key failed [`vv_core::validate_key`].
    #[error(transparent)]
    InvalidKey(#[from] vv_core::KeyError),
    /// An object already exists at the target key (write-once, invariant 4).
    #[error("object already exists at key {key}")]
    AlreadyExists {
        /// The colliding key.
        key: String,
    },
    /// No object exists at the requested key.
    #[error("no object at key {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },
    /// The stored bytes could not be deserialized as JSON.
    #[error("object at key {key} is not valid JSON: {source}")]
    Deserialize {
        /// The offending key.
        key: String,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// The underlying storage medium failed (disk I/O, network, ...).
    #[error("state store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl From<StateStoreError> for vv_error::WorkflowError {
    fn from(err: StateStoreError) -> Self {
        let code = match &err {
            StateStoreError::NotFound { .. } => vv_error::ErrorCode::NotFound,
            StateStoreError::InvalidKey(_) | StateStoreError::AlreadyExists { .. } => {
                vv_error::ErrorCode::InvalidInput
            }
            StateStoreError::Deserialize { .. } => vv_error::ErrorCode::InvalidInput,
            StateStoreError::Backend(_) => vv_error::ErrorCode::Internal,
        };
        vv_error::WorkflowError::new(code, err.to_string())
            .with_component("StateStore")
    }
}

/// Put/get over raw bytes and JSON values, partitioned by date and
/// verification id (§4.2).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store raw bytes under `(verification_at, verification_id, category, filename)`.
    ///
    /// Returns a [`Reference`] suitable for embedding in an [`vv_core::Envelope`].
    /// Fails with [`StateStoreError::AlreadyExists`] if the key is already
    /// occupied (the store is write-once per key).
    async fn put(
        &self,
        verification_at: DateTime<Utc>,
        verification_id: &str,
        category: Category,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Reference, StateStoreError>;

    /// Fetch the raw bytes behind a previously issued [`Reference`].
    async fn get(&self, reference: &Reference) -> Result<Vec<u8>, StateStoreError>;

    /// Attach an already-fetched blob under a new `(category, filename)`,
    /// bumping an [`vv_core::Envelope`]'s reference map in the same call
    /// (§4.2 `attach`). Returns the same [`Reference`] `put` would have
    /// returned.
    async fn attach(
        &self,
        verification_at: DateTime<Utc>,
        verification_id: &str,
        category: Category,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Reference, StateStoreError> {
        self.put(verification_at, verification_id, category, filename, bytes)
            .await
    }
}

/// JSON convenience wrappers over [`StateStore::put`]/[`StateStore::get`].
///
/// Split out from [`StateStore`] because the generic methods here would
/// otherwise make the trait unusable as `dyn StateStore` (the callers in
/// `vv-runtime` hold the store behind `Arc<dyn StateStore>`). Blanket-
/// implemented for every `StateStore`, including trait objects.
#[async_trait]
pub trait StateStoreJson: StateStore {
    /// Convenience wrapper over [`StateStore::put`] that serializes `value` as JSON.
    async fn put_json<T>(
        &self,
        verification_at: DateTime<Utc>,
        verification_id: &str,
        category: Category,
        filename: &str,
        value: &T,
    ) -> Result<Reference, StateStoreError>
    where
        T: serde::Serialize + Sync,
    {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StateStoreError::Deserialize {
            key: filename.to_string(),
            source,
        })?;
        self.put(verification_at, verification_id, category, filename, bytes)
            .await
    }

    /// Convenience wrapper over [`StateStore::get`] that deserializes as JSON.
    async fn get_json<T>(&self, reference: &Reference) -> Result<T, StateStoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        let bytes = self.get(reference).await?;
        serde_json::from_slice(&bytes).map_err(|source| StateStoreError::Deserialize {
            key: reference.key.clone(),
            source,
        })
    }
}

impl<S: StateStore + ?Sized> StateStoreJson for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use vv_core::Category;

    async fn roundtrip(store: &dyn StateStore) {
        let at = Utc::now();
        let reference = store
            .put(at, "verif-x", Category::Images, "metadata", b"hello".to_vec())
            .await
            .unwrap();
        let back = store.get(&reference).await.unwrap();
        assert_eq!(back, b"hello");
    }

    #[tokio::test]
    async fn in_memory_roundtrips() {
        roundtrip(&InMemoryStateStore::new()).await;
    }

    #[tokio::test]
    async fn filesystem_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        roundtrip(&FilesystemStateStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn put_rejects_duplicate_key() {
        let store = InMemoryStateStore::new();
        let at = Utc::now();
        store
            .put(at, "verif-x", Category::Images, "metadata", b"a".to_vec())
            .await
            .unwrap();
        let err = store
            .put(at, "verif-x", Category::Images, "metadata", b"b".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StateStoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn get_missing_reference_is_not_found() {
        let store = InMemoryStateStore::new();
        let missing = Reference {
            bucket: "b".into(),
            key: "2024/01/15/verif-x/images/missing".into(),
            size: 0,
        };
        let err = store.get(&missing).await.unwrap_err();
        assert!(matches!(err, StateStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn put_json_get_json_roundtrip() {
        let store = InMemoryStateStore::new();
        let at = Utc::now();
        let value = vv_core::EnhancedImageMetadata {
            reference: sample_image(),
            checking: sample_image(),
        };
        let reference = store
            .put_json(at, "verif-x", Category::Images, "metadata", &value)
            .await
            .unwrap();
        let back: vv_core::EnhancedImageMetadata = store.get_json(&reference).await.unwrap();
        assert_eq!(back.reference.source_url, value.reference.source_url);
    }

    fn sample_image() -> vv_core::ImageData {
        vv_core::ImageData {
            source_url: "s3://b/k.png".into(),
            source_bucket: "b".into(),
            source_key: "k.png".into(),
            content_type: "image/png".into(),
            size_bytes: 10,
            width: 1,
            height: 1,
            format: vv_core::ImageFormat::Png,
            encoded_size_bytes: 14,
            base64_reference: Reference {
                bucket: "b".into(),
                key: "k".into(),
                size: 14,
            },
            validation: vv_core::ImageValidation::default(),
        }
    }
}
