// SPDX-License-Identifier: MIT OR Apache-2.0
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::ErrorKind;
use vv_core::{build_key, validate_key, Category, Reference};

use crate::{StateStore, StateStoreError};

/// A [`StateStore`] that writes one file per object under a root directory,
/// mirroring the key layout directly onto the filesystem path.
///
/// Grounded on the same save/load-by-path shape as a receipt-style file
/// store: construct the path, create parent directories, and refuse to
/// overwrite an existing file.
pub struct FilesystemStateStore {
    root: PathBuf,
    bucket: String,
}

impl FilesystemStateStore {
    /// Root directory objects are stored under. Does not need to exist yet.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            bucket: "filesystem".to_string(),
        }
    }

    /// Override the bucket name reported in issued [`Reference`]s.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }
}

#[async_trait]
impl StateStore for FilesystemStateStore {
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

        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateStoreError::Backend(e.into()))?;
        }

        let mut open_opts = tokio::fs::OpenOptions::new();
        open_opts.write(true).create_new(true);
        match open_opts.open(&path).await {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(&bytes)
                    .await
                    .map_err(|e| StateStoreError::Backend(e.into()))?;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StateStoreError::AlreadyExists { key });
            }
            Err(e) => return Err(StateStoreError::Backend(e.into())),
        }

        Ok(Reference {
            bucket: self.bucket.clone(),
            key,
            size: bytes.len() as u64,
        })
    }

    async fn get(&self, reference: &Reference) -> Result<Vec<u8>, StateStoreError> {
        let path = self.root.join(&reference.key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StateStoreError::NotFound {
                key: reference.key.clone(),
            }),
            Err(e) => Err(StateStoreError::Backend(e.into())),
        }
    }
}
