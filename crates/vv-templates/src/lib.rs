// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The versioned template loader and renderer (§4.5).
//!
//! Templates are discovered by `(type, version)`. A directory backend reads
//! `{TEMPLATE_BASE_PATH}/{type}/{version}.txt`; the built-in set (embedded
//! via `include_str!`, see [`builtin`]) is used whenever the directory
//! backend has nothing for that pair, so the pipeline renders prompts out of
//! the box.

pub mod builtin;
mod cache;
mod renderer;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;
use tokio::sync::RwLock;

pub use cache::{EvictionPolicy, TemplateCache};
pub use renderer::render;

/// The six template types the core uses, closed per §4.5.
pub const KNOWN_TYPES: &[&str] = builtin::ALL_TYPES;

/// Errors a [`TemplateLoader`] can raise.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// No template exists for the requested `(type, version)` pair, in
    /// either the directory backend or the built-in set.
    #[error("no template for type {kind} version {version}")]
    NotFound {
        /// The requested template type.
        kind: String,
        /// The requested version.
        version: String,
    },
    /// The template body could not be tokenized.
    #[error("template parse error: {0}")]
    Parse(String),
    /// A helper invocation failed at render time.
    #[error("template execution error: {0}")]
    Execution(String),
    /// The rendered output failed a structural check (reserved for future use).
    #[error("template validation error: {0}")]
    Validation(String),
    /// The loader itself was misconfigured (e.g. an unreadable base path).
    #[error("template configuration error: {0}")]
    Configuration(String),
}

impl From<TemplateError> for vv_error::WorkflowError {
    fn from(err: TemplateError) -> Self {
        let code = match &err {
            TemplateError::NotFound { .. } => vv_error::ErrorCode::NotFound,
            TemplateError::Configuration(_) => vv_error::ErrorCode::ConfigurationInvalid,
            _ => vv_error::ErrorCode::PromptPreparationFailed,
        };
        vv_error::WorkflowError::new(code, err.to_string()).with_component("TemplateLoader")
    }
}

/// Loads and renders templates by `(type, version)`, optionally backed by a
/// directory on disk and always falling back to the built-in set.
pub struct TemplateLoader {
    base_path: Option<PathBuf>,
    cache: Option<RwLock<TemplateCache>>,
}

impl TemplateLoader {
    /// A loader with no directory backend: only the built-in set is used.
    #[must_use]
    pub fn builtin_only() -> Self {
        Self {
            base_path: None,
            cache: None,
        }
    }

    /// A loader that prefers `base_path` and falls back to the built-in set.
    #[must_use]
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: Some(base_path.into()),
            cache: None,
        }
    }

    /// Enable a cache with the given eviction policy and capacity.
    #[must_use]
    pub fn with_cache(mut self, policy: EvictionPolicy, capacity: usize) -> Self {
        self.cache = Some(RwLock::new(TemplateCache::new(policy, capacity)));
        self
    }

    /// Load the raw template body for `(kind, version)`: directory backend
    /// first, then the cache, then the built-in set.
    pub async fn load(&self, kind: &str, version: &str) -> Result<String, TemplateError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.write().await.get(kind, version) {
                return Ok(hit);
            }
        }

        let body = self.load_uncached(kind, version).await?;

        if let Some(cache) = &self.cache {
            cache.write().await.put(kind, version, body.clone());
        }
        Ok(body)
    }

    async fn load_uncached(&self, kind: &str, version: &str) -> Result<String, TemplateError> {
        if let Some(base_path) = &self.base_path {
            let path = base_path.join(kind).join(format!("{version}.txt"));
            match tokio::fs::read_to_string(&path).await {
                Ok(body) => return Ok(body),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(TemplateError::Configuration(format!(
                        "failed to read {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        builtin::lookup(kind, version)
            .map(str::to_string)
            .ok_or_else(|| TemplateError::NotFound {
                kind: kind.to_string(),
                version: version.to_string(),
            })
    }

    /// Load the latest (`"v1"`) version of `kind` and render it against `context`.
    pub async fn render_latest(
        &self,
        kind: &str,
        context: &BTreeMap<String, Value>,
    ) -> Result<String, TemplateError> {
        let body = self.load(kind, "v1").await?;
        render(&body, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> BTreeMap<String, Value> {
        let mut ctx = BTreeMap::new();
        ctx.insert("vendingMachineId".to_string(), json!("VM-1"));
        ctx.insert("layoutId".to_string(), json!("12345"));
        ctx
    }

    #[tokio::test]
    async fn builtin_only_renders_known_type() {
        let loader = TemplateLoader::builtin_only();
        let rendered = loader
            .render_latest("systemPrompt-layoutVsChecking", &ctx())
            .await
            .unwrap();
        assert!(rendered.contains("VM-1"));
        assert!(rendered.contains("12345"));
    }

    #[tokio::test]
    async fn unknown_type_is_not_found() {
        let loader = TemplateLoader::builtin_only();
        let err = loader.load("not-a-type", "v1").await.unwrap_err();
        assert!(matches!(err, TemplateError::NotFound { .. }));
    }

    #[tokio::test]
    async fn directory_backend_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let type_dir = dir.path().join("turn1-layoutVsChecking");
        tokio::fs::create_dir_all(&type_dir).await.unwrap();
        tokio::fs::write(type_dir.join("v1.txt"), "custom body {{layoutId}}")
            .await
            .unwrap();

        let loader = TemplateLoader::with_base_path(dir.path());
        let rendered = loader
            .render_latest("turn1-layoutVsChecking", &ctx())
            .await
            .unwrap();
        assert_eq!(rendered, "custom body 12345");
    }

    #[tokio::test]
    async fn directory_backend_falls_back_to_builtin_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let loader = TemplateLoader::with_base_path(dir.path());
        let rendered = loader
            .render_latest("systemPrompt-layoutVsChecking", &ctx())
            .await
            .unwrap();
        assert!(rendered.contains("VM-1"));
    }

    #[tokio::test]
    async fn cache_serves_repeated_loads() {
        let loader = TemplateLoader::builtin_only().with_cache(EvictionPolicy::Lru, 4);
        let first = loader.load("systemPrompt-layoutVsChecking", "v1").await.unwrap();
        let second = loader.load("systemPrompt-layoutVsChecking", "v1").await.unwrap();
        assert_eq!(first, second);
    }
}
