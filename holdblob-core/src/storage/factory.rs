use super::{LocalObjectStore, MemoryObjectStore, ObjectStore, S3ObjectStore, S3StoreConfig};
use crate::{HoldError, Result};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ObjectStoreBuilder {
    backend: Option<String>,
    local_root: Option<PathBuf>,
    s3: Option<S3StoreConfig>,
}

impl ObjectStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn local_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.local_root = Some(root.into());
        self
    }

    pub fn s3(mut self, config: S3StoreConfig) -> Self {
        self.s3 = Some(config);
        self
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(HoldError::Config(
                "storage backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    pub fn build(&self) -> Result<Arc<dyn ObjectStore>> {
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "s3" => {
                let config = self.s3.as_ref().ok_or_else(|| {
                    HoldError::Config("s3 settings are required for s3 backend".to_string())
                })?;

                let store = S3ObjectStore::new(config)?;
                tracing::info!("Using S3 object store bucket={}", store.bucket());
                Ok(Arc::new(store))
            }
            "local" => {
                let root = self.local_root.clone().ok_or_else(|| {
                    HoldError::Config("local root is required for local backend".to_string())
                })?;

                if root.as_os_str().is_empty() {
                    return Err(HoldError::Config(
                        "local root cannot be empty for local backend".to_string(),
                    ));
                }

                tracing::info!("Using local object store root={}", root.display());
                let store = LocalObjectStore::new(root)?;
                Ok(Arc::new(store))
            }
            "memory" => {
                tracing::warn!("Using in-memory object store; blobs are lost on exit");
                Ok(Arc::new(MemoryObjectStore::new()))
            }
            other => Err(HoldError::Config(format!(
                "unsupported storage backend '{}': expected s3 | local | memory",
                other
            ))),
        }
    }
}
