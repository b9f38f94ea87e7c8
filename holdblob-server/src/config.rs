use holdblob_core::protocol::{
    MULTIPART_MIN_PART_SIZE, TRANSPORT_CHUNK_SIZE_LIMIT, TRANSPORT_FRAMING_OVERHEAD,
};
use holdblob_core::{HoldError, ObjectStoreBuilder, Result, S3StoreConfig, TransportLimits};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub metadata: MetadataConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub gc: GcConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

fn default_bind_addr() -> String {
    "0.0.0.0:50053".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub db_path: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("holdblob-data/metadata.db"),
        }
    }
}

/// Object store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local: Option<LocalStorageConfig>,
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::S3 => "s3",
            StorageBackend::Local => "local",
            StorageBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_chunk_size_limit")]
    pub chunk_size_limit: usize,
    #[serde(default = "default_framing_overhead")]
    pub framing_overhead: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size_limit: default_chunk_size_limit(),
            framing_overhead: default_framing_overhead(),
        }
    }
}

fn default_chunk_size_limit() -> usize {
    TRANSPORT_CHUNK_SIZE_LIMIT
}

fn default_framing_overhead() -> usize {
    TRANSPORT_FRAMING_OVERHEAD
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_min_part_size")]
    pub min_part_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            min_part_size: default_min_part_size(),
        }
    }
}

fn default_min_part_size() -> usize {
    MULTIPART_MIN_PART_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    #[serde(default = "default_gc_enabled")]
    pub enabled: bool,
    #[serde(default = "default_gc_interval_secs")]
    pub interval_secs: u64,
    /// Falls back to the sweep interval.
    #[serde(default)]
    pub grace_period_secs: Option<u64>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: default_gc_enabled(),
            interval_secs: default_gc_interval_secs(),
            grace_period_secs: None,
        }
    }
}

impl GcConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs.unwrap_or(self.interval_secs))
    }
}

fn default_gc_enabled() -> bool {
    true
}

fn default_gc_interval_secs() -> u64 {
    60 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent_calls(),
        }
    }
}

fn default_max_concurrent_calls() -> usize {
    64
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("HOLDBLOB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| HoldError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| HoldError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transport.chunk_size_limit <= self.transport.framing_overhead {
            return Err(HoldError::Config(format!(
                "transport.chunk_size_limit ({}) must exceed transport.framing_overhead ({})",
                self.transport.chunk_size_limit, self.transport.framing_overhead
            )));
        }
        if self.upload.min_part_size == 0 {
            return Err(HoldError::Config(
                "upload.min_part_size must be positive".to_string(),
            ));
        }
        if self.gc.interval_secs == 0 {
            return Err(HoldError::Config(
                "gc.interval_secs must be positive".to_string(),
            ));
        }
        if self.workers.max_concurrent_calls == 0 {
            return Err(HoldError::Config(
                "workers.max_concurrent_calls must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn transport_limits(&self) -> TransportLimits {
        TransportLimits {
            chunk_size_limit: self.transport.chunk_size_limit,
            framing_overhead: self.transport.framing_overhead,
            min_part_size: self.upload.min_part_size,
        }
    }

    pub fn object_store_builder(&self) -> ObjectStoreBuilder {
        let mut builder = ObjectStoreBuilder::new().backend(self.storage.backend.as_str());

        if let Some(local) = &self.storage.local {
            builder = builder.local_root(local.root.clone());
        }
        if let Some(s3) = &self.storage.s3 {
            builder = builder.s3(S3StoreConfig {
                bucket: s3.bucket.clone(),
                region: s3.region.clone(),
                endpoint: s3.endpoint.clone(),
                access_key_id: s3.access_key_id.clone(),
                secret_access_key: s3.secret_access_key.clone(),
                allow_http: s3.allow_http,
            });
        }

        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> (tempfile::TempDir, String) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("holdblob.yaml");
        std::fs::write(&path, contents).unwrap();
        let path = path.to_string_lossy().to_string();
        (temp_dir, path)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let (_temp_dir, path) = write_config("storage:\n  backend: memory\n");
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:50053");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.transport_limits().download_chunk_size(), 4 * 1024 * 1024 - 5);
        assert_eq!(config.gc.grace_period(), config.gc.interval());
        assert!(config.gc.enabled);
        config.object_store_builder().build().unwrap();
    }

    #[test]
    fn test_full_config() {
        let (_temp_dir, path) = write_config(
            r#"
bind_addr: "127.0.0.1:9000"
metadata:
  db_path: /var/lib/holdblob/meta.db
storage:
  backend: s3
  s3:
    bucket: blobs
    endpoint: "http://127.0.0.1:9001"
    allow_http: true
upload:
  min_part_size: 8388608
gc:
  interval_secs: 600
  grace_period_secs: 1800
workers:
  max_concurrent_calls: 8
"#,
        );
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.storage.backend, StorageBackend::S3);
        let s3 = config.storage.s3.as_ref().unwrap();
        assert_eq!(s3.region, "us-east-1");
        assert!(s3.allow_http);
        assert_eq!(config.transport_limits().min_part_size, 8 * 1024 * 1024);
        assert_eq!(config.gc.grace_period(), Duration::from_secs(1800));
        assert_eq!(config.workers.max_concurrent_calls, 8);
    }

    #[test]
    fn test_rejects_invalid_limits() {
        let (_temp_dir, path) = write_config(
            "storage:\n  backend: memory\ntransport:\n  chunk_size_limit: 4\n  framing_overhead: 5\n",
        );
        assert!(matches!(Config::from_file(&path), Err(HoldError::Config(_))));
    }
}
