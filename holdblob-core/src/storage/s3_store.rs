use crate::error::{HoldError, Result};
use crate::storage::backend::{MultipartWriter, ObjectStore, validate_object_name};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore as RemoteObjectStore, PutPayload};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct S3StoreConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub allow_http: bool,
}

/// Object store backed by an S3 bucket.
pub struct S3ObjectStore {
    bucket: String,
    client: Arc<dyn RemoteObjectStore>,
}

impl S3ObjectStore {
    pub fn new(config: &S3StoreConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(HoldError::Config("s3 bucket cannot be empty".to_string()));
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http);

        if let Some(endpoint) = config.endpoint.as_deref() {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(access_key_id) = config.access_key_id.as_deref() {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret_access_key) = config.secret_access_key.as_deref() {
            builder = builder.with_secret_access_key(secret_access_key);
        }

        let client = builder
            .build()
            .map_err(|error| HoldError::Config(format!("invalid s3 config: {}", error)))?;

        Ok(Self {
            bucket: config.bucket.clone(),
            client: Arc::new(client),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn object_path(name: &str) -> Result<ObjectPath> {
    validate_object_name(name)?;
    Ok(ObjectPath::from(name))
}

fn map_remote_error(name: &str, error: object_store::Error) -> HoldError {
    match error {
        object_store::Error::NotFound { .. } => HoldError::ObjectNotFound(name.to_string()),
        other => HoldError::ObjectStore(other),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn is_available(&self) -> bool {
        match self.client.list_with_delimiter(None).await {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!("S3 bucket {} unavailable: {}", self.bucket, error);
                false
            }
        }
    }

    async fn size(&self, name: &str) -> Result<u64> {
        let meta = self
            .client
            .head(&object_path(name)?)
            .await
            .map_err(|error| map_remote_error(name, error))?;
        Ok(meta.size as u64)
    }

    async fn read_range(&self, name: &str, offset: u64, length: u64) -> Result<Bytes> {
        let path = object_path(name)?;
        if length == 0 {
            // Still surface a missing object as ObjectNotFound
            self.client
                .head(&path)
                .await
                .map_err(|error| map_remote_error(name, error))?;
            return Ok(Bytes::new());
        }

        let start = offset as usize;
        let end = offset.saturating_add(length) as usize;
        self.client
            .get_range(&path, start..end)
            .await
            .map_err(|error| map_remote_error(name, error))
    }

    async fn write_whole(&self, name: &str, data: Bytes) -> Result<()> {
        let len = data.len();
        self.client
            .put(&object_path(name)?, PutPayload::from(data))
            .await
            .map_err(|error| map_remote_error(name, error))?;

        tracing::debug!("Stored object {} ({} bytes) in bucket {}", name, len, self.bucket);
        Ok(())
    }

    async fn begin_multipart(&self, name: &str) -> Result<Box<dyn MultipartWriter>> {
        let upload = self
            .client
            .put_multipart(&object_path(name)?)
            .await
            .map_err(|error| map_remote_error(name, error))?;

        Ok(Box::new(S3MultipartWriter {
            name: name.to_string(),
            upload,
        }))
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let from = object_path(old_name)?;
        let to = object_path(new_name)?;
        self.client
            .rename(&from, &to)
            .await
            .map_err(|error| map_remote_error(old_name, error))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.client.delete(&object_path(name)?).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(error) => Err(HoldError::ObjectStore(error)),
        }
    }

    async fn list_objects(&self) -> Result<Vec<String>> {
        let metas: Vec<_> = self.client.list(None).try_collect().await?;
        Ok(metas
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect())
    }
}

struct S3MultipartWriter {
    name: String,
    upload: Box<dyn MultipartUpload>,
}

#[async_trait]
impl MultipartWriter for S3MultipartWriter {
    async fn add_part(&mut self, data: Bytes) -> Result<()> {
        self.upload
            .put_part(PutPayload::from(data))
            .await
            .map_err(|error| map_remote_error(&self.name, error))
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        let mut writer = *self;
        writer
            .upload
            .complete()
            .await
            .map_err(|error| map_remote_error(&writer.name, error))?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let mut writer = *self;
        writer
            .upload
            .abort()
            .await
            .map_err(|error| map_remote_error(&writer.name, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_store_requires_bucket() {
        let config = S3StoreConfig {
            region: "us-east-1".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            S3ObjectStore::new(&config),
            Err(HoldError::Config(_))
        ));
    }

    #[test]
    fn test_s3_store_builds_without_network() {
        let config = S3StoreConfig {
            bucket: "holdblob-test".to_string(),
            region: "us-east-1".to_string(),
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
            allow_http: true,
        };
        let store = S3ObjectStore::new(&config).unwrap();
        assert_eq!(store.bucket(), "holdblob-test");
    }

    #[test]
    fn test_object_path_validation() {
        assert_eq!(object_path("abc/01").unwrap().to_string(), "abc/01");
        assert!(object_path("../x").is_err());
    }
}
