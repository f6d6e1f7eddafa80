//! S3 object store

use super::{validate_key, ObjectStore, SignedUrl};
use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// S3 (or S3-compatible) bucket
pub struct S3Store {
    client: S3Client,
    bucket: String,
}

impl S3Store {
    /// Create a client from the ambient AWS configuration plus `storage.*` overrides
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "storage.bucket is required for the s3 backend".to_string(),
            })?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(ref region) = config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let aws_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(ref endpoint) = config.endpoint {
            // MinIO and most S3-compatible servers need path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::with_client(S3Client::from_conf(builder.build()), bucket))
    }

    /// Create with an existing client
    pub fn with_client(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        validate_key(key)?;

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to read {} for upload: {}", path.display(), e),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to upload {}: {}", key, e),
            })?;

        debug!(key, bucket = %self.bucket, "Object uploaded");
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    AppError::ObjectNotFound { key: key.to_string() }
                } else {
                    AppError::Storage {
                        message: format!("Failed to fetch {}: {}", key, e),
                    }
                }
            })?;

        let data = output.body.collect().await.map_err(|e| AppError::Storage {
            message: format!("Failed to read body of {}: {}", key, e),
        })?;

        Ok(data.into_bytes().to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) => {
                Ok(false)
            }
            Err(e) => Err(AppError::Storage {
                message: format!("HEAD {} failed: {}", key, e),
            }),
        }
    }

    async fn presign_get(&self, key: &str, ttl: Duration, download_name: &str) -> Result<SignedUrl> {
        validate_key(key)?;

        let presigning = PresigningConfig::expires_in(ttl).map_err(|e| AppError::Storage {
            message: format!("Invalid presign expiry: {}", e),
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .response_content_disposition(format!("attachment; filename=\"{}\"", download_name))
            .presigned(presigning)
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to presign {}: {}", key, e),
            })?;

        let ttl = chrono::Duration::from_std(ttl).map_err(|e| AppError::Internal {
            message: format!("Presign expiry out of range: {}", e),
        })?;

        Ok(SignedUrl {
            url: request.uri().to_string(),
            expires_at: chrono::Utc::now() + ttl,
        })
    }
}
