//! Object storage gateway
//!
//! Provides:
//! - The `ObjectStore` contract used for decks and rendered reports
//! - S3 (and S3-compatible) backend
//! - Local filesystem backend with signed download URLs
//! - Object key construction

mod local;
mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// MIME type of rendered reports
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A time-limited, credential-free download URL
#[derive(Debug, Clone)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Durable storage for deck uploads and rendered reports
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Upload a local file under `key`, replacing any existing object
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()>;

    /// Fetch a whole object
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>>;

    /// HEAD check
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Issue a GET URL valid for `ttl` that downloads as `download_name`
    async fn presign_get(&self, key: &str, ttl: Duration, download_name: &str) -> Result<SignedUrl>;
}

/// Build the store selected by `storage.backend`
pub async fn create_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend.as_str() {
        "s3" => {
            let store = S3Store::from_config(config).await?;
            info!(bucket = %store.bucket(), "Using S3 object store");
            Ok(Arc::new(store))
        }
        "local" => Ok(Arc::new(LocalStore::from_config(config)?)),
        other => Err(AppError::Configuration {
            message: format!("Unknown storage backend '{}'", other),
        }),
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` so a value is safe as one key segment
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(120)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Key of an uploaded deck
pub fn deck_key(owner_id: &str, job_id: Uuid, file_name: &str) -> String {
    format!(
        "decks/{}/{}/{}",
        sanitize_segment(owner_id),
        job_id,
        sanitize_segment(file_name)
    )
}

/// Key of a rendered report
pub fn report_key(owner_id: &str, job_id: Uuid) -> String {
    format!("reports/{}/{}/report.pdf", sanitize_segment(owner_id), job_id)
}

/// Validate a key: relative, `/`-separated, no empty, `.` or `..` segments,
/// and only characters produced by [`sanitize_segment`]
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let invalid = || AppError::Validation {
        message: format!("Invalid object key '{}'", key),
        field: Some("key".to_string()),
    };

    if key.is_empty() || key.starts_with('/') {
        return Err(invalid());
    }

    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(invalid());
        }
    }

    Ok(())
}
