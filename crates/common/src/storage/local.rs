//! Local filesystem object store.
//!
//! Objects live under a root directory. Signed URLs point back at the
//! gateway's `/v1/files/{key}` route:
//!
//! ```text
//! {public_base}/v1/files/{key}?expires={unix}&filename={name}&signature={hex}
//! ```
//!
//! where `signature = hex(hmac_sha256(secret, key \n expires \n filename))`.

use super::{sanitize_segment, validate_key, ObjectStore, SignedUrl};
use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub struct LocalStore {
    root: PathBuf,
    public_base_url: String,
    secret: String,
}

impl LocalStore {
    pub fn new(root: &Path, public_base_url: &str, secret: String) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| AppError::Configuration {
            message: format!("Cannot create storage root {}: {}", root.display(), e),
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            secret,
        })
    }

    /// Build from `storage.*`; a missing secret gets a random per-process one
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let secret = match &config.signing_secret {
            Some(secret) if !secret.is_empty() => secret.clone(),
            _ => {
                warn!("storage.signing_secret not set; download links will not survive a restart");
                Uuid::new_v4().simple().to_string()
            }
        };
        let store = Self::new(&config.local_root, &config.public_base_url, secret)?;
        info!(root = %config.local_root.display(), "Using local object store");
        Ok(store)
    }

    /// Filesystem path of a key
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn mac(&self, key: &str, expires: i64, filename: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|e| AppError::Internal {
            message: format!("Invalid signing secret: {}", e),
        })?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac.update(b"\n");
        mac.update(filename.as_bytes());
        Ok(mac)
    }

    fn signature(&self, key: &str, expires: i64, filename: &str) -> Result<String> {
        let mac = self.mac(key, expires, filename)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a signed URL's parameters against the current time
    pub fn verify(&self, key: &str, expires: i64, filename: &str, signature: &str) -> Result<()> {
        self.verify_at(key, expires, filename, signature, Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        key: &str,
        expires: i64,
        filename: &str,
        signature: &str,
        now: i64,
    ) -> Result<()> {
        validate_key(key)?;

        let invalid = || AppError::Unauthorized {
            message: "Invalid download signature".to_string(),
        };
        let provided = hex::decode(signature).map_err(|_| invalid())?;
        self.mac(key, expires, filename)?
            .verify_slice(&provided)
            .map_err(|_| invalid())?;

        if now > expires {
            return Err(AppError::Unauthorized {
                message: "Download link has expired".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn put_file(&self, key: &str, path: &Path, _content_type: &str) -> Result<()> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| AppError::Storage {
                message: format!("Failed to create {}: {}", parent.display(), e),
            })?;
        }

        tokio::fs::copy(path, &dest).await.map_err(|e| AppError::Storage {
            message: format!("Failed to store {}: {}", key, e),
        })?;

        debug!(key, "Object stored");
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::ObjectNotFound { key: key.to_string() })
            }
            Err(e) => Err(AppError::Storage {
                message: format!("Failed to read {}: {}", key, e),
            }),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path).await.map_err(|e| AppError::Storage {
            message: format!("Failed to stat {}: {}", key, e),
        })
    }

    async fn presign_get(&self, key: &str, ttl: Duration, download_name: &str) -> Result<SignedUrl> {
        validate_key(key)?;

        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);
        let filename = sanitize_segment(download_name);
        let signature = self.signature(key, expires, &filename)?;

        let expires_at = Utc
            .timestamp_opt(expires, 0)
            .single()
            .ok_or_else(|| AppError::Internal {
                message: format!("Expiry {} out of range", expires),
            })?;

        Ok(SignedUrl {
            url: format!(
                "{}/v1/files/{}?expires={}&filename={}&signature={}",
                self.public_base_url, key, expires, filename, signature
            ),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn store(dir: &Path) -> LocalStore {
        LocalStore::new(dir, "http://localhost:8080/", "secret".to_string()).unwrap()
    }

    fn query_params(url: &str) -> HashMap<String, String> {
        url.split_once('?')
            .map(|(_, q)| q)
            .unwrap_or_default()
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_put_exists_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let source = dir.path().join("upload.bin");
        std::fs::write(&source, b"deck bytes").unwrap();

        assert!(!store.exists("decks/u/1/deck.pptx").await.unwrap());
        store
            .put_file("decks/u/1/deck.pptx", &source, "application/octet-stream")
            .await
            .unwrap();
        assert!(store.exists("decks/u/1/deck.pptx").await.unwrap());
        assert_eq!(store.get_bytes("decks/u/1/deck.pptx").await.unwrap(), b"deck bytes");

        let missing = store.get_bytes("decks/u/2/deck.pptx").await.unwrap_err();
        assert!(matches!(missing, AppError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.exists("../outside").await.is_err());
        assert!(store.path_for("a/../../b").is_err());
    }

    #[tokio::test]
    async fn test_signed_url_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let signed = store
            .presign_get("reports/u/1/report.pdf", Duration::from_secs(600), "My Deck-analysis.pdf")
            .await
            .unwrap();
        assert!(signed
            .url
            .starts_with("http://localhost:8080/v1/files/reports/u/1/report.pdf?"));

        let params = query_params(&signed.url);
        let expires: i64 = params["expires"].parse().unwrap();
        assert_eq!(params["filename"], "My_Deck-analysis.pdf");
        assert_eq!(expires, signed.expires_at.timestamp());

        store
            .verify("reports/u/1/report.pdf", expires, &params["filename"], &params["signature"])
            .unwrap();

        // Tampering with any signed parameter invalidates the link
        assert!(store
            .verify("reports/u/2/report.pdf", expires, &params["filename"], &params["signature"])
            .is_err());
        assert!(store
            .verify("reports/u/1/report.pdf", expires + 60, &params["filename"], &params["signature"])
            .is_err());
        assert!(store
            .verify("reports/u/1/report.pdf", expires, "other.pdf", &params["signature"])
            .is_err());
    }

    #[test]
    fn test_expired_signature_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let signature = store.signature("reports/a.pdf", 1_000, "a.pdf").unwrap();
        assert!(store.verify_at("reports/a.pdf", 1_000, "a.pdf", &signature, 999).is_ok());
        assert!(store.verify_at("reports/a.pdf", 1_000, "a.pdf", &signature, 1_001).is_err());
    }

    #[test]
    fn test_different_secret_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = store(dir.path());
        let b = LocalStore::new(dir.path(), "http://x", "other".to_string()).unwrap();

        let signature = a.signature("k/a.pdf", i64::MAX, "a.pdf").unwrap();
        assert!(b.verify("k/a.pdf", i64::MAX, "a.pdf", &signature).is_err());
    }

    #[test]
    fn test_signature_is_hmac_of_signed_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"reports/a.pdf\n1000\na.pdf");
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(store.signature("reports/a.pdf", 1_000, "a.pdf").unwrap(), expected);
    }

    #[test]
    fn test_extended_or_malformed_signature_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let signature = store.signature("reports/a.pdf", 1_000, "a.pdf").unwrap();

        // Appending to the last signed field must not keep the signature valid
        let padded = format!("a.pdf{}x.pdf", "\u{80}");
        assert!(store.verify_at("reports/a.pdf", 1_000, &padded, &signature, 0).is_err());
        assert!(store.verify_at("reports/a.pdf", 1_000, "a.pdfx", &signature, 0).is_err());

        assert!(store.verify_at("reports/a.pdf", 1_000, "a.pdf", "not-hex", 0).is_err());
        assert!(store.verify_at("reports/a.pdf", 1_000, "a.pdf", &signature[..32], 0).is_err());
        assert!(store.verify_at("reports/a.pdf", 1_000, "a.pdf", &signature, 0).is_ok());
    }
}
