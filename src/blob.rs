use std::collections::BTreeMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::record::RecordKey;
use crate::Result;

/// Prefix under which every document object is stored.
pub const OBJECT_PREFIX: &str = "records";
/// Number of hex characters of the content hash kept in object keys.
const FINGERPRINT_LEN: usize = 8;

/// Object storage for fetched documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Stores `bytes` at `key` and returns the locator of the stored object.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String>;

    /// Locator of an object already present at `key`.
    fn locator(&self, key: &str) -> String;
}

/// Short content hash. Only used to keep object keys of distinct documents apart.
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(bytes));
    digest[..FINGERPRINT_LEN].to_string()
}

/// `records/{year}/{sanitizedKey}_{fingerprint}.pdf`
pub fn object_key(key: &RecordKey, fingerprint: &str) -> String {
    format!(
        "{OBJECT_PREFIX}/{}/{}_{fingerprint}.pdf",
        key.year(),
        key.sanitized()
    )
}

/// Stand-in store for dry runs: nothing exists, nothing is written, and locators
/// are the ones a real upload would have produced.
#[derive(Debug, Clone)]
pub struct DryRunBlobStore {
    bucket: String,
}

impl DryRunBlobStore {
    pub fn new(bucket: Option<&str>) -> Self {
        Self {
            bucket: bucket.unwrap_or("dry-run-bucket").to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for DryRunBlobStore {
    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
        _metadata: &BTreeMap<String, String>,
    ) -> Result<String> {
        info!(key, size = bytes.len(), "[dry-run] simulated upload");
        Ok(self.locator(key))
    }

    fn locator(&self, key: &str) -> String {
        format!("s3://{}/{key}", self.bucket)
    }
}
