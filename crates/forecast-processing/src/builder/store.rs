//! Object stores the data builder downloads extracts from.
//!
//! The manifest names objects by bucket and key. [`LocalObjectStore`] maps
//! them onto a directory tree, [`HttpObjectStore`] onto an HTTP endpoint and
//! [`MemoryObjectStore`] keeps them in memory.

use crate::error::{ProcessingError, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

static S3_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^s3://([a-z0-9][a-z0-9.\-]{1,61}[a-z0-9])/(.+)$").expect("Invalid regex: s3 uri"));

/// Split an `s3://bucket/key` URI into bucket and key.
pub fn parse_s3_uri(uri: &str) -> Option<(String, String)> {
    S3_URI
        .captures(uri.trim())
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

/// Source of raw extract bytes.
pub trait ObjectStore: Send + Sync {
    /// Fetch the full contents of `bucket/key`.
    fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Reads objects from `{root}/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an object to a path, refusing keys that climb out of the root.
    pub fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(ProcessingError::FetchFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: "key resolves outside the store root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(bucket, key)?;
        std::fs::read(&path).map_err(|e| ProcessingError::FetchFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })
    }
}

/// Fetches objects with a blocking GET on `{endpoint}/{bucket}/{key}`.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    endpoint: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key.trim_start_matches('/'))
    }
}

#[cfg(feature = "http")]
impl ObjectStore for HttpObjectStore {
    fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let url = self.object_url(bucket, key);
        let response = self.client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProcessingError::FetchFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: format!("GET {url} returned {status}"),
            });
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// In-memory store, keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: impl Into<String>, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .insert((bucket.into(), key.into()), body.into());
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ProcessingError::FetchFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: "no such object".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_uri() {
        assert_eq!(
            parse_s3_uri("s3://raw-data/extracts/2024/01.csv"),
            Some(("raw-data".to_string(), "extracts/2024/01.csv".to_string()))
        );
        assert_eq!(parse_s3_uri("https://example.com/a.csv"), None);
        assert_eq!(parse_s3_uri("s3://bucket-only"), None);
    }

    #[test]
    fn test_local_store_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bucket/nested")).unwrap();
        std::fs::write(dir.path().join("bucket/nested/a.csv"), "x\n1\n").unwrap();

        let store = LocalObjectStore::new(dir.path());
        assert_eq!(store.fetch("bucket", "nested/a.csv").unwrap(), b"x\n1\n");
    }

    #[test]
    fn test_local_store_rejects_escaping_key() {
        let store = LocalObjectStore::new("/data");
        let err = store.fetch("bucket", "../../etc/passwd").unwrap_err();
        assert_eq!(err.error_code(), "FETCH_FAILED");
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryObjectStore::new();
        assert!(store.is_empty());
        store.put("b", "k", "body");
        assert_eq!(store.len(), 1);
        assert_eq!(store.fetch("b", "k").unwrap(), b"body");
        assert!(store.fetch("b", "missing").is_err());
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_object_url() {
        let store = HttpObjectStore::new("http://localhost:9000/").unwrap();
        assert_eq!(
            store.object_url("bucket", "/a/b.csv"),
            "http://localhost:9000/bucket/a/b.csv"
        );
    }
}
