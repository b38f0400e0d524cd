//! Blob storage for source images and produced artifacts.

use crate::core::JobId;
use crate::errors::UpstreamError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Derives the storage path of an artifact. Paths depend only on the job
/// id, stage and file name, so a re-upload overwrites the same blob.
#[must_use]
pub fn artifact_path(job_id: JobId, stage: &str, name: &str) -> String {
    format!("jobs/{job_id}/{stage}/{name}")
}

/// Narrow async interface to the artifact store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Downloads the blob at `url`.
    async fn get(&self, url: &str) -> Result<Vec<u8>, UpstreamError>;

    /// Uploads `bytes` to `path`, overwriting any previous blob, and
    /// returns the blob's URL.
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, UpstreamError>;
}

const MEM_SCHEME: &str = "mem://";

/// Keeps blobs in memory under `mem://<path>` URLs.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    blobs: DashMap<String, (Vec<u8>, String)>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a blob directly, returning its URL.
    pub fn insert(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> String {
        let url = format!("{MEM_SCHEME}{}", path.trim_start_matches(MEM_SCHEME));
        self.blobs.insert(url.clone(), (bytes, content_type.to_string()));
        url
    }

    /// Returns the content type recorded for a URL.
    #[must_use]
    pub fn content_type(&self, url: &str) -> Option<String> {
        self.blobs.get(url).map(|entry| entry.1.clone())
    }

    /// Returns all stored URLs with the given prefix, sorted.
    #[must_use]
    pub fn urls_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut urls: Vec<String> = self
            .blobs
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        urls.sort();
        urls
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn get(&self, url: &str) -> Result<Vec<u8>, UpstreamError> {
        self.blobs
            .get(url)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| UpstreamError::store(url, "no such blob"))
    }

    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, UpstreamError> {
        Ok(self.insert(path, bytes, content_type))
    }
}

/// Stores blobs under a root directory and hands out `file://` URLs.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, UpstreamError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || path.is_empty() {
            return Err(UpstreamError::store(path, "path escapes the store root"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn get(&self, url: &str) -> Result<Vec<u8>, UpstreamError> {
        let path = match url.strip_prefix("file://") {
            Some(absolute) => PathBuf::from(absolute),
            None => self.resolve(url)?,
        };
        tokio::fs::read(&path)
            .await
            .map_err(|e| UpstreamError::store(url, e.to_string()))
    }

    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, UpstreamError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UpstreamError::store(path, e.to_string()))?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| UpstreamError::store(path, e.to_string()))?;
        debug!(path = %target.display(), bytes = bytes.len(), content_type, "Stored artifact");
        Ok(format!("file://{}", target.display()))
    }
}

#[cfg(feature = "http")]
pub use http::HttpArtifactStore;

#[cfg(feature = "http")]
mod http {
    use super::{ArtifactStore, UpstreamError};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Talks to an object store over plain HTTP `GET`/`PUT`.
    #[derive(Debug, Clone)]
    pub struct HttpArtifactStore {
        client: reqwest::Client,
        base_url: String,
    }

    impl HttpArtifactStore {
        /// Creates a store whose uploads land under `base_url`.
        pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
            let base_url = base_url.into();
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| UpstreamError::store(&base_url, e.to_string()))?;
            Ok(Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
            })
        }
    }

    #[async_trait]
    impl ArtifactStore for HttpArtifactStore {
        async fn get(&self, url: &str) -> Result<Vec<u8>, UpstreamError> {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| UpstreamError::store(url, e.to_string()))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| UpstreamError::store(url, e.to_string()))?;
            Ok(bytes.to_vec())
        }

        async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, UpstreamError> {
            let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
            self.client
                .put(&url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| UpstreamError::store(&url, e.to_string()))?;
            Ok(url)
        }
    }
}
