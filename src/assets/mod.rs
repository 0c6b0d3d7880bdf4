//! Model asset precache
//!
//! Warms a local cache with synthesis model files so the worker's first load
//! does not wait on the network. Failures are logged and never fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::synthesis::ProgressInfo;
use crate::{Error, Result};

/// Downloads assets into a content-addressed cache directory
pub struct AssetPrecache {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl AssetPrecache {
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Cache location for `url`, whether or not it has been fetched
    #[must_use]
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        let name = url
            .rsplit('/')
            .next()
            .and_then(|tail| tail.split(['?', '#']).next())
            .filter(|tail| !tail.is_empty())
            .unwrap_or("asset");
        self.cache_dir.join(format!("{}-{name}", &digest[..16]))
    }

    /// Whether `url` is already cached
    #[must_use]
    pub fn is_cached(&self, url: &str) -> bool {
        self.cache_path(url).is_file()
    }

    /// Fetch `url` into the cache unless already present
    ///
    /// # Errors
    ///
    /// Returns error if the download or write fails
    pub async fn preload(&self, url: &str) -> Result<PathBuf> {
        self.preload_with_progress(url, |_| {}).await
    }

    /// Like [`preload`](Self::preload), reporting byte progress
    ///
    /// # Errors
    ///
    /// Returns error if the download or write fails
    pub async fn preload_with_progress(
        &self,
        url: &str,
        progress: impl Fn(ProgressInfo) + Send + Sync,
    ) -> Result<PathBuf> {
        let path = self.cache_path(url);
        if path.is_file() {
            tracing::debug!(url, path = %path.display(), "asset already cached");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Asset(format!("{url}: HTTP {status}")));
        }

        let total = response.content_length();
        let partial = path.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut loaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    remove_partial(&partial).await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            loaded += chunk.len() as u64;
            progress(ProgressInfo::new(loaded, total));
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &path).await?;

        tracing::info!(url, bytes = loaded, path = %path.display(), "asset cached");
        Ok(path)
    }

    /// Preload every URL in order, logging failures
    ///
    /// Returns the paths that were cached successfully.
    pub async fn preload_all(&self, urls: &[String]) -> Vec<PathBuf> {
        let mut cached = Vec::with_capacity(urls.len());
        for url in urls {
            match self.preload(url).await {
                Ok(path) => cached.push(path),
                Err(e) => tracing::warn!(url = %url, error = %e, "asset precache failed"),
            }
        }
        cached
    }

    /// Run [`preload_all`](Self::preload_all) in the background
    pub fn spawn_preload_all(self: Arc<Self>, urls: Vec<String>) -> JoinHandle<Vec<PathBuf>> {
        tokio::spawn(async move { self.preload_all(&urls).await })
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %e, "partial asset not removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_is_stable_and_keeps_file_name() {
        let precache = AssetPrecache::new("/tmp/cache");
        let a = precache.cache_path("https://example.com/models/voice.onnx?v=2");
        let b = precache.cache_path("https://example.com/models/voice.onnx?v=2");
        let c = precache.cache_path("https://example.com/models/voice.onnx?v=3");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.to_string_lossy().ends_with("-voice.onnx"));
    }

    #[test]
    fn bare_host_gets_placeholder_name() {
        let precache = AssetPrecache::new("/tmp/cache");
        assert!(precache
            .cache_path("https://example.com/")
            .to_string_lossy()
            .ends_with("-asset"));
    }

    #[tokio::test]
    async fn cached_asset_is_served_without_network() {
        let dir = tempfile::TempDir::new().unwrap();
        let precache = AssetPrecache::new(dir.path());
        let url = "http://127.0.0.1:9/model.bin";
        std::fs::write(precache.cache_path(url), b"weights").unwrap();

        assert!(precache.is_cached(url));
        let path = precache.preload(url).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"weights");
    }

    #[tokio::test]
    async fn failures_are_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let precache = Arc::new(AssetPrecache::new(dir.path()));
        let cached_url = "http://127.0.0.1:9/cached.bin".to_string();
        std::fs::write(precache.cache_path(&cached_url), b"x").unwrap();

        let urls = vec!["http://127.0.0.1:9/missing.bin".to_string(), cached_url];
        let cached = precache.spawn_preload_all(urls).await.unwrap();
        assert_eq!(cached.len(), 1);
    }
}
