use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::future::Cache;
use tokio::fs;
use url::Url;

use crate::error::{Result, TaxonomyError};

/// Memory budget for downloads shared within one resolver
const DOWNLOAD_CACHE_BYTES: u64 = 64 * 1024 * 1024;

/// Relative path a remote document is mirrored under: `host[_port]/path`
///
/// Used both for the cache layout and for locating documents in an offline
/// mirror of the taxonomy.
pub fn path_after_scheme(url: &str) -> Result<PathBuf> {
    let parsed = Url::parse(url).map_err(|e| TaxonomyError::InvalidReference {
        reference: url.to_string(),
        reason: e.to_string(),
    })?;

    let host = parsed
        .host_str()
        .ok_or_else(|| TaxonomyError::InvalidReference {
            reference: url.to_string(),
            reason: "remote reference has no host".to_string(),
        })?;

    let mut relative = PathBuf::from(match parsed.port() {
        Some(port) => format!("{}_{}", host, port),
        None => host.to_string(),
    });

    let mut has_file = false;
    for segment in parsed.path().split('/') {
        let segment = percent_encoding::percent_decode_str(segment).decode_utf8_lossy();
        if segment.is_empty() || segment == "." || segment == ".." {
            has_file = false;
            continue;
        }
        relative.push(segment.as_ref());
        has_file = true;
    }

    if !has_file || parsed.path().ends_with('/') {
        return Err(TaxonomyError::InvalidReference {
            reference: url.to_string(),
            reason: "remote reference does not name a document".to_string(),
        });
    }

    Ok(relative)
}

/// On-disk cache mirroring each remote URL's path-after-scheme
///
/// Presence of a file at the mirrored path is the only hit signal: there is
/// no metadata and nothing expires.
#[derive(Debug, Clone)]
pub struct DocumentCache {
    root: PathBuf,
}

impl DocumentCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the cache file for `url`
    pub fn mirror_path(&self, url: &str) -> Result<PathBuf> {
        Ok(self.root.join(path_after_scheme(url)?))
    }

    pub async fn contains(&self, url: &str) -> bool {
        match self.mirror_path(url) {
            Ok(path) => fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Read the cached copy of `url`, if there is one
    pub async fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let path = self.mirror_path(url)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `data` for `url` and return the cache file's path
    ///
    /// The content is written to a uniquely named sibling first and renamed
    /// into place, so concurrent writers never leave a torn file behind.
    pub async fn store(&self, url: &str, data: &[u8]) -> Result<PathBuf> {
        if data.is_empty() {
            return Err(TaxonomyError::fetch_failed(
                url,
                "refusing to cache an empty document",
            ));
        }

        let path = self.mirror_path(url)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partial = path.with_file_name(format!(
            ".{}.{}.part",
            file_name,
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = fs::write(&partial, data).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&partial, &path).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }

        Ok(path)
    }

    pub async fn remove(&self, url: &str) -> Result<()> {
        let path = self.mirror_path(url)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Count cached documents and their total size
    pub async fn stats(&self) -> Result<CacheStats> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut stats = CacheStats::default();
            if !root.exists() {
                return stats;
            }
            let walker = ignore::WalkBuilder::new(&root)
                .standard_filters(false)
                .build();
            for entry in walker.flatten() {
                if entry.file_type().is_some_and(|t| t.is_file())
                    && !entry.file_name().to_string_lossy().ends_with(".part")
                {
                    stats.entry_count += 1;
                    stats.total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
                }
            }
            stats
        })
        .await
        .map_err(|e| TaxonomyError::Concurrency {
            details: format!("cache statistics task failed: {}", e),
        })
    }

    /// Remove every cached document
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store of remote downloads made during one run
///
/// Uses `moka` for "thundering herd" protection: concurrent requests for the
/// same URL wait for a single download instead of each hitting the network.
pub struct DownloadCache {
    cache: Cache<String, Arc<Vec<u8>>>,
}

impl DownloadCache {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .weigher(|_url: &String, data: &Arc<Vec<u8>>| {
                u32::try_from(data.len()).unwrap_or(u32::MAX)
            })
            .max_capacity(DOWNLOAD_CACHE_BYTES)
            .build();

        Self { cache }
    }

    /// Return the bytes for `url`, running `loader` only if no one else has
    pub async fn get_or_download<F, Fut>(&self, url: &str, loader: F) -> Result<Arc<Vec<u8>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        let load = loader();
        self.cache
            .try_get_with(url.to_string(), async move { load.await.map(Arc::new) })
            .await
            .map_err(|e: Arc<TaxonomyError>| match e.as_ref() {
                TaxonomyError::Timeout {
                    url,
                    timeout_seconds,
                } => TaxonomyError::Timeout {
                    url: url.clone(),
                    timeout_seconds: *timeout_seconds,
                },
                _ => TaxonomyError::fetch_failed(url, e),
            })
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.cache.get(url).await.is_some()
    }
}

impl Default for DownloadCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: u64,
    pub total_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_path_after_scheme() {
        assert_eq!(
            path_after_scheme("http://www.xbrl.org/2003/xbrl-instance-2003-12-31.xsd").unwrap(),
            PathBuf::from("www.xbrl.org/2003/xbrl-instance-2003-12-31.xsd")
        );
        assert_eq!(
            path_after_scheme("https://example.com:8443/a/./b/../c.xsd").unwrap(),
            PathBuf::from("example.com_8443/a/c.xsd")
        );
        assert_eq!(
            path_after_scheme("http://example.com/with%20space.xsd").unwrap(),
            PathBuf::from("example.com/with space.xsd")
        );
    }

    #[test]
    fn test_path_after_scheme_rejects_directories() {
        assert!(path_after_scheme("http://example.com/").is_err());
        assert!(path_after_scheme("http://example.com/dir/").is_err());
        assert!(path_after_scheme("not a url").is_err());
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DocumentCache::new(temp_dir.path());
        let url = "http://example.com/taxo/a.xsd";

        assert!(!cache.contains(url).await);
        assert_eq!(cache.get(url).await.unwrap(), None);

        let path = cache.store(url, b"<schema/>").await.unwrap();
        assert_eq!(path, temp_dir.path().join("example.com/taxo/a.xsd"));
        assert!(cache.contains(url).await);
        assert_eq!(cache.get(url).await.unwrap(), Some(b"<schema/>".to_vec()));

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_size, 9);
    }

    #[tokio::test]
    async fn test_store_rejects_empty_payload() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DocumentCache::new(temp_dir.path());
        let url = "http://example.com/empty.xsd";

        let result = cache.store(url, b"").await;
        assert!(matches!(result, Err(TaxonomyError::FetchFailed { .. })));
        assert!(!cache.contains(url).await);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DocumentCache::new(temp_dir.path().join("cache"));

        cache.store("http://a.org/x.xsd", b"x").await.unwrap();
        cache.store("http://b.org/y.xsd", b"y").await.unwrap();
        cache.remove("http://a.org/x.xsd").await.unwrap();
        assert!(!cache.contains("http://a.org/x.xsd").await);
        assert!(cache.contains("http://b.org/y.xsd").await);

        cache.clear().await.unwrap();
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
        // Clearing twice is fine
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_download_cache_runs_loader_once() {
        let downloads = DownloadCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let data = downloads
                .get_or_download("http://example.com/a.xsd", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(b"content".to_vec())
                })
                .await
                .unwrap();
            assert_eq!(data.as_slice(), b"content");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(downloads.contains("http://example.com/a.xsd").await);
    }

    #[tokio::test]
    async fn test_download_cache_does_not_keep_failures() {
        let downloads = DownloadCache::new();

        let first = downloads
            .get_or_download("http://example.com/b.xsd", || async {
                Err(TaxonomyError::fetch_failed("http://example.com/b.xsd", "offline"))
            })
            .await;
        assert!(matches!(first, Err(TaxonomyError::FetchFailed { .. })));

        let second = downloads
            .get_or_download("http://example.com/b.xsd", || async { Ok(b"ok".to_vec()) })
            .await
            .unwrap();
        assert_eq!(second.as_slice(), b"ok");
    }

    #[tokio::test]
    async fn test_download_cache_keeps_timeouts() {
        let downloads = DownloadCache::new();

        let result = downloads
            .get_or_download("http://example.com/slow.xsd", || async {
                Err(TaxonomyError::Timeout {
                    url: "http://example.com/slow.xsd".to_string(),
                    timeout_seconds: 1,
                })
            })
            .await;
        assert!(matches!(
            result,
            Err(TaxonomyError::Timeout { timeout_seconds: 1, .. })
        ));
    }
}
