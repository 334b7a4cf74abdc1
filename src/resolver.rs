//! Path/reference resolution and document fetching
//!
//! Every document in a run is identified by a canonical string: a
//! lexically normalized local path, an `http(s)` URL, or a zip entry path of
//! the form `<archive>.zip/<entry>`. [`resolve`] produces these identifiers
//! and [`UrlResolver::fetch`] turns them back into bytes.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::fs;
use url::Url;
use zip::ZipArchive;

use crate::cache::{DocumentCache, DownloadCache, path_after_scheme};
use crate::config::Config;
use crate::error::{Result, TaxonomyError};
use crate::http_client::{AsyncHttpClient, HttpClientConfig};

const ARCHIVE_MARKER: &str = ".zip";

/// How a canonical path is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Local,
    Remote,
    ArchiveEntry,
}

impl DocumentKind {
    pub fn of(path: &str) -> Self {
        if split_archive_path(path).is_some() {
            DocumentKind::ArchiveEntry
        } else if is_remote(path) {
            DocumentKind::Remote
        } else {
            DocumentKind::Local
        }
    }
}

pub fn is_remote(path: &str) -> bool {
    let lower = path.get(..8).unwrap_or(path).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Split `<archive>.zip/<entry>` into its two halves
pub fn split_archive_path(path: &str) -> Option<(&str, &str)> {
    let lower = path.to_ascii_lowercase();
    let marker = format!("{}/", ARCHIVE_MARKER);
    let index = lower.find(&marker)?;
    let archive_end = index + ARCHIVE_MARKER.len();
    Some((&path[..archive_end], &path[archive_end + 1..]))
}

pub fn ends_with_archive(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(ARCHIVE_MARKER)
}

fn has_scheme(reference: &str) -> bool {
    // A single letter before ':' is a drive, not a scheme
    Url::parse(reference).is_ok_and(|url| url.scheme().len() > 1)
}

fn invalid(reference: &str, reason: impl ToString) -> TaxonomyError {
    TaxonomyError::InvalidReference {
        reference: reference.to_string(),
        reason: reason.to_string(),
    }
}

/// Resolve `reference` against the document `base` into a canonical path
///
/// Absolute references pass through with slashes normalized. Relative ones
/// are joined with URI semantics, except directly below an archive path
/// where the reference is appended as a plain segment.
pub fn resolve(base: Option<&str>, reference: &str) -> Result<String> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(invalid(reference, "empty reference"));
    }
    let normalized = trimmed.replace('\\', "/");

    if has_scheme(&normalized) {
        return canonicalize_absolute(&normalized);
    }

    let base = match base.map(str::trim).filter(|b| !b.is_empty()) {
        Some(base) => base.replace('\\', "/"),
        None => return Ok(normalize_local(&decode(&normalized))),
    };

    if is_remote(&base) {
        let base_url = Url::parse(&base).map_err(|e| invalid(&base, e))?;
        let joined = base_url.join(&normalized).map_err(|e| invalid(reference, e))?;
        return Ok(joined.to_string());
    }

    let base = canonicalize_absolute(&base)?;
    let relative = decode(&normalized);

    if ends_with_archive(&base) {
        return Ok(normalize_local(&format!(
            "{}/{}",
            base,
            relative.trim_start_matches('/')
        )));
    }

    if relative.starts_with('/') || is_drive_path(&relative) {
        return Ok(normalize_local(&relative));
    }

    let directory = match base.rfind('/') {
        Some(index) => &base[..=index],
        None => "",
    };
    Ok(normalize_local(&format!("{}{}", directory, relative)))
}

fn decode(reference: &str) -> String {
    percent_encoding::percent_decode_str(reference)
        .decode_utf8_lossy()
        .into_owned()
}

fn is_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn canonicalize_absolute(reference: &str) -> Result<String> {
    if !has_scheme(reference) {
        return Ok(normalize_local(reference));
    }
    let url = Url::parse(reference).map_err(|e| invalid(reference, e))?;
    match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| invalid(reference, "file URL has no local path"))?;
            Ok(normalize_local(&path.to_string_lossy().replace('\\', "/")))
        }
        _ => Ok(url.to_string()),
    }
}

/// Remove `.` and `..` segments and duplicate separators
fn normalize_local(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(last) if *last != ".." && !last.ends_with(':') => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Filesystem location of a local canonical path
pub fn local_path(path: &str) -> PathBuf {
    match Url::parse(path) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().unwrap_or_else(|_| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}

/// Canonical form of a filesystem path
pub fn canonical_local(path: &Path) -> String {
    normalize_local(&path.to_string_lossy().replace('\\', "/"))
}

/// Entry point and discovered mirror root of one resolver
///
/// Once a directory containing a remote document's path-after-scheme is found
/// above the entry point, every later remote lookup prefers it.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    entry_point: RwLock<Option<PathBuf>>,
    root_dir: RwLock<Option<PathBuf>>,
}

impl ResolutionContext {
    pub fn set_entry_point(&self, entry: &str) {
        let path = if DocumentKind::of(entry) == DocumentKind::Remote {
            None
        } else {
            Some(local_path(entry))
        };
        *self.entry_point.write() = path;
        *self.root_dir.write() = None;
    }

    pub fn entry_point(&self) -> Option<PathBuf> {
        self.entry_point.read().clone()
    }

    pub fn root_dir(&self) -> Option<PathBuf> {
        self.root_dir.read().clone()
    }

    /// Directory the upward search starts from
    fn search_start(&self) -> Option<PathBuf> {
        let entry = self.entry_point()?;
        if entry.is_dir() {
            Some(entry)
        } else {
            entry.parent().map(Path::to_path_buf)
        }
    }

    fn remember_root(&self, dir: PathBuf) {
        let mut root = self.root_dir.write();
        if root.is_none() {
            tracing::info!(root = %dir.display(), "using local mirror for remote documents");
            *root = Some(dir);
        }
    }
}

/// Counters describing where fetched documents came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub local_reads: usize,
    pub archive_reads: usize,
    pub mirror_hits: usize,
    pub cache_hits: usize,
    pub remote_downloads: usize,
}

#[derive(Default)]
struct Counters {
    local_reads: AtomicUsize,
    archive_reads: AtomicUsize,
    mirror_hits: AtomicUsize,
    cache_hits: AtomicUsize,
    remote_downloads: AtomicUsize,
}

struct LoadedArchive {
    path: String,
    archive: ZipArchive<std::fs::File>,
    temp_file: Option<PathBuf>,
}

/// Result of [`UrlResolver::load_archive`]
#[derive(Debug, Clone)]
pub struct ArchiveListing {
    /// Canonical archive path; entries are addressed as `<path>/<entry>`
    pub path: String,
    /// File entries, directories excluded
    pub entries: Vec<String>,
}

/// Fetches documents by canonical path from disk, the network, the cache or
/// the open archive
pub struct UrlResolver {
    use_cache: bool,
    temp_dir: PathBuf,
    http: AsyncHttpClient,
    cache: DocumentCache,
    downloads: DownloadCache,
    context: ResolutionContext,
    archive: Arc<Mutex<Option<LoadedArchive>>>,
    counters: Counters,
}

impl UrlResolver {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            use_cache: config.cache.enabled,
            temp_dir: config.temp_dir(),
            http: AsyncHttpClient::new(HttpClientConfig::from(&config.network))?,
            cache: DocumentCache::new(config.cache.directory.clone()),
            downloads: DownloadCache::new(),
            context: ResolutionContext::default(),
            archive: Arc::new(Mutex::new(None)),
            counters: Counters::default(),
        })
    }

    pub fn resolve(&self, base: Option<&str>, reference: &str) -> Result<String> {
        resolve(base, reference)
    }

    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    pub fn set_entry_point(&self, entry: &str) {
        self.context.set_entry_point(entry);
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            local_reads: self.counters.local_reads.load(Ordering::Relaxed),
            archive_reads: self.counters.archive_reads.load(Ordering::Relaxed),
            mirror_hits: self.counters.mirror_hits.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            remote_downloads: self.counters.remote_downloads.load(Ordering::Relaxed),
        }
    }

    /// Read the full content of a canonical path
    pub async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        match DocumentKind::of(path) {
            DocumentKind::ArchiveEntry => self.read_archive_entry(path).await,
            DocumentKind::Remote => self.fetch_remote(path).await,
            DocumentKind::Local => {
                let data = fs::read(local_path(path))
                    .await
                    .map_err(|e| TaxonomyError::fetch_failed(path, e))?;
                self.counters.local_reads.fetch_add(1, Ordering::Relaxed);
                Ok(data)
            }
        }
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>> {
        let relative = path_after_scheme(url)?;

        if let Some(data) = self.read_from_mirror(&relative).await? {
            self.counters.mirror_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(data);
        }

        if self.use_cache {
            if let Some(data) = self.cache.get(url).await? {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(data);
            }
        }

        let data = self
            .downloads
            .get_or_download(url, || async {
                tracing::debug!(url, "downloading");
                let data = self.http.download_document(url).await?;
                self.counters.remote_downloads.fetch_add(1, Ordering::Relaxed);
                if self.use_cache {
                    self.cache.store(url, &data).await?;
                }
                Ok(data)
            })
            .await?;

        Ok(Arc::unwrap_or_clone(data))
    }

    async fn read_from_mirror(&self, relative: &Path) -> Result<Option<Vec<u8>>> {
        if let Some(root) = self.context.root_dir() {
            let candidate = root.join(relative);
            return if is_file(&candidate).await {
                Ok(Some(fs::read(&candidate).await?))
            } else {
                Ok(None)
            };
        }

        let Some(start) = self.context.search_start() else {
            return Ok(None);
        };
        let mut current = Some(start.as_path());
        while let Some(dir) = current {
            let candidate = dir.join(relative);
            if is_file(&candidate).await {
                self.context.remember_root(dir.to_path_buf());
                return Ok(Some(fs::read(&candidate).await?));
            }
            current = dir.parent();
        }
        Ok(None)
    }

    async fn read_archive_entry(&self, path: &str) -> Result<Vec<u8>> {
        let archive = Arc::clone(&self.archive);
        let path = path.to_string();
        let data = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut guard = archive.lock();
            let loaded = guard
                .as_mut()
                .ok_or_else(|| TaxonomyError::ArchiveNotLoaded { path: path.clone() })?;
            let (archive_path, entry) =
                split_archive_path(&path).ok_or_else(|| invalid(&path, "not an archive entry"))?;
            if !archive_path.eq_ignore_ascii_case(&loaded.path) {
                return Err(TaxonomyError::ArchiveNotLoaded { path: path.clone() });
            }

            let mut file = match loaded.archive.by_name(entry) {
                Ok(file) => file,
                Err(zip::result::ZipError::FileNotFound) => {
                    return Err(TaxonomyError::EntryNotFound {
                        archive: loaded.path.clone(),
                        entry: entry.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            let mut buffer = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
            file.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
        .await
        .map_err(|e| TaxonomyError::Concurrency {
            details: format!("archive read task failed: {}", e),
        })??;

        self.counters.archive_reads.fetch_add(1, Ordering::Relaxed);
        Ok(data)
    }

    /// Open the archive at `path`, downloading it first when remote
    ///
    /// Only one archive can be open per resolver. A downloaded archive lives
    /// in a temporary file with a random suffix and is deleted on
    /// [`close_archive`](Self::close_archive) or drop.
    pub async fn load_archive(&self, path: &str) -> Result<ArchiveListing> {
        if let Some(loaded) = self.archive.lock().as_ref() {
            return Err(TaxonomyError::AlreadyLoaded {
                path: loaded.path.clone(),
            });
        }

        let (local, temp_file) = if is_remote(path) {
            let temp = self.download_archive(path).await?;
            (canonical_local(&temp), Some(temp))
        } else {
            (canonical_local(&local_path(path)), None)
        };

        let opened = {
            let local = local.clone();
            tokio::task::spawn_blocking(move || -> Result<(ZipArchive<std::fs::File>, Vec<String>)> {
                let file = std::fs::File::open(local_path(&local))
                    .map_err(|e| TaxonomyError::fetch_failed(&local, e))?;
                let archive = ZipArchive::new(file)?;
                let entries = archive
                    .file_names()
                    .filter(|name| !name.ends_with('/'))
                    .map(str::to_string)
                    .collect();
                Ok((archive, entries))
            })
            .await
            .map_err(|e| TaxonomyError::Concurrency {
                details: format!("archive open task failed: {}", e),
            })?
        };

        let (archive, mut entries) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                remove_temp(temp_file.as_deref());
                return Err(e);
            }
        };
        entries.sort();

        let mut slot = self.archive.lock();
        if let Some(loaded) = slot.as_ref() {
            remove_temp(temp_file.as_deref());
            return Err(TaxonomyError::AlreadyLoaded {
                path: loaded.path.clone(),
            });
        }
        tracing::info!(archive = %local, entries = entries.len(), "archive loaded");
        *slot = Some(LoadedArchive {
            path: local.clone(),
            archive,
            temp_file,
        });

        Ok(ArchiveListing {
            path: local,
            entries,
        })
    }

    async fn download_archive(&self, url: &str) -> Result<PathBuf> {
        let data = self.http.download_document(url).await?;
        self.counters.remote_downloads.fetch_add(1, Ordering::Relaxed);

        let stem = Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .map(|name| name.trim_end_matches(".zip").to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "taxonomy".to_string());
        let stem: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        fs::create_dir_all(&self.temp_dir).await?;
        let temp = self.temp_dir.join(format!(
            "{}-{}.zip",
            stem,
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(e) = fs::write(&temp, &data).await {
            let _ = fs::remove_file(&temp).await;
            return Err(TaxonomyError::fetch_failed(url, e));
        }
        Ok(temp)
    }

    /// Canonical path of the open archive, if any
    pub fn archive_path(&self) -> Option<String> {
        self.archive.lock().as_ref().map(|a| a.path.clone())
    }

    /// Close the open archive and delete its temporary download
    pub fn close_archive(&self) {
        if let Some(loaded) = self.archive.lock().take() {
            remove_temp(loaded.temp_file.as_deref());
        }
    }
}

impl Drop for UrlResolver {
    fn drop(&mut self) {
        self.close_archive();
    }
}

fn remove_temp(path: Option<&Path>) {
    if let Some(path) = path
        && let Err(e) = std::fs::remove_file(path)
    {
        tracing::warn!(path = %path.display(), error = %e, "could not delete temporary archive");
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}
