use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};

use crate::config::EngineConfig;
use crate::error::{Result, TaxonomyError};

/// Enumerates the schema documents of a directory or archive entry point
#[derive(Debug, Clone)]
pub struct Discovery {
    /// File extensions to include, lowercase and without the dot
    extensions: Vec<String>,
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
    /// Maximum depth for directory traversal (None = unlimited)
    max_depth: Option<usize>,
    follow_symlinks: bool,
}

impl Discovery {
    pub fn new() -> Self {
        Self {
            extensions: vec!["xsd".to_string()],
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            max_depth: None,
            follow_symlinks: false,
        }
    }

    pub fn from_config(engine: &EngineConfig) -> Result<Self> {
        Self::new()
            .with_extensions(engine.schema_extensions.clone())
            .with_include_patterns(engine.include_patterns.clone())?
            .with_exclude_patterns(engine.exclude_patterns.clone())
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Only documents matching one of these globs are enumerated
    pub fn with_include_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.include_patterns = patterns;
        self.overrides(Path::new(""))?;
        Ok(self)
    }

    /// Documents matching any of these globs are skipped
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.exclude_patterns = patterns;
        self.overrides(Path::new(""))?;
        Ok(self)
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Include globs as whitelist entries, exclude globs negated, matched
    /// relative to `root`
    fn overrides(&self, root: &Path) -> Result<Override> {
        let mut builder = OverrideBuilder::new(root);
        let include = self.include_patterns.iter().map(|p| (p.clone(), p.clone()));
        let exclude = self.exclude_patterns.iter().map(|p| (p.clone(), format!("!{}", p)));
        for (pattern, glob) in include.chain(exclude) {
            builder.add(&glob).map_err(|e| {
                TaxonomyError::Config(format!("Invalid glob pattern '{}': {}", pattern, e))
            })?;
        }
        builder
            .build()
            .map_err(|e| TaxonomyError::Config(format!("Failed to build glob set: {}", e)))
    }

    /// Every matching file under `root`, sorted
    pub async fn discover(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let metadata = tokio::fs::metadata(root).await?;
        if metadata.is_file() {
            return Ok(if self.has_extension(root) {
                vec![root.to_path_buf()]
            } else {
                Vec::new()
            });
        }

        let overrides = self.overrides(root)?;
        let discovery = self.clone();
        let root = root.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let walker = WalkBuilder::new(&root)
                .standard_filters(false)
                .follow_links(discovery.follow_symlinks)
                .max_depth(discovery.max_depth.map(|d| d + 1))
                .build();

            let mut files = Vec::new();
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping unreadable directory entry");
                        continue;
                    }
                };
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                let path = entry.into_path();
                if discovery.has_extension(&path) && !overrides.matched(&path, false).is_ignore() {
                    files.push(path);
                }
            }
            files.sort();
            files
        })
        .await
        .map_err(|e| TaxonomyError::Concurrency {
            details: format!("directory discovery task failed: {}", e),
        })
    }

    /// Archive entries to enqueue, in the order given
    pub fn select_entries(&self, entries: &[String]) -> Result<Vec<String>> {
        let overrides = self.overrides(Path::new(""))?;
        Ok(entries
            .iter()
            .filter(|name| matches_extension(name, &self.extensions))
            .filter(|name| !overrides.matched(Path::new(name.as_str()), false).is_ignore())
            .cloned()
            .collect())
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a file or entry name carries one of `extensions`
pub fn matches_extension(name: &str, extensions: &[String]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}
