use crate::cli::{Cli, OutputFormat, default_cache_dir, parse_extensions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

const ENV_PREFIX: &str = "TAXONOMY_READER_";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub network: NetworkConfig,
    pub engine: EngineConfig,
    pub output: OutputConfig,
}

/// Remote document cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve remote documents from (and persist them to) the cache directory
    pub enabled: bool,
    /// Root of the mirrored path-after-scheme layout
    pub directory: PathBuf,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-fetch timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts for failed downloads
    pub retry_attempts: u32,
    /// Retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Outbound proxy for every request
    pub proxy: Option<String>,
    /// Honour HTTP(S)_PROXY style environment settings when no proxy is given
    pub use_system_proxy: bool,
}

/// Discovery engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of documents read concurrently
    pub max_concurrent_units: Option<usize>,
    /// Extensions enqueued from directory and archive entry points
    pub schema_extensions: Vec<String>,
    /// Include patterns for directory entry points (glob syntax)
    pub include_patterns: Vec<String>,
    /// Exclude patterns for directory entry points (glob syntax)
    pub exclude_patterns: Vec<String>,
    /// Where downloaded archives are stored while a run is active
    pub temp_dir: Option<PathBuf>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormatConfig,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (errors only)
    pub quiet: bool,
}

/// Output format configuration (serializable version of CLI OutputFormat)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    Human,
    Json,
    Summary,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
            OutputFormat::Summary => OutputFormatConfig::Summary,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
            OutputFormatConfig::Summary => OutputFormat::Summary,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_cache_dir(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            proxy: None,
            use_system_proxy: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: None,
            schema_extensions: vec!["xsd".to_string()],
            include_patterns: vec![],
            exclude_patterns: vec![],
            temp_dir: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormatConfig::Human,
            verbose: false,
            quiet: false,
        }
    }
}

impl Config {
    /// Configuration for tests and embedding: caching under `cache_dir`, no system proxy
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.cache.directory = cache_dir.into();
        config.network.use_system_proxy = false;
        config
    }

    pub fn max_concurrent_units(&self) -> usize {
        self.engine
            .max_concurrent_units
            .unwrap_or_else(|| num_cpus::get() * 4)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.engine
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "taxonomy-reader.toml",
            "taxonomy-reader.json",
            ".taxonomy-reader.toml",
            ".taxonomy-reader.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("taxonomy-reader");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        let var = |name: &str| env.get(&format!("{ENV_PREFIX}{name}"));

        if let Some(use_cache) = var("USE_CACHE") {
            config.cache.enabled = parse_env("USE_CACHE", &use_cache)?;
        }
        if let Some(cache_dir) = var("CACHE_DIR") {
            config.cache.directory = PathBuf::from(cache_dir);
        }

        if let Some(timeout) = var("TIMEOUT") {
            config.network.timeout_seconds = parse_env("TIMEOUT", &timeout)?;
        }
        if let Some(retry_attempts) = var("RETRY_ATTEMPTS") {
            config.network.retry_attempts = parse_env("RETRY_ATTEMPTS", &retry_attempts)?;
        }
        if let Some(proxy) = var("PROXY") {
            config.network.proxy = Some(proxy).filter(|p| !p.trim().is_empty());
        }

        if let Some(threads) = var("THREADS") {
            config.engine.max_concurrent_units = Some(parse_env("THREADS", &threads)?);
        }
        if let Some(extensions) = var("EXTENSIONS") {
            config.engine.schema_extensions = parse_extensions(&extensions);
        }

        if let Some(verbose) = var("VERBOSE") {
            config.output.verbose = parse_env("VERBOSE", &verbose)?;
        }
        if let Some(quiet) = var("QUIET") {
            config.output.quiet = parse_env("QUIET", &quiet)?;
        }
        if let Some(format) = var("FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                "summary" => OutputFormatConfig::Summary,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid {ENV_PREFIX}FORMAT value: {}",
                        format
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(cache_dir) = &cli.cache_dir {
            config.cache.directory = cache_dir.clone();
        }
        if cli.no_cache {
            config.cache.enabled = false;
        }

        if let Some(timeout) = cli.timeout {
            config.network.timeout_seconds = timeout;
        }
        if let Some(retry_attempts) = cli.retry_attempts {
            config.network.retry_attempts = retry_attempts;
        }
        if let Some(proxy) = &cli.proxy {
            config.network.proxy = Some(proxy.clone());
        }

        if cli.threads.is_some() {
            config.engine.max_concurrent_units = cli.threads;
        }
        if let Some(extensions) = cli.get_extensions() {
            config.engine.schema_extensions = extensions;
        }
        if !cli.include_patterns.is_empty() {
            config.engine.include_patterns = cli.include_patterns.clone();
        }
        if !cli.exclude_patterns.is_empty() {
            config.engine.exclude_patterns = cli.exclude_patterns.clone();
        }

        if let Some(format) = cli.output_format {
            config.output.format = format.into();
        }
        config.output.verbose |= cli.verbose || cli.debug;
        config.output.quiet |= cli.quiet;

        config
    }

    /// Merge two configurations (second takes precedence for non-None values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        base.cache = override_config.cache;

        base.network.timeout_seconds = override_config.network.timeout_seconds;
        base.network.retry_attempts = override_config.network.retry_attempts;
        base.network.retry_delay_ms = override_config.network.retry_delay_ms;
        base.network.use_system_proxy = override_config.network.use_system_proxy;
        if override_config.network.proxy.is_some() {
            base.network.proxy = override_config.network.proxy;
        }

        if override_config.engine.max_concurrent_units.is_some() {
            base.engine.max_concurrent_units = override_config.engine.max_concurrent_units;
        }
        if !override_config.engine.schema_extensions.is_empty() {
            base.engine.schema_extensions = override_config.engine.schema_extensions;
        }
        if !override_config.engine.include_patterns.is_empty() {
            base.engine.include_patterns = override_config.engine.include_patterns;
        }
        if !override_config.engine.exclude_patterns.is_empty() {
            base.engine.exclude_patterns = override_config.engine.exclude_patterns;
        }
        if override_config.engine.temp_dir.is_some() {
            base.engine.temp_dir = override_config.engine.temp_dir;
        }

        base.output = override_config.output;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(units) = config.engine.max_concurrent_units {
            if units == 0 {
                return Err(ConfigError::Validation(
                    "Number of concurrent documents must be greater than 0".to_string(),
                ));
            }
            if units > 4096 {
                return Err(ConfigError::Validation(
                    "Number of concurrent documents cannot exceed 4096".to_string(),
                ));
            }
        }

        if config.network.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.network.retry_attempts > 10 {
            return Err(ConfigError::Validation(
                "Retry attempts cannot exceed 10".to_string(),
            ));
        }

        if let Some(proxy) = &config.network.proxy
            && url::Url::parse(proxy).is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid proxy URL: {}",
                proxy
            )));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        if config.engine.schema_extensions.is_empty() {
            return Err(ConfigError::Validation(
                "At least one schema extension must be specified".to_string(),
            ));
        }

        for ext in &config.engine.schema_extensions {
            if ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return Err(ConfigError::Validation(format!(
                    "Invalid file extension: {}",
                    ext
                )));
            }
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::Environment(format!("Invalid {ENV_PREFIX}{name} value: {}", value))
    })
}
