use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;

/// Main library error type covering every failure a taxonomy run can record
#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("HTTP status error: {status} for {url} - {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Request timeout: {url} after {timeout_seconds} seconds")]
    Timeout { url: String, timeout_seconds: u64 },

    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Archive entry not found: {entry} in {archive}")]
    EntryNotFound { archive: String, entry: String },

    #[error("No archive loaded to serve {path}")]
    ArchiveNotLoaded { path: String },

    #[error("An archive is already loaded: {path}")]
    AlreadyLoaded { path: String },

    #[error("Fetch failed: {path} - {reason}")]
    FetchFailed { path: String, reason: String },

    #[error("Parse failed: {path} - {details}")]
    ParseFailed { path: String, details: String },

    #[error("Structural violation: {details}")]
    StructuralViolation { details: String },

    #[error("Unresolved reference: {href}")]
    ReferenceUnresolved { href: String },

    #[error("Contract violation: {details}")]
    ContractViolation { details: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },

    #[error("Internal engine error: {details}")]
    Internal { details: String },
}

/// Coarse classification used by reports and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Fetch,
    Parse,
    Structural,
    Reference,
    Contract,
    Internal,
}

impl TaxonomyError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TaxonomyError::Io(_)
            | TaxonomyError::Http(_)
            | TaxonomyError::HttpStatus { .. }
            | TaxonomyError::Timeout { .. }
            | TaxonomyError::EntryNotFound { .. }
            | TaxonomyError::ArchiveNotLoaded { .. }
            | TaxonomyError::FetchFailed { .. } => ErrorCategory::Fetch,
            TaxonomyError::Zip(_)
            | TaxonomyError::InvalidReference { .. }
            | TaxonomyError::ParseFailed { .. } => ErrorCategory::Parse,
            TaxonomyError::StructuralViolation { .. } => ErrorCategory::Structural,
            TaxonomyError::ReferenceUnresolved { .. } => ErrorCategory::Reference,
            TaxonomyError::ContractViolation { .. } | TaxonomyError::AlreadyLoaded { .. } => {
                ErrorCategory::Contract
            }
            TaxonomyError::Config(_)
            | TaxonomyError::Concurrency { .. }
            | TaxonomyError::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Contract violations end a run instead of joining the error list
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, TaxonomyError::ContractViolation { .. })
    }

    pub(crate) fn fetch_failed(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        TaxonomyError::FetchFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn parse_failed(path: impl Into<String>, details: impl fmt::Display) -> Self {
        TaxonomyError::ParseFailed {
            path: path.into(),
            details: details.to_string(),
        }
    }

    pub(crate) fn structural(details: impl Into<String>) -> Self {
        TaxonomyError::StructuralViolation {
            details: details.into(),
        }
    }
}

impl From<ConfigError> for TaxonomyError {
    fn from(err: ConfigError) -> Self {
        TaxonomyError::Config(err.to_string())
    }
}

/// The part of a run an error is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Fetching, parsing and scheduling performed by the engine itself
    Engine,
    /// A hook of the named extractor
    Extractor(String),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Engine => write!(f, "engine"),
            Stage::Extractor(name) => write!(f, "{}", name),
        }
    }
}

/// One entry of a run's error list
#[derive(Debug)]
pub struct ReadError {
    pub stage: Stage,
    /// Canonical path of the document being read, if any
    pub document: Option<String>,
    pub error: TaxonomyError,
}

impl ReadError {
    pub fn new(stage: Stage, document: Option<&str>, error: TaxonomyError) -> Self {
        Self {
            stage,
            document: document.map(str::to_string),
            error,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.error.category()
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TaxonomyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_error_display() {
        let fetch = TaxonomyError::FetchFailed {
            path: "http://example.com/a.xsd".to_string(),
            reason: "empty download".to_string(),
        };
        assert!(fetch.to_string().contains("Fetch failed"));
        assert!(fetch.to_string().contains("http://example.com/a.xsd"));

        let entry = TaxonomyError::EntryNotFound {
            archive: "/tmp/taxo.zip".to_string(),
            entry: "a/b.xsd".to_string(),
        };
        assert!(entry.to_string().contains("a/b.xsd"));
        assert!(entry.to_string().contains("/tmp/taxo.zip"));

        let structural = TaxonomyError::structural("locator 'B' has 2 parents");
        assert_eq!(
            structural.to_string(),
            "Structural violation: locator 'B' has 2 parents"
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            TaxonomyError::fetch_failed("a.xsd", "gone").category(),
            ErrorCategory::Fetch
        );
        assert_eq!(
            TaxonomyError::parse_failed("a.xsd", "bad").category(),
            ErrorCategory::Parse
        );
        assert_eq!(
            TaxonomyError::Timeout {
                url: "http://example.com".to_string(),
                timeout_seconds: 1,
            }
            .category(),
            ErrorCategory::Fetch
        );
        assert_eq!(
            TaxonomyError::ReferenceUnresolved {
                href: "a.xsd#x".to_string()
            }
            .category(),
            ErrorCategory::Reference
        );
        let contract = TaxonomyError::ContractViolation {
            details: "queued while idle".to_string(),
        };
        assert_eq!(contract.category(), ErrorCategory::Contract);
        assert!(contract.is_contract_violation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Access denied");
        let error: TaxonomyError = io_error.into();

        match error {
            TaxonomyError::Io(_) => (),
            _ => panic!("Expected TaxonomyError::Io"),
        }
    }

    #[test]
    fn test_config_error_conversion() {
        let config_error = ConfigError::Validation("timeout must be positive".to_string());
        let error: TaxonomyError = config_error.into();

        match error {
            TaxonomyError::Config(message) => assert!(message.contains("timeout")),
            _ => panic!("Expected TaxonomyError::Config"),
        }
    }

    #[test]
    fn test_read_error_display() {
        let error = ReadError::new(
            Stage::Extractor("labels".to_string()),
            Some("/taxo/lab.xml"),
            TaxonomyError::parse_failed("/taxo/lab.xml", "unexpected end of file"),
        );
        assert!(error.to_string().starts_with("labels: Parse failed"));
        assert_eq!(error.document.as_deref(), Some("/taxo/lab.xml"));

        let engine = ReadError::new(Stage::Engine, None, TaxonomyError::fetch_failed("x", "y"));
        assert!(engine.to_string().starts_with("engine: "));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error = TaxonomyError::Io(io_error);

        assert!(error.source().is_some());
        assert_eq!(error.source().map(|s| s.to_string()).unwrap(), "File not found");
    }
}
