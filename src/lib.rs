//! # taxonomy-reader Library
//!
//! Concurrent loader for XBRL taxonomies: discovers every schema and linkbase
//! reachable from an entry point (file, directory, zip archive or URL),
//! fetches them once each with remote caching, and hands the parsed documents
//! to pluggable extractors that build the taxonomy's components.

pub mod cache;
pub mod cli;
pub mod component;
pub mod config;
pub mod container;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod extractors;
pub mod href;
pub mod http_client;
pub mod link_graph;
pub mod output;
pub mod resolver;
pub mod xlink;
pub mod xml;

pub use cache::{CacheStats, DocumentCache, DownloadCache};
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use component::{Component, ComponentData, ComponentHandle, ComponentRegistry, ShellTable};
pub use config::{Config, ConfigError, ConfigManager};
pub use container::{ComponentSet, Linkbase, Schema};
pub use discovery::Discovery;
pub use engine::{DocumentQueue, TaxonomyReader, TaxonomyReport, UnitStatus, UnitSummary};
pub use error::{ErrorCategory, ReadError, Result, Stage, TaxonomyError};
pub use extractor::{Extracted, Extractor};
pub use extractors::StandardExtractors;
pub use href::Href;
pub use http_client::{AsyncHttpClient, HttpClientConfig};
pub use link_graph::{ArcRecord, LinkGraph, Locator, LocatorNode, build_graph};
pub use output::{Output, RunSummary};
pub use resolver::{ResolverStats, UrlResolver, resolve};
pub use xml::{QName, XmlDocument, XmlElement};
