//! Discovery/fetch engine
//!
//! A run is a breadth-first walk over a document graph whose size is only
//! known once every document has been parsed:
//!
//! - **Phase 1**: each queued document becomes a [`UnitStatus`]-tracked unit
//!   read by its own tokio task (fetch, parse, follow imports and linkbases,
//!   run extractor hooks). Tasks queue further documents as they go; a unit
//!   is created at most once per canonical path.
//! - **Barrier**: an in-flight counter reaches zero and the engine stops
//!   accepting documents.
//! - **Phase 2**: the read-only [`ComponentSet`] is built and every
//!   extractor's `post_process` runs once, in registration order.
//!
//! Failures are recorded per unit and never cancel sibling units. Only
//! contract violations end a run early.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};

use crate::component::ComponentRegistry;
use crate::config::Config;
use crate::container::{ComponentSet, Linkbase, Schema};
use crate::discovery::Discovery;
use crate::error::{ReadError, Result, Stage, TaxonomyError};
use crate::extractor::{Extracted, Extractor};
use crate::href::Href;
use crate::http_client::HttpClientConfig;
use crate::resolver::{
    DocumentKind, ResolverStats, UrlResolver, canonical_local, ends_with_archive, is_remote,
    local_path, resolve, split_archive_path,
};
use crate::xml::{XmlDocument, ns};

/// Lifecycle of one document in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Reading,
    Success,
    Error,
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Success | UnitStatus::Error)
    }
}

struct ReadingUnit {
    status: UnitStatus,
    schema: Arc<Schema>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitSummary {
    pub path: String,
    pub status: UnitStatus,
}

/// Time spent inside one extractor's hooks, both phases
#[derive(Debug, Clone, Serialize)]
pub struct ExtractorTiming {
    pub name: String,
    pub elapsed: Duration,
}

/// Outcome of a completed run
#[derive(Debug)]
pub struct TaxonomyReport {
    pub schema_set: Arc<ComponentSet>,
    pub errors: Vec<ReadError>,
    /// Every unit of the run, sorted by path
    pub units: Vec<UnitSummary>,
    /// In registration order
    pub timings: Vec<ExtractorTiming>,
    pub duration: Duration,
    pub resolver_stats: ResolverStats,
}

impl TaxonomyReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn unit(&self, path: &str) -> Option<&UnitSummary> {
        self.units.iter().find(|u| u.path == path)
    }
}

struct ExtractorSlot {
    extractor: Arc<dyn Extractor>,
    elapsed: Mutex<Duration>,
}

impl ExtractorSlot {
    fn name(&self) -> &str {
        self.extractor.name()
    }

    /// Run one hook, timing it and turning a panic into an error
    fn invoke<F>(&self, hook: F) -> Extracted
    where
        F: FnOnce(&dyn Extractor) -> Extracted,
    {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook(self.extractor.as_ref())));
        *self.elapsed.lock() += started.elapsed();

        outcome.unwrap_or_else(|payload| {
            Err(TaxonomyError::Internal {
                details: format!("extractor panicked: {}", panic_message(payload.as_ref())),
            })
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// State shared by every task of one run
struct RunState {
    resolver: UrlResolver,
    extractors: Vec<ExtractorSlot>,
    units: Mutex<HashMap<String, ReadingUnit>>,
    /// Accepting new units; only changed under the `units` lock
    reading: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    errors: Mutex<Vec<ReadError>>,
    fatal: Mutex<Option<TaxonomyError>>,
    linkbases_seen: Mutex<HashSet<String>>,
    permits: Arc<Semaphore>,
    runtime: Handle,
    fetch_deadline: Duration,
}

impl RunState {
    fn record(&self, stage: Stage, document: Option<&str>, error: TaxonomyError) {
        tracing::warn!(stage = %stage, document = document.unwrap_or("-"), error = %error, "recorded error");
        self.errors.lock().push(ReadError::new(stage, document, error));
    }

    fn set_fatal(&self, error: TaxonomyError) {
        tracing::error!(error = %error, "contract violation");
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(error);
        }
    }

    /// Route a hook failure: contract violations end the run, everything else
    /// joins the error list
    fn fail(&self, stage: Stage, document: Option<&str>, error: TaxonomyError) {
        if error.is_contract_violation() {
            self.set_fatal(error);
        } else {
            self.record(stage, document, error);
        }
    }

    fn queue(self: &Arc<Self>, path: String) -> Result<Arc<Schema>> {
        let mut units = self.units.lock();
        if !self.reading.load(Ordering::SeqCst) {
            return Err(TaxonomyError::ContractViolation {
                details: format!("document {} queued while the reader is not reading", path),
            });
        }
        if let Some(unit) = units.get(&path) {
            return Ok(Arc::clone(&unit.schema));
        }

        let schema = Arc::new(Schema::new(path.clone()));
        units.insert(
            path.clone(),
            ReadingUnit {
                status: UnitStatus::Pending,
                schema: Arc::clone(&schema),
            },
        );
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        drop(units);

        tracing::debug!(path = %path, "queued");
        let state = Arc::clone(self);
        self.runtime.spawn(async move { state.run_unit(path).await });
        Ok(schema)
    }

    fn set_status(&self, path: &str, status: UnitStatus) {
        if let Some(unit) = self.units.lock().get_mut(path) {
            unit.status = status;
        }
    }

    async fn run_unit(self: Arc<Self>, path: String) {
        let _guard = UnitGuard {
            state: Arc::clone(&self),
            path: path.clone(),
        };

        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                self.record(
                    Stage::Engine,
                    Some(&path),
                    TaxonomyError::Concurrency {
                        details: format!("failed to acquire worker permit: {}", e),
                    },
                );
                self.set_status(&path, UnitStatus::Error);
                return;
            }
        };

        self.set_status(&path, UnitStatus::Reading);
        let started = Instant::now();
        let clean = self.read_schema_unit(&path).await;
        let status = if clean {
            UnitStatus::Success
        } else {
            UnitStatus::Error
        };
        tracing::debug!(path = %path, ?status, elapsed = ?started.elapsed(), "unit finished");
        self.set_status(&path, status);
    }

    fn schema_of(&self, path: &str) -> Option<Arc<Schema>> {
        self.units.lock().get(path).map(|u| Arc::clone(&u.schema))
    }

    async fn load_document(&self, path: &str) -> Result<Arc<XmlDocument>> {
        let bytes = tokio::time::timeout(self.fetch_deadline, self.resolver.fetch(path))
            .await
            .map_err(|_| TaxonomyError::Timeout {
                url: path.to_string(),
                timeout_seconds: self.fetch_deadline.as_secs(),
            })??;

        let owned_path = path.to_string();
        let document = tokio::task::spawn_blocking(move || XmlDocument::parse(&bytes, &owned_path))
            .await
            .map_err(|e| TaxonomyError::Concurrency {
                details: format!("parse task failed: {}", e),
            })??;

        Ok(Arc::new(document))
    }

    /// Read one schema document; `false` if anything was recorded against it
    async fn read_schema_unit(self: &Arc<Self>, path: &str) -> bool {
        let Some(schema) = self.schema_of(path) else {
            self.record(
                Stage::Engine,
                Some(path),
                TaxonomyError::Internal {
                    details: "unit vanished from the unit table".to_string(),
                },
            );
            return false;
        };

        let document = match self.load_document(path).await {
            Ok(document) => document,
            Err(e) => {
                self.record(Stage::Engine, Some(path), e);
                return false;
            }
        };

        if !document.root.is(ns::XS, "schema") {
            self.record(
                Stage::Engine,
                Some(path),
                TaxonomyError::parse_failed(
                    path,
                    format!("expected an xs:schema root, found {}", document.root.name()),
                ),
            );
            return false;
        }

        if let Some(namespace) = document.root.attr("targetNamespace") {
            schema.set_namespace(namespace);
        }

        let mut clean = true;

        let locations: Vec<String> = document
            .root
            .children
            .iter()
            .filter(|c| c.is(ns::XS, "import") || c.is(ns::XS, "include"))
            .filter_map(|c| c.attr("schemaLocation").map(str::to_string))
            .collect();
        for location in locations {
            match resolve(Some(path), &location).and_then(|target| self.queue(target)) {
                Ok(imported) => schema.add_import(imported.path()),
                Err(e) => {
                    self.fail(Stage::Engine, Some(path), e);
                    clean = false;
                }
            }
        }

        for (reference, role) in linkbase_refs(&document) {
            clean &= self.read_linkbase(&schema, &reference, role).await;
        }

        clean &= self.run_schema_hooks(Arc::clone(&schema), document).await;
        clean
    }

    async fn read_linkbase(
        self: &Arc<Self>,
        schema: &Arc<Schema>,
        reference: &str,
        role: Option<String>,
    ) -> bool {
        let path = match Href::parse(Some(schema.path()), reference) {
            Ok(href) => href.document,
            Err(e) => {
                self.record(Stage::Engine, Some(schema.path()), e);
                return false;
            }
        };

        if !self.linkbases_seen.lock().insert(path.clone()) {
            tracing::debug!(path = %path, "linkbase already read in this run");
            return true;
        }

        let document = match self.load_document(&path).await {
            Ok(document) => document,
            Err(e) => {
                self.record(Stage::Engine, Some(&path), e);
                return false;
            }
        };
        if !document.root.is(ns::LINK, "linkbase") {
            self.record(
                Stage::Engine,
                Some(&path),
                TaxonomyError::parse_failed(
                    &path,
                    format!("expected a link:linkbase root, found {}", document.root.name()),
                ),
            );
            return false;
        }

        let linkbase = Arc::new(Linkbase::new(path.clone(), role, schema));
        let mut clean = self
            .run_linkbase_hooks(Arc::clone(&linkbase), document)
            .await;

        for handle in linkbase.registry().handles() {
            if let Err(e) = schema.registry().insert(handle) {
                self.record(Stage::Engine, Some(&path), e);
                clean = false;
            }
        }
        schema.add_linkbase(linkbase);
        clean
    }

    async fn run_schema_hooks(self: &Arc<Self>, schema: Arc<Schema>, document: Arc<XmlDocument>) -> bool {
        let state = Arc::clone(self);
        self.blocking(move || {
            let queue = DocumentQueue {
                state: Arc::clone(&state),
            };
            let mut clean = true;
            for slot in &state.extractors {
                let outcome = slot.invoke(|e| e.read_schema(&queue, &schema, &document));
                clean &= state.absorb(slot, schema.path(), outcome, schema.registry());
            }
            clean
        })
        .await
    }

    async fn run_linkbase_hooks(
        self: &Arc<Self>,
        linkbase: Arc<Linkbase>,
        document: Arc<XmlDocument>,
    ) -> bool {
        let state = Arc::clone(self);
        self.blocking(move || {
            let queue = DocumentQueue {
                state: Arc::clone(&state),
            };
            let mut clean = true;
            for slot in &state.extractors {
                let outcome = slot.invoke(|e| e.read_linkbase(&queue, &linkbase, &document));
                clean &= state.absorb(slot, linkbase.path(), outcome, linkbase.registry());
            }
            clean
        })
        .await
    }

    async fn blocking<F>(&self, work: F) -> bool
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        match tokio::task::spawn_blocking(work).await {
            Ok(clean) => clean,
            Err(e) => {
                self.record(
                    Stage::Engine,
                    None,
                    TaxonomyError::Concurrency {
                        details: format!("extractor task failed: {}", e),
                    },
                );
                false
            }
        }
    }

    /// Fold a hook's components into `registry`
    fn absorb(
        &self,
        slot: &ExtractorSlot,
        document: &str,
        outcome: Extracted,
        registry: &ComponentRegistry,
    ) -> bool {
        let stage = || Stage::Extractor(slot.name().to_string());
        match outcome {
            Ok(None) => true,
            Ok(Some(components)) => {
                let mut clean = true;
                for component in components {
                    if let Err(e) = registry.insert(component) {
                        self.record(stage(), Some(document), e);
                        clean = false;
                    }
                }
                clean
            }
            Err(e) => {
                self.fail(stage(), Some(document), e);
                false
            }
        }
    }

    fn unfinished_units(&self) -> usize {
        self.units
            .lock()
            .values()
            .filter(|u| !u.status.is_terminal())
            .count()
    }

    /// Wait until no unit is in flight, then stop accepting new ones
    async fn wait_for_quiescence(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight.load(Ordering::SeqCst) == 0 {
                let _units = self.units.lock();
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    self.reading.store(false, Ordering::SeqCst);
                    return;
                }
            }

            notified.await;
        }
    }
}

/// Decrements the in-flight count when a unit's task ends, however it ends
struct UnitGuard {
    state: Arc<RunState>,
    path: String,
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        let unfinished = {
            let mut units = self.state.units.lock();
            match units.get_mut(&self.path) {
                Some(unit) if !unit.status.is_terminal() => {
                    unit.status = UnitStatus::Error;
                    true
                }
                _ => false,
            }
        };
        if unfinished {
            self.state.record(
                Stage::Engine,
                Some(&self.path),
                TaxonomyError::Internal {
                    details: "worker stopped before finishing the document".to_string(),
                },
            );
        }

        if self.state.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.idle.notify_waiters();
        }
    }
}

/// Handle extractors use to request more documents during phase 1
#[derive(Clone)]
pub struct DocumentQueue {
    state: Arc<RunState>,
}

impl DocumentQueue {
    /// Schedule the schema at `reference` (resolved against `base`) and
    /// return its container, which may still be empty
    ///
    /// Queueing the same canonical path twice returns the same container.
    /// Calling this once the reader has stopped accepting documents is a
    /// `ContractViolation`.
    pub fn queue_document(&self, base: Option<&str>, reference: &str) -> Result<Arc<Schema>> {
        let href = Href::parse(base, reference)?;
        self.state.queue(href.document)
    }

    pub fn is_reading(&self) -> bool {
        self.state.reading.load(Ordering::SeqCst)
    }

    /// Units not yet in a terminal state
    pub fn unfinished_units(&self) -> usize {
        self.state.unfinished_units()
    }
}

impl std::fmt::Debug for DocumentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentQueue")
            .field("reading", &self.is_reading())
            .finish()
    }
}

/// Reads a taxonomy with a fixed, ordered set of extractors
pub struct TaxonomyReader {
    config: Config,
    extractors: Vec<Arc<dyn Extractor>>,
}

impl TaxonomyReader {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            extractors: Vec::new(),
        }
    }

    /// Add an extractor; hooks run in registration order
    pub fn register(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn extractor_names(&self) -> Vec<String> {
        self.extractors.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read the taxonomy at `entry` and run every extractor over it
    ///
    /// Per-document failures are collected in the report. The call itself
    /// only fails on a contract violation or a broken engine invariant.
    pub async fn read(&self, entry: &str) -> Result<TaxonomyReport> {
        let started = Instant::now();
        let fetch_deadline = HttpClientConfig::from(&self.config.network).download_deadline();

        let state = Arc::new(RunState {
            resolver: UrlResolver::new(&self.config)?,
            extractors: self
                .extractors
                .iter()
                .map(|e| ExtractorSlot {
                    extractor: Arc::clone(e),
                    elapsed: Mutex::new(Duration::ZERO),
                })
                .collect(),
            units: Mutex::new(HashMap::new()),
            reading: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            errors: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
            linkbases_seen: Mutex::new(HashSet::new()),
            permits: Arc::new(Semaphore::new(self.config.max_concurrent_units())),
            runtime: Handle::current(),
            fetch_deadline,
        });

        let outcome = self.run(&state, entry, started).await;
        state.resolver.close_archive();
        outcome
    }

    async fn run(&self, state: &Arc<RunState>, entry: &str, started: Instant) -> Result<TaxonomyReport> {
        tracing::info!(entry, extractors = state.extractors.len(), "reading taxonomy");

        state.reading.store(true, Ordering::SeqCst);
        if let Err(e) = self.queue_entry(state, entry).await {
            state.fail(Stage::Engine, Some(entry), e);
        }
        state.wait_for_quiescence().await;

        if let Some(fatal) = state.fatal.lock().take() {
            return Err(fatal);
        }

        let (schemas, units) = {
            let units = state.units.lock();
            if let Some((path, _)) = units.iter().find(|(_, u)| !u.status.is_terminal()) {
                return Err(TaxonomyError::Internal {
                    details: format!("unit {} still active after quiescence", path),
                });
            }
            let mut summaries: Vec<UnitSummary> = units
                .iter()
                .map(|(path, unit)| UnitSummary {
                    path: path.clone(),
                    status: unit.status,
                })
                .collect();
            summaries.sort_by(|a, b| a.path.cmp(&b.path));
            let schemas: Vec<Arc<Schema>> = units.values().map(|u| Arc::clone(&u.schema)).collect();
            (schemas, summaries)
        };

        let mut set = ComponentSet::new();
        for schema in schemas {
            set.add(schema)?;
        }
        let set = Arc::new(set);
        tracing::info!(schemas = set.len(), elapsed = ?started.elapsed(), "discovery finished");

        self.post_process(state, &set).await?;

        let errors = std::mem::take(&mut *state.errors.lock());
        let timings = state
            .extractors
            .iter()
            .map(|slot| ExtractorTiming {
                name: slot.name().to_string(),
                elapsed: *slot.elapsed.lock(),
            })
            .collect();

        let report = TaxonomyReport {
            schema_set: set,
            errors,
            units,
            timings,
            duration: started.elapsed(),
            resolver_stats: state.resolver.stats(),
        };
        tracing::info!(
            schemas = report.schema_set.len(),
            errors = report.errors.len(),
            elapsed = ?report.duration,
            "taxonomy read"
        );
        Ok(report)
    }

    async fn post_process(&self, state: &Arc<RunState>, set: &Arc<ComponentSet>) -> Result<()> {
        let worker_state = Arc::clone(state);
        let worker_set = Arc::clone(set);
        let completed = tokio::task::spawn_blocking(move || {
            for slot in &worker_state.extractors {
                let outcome = slot.invoke(|e| e.post_process(&worker_set));
                match outcome {
                    Err(e) if e.is_contract_violation() => return Err(e),
                    outcome => {
                        worker_state.absorb(slot, "post-process", outcome, worker_set.registry());
                    }
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| TaxonomyError::Concurrency {
            details: format!("post-processing task failed: {}", e),
        })?;

        completed.inspect_err(|e| tracing::error!(error = %e, "contract violation"))
    }

    /// Queue the documents an entry point stands for
    async fn queue_entry(&self, state: &Arc<RunState>, entry: &str) -> Result<()> {
        let entry = normalize_entry(entry)?;
        state.resolver.set_entry_point(&entry);
        let discovery = Discovery::from_config(&self.config.engine)?;

        if let Some((archive, inner)) = split_archive_path(&entry) {
            let listing = state.resolver.load_archive(archive).await?;
            state.queue(format!("{}/{}", listing.path, inner))?;
            return Ok(());
        }

        if ends_with_archive(&entry) {
            let listing = state.resolver.load_archive(&entry).await?;
            let selected = discovery.select_entries(&listing.entries)?;
            tracing::info!(archive = %listing.path, documents = selected.len(), "queueing archive");
            for name in selected {
                state.queue(format!("{}/{}", listing.path, name))?;
            }
            return Ok(());
        }

        if DocumentKind::of(&entry) == DocumentKind::Local {
            let local = local_path(&entry);
            if tokio::fs::metadata(&local).await.is_ok_and(|m| m.is_dir()) {
                let files = discovery.discover(&local).await?;
                tracing::info!(directory = %local.display(), documents = files.len(), "queueing directory");
                for file in files {
                    state.queue(canonical_local(&file))?;
                }
                return Ok(());
            }
        }

        state.queue(entry)?;
        Ok(())
    }
}

/// Canonicalize an entry argument, anchoring relative paths at the working
/// directory
fn normalize_entry(entry: &str) -> Result<String> {
    let trimmed = entry.trim();
    if is_remote(trimmed) || trimmed.starts_with("file:") {
        return resolve(None, trimmed);
    }
    let path = Path::new(trimmed);
    if path.is_absolute() {
        return resolve(None, trimmed);
    }
    let cwd = std::env::current_dir()?;
    Ok(canonical_local(&cwd.join(path)))
}

/// `(href, role)` of every `link:linkbaseRef` in the schema's annotations
fn linkbase_refs(document: &XmlDocument) -> Vec<(String, Option<String>)> {
    document
        .root
        .children_named(ns::XS, "annotation")
        .flat_map(|a| a.children_named(ns::XS, "appinfo"))
        .flat_map(|a| a.children_named(ns::LINK, "linkbaseRef"))
        .filter_map(|r| {
            let href = r.attr_ns(ns::XLINK, "href")?;
            Some((href.to_string(), r.attr_ns(ns::XLINK, "role").map(str::to_string)))
        })
        .collect()
}
