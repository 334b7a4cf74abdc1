#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use taxonomy_reader::config::Config;
use taxonomy_reader::container::{ComponentSet, Linkbase, Schema};
use taxonomy_reader::engine::DocumentQueue;
use taxonomy_reader::error::TaxonomyError;
use taxonomy_reader::extractor::{Extracted, Extractor};
use taxonomy_reader::resolver::canonical_local;
use taxonomy_reader::xml::XmlDocument;

pub const PRESENTATION_REF: &str = "http://www.xbrl.org/2003/role/presentationLinkbaseRef";
pub const CALCULATION_REF: &str = "http://www.xbrl.org/2003/role/calculationLinkbaseRef";
pub const DEFINITION_REF: &str = "http://www.xbrl.org/2003/role/definitionLinkbaseRef";
pub const LABEL_REF: &str = "http://www.xbrl.org/2003/role/labelLinkbaseRef";

/// Configuration isolated to `temp_dir`, without retries
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::with_cache_dir(temp_dir.path().join("cache"));
    config.network.retry_attempts = 0;
    config.network.timeout_seconds = 5;
    config.engine.temp_dir = Some(temp_dir.path().join("tmp"));
    config
}

/// Write `content` to `root/relative`, creating parent directories
pub fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

pub fn canonical(path: &Path) -> String {
    canonical_local(path)
}

/// Builder for schema fixtures
#[derive(Default)]
pub struct SchemaFixture {
    namespace: String,
    imports: Vec<String>,
    linkbases: Vec<(String, Option<String>)>,
    body: String,
}

impl SchemaFixture {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    pub fn import(mut self, location: &str) -> Self {
        self.imports.push(location.to_string());
        self
    }

    pub fn linkbase(mut self, href: &str, role: Option<&str>) -> Self {
        self.linkbases.push((href.to_string(), role.map(str::to_string)));
        self
    }

    pub fn element(mut self, id: &str, name: &str) -> Self {
        self.body.push_str(&format!(
            r#"  <xs:element id="{}" name="{}" type="xbrli:monetaryItemType" substitutionGroup="xbrli:item" xbrli:periodType="instant"/>
"#,
            id, name
        ));
        self
    }

    pub fn raw(mut self, xml: &str) -> Self {
        self.body.push_str(xml);
        self
    }

    pub fn build(&self) -> String {
        let imports: String = self
            .imports
            .iter()
            .map(|location| {
                format!(
                    "  <xs:import namespace=\"urn:imported\" schemaLocation=\"{}\"/>\n",
                    location
                )
            })
            .collect();

        let refs: String = self
            .linkbases
            .iter()
            .map(|(href, role)| {
                let role = role
                    .as_ref()
                    .map(|r| format!(" xlink:role=\"{}\"", r))
                    .unwrap_or_default();
                format!(
                    "      <link:linkbaseRef xlink:type=\"simple\" xlink:href=\"{}\"{} xlink:arcrole=\"http://www.w3.org/1999/xlink/properties/linkbase\"/>\n",
                    href, role
                )
            })
            .collect();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
    xmlns:link="http://www.xbrl.org/2003/linkbase"
    xmlns:xlink="http://www.w3.org/1999/xlink"
    xmlns:xbrli="http://www.xbrl.org/2003/instance"
    targetNamespace="{}" elementFormDefault="qualified">
{}  <xs:annotation>
    <xs:appinfo>
{}    </xs:appinfo>
  </xs:annotation>
{}</xs:schema>
"#,
            self.namespace, imports, refs, self.body
        )
    }
}

/// A `link:linkbase` document wrapping `body`
pub fn linkbase(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase"
    xmlns:xlink="http://www.w3.org/1999/xlink"
    xmlns:gen="http://xbrl.org/2008/generic"
    xmlns:label="http://xbrl.org/2008/label">
{}</link:linkbase>
"#,
        body
    )
}

#[derive(Clone)]
struct Route {
    status: u16,
    body: Vec<u8>,
}

/// Minimal HTTP/1.1 responder on `127.0.0.1:0` counting requests per path
pub struct TestServer {
    port: u16,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let routes: Arc<Mutex<HashMap<String, Route>>> = Arc::default();
        let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

        let server_routes = Arc::clone(&routes);
        let server_hits = Arc::clone(&hits);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let routes = Arc::clone(&server_routes);
                let hits = Arc::clone(&server_hits);
                std::thread::spawn(move || handle(stream, &routes, &hits));
            }
        });

        Self { port, routes, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn serve(&self, path: &str, body: &str) {
        self.routes.lock().insert(
            path.to_string(),
            Route {
                status: 200,
                body: body.as_bytes().to_vec(),
            },
        );
    }

    pub fn serve_bytes(&self, path: &str, body: Vec<u8>) {
        self.routes
            .lock()
            .insert(path.to_string(), Route { status: 200, body });
    }

    /// Answer `path` with `200 OK` and no content
    pub fn serve_empty(&self, path: &str) {
        self.serve_bytes(path, Vec::new());
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().values().sum()
    }
}

fn handle(
    stream: TcpStream,
    routes: &Mutex<HashMap<String, Route>>,
    hits: &Mutex<HashMap<String, usize>>,
) {
    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) => break,
            Ok(_) if header == "\r\n" || header == "\n" => break,
            Ok(_) => continue,
            Err(_) => return,
        }
    }

    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();
    *hits.lock().entry(path.clone()).or_insert(0) += 1;

    let route = routes.lock().get(&path).cloned().unwrap_or(Route {
        status: 404,
        body: b"not found".to_vec(),
    });
    let reason = if route.status == 200 { "OK" } else { "Not Found" };
    let mut writer = &stream;
    let _ = write!(
        writer,
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: application/xml\r\nConnection: close\r\n\r\n",
        route.status,
        reason,
        route.body.len()
    );
    let _ = writer.write_all(&route.body);
    let _ = writer.flush();
}

/// What a [`RecordingExtractor`] should do besides recording
#[derive(Default, Clone)]
pub struct Behavior {
    /// Queue `(base, reference)` while reading the schema whose path ends with
    /// the key
    pub queue_on_schema: Vec<(String, String)>,
    /// Fail reading schemas whose path ends with this
    pub fail_on_schema: Option<String>,
    /// Panic while reading schemas whose path ends with this
    pub panic_on_schema: Option<String>,
    /// Queue a document during post-processing
    pub queue_after_reading: bool,
}

/// Records every hook call; optionally misbehaves
#[derive(Default)]
pub struct RecordingExtractor {
    name: String,
    behavior: Behavior,
    pub schemas: Mutex<Vec<String>>,
    pub linkbases: Mutex<Vec<String>>,
    pub post_processed: Mutex<Vec<usize>>,
    /// `(unfinished units, still reading)` seen from post-processing
    pub barrier: Mutex<Option<(usize, bool)>>,
    pub post_process_result: Mutex<Option<Result<(), String>>>,
    queue: Mutex<Option<DocumentQueue>>,
    order: Option<Arc<Mutex<Vec<String>>>>,
}

impl RecordingExtractor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Append the extractor's name to `order` on post-processing
    pub fn with_order_log(mut self, order: Arc<Mutex<Vec<String>>>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn schema_count(&self, suffix: &str) -> usize {
        self.schemas
            .lock()
            .iter()
            .filter(|p| p.ends_with(suffix))
            .count()
    }

    pub fn linkbase_count(&self, suffix: &str) -> usize {
        self.linkbases
            .lock()
            .iter()
            .filter(|p| p.ends_with(suffix))
            .count()
    }
}

impl Extractor for RecordingExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_schema(
        &self,
        queue: &DocumentQueue,
        schema: &Arc<Schema>,
        _document: &XmlDocument,
    ) -> Extracted {
        let path = schema.path().to_string();
        self.schemas.lock().push(path.clone());
        self.queue.lock().get_or_insert_with(|| queue.clone());

        if let Some(suffix) = &self.behavior.panic_on_schema
            && path.ends_with(suffix.as_str())
        {
            panic!("extractor bug while reading {}", path);
        }
        if let Some(suffix) = &self.behavior.fail_on_schema
            && path.ends_with(suffix.as_str())
        {
            return Err(TaxonomyError::StructuralViolation {
                details: format!("refusing {}", path),
            });
        }
        for (suffix, reference) in &self.behavior.queue_on_schema {
            if path.ends_with(suffix.as_str()) {
                queue.queue_document(Some(&path), reference)?;
            }
        }
        Ok(None)
    }

    fn read_linkbase(
        &self,
        _queue: &DocumentQueue,
        linkbase: &Arc<Linkbase>,
        _document: &XmlDocument,
    ) -> Extracted {
        self.linkbases.lock().push(linkbase.path().to_string());
        Ok(None)
    }

    fn post_process(&self, set: &ComponentSet) -> Extracted {
        self.post_processed.lock().push(set.len());
        if let Some(order) = &self.order {
            order.lock().push(self.name.clone());
        }

        let queue = self.queue.lock().clone();
        if let Some(queue) = queue {
            *self.barrier.lock() = Some((queue.unfinished_units(), queue.is_reading()));
            if self.behavior.queue_after_reading {
                queue.queue_document(None, "/late/arrival.xsd")?;
            }
        }
        Ok(None)
    }
}
