use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::component::{Component, ComponentData, ComponentRegistry};
use crate::error::{Result, TaxonomyError};
use crate::href::Href;

/// A schema document: namespace, imports, referenced linkbases and the
/// components read from it
pub struct Schema {
    path: String,
    namespace: RwLock<Option<String>>,
    imports: RwLock<Vec<String>>,
    linkbases: RwLock<Vec<Arc<Linkbase>>>,
    registry: ComponentRegistry,
}

impl Schema {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: RwLock::new(None),
            imports: RwLock::new(Vec::new()),
            linkbases: RwLock::new(Vec::new()),
            registry: ComponentRegistry::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `targetNamespace`, known once the document has been parsed
    pub fn namespace(&self) -> Option<String> {
        self.namespace.read().clone()
    }

    pub fn set_namespace(&self, namespace: impl Into<String>) {
        *self.namespace.write() = Some(namespace.into());
    }

    /// Canonical paths of imported and included schemas
    pub fn imports(&self) -> Vec<String> {
        self.imports.read().clone()
    }

    pub fn add_import(&self, path: impl Into<String>) {
        let path = path.into();
        let mut imports = self.imports.write();
        if !imports.contains(&path) {
            imports.push(path);
        }
    }

    pub fn linkbases(&self) -> Vec<Arc<Linkbase>> {
        self.linkbases.read().clone()
    }

    pub fn add_linkbase(&self, linkbase: Arc<Linkbase>) {
        self.linkbases.write().push(linkbase);
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("path", &self.path)
            .field("namespace", &*self.namespace.read())
            .field("components", &self.registry.len())
            .finish()
    }
}

/// A linkbase document read on behalf of a schema
pub struct Linkbase {
    path: String,
    role: Option<String>,
    schema: String,
    namespace: Option<String>,
    registry: ComponentRegistry,
}

impl Linkbase {
    pub fn new(
        path: impl Into<String>,
        role: Option<String>,
        schema: &Schema,
    ) -> Self {
        Self {
            path: path.into(),
            role,
            schema: schema.path().to_string(),
            namespace: schema.namespace(),
            registry: ComponentRegistry::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `xlink:role` of the `linkbaseRef` that led here
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// Canonical path of the schema that referenced this linkbase
    pub fn schema_path(&self) -> &str {
        &self.schema
    }

    /// Target namespace of the referencing schema
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for Linkbase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linkbase")
            .field("path", &self.path)
            .field("role", &self.role)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Read-only index of every schema in a run
///
/// Built once all documents are read. Lookups by [`Href`] go to the schema
/// at the href's document and then to the resource id inside it.
#[derive(Default)]
pub struct ComponentSet {
    schemas: BTreeMap<String, Arc<Schema>>,
    registry: ComponentRegistry,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `schema` by its path; two schemas with one path is an engine bug
    pub fn add(&mut self, schema: Arc<Schema>) -> Result<()> {
        let path = schema.path().to_string();
        if self.schemas.contains_key(&path) {
            return Err(TaxonomyError::Internal {
                details: format!("schema path collision in component set: {}", path),
            });
        }
        self.schemas.insert(path, schema);
        Ok(())
    }

    pub fn schema(&self, path: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(path)
    }

    /// Schemas in path order
    pub fn schemas(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Components contributed by post-processing
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn component<T: ComponentData>(&self, href: &Href) -> Option<Arc<Component<T>>> {
        let id = href.resource_id.as_deref()?;
        self.schemas.get(&href.document)?.registry().get::<T>(id)
    }

    /// Like [`component`](Self::component), with a dangling href reported as
    /// `ReferenceUnresolved`
    pub fn resolve<T: ComponentData>(&self, href: &Href) -> Result<Arc<Component<T>>> {
        self.component(href)
            .ok_or_else(|| TaxonomyError::ReferenceUnresolved {
                href: href.to_string(),
            })
    }

    /// Look `id` up in the set-level registry, then in every schema
    pub fn find<T: ComponentData>(&self, id: &str) -> Option<Arc<Component<T>>> {
        self.registry
            .get::<T>(id)
            .or_else(|| self.schemas.values().find_map(|s| s.registry().get::<T>(id)))
    }

    /// Every distinct component of type `T` in the set
    pub fn components<T: ComponentData>(&self) -> Vec<Arc<Component<T>>> {
        let mut seen = HashSet::new();
        self.registry
            .all::<T>()
            .into_iter()
            .chain(self.schemas.values().flat_map(|s| s.registry().all::<T>()))
            .filter(|c| seen.insert(Arc::as_ptr(c)))
            .collect()
    }

    /// Schemas imported by `schema` that are part of the set
    pub fn imports(&self, schema: &Schema) -> Vec<Arc<Schema>> {
        schema
            .imports()
            .iter()
            .filter_map(|path| self.schemas.get(path).cloned())
            .collect()
    }
}

impl std::fmt::Debug for ComponentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentSet")
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .field("components", &self.registry.len())
            .finish()
    }
}
