//! Components and the tables that keep them unique
//!
//! A component is created as a shell the first time its id is seen and is
//! filled in place once its defining document is read. Every reference to the
//! same `(type, id)` shares one `Arc<Component<T>>`, so links made before the
//! definition arrived stay valid afterwards.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};

use crate::error::{Result, TaxonomyError};

/// Payload of one component family
pub trait ComponentData: Send + Sync + 'static {
    /// Family name used in reports and conflict messages
    const KIND: &'static str;
}

pub struct Component<T: ComponentData> {
    id: String,
    owner: RwLock<String>,
    data: RwLock<Option<T>>,
}

impl<T: ComponentData> Component<T> {
    /// A placeholder for `id`, owned by the container that first referenced it
    pub fn shell(id: impl Into<String>, owner: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            owner: RwLock::new(owner.into()),
            data: RwLock::new(None),
        })
    }

    pub fn new(id: impl Into<String>, owner: impl Into<String>, data: T) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            owner: RwLock::new(owner.into()),
            data: RwLock::new(Some(data)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical path of the defining container (or of the first referrer,
    /// while this is still a shell)
    pub fn owner(&self) -> String {
        self.owner.read().clone()
    }

    pub fn is_shell(&self) -> bool {
        self.data.read().is_none()
    }

    pub fn data(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.data.read(), |data| data.as_ref()).ok()
    }

    /// Fill a shell with its definition
    ///
    /// Fails with `StructuralViolation` if the component is already defined.
    pub fn fill(&self, owner: &str, data: T) -> Result<()> {
        let mut slot = self.data.write();
        if slot.is_some() {
            return Err(TaxonomyError::structural(format!(
                "{} '{}' defined in {} is already defined in {}",
                T::KIND,
                self.id,
                owner,
                self.owner.read()
            )));
        }
        *slot = Some(data);
        *self.owner.write() = owner.to_string();
        Ok(())
    }

    /// Mutate a filled component; returns `None` for a shell
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.data.write().as_mut().map(f)
    }
}

impl<T: ComponentData + fmt::Debug> fmt::Debug for Component<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Same lock order as `fill`: data, then owner
        let data = self.data.read();
        let owner = self.owner.read();
        f.debug_struct("Component")
            .field("kind", &T::KIND)
            .field("id", &self.id)
            .field("owner", &*owner)
            .field("data", &*data)
            .finish()
    }
}

/// Type-erased shared reference to a component of any family
#[derive(Clone)]
pub struct ComponentHandle {
    kind: &'static str,
    type_id: TypeId,
    id: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl<T: ComponentData> From<Arc<Component<T>>> for ComponentHandle {
    fn from(component: Arc<Component<T>>) -> Self {
        Self {
            kind: T::KIND,
            type_id: TypeId::of::<Component<T>>(),
            id: component.id.clone(),
            inner: component,
        }
    }
}

impl ComponentHandle {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is<T: ComponentData>(&self) -> bool {
        self.type_id == TypeId::of::<Component<T>>()
    }

    pub fn downcast<T: ComponentData>(&self) -> Option<Arc<Component<T>>> {
        Arc::clone(&self.inner).downcast::<Component<T>>().ok()
    }

    /// Whether both handles refer to the same component instance
    pub fn ptr_eq(&self, other: &ComponentHandle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.inner), Arc::as_ptr(&other.inner))
    }

    fn key(&self) -> (TypeId, String) {
        (self.type_id, self.id.clone())
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.id)
    }
}

#[derive(Default)]
struct RegistryInner {
    order: Vec<ComponentHandle>,
    index: HashMap<(TypeId, String), usize>,
}

/// Components contributed by one container, unique per `(type, id)`
#[derive(Default)]
pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component
    ///
    /// Returns `Ok(false)` when this exact instance is already present and a
    /// `StructuralViolation` when a different instance holds the same id.
    pub fn insert(&self, handle: ComponentHandle) -> Result<bool> {
        let mut inner = self.inner.write();
        let key = handle.key();
        if let Some(&existing) = inner.index.get(&key) {
            if inner.order[existing].ptr_eq(&handle) {
                return Ok(false);
            }
            return Err(TaxonomyError::structural(format!(
                "conflicting {} definitions for id '{}'",
                handle.kind, handle.id
            )));
        }
        let position = inner.order.len();
        inner.order.push(handle);
        inner.index.insert(key, position);
        Ok(true)
    }

    pub fn get<T: ComponentData>(&self, id: &str) -> Option<Arc<Component<T>>> {
        let inner = self.inner.read();
        inner
            .index
            .get(&(TypeId::of::<Component<T>>(), id.to_string()))
            .and_then(|&i| inner.order[i].downcast::<T>())
    }

    /// Every component of type `T`, in registration order
    pub fn all<T: ComponentData>(&self) -> Vec<Arc<Component<T>>> {
        self.inner
            .read()
            .order
            .iter()
            .filter_map(ComponentHandle::downcast::<T>)
            .collect()
    }

    pub fn count<T: ComponentData>(&self) -> usize {
        self.inner.read().order.iter().filter(|h| h.is::<T>()).count()
    }

    pub fn handles(&self) -> Vec<ComponentHandle> {
        self.inner.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Id-to-component map of one extractor, with atomic check-then-insert
pub struct ShellTable<T: ComponentData> {
    map: Mutex<HashMap<String, Arc<Component<T>>>>,
}

impl<T: ComponentData> Default for ShellTable<T> {
    fn default() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: ComponentData> ShellTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The component for `id`, creating a shell owned by `owner` if unseen
    pub fn get_or_create(&self, id: &str, owner: &str) -> Arc<Component<T>> {
        let mut map = self.map.lock();
        Arc::clone(
            map.entry(id.to_string())
                .or_insert_with(|| Component::shell(id, owner)),
        )
    }

    /// Define `id`, filling an existing shell in place
    ///
    /// The table lock is held across the fill, so of two simultaneous
    /// definitions the first to take the lock wins and the other gets a
    /// `StructuralViolation`.
    pub fn define(&self, id: &str, owner: &str, data: T) -> Result<Arc<Component<T>>> {
        let mut map = self.map.lock();
        let component = Arc::clone(
            map.entry(id.to_string())
                .or_insert_with(|| Component::shell(id, owner)),
        );
        component.fill(owner, data)?;
        Ok(component)
    }

    /// Define `id`, or fold `data` into the existing definition with `merge`
    pub fn define_or_merge(
        &self,
        id: &str,
        owner: &str,
        data: T,
        merge: impl FnOnce(&mut T, T),
    ) -> Result<Arc<Component<T>>> {
        let mut map = self.map.lock();
        let component = Arc::clone(
            map.entry(id.to_string())
                .or_insert_with(|| Component::shell(id, owner)),
        );
        if component.is_shell() {
            component.fill(owner, data)?;
        } else {
            component.update(|existing| merge(existing, data));
        }
        Ok(component)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Component<T>>> {
        self.map.lock().get(id).cloned()
    }

    /// Every component, sorted by id
    pub fn all(&self) -> Vec<Arc<Component<T>>> {
        let mut all: Vec<_> = self.map.lock().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
