use std::marker::PhantomData;
use std::sync::Arc;

use crate::component::{ComponentData, ComponentHandle, ShellTable};
use crate::container::{ComponentSet, Linkbase, Schema};
use crate::engine::DocumentQueue;
use crate::error::TaxonomyError;
use crate::extractor::{Extracted, Extractor};
use crate::xlink::XlinkNode;
use crate::xml::{QName, XmlDocument, XmlElement, ns};

/// A component declared by URI in a schema's appinfo and referenced from
/// linkbases
pub trait UriDeclared: ComponentData + Sized {
    /// Extractor name
    const NAME: &'static str;
    /// Declaring element, e.g. `roleType`
    const TYPE_ELEMENT: &'static str;
    /// Referencing element, e.g. `roleRef`
    const REF_ELEMENT: &'static str;
    /// Attribute carrying the URI on both
    const URI_ATTRIBUTE: &'static str;

    fn from_declaration(declaration: &XmlElement) -> Self;
}

/// Fields shared by role and arcrole declarations
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    /// XML id of the declaring element
    pub id: Option<String>,
    pub definition: Option<String>,
    pub used_on: Vec<QName>,
}

impl Declaration {
    fn read(declaration: &XmlElement) -> Self {
        Self {
            id: declaration.attr("id").map(str::to_string),
            definition: declaration
                .child(ns::LINK, "definition")
                .map(|d| d.text().to_string()),
            used_on: declaration
                .children_named(ns::LINK, "usedOn")
                .filter_map(|u| u.resolve_qname(u.text()))
                .collect(),
        }
    }
}

/// `link:roleType`
#[derive(Debug, Clone)]
pub struct RoleType {
    pub declaration: Declaration,
}

impl ComponentData for RoleType {
    const KIND: &'static str = "role";
}

impl UriDeclared for RoleType {
    const NAME: &'static str = "roles";
    const TYPE_ELEMENT: &'static str = "roleType";
    const REF_ELEMENT: &'static str = "roleRef";
    const URI_ATTRIBUTE: &'static str = "roleURI";

    fn from_declaration(declaration: &XmlElement) -> Self {
        Self {
            declaration: Declaration::read(declaration),
        }
    }
}

/// `link:arcroleType`
#[derive(Debug, Clone)]
pub struct Arcrole {
    pub declaration: Declaration,
    /// `any`, `undirected` or `none`
    pub cycles_allowed: Option<String>,
}

impl ComponentData for Arcrole {
    const KIND: &'static str = "arcrole";
}

impl UriDeclared for Arcrole {
    const NAME: &'static str = "arcroles";
    const TYPE_ELEMENT: &'static str = "arcroleType";
    const REF_ELEMENT: &'static str = "arcroleRef";
    const URI_ATTRIBUTE: &'static str = "arcroleURI";

    fn from_declaration(declaration: &XmlElement) -> Self {
        Self {
            declaration: Declaration::read(declaration),
            cycles_allowed: declaration.attr("cyclesAllowed").map(str::to_string),
        }
    }
}

/// Reads role or arcrole declarations, keyed by URI across the whole run
pub struct UriTypeExtractor<T: UriDeclared> {
    table: ShellTable<T>,
    _declared: PhantomData<fn() -> T>,
}

pub type RoleExtractor = UriTypeExtractor<RoleType>;
pub type ArcroleExtractor = UriTypeExtractor<Arcrole>;

impl<T: UriDeclared> UriTypeExtractor<T> {
    pub fn new() -> Self {
        Self {
            table: ShellTable::new(),
            _declared: PhantomData,
        }
    }

    pub fn get(&self, uri: &str) -> Option<Arc<crate::component::Component<T>>> {
        self.table.get(uri)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl<T: UriDeclared> Default for UriTypeExtractor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: UriDeclared> Extractor for UriTypeExtractor<T> {
    fn name(&self) -> &str {
        T::NAME
    }

    fn read_schema(
        &self,
        _queue: &DocumentQueue,
        schema: &Arc<Schema>,
        document: &XmlDocument,
    ) -> Extracted {
        let declarations = document
            .root
            .children_named(ns::XS, "annotation")
            .flat_map(|a| a.children_named(ns::XS, "appinfo"))
            .flat_map(|a| a.children_named(ns::LINK, T::TYPE_ELEMENT));

        let mut defined = Vec::new();
        let mut first_error: Option<TaxonomyError> = None;
        for declaration in declarations {
            let Some(uri) = declaration.attr(T::URI_ATTRIBUTE) else {
                continue;
            };
            match self
                .table
                .define(uri.trim(), schema.path(), T::from_declaration(declaration))
            {
                Ok(component) => defined.push(ComponentHandle::from(component)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                // Components of a failed hook are not folded in by the engine;
                // keep the declarations that did not conflict
                for handle in defined {
                    schema.registry().insert(handle)?;
                }
                Err(e)
            }
            None if defined.is_empty() => Ok(None),
            None => Ok(Some(defined)),
        }
    }

    fn read_linkbase(
        &self,
        queue: &DocumentQueue,
        linkbase: &Arc<Linkbase>,
        document: &XmlDocument,
    ) -> Extracted {
        let mut shells = Vec::new();
        for reference in document.root.children_named(ns::LINK, T::REF_ELEMENT) {
            let Some(uri) = reference.attr(T::URI_ATTRIBUTE) else {
                continue;
            };
            let node = XlinkNode::from_element(linkbase.path(), reference)?;
            if let Some(href) = &node.href {
                queue.queue_document(None, &href.document)?;
            }
            let shell = self.table.get_or_create(uri.trim(), linkbase.path());
            shells.push(ComponentHandle::from(shell));
        }

        Ok(if shells.is_empty() { None } else { Some(shells) })
    }

    fn post_process(&self, _set: &ComponentSet) -> Extracted {
        let all = self.table.all();
        let undefined = all.iter().filter(|c| c.is_shell()).count();
        if undefined > 0 {
            tracing::info!(kind = T::KIND, undefined, "referenced but never declared");
        }
        Ok(Some(all.into_iter().map(ComponentHandle::from).collect()))
    }
}
