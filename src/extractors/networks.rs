//! Presentation, calculation and definition networks
//!
//! All three share one shape with the table groups of
//! [`tables`](super::tables): extended links of a given element name whose
//! locators point at elements. Phase 1 keeps each link as a [`LinkGraph`]
//! (merging links that share a role within one namespace); phase 2 resolves
//! the locators against the complete set and materializes [`NetworkNode`]
//! trees.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::component::{Component, ComponentData, ComponentHandle, ShellTable};
use crate::container::{ComponentSet, Linkbase};
use crate::engine::DocumentQueue;
use crate::extractor::{Extracted, Extractor};
use crate::href::Href;
use crate::link_graph::{ArcRecord, LinkGraph};
use crate::xml::{XmlDocument, ns};

use super::elements::Element;
use super::roles::{Arcrole, RoleType};

const DEFAULT_LINK_ROLE: &str = "http://www.xbrl.org/2003/role/link";

/// Static description of one network family
pub trait NetworkKind: fmt::Debug + Send + Sync + 'static {
    const KIND: &'static str;
    /// Extractor name
    const NAME: &'static str;
    /// Namespace of the extended link element
    const LINK_NAMESPACE: &'static str = ns::LINK;
    /// Local name of the extended link element
    const LINK: &'static str;
    /// `xlink:role` of a `linkbaseRef` pointing at this kind of linkbase
    const LINKBASE_REF_ROLE: &'static str;
    /// Whether every locator may have at most one parent
    const REQUIRE_TREE: bool;

    /// Whether a linkbase holds networks of this kind
    fn applies(linkbase: &Linkbase, document: &XmlDocument) -> bool {
        match linkbase.role() {
            Some(role) => role == Self::LINKBASE_REF_ROLE,
            None => document.root.child(Self::LINK_NAMESPACE, Self::LINK).is_some(),
        }
    }
}

#[derive(Debug)]
pub struct Presentation;

impl NetworkKind for Presentation {
    const KIND: &'static str = "presentation";
    const NAME: &'static str = "presentations";
    const LINK: &'static str = "presentationLink";
    const LINKBASE_REF_ROLE: &'static str = "http://www.xbrl.org/2003/role/presentationLinkbaseRef";
    const REQUIRE_TREE: bool = false;
}

#[derive(Debug)]
pub struct Calculation;

impl NetworkKind for Calculation {
    const KIND: &'static str = "calculation";
    const NAME: &'static str = "calculations";
    const LINK: &'static str = "calculationLink";
    const LINKBASE_REF_ROLE: &'static str = "http://www.xbrl.org/2003/role/calculationLinkbaseRef";
    const REQUIRE_TREE: bool = true;
}

#[derive(Debug)]
pub struct Definition;

impl NetworkKind for Definition {
    const KIND: &'static str = "definition";
    const NAME: &'static str = "definitions";
    const LINK: &'static str = "definitionLink";
    const LINKBASE_REF_ROLE: &'static str = "http://www.xbrl.org/2003/role/definitionLinkbaseRef";
    const REQUIRE_TREE: bool = false;
}

/// One resolved position in a network
#[derive(Debug, Clone)]
pub struct NetworkNode {
    pub href: Href,
    /// `None` when the locator does not point at a known element
    pub element: Option<Arc<Component<Element>>>,
    /// Arcrole of the arc leading here; roots have none
    pub arcrole: Option<String>,
    pub arcrole_type: Option<Arc<Component<Arcrole>>>,
    pub order: Option<f64>,
    pub weight: Option<f64>,
    pub preferred_label: Option<String>,
    pub children: Vec<NetworkNode>,
}

impl NetworkNode {
    /// Nodes in this subtree, itself included
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(NetworkNode::count).sum::<usize>()
    }
}

/// All extended links of one kind sharing a role within one namespace
#[derive(Debug)]
pub struct Network<K: NetworkKind> {
    pub role: String,
    pub namespace: Option<String>,
    /// Locator graph gathered while reading
    pub graph: LinkGraph,
    /// Declaration of `role`, when one was read
    pub role_type: Option<Arc<Component<RoleType>>>,
    pub roots: Vec<NetworkNode>,
    /// Nodes whose locator did not resolve to an element
    pub unresolved: usize,
    _kind: PhantomData<fn() -> K>,
}

impl<K: NetworkKind> Network<K> {
    fn new(role: String, namespace: Option<String>, graph: LinkGraph) -> Self {
        Self {
            role,
            namespace,
            graph,
            role_type: None,
            roots: Vec::new(),
            unresolved: 0,
            _kind: PhantomData,
        }
    }

    pub fn node_count(&self) -> usize {
        self.roots.iter().map(NetworkNode::count).sum()
    }
}

impl<K: NetworkKind> ComponentData for Network<K> {
    const KIND: &'static str = K::KIND;
}

/// Reads the extended links of kind `K` and builds their trees
pub struct NetworkExtractor<K: NetworkKind> {
    table: ShellTable<Network<K>>,
}

pub type PresentationExtractor = NetworkExtractor<Presentation>;
pub type CalculationExtractor = NetworkExtractor<Calculation>;
pub type DefinitionExtractor = NetworkExtractor<Definition>;

impl<K: NetworkKind> NetworkExtractor<K> {
    pub fn new() -> Self {
        Self {
            table: ShellTable::new(),
        }
    }

    /// Networks sorted by id (`{namespace}:{role}`)
    pub fn networks(&self) -> Vec<Arc<Component<Network<K>>>> {
        self.table.all()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Component<Network<K>>>> {
        self.table.get(id)
    }
}

impl<K: NetworkKind> Default for NetworkExtractor<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn is_schema_document(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".xsd")
}

impl<K: NetworkKind> Extractor for NetworkExtractor<K> {
    fn name(&self) -> &str {
        K::NAME
    }

    fn read_linkbase(
        &self,
        queue: &DocumentQueue,
        linkbase: &Arc<Linkbase>,
        document: &XmlDocument,
    ) -> Extracted {
        if !K::applies(linkbase, document) {
            return Ok(None);
        }

        let namespace = linkbase.namespace().unwrap_or_default();
        let mut networks = Vec::new();
        let mut referenced = BTreeSet::new();

        for link in document.root.children_named(K::LINK_NAMESPACE, K::LINK) {
            let role = link.attr_ns(ns::XLINK, "role").unwrap_or(DEFAULT_LINK_ROLE);
            let graph = LinkGraph::from_extended_link(linkbase.path(), link, K::REQUIRE_TREE)?;
            referenced.extend(
                graph
                    .nodes()
                    .iter()
                    .map(|n| &n.locator.href.document)
                    .filter(|d| is_schema_document(d))
                    .cloned(),
            );

            let id = format!("{}:{}", namespace, role);
            let network = Network::new(
                role.to_string(),
                linkbase.namespace().map(str::to_string),
                graph,
            );
            let component = self.table.define_or_merge(
                &id,
                linkbase.path(),
                network,
                |existing, more| existing.graph.merge(more.graph),
            )?;
            networks.push(ComponentHandle::from(component));
        }

        for schema in referenced {
            queue.queue_document(None, &schema)?;
        }

        tracing::debug!(
            linkbase = linkbase.path(),
            kind = K::KIND,
            links = networks.len(),
            "read networks"
        );
        Ok(Some(networks))
    }

    fn post_process(&self, set: &ComponentSet) -> Extracted {
        let mut unresolved = 0;
        for network in self.table.all() {
            let Some(graph) = network.update(|n| std::mem::take(&mut n.graph)) else {
                continue;
            };
            let role = network.data().map(|n| n.role.clone()).unwrap_or_default();

            let (roots, missing) = build_trees(set, &graph);
            let role_type = set.find::<RoleType>(&role);
            unresolved += missing;

            network.update(|n| {
                n.graph = graph;
                n.roots = roots;
                n.unresolved = missing;
                n.role_type = role_type;
            });
        }

        if unresolved > 0 {
            tracing::info!(kind = K::KIND, unresolved, "network locators without an element");
        }
        Ok(None)
    }
}

/// Materialize the trees of `graph`, returning them with the number of nodes
/// whose element could not be found
pub fn build_trees(set: &ComponentSet, graph: &LinkGraph) -> (Vec<NetworkNode>, usize) {
    let mut unresolved = 0;
    let mut ancestors = Vec::new();
    let roots = graph
        .root_indices()
        .iter()
        .map(|&root| build_node(set, graph, root, None, &mut ancestors, &mut unresolved))
        .collect();
    (roots, unresolved)
}

fn build_node(
    set: &ComponentSet,
    graph: &LinkGraph,
    index: usize,
    arc: Option<&ArcRecord>,
    ancestors: &mut Vec<usize>,
    unresolved: &mut usize,
) -> NetworkNode {
    let href = &graph.node(index).locator.href;
    let element = set.component::<Element>(href);
    if element.is_none() {
        *unresolved += 1;
    }
    let arcrole = arc.and_then(|a| a.arcrole.clone());

    let mut node = NetworkNode {
        href: href.clone(),
        element,
        arcrole_type: arcrole.as_deref().and_then(|uri| set.find::<Arcrole>(uri)),
        arcrole,
        order: arc.and_then(|a| a.order),
        weight: arc.and_then(|a| a.weight),
        preferred_label: arc.and_then(|a| a.preferred_label.clone()),
        children: Vec::new(),
    };

    let repeated = ancestors
        .iter()
        .any(|&a| graph.node(a).locator.href == *href);
    if repeated {
        tracing::debug!(href = %href, "cycle in network, not expanding");
        return node;
    }

    ancestors.push(index);
    for (child, child_arc) in graph.children(index) {
        let built = build_node(set, graph, child, Some(child_arc), ancestors, unresolved);
        node.children.push(built);
    }
    ancestors.pop();
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Schema;
    use crate::link_graph::{Locator, build_graph};

    fn locator(label: &str, id: &str) -> Locator {
        Locator {
            label: label.to_string(),
            href: Href::document("/taxo/met.xsd").with_resource(id),
        }
    }

    fn set_with_elements(ids: &[&str]) -> ComponentSet {
        let schema = Arc::new(Schema::new("/taxo/met.xsd"));
        for id in ids {
            schema
                .registry()
                .insert(Component::new(*id, "/taxo/met.xsd", Element::default()).into())
                .unwrap();
        }
        let mut set = ComponentSet::new();
        set.add(schema).unwrap();
        set
    }

    #[test]
    fn test_trees_resolve_elements() {
        let set = set_with_elements(&["met_total", "met_a"]);
        let mut to_a = ArcRecord::new("total", "a").with_order(1.0);
        to_a.weight = Some(1.0);
        to_a.arcrole = Some("http://www.xbrl.org/2003/arcrole/summation-item".to_string());
        let mut to_b = ArcRecord::new("total", "b").with_order(2.0);
        to_b.weight = Some(-1.0);

        let graph = build_graph(
            vec![
                locator("total", "met_total"),
                locator("a", "met_a"),
                locator("b", "met_b"),
            ],
            vec![to_b, to_a],
            true,
        )
        .unwrap();

        let (roots, unresolved) = build_trees(&set, &graph);
        assert_eq!(roots.len(), 1);
        assert_eq!(unresolved, 1);

        let total = &roots[0];
        assert!(total.element.is_some());
        assert_eq!(total.weight, None);
        assert_eq!(total.children.len(), 2);
        assert_eq!(total.children[0].weight, Some(1.0));
        assert!(total.children[0].element.is_some());
        assert!(total.children[0].arcrole.as_deref().unwrap().ends_with("summation-item"));
        assert_eq!(total.children[1].weight, Some(-1.0));
        assert!(total.children[1].element.is_none());
        assert_eq!(total.count(), 3);
    }

    #[test]
    fn test_cycles_are_not_expanded() {
        let set = set_with_elements(&["met_r", "met_a", "met_b"]);
        let graph = build_graph(
            vec![locator("r", "met_r"), locator("a", "met_a"), locator("b", "met_b")],
            vec![
                ArcRecord::new("r", "a"),
                ArcRecord::new("a", "b"),
                ArcRecord::new("b", "a"),
            ],
            false,
        )
        .unwrap();

        let (roots, unresolved) = build_trees(&set, &graph);
        assert_eq!(unresolved, 0);
        assert_eq!(roots.len(), 1);

        // r -> a -> b -> a (leaf)
        let a = &roots[0].children[0];
        let b = &a.children[0];
        assert_eq!(b.children.len(), 1);
        assert!(b.children[0].children.is_empty());
        assert_eq!(roots[0].count(), 4);
    }

    #[test]
    fn test_schema_document_filter() {
        assert!(is_schema_document("/taxo/met.XSD"));
        assert!(is_schema_document("/taxo.zip/met.xsd"));
        assert!(!is_schema_document("/taxo/met-lab.xml"));
    }
}
