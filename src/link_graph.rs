//! Locator/arc graphs of one extended link
//!
//! Presentation, calculation, definition and label links all share the same
//! shape: a flat list of labelled locators plus arcs between labels. The
//! builder turns that list into parent/child adjacency. What the edges mean is
//! up to the caller.

use std::collections::HashMap;

use crate::error::{Result, TaxonomyError};
use crate::href::Href;
use crate::xlink::{XlinkKind, XlinkNode};
use crate::xml::XmlElement;

/// A labelled pointer to a component
#[derive(Debug, Clone, PartialEq)]
pub struct Locator {
    pub label: String,
    pub href: Href,
}

/// An edge between two labels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArcRecord {
    pub from: String,
    pub to: String,
    pub order: Option<f64>,
    pub arcrole: Option<String>,
    pub weight: Option<f64>,
    pub preferred_label: Option<String>,
}

impl ArcRecord {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order: f64) -> Self {
        self.order = Some(order);
        self
    }

    fn sort_key(&self) -> f64 {
        self.order.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct LocatorNode {
    pub locator: Locator,
    /// Child node indices, in arc order
    pub children: Vec<usize>,
    /// Distinct parent node indices
    pub parents: Vec<usize>,
    /// The arc leading to each child, aligned with `children`
    pub child_arcs: Vec<ArcRecord>,
}

impl LocatorNode {
    fn new(locator: Locator) -> Self {
        Self {
            locator,
            children: Vec::new(),
            parents: Vec::new(),
            child_arcs: Vec::new(),
        }
    }
}

/// Arena of locator nodes plus the indices of the roots
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    nodes: Vec<LocatorNode>,
    roots: Vec<usize>,
}

impl LinkGraph {
    pub fn nodes(&self) -> &[LocatorNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &LocatorNode {
        &self.nodes[index]
    }

    pub fn roots(&self) -> impl Iterator<Item = &LocatorNode> + '_ {
        self.roots.iter().map(move |&i| &self.nodes[i])
    }

    pub fn root_indices(&self) -> &[usize] {
        &self.roots
    }

    /// Children of `index` with the arcs leading to them
    pub fn children(&self, index: usize) -> impl Iterator<Item = (usize, &ArcRecord)> + '_ {
        let node = &self.nodes[index];
        node.children.iter().copied().zip(node.child_arcs.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Append the nodes and roots of `other`
    pub fn merge(&mut self, other: LinkGraph) {
        let offset = self.nodes.len();
        self.nodes.extend(other.nodes.into_iter().map(|mut node| {
            node.children.iter_mut().for_each(|c| *c += offset);
            node.parents.iter_mut().for_each(|p| *p += offset);
            node
        }));
        self.roots.extend(other.roots.into_iter().map(|r| r + offset));
    }

    /// Build a graph from the `xlink:type="locator"` and `xlink:type="arc"`
    /// children of an extended link element
    pub fn from_extended_link(base: &str, link: &XmlElement, require_tree: bool) -> Result<Self> {
        let mut locators = Vec::new();
        let mut arcs = Vec::new();

        for child in &link.children {
            match XlinkNode::kind_of(child) {
                XlinkKind::Locator => {
                    let node = XlinkNode::from_element(base, child)?;
                    let (Some(label), Some(href)) = (node.label, node.href) else {
                        return Err(TaxonomyError::parse_failed(
                            base,
                            format!("locator <{}> without label or href", child.local_name),
                        ));
                    };
                    locators.push(Locator { label, href });
                }
                XlinkKind::Arc => arcs.push(arc_record(base, child)?),
                _ => {}
            }
        }

        build_graph(locators, arcs, require_tree)
    }
}

/// Read one arc element, including the XBRL `weight` and `preferredLabel`
/// attributes
pub fn arc_record(base: &str, element: &XmlElement) -> Result<ArcRecord> {
    let node = XlinkNode::from_element(base, element)?;
    let (Some(from), Some(to)) = (node.from, node.to) else {
        return Err(TaxonomyError::parse_failed(
            base,
            format!("arc <{}> without from or to", element.local_name),
        ));
    };
    let weight = match element.attr("weight") {
        Some(raw) => Some(raw.trim().parse::<f64>().map_err(|_| {
            TaxonomyError::parse_failed(base, format!("invalid arc weight '{}'", raw))
        })?),
        None => None,
    };

    Ok(ArcRecord {
        from,
        to,
        order: node.order,
        arcrole: node.arcrole,
        weight,
        preferred_label: element.attr("preferredLabel").map(str::to_string),
    })
}

/// Turn flat locator and arc records into parent/child adjacency
///
/// Children follow ascending arc `order` (missing order sorts as 0, ties keep
/// document order). Arcs naming an unknown label are ignored. With
/// `require_tree`, a locator reached from more than one parent is a
/// `StructuralViolation`.
pub fn build_graph(
    locators: Vec<Locator>,
    arcs: Vec<ArcRecord>,
    require_tree: bool,
) -> Result<LinkGraph> {
    let mut by_label: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, locator) in locators.iter().enumerate() {
        by_label.entry(locator.label.clone()).or_default().push(index);
    }

    let mut nodes: Vec<LocatorNode> = locators.into_iter().map(LocatorNode::new).collect();

    let mut sorted = arcs;
    sorted.sort_by(|a, b| a.sort_key().total_cmp(&b.sort_key()));

    for arc in sorted {
        let (Some(sources), Some(targets)) = (by_label.get(&arc.from), by_label.get(&arc.to))
        else {
            tracing::debug!(from = %arc.from, to = %arc.to, "skipping arc between unknown labels");
            continue;
        };
        for &source in sources {
            for &target in targets {
                nodes[source].children.push(target);
                nodes[source].child_arcs.push(arc.clone());
                if !nodes[target].parents.contains(&source) {
                    nodes[target].parents.push(source);
                }
            }
        }
    }

    if require_tree
        && let Some(node) = nodes.iter().find(|n| n.parents.len() > 1)
    {
        return Err(TaxonomyError::structural(format!(
            "locator '{}' ({}) has {} parents in a tree-shaped link",
            node.locator.label,
            node.locator.href,
            node.parents.len()
        )));
    }

    let roots = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.parents.is_empty())
        .map(|(i, _)| i)
        .collect();

    Ok(LinkGraph { nodes, roots })
}
