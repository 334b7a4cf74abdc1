//! Labels of the 2003 label linkbase and of 2008 generic label links
//!
//! Both families end up in [`Element::labels`]; they differ only in the
//! element names they use and in how a linkbase is recognized.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::container::{ComponentSet, Linkbase};
use crate::engine::DocumentQueue;
use crate::error::{Result, TaxonomyError};
use crate::extractor::{Extracted, Extractor};
use crate::href::Href;
use crate::xlink::XlinkNode;
use crate::xml::{XmlDocument, XmlElement, ns};

use super::declares_arcrole;
use super::elements::Element;

const LABEL_LINKBASE_REF: &str = "http://www.xbrl.org/2003/role/labelLinkbaseRef";
pub const ELEMENT_LABEL_ARCROLE: &str = "http://xbrl.org/arcrole/2008/element-label";
const ROLE_PREFIX: &str = "http://www.xbrl.org/2003/role/";

/// Label roles defined by XBRL 2.1
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum LabelRole {
    Standard,
    Terse,
    Verbose,
    Positive,
    PositiveTerse,
    PositiveVerbose,
    Negative,
    NegativeTerse,
    NegativeVerbose,
    Zero,
    ZeroTerse,
    ZeroVerbose,
    Total,
    PeriodStart,
    PeriodEnd,
    Documentation,
    DefinitionGuidance,
    DisclosureGuidance,
    PresentationGuidance,
    MeasurementGuidance,
    CommentaryGuidance,
    ExampleGuidance,
    Other(String),
}

impl LabelRole {
    pub fn from_uri(uri: &str) -> Self {
        let Some(name) = uri.strip_prefix(ROLE_PREFIX) else {
            return LabelRole::Other(uri.to_string());
        };
        match name {
            "label" => LabelRole::Standard,
            "terseLabel" => LabelRole::Terse,
            "verboseLabel" => LabelRole::Verbose,
            "positiveLabel" => LabelRole::Positive,
            "positiveTerseLabel" => LabelRole::PositiveTerse,
            "positiveVerboseLabel" => LabelRole::PositiveVerbose,
            "negativeLabel" => LabelRole::Negative,
            "negativeTerseLabel" => LabelRole::NegativeTerse,
            "negativeVerboseLabel" => LabelRole::NegativeVerbose,
            "zeroLabel" => LabelRole::Zero,
            "zeroTerseLabel" => LabelRole::ZeroTerse,
            "zeroVerboseLabel" => LabelRole::ZeroVerbose,
            "totalLabel" => LabelRole::Total,
            "periodStartLabel" => LabelRole::PeriodStart,
            "periodEndLabel" => LabelRole::PeriodEnd,
            "documentation" => LabelRole::Documentation,
            "definitionGuidance" => LabelRole::DefinitionGuidance,
            "disclosureGuidance" => LabelRole::DisclosureGuidance,
            "presentationGuidance" => LabelRole::PresentationGuidance,
            "measurementGuidance" => LabelRole::MeasurementGuidance,
            "commentaryGuidance" => LabelRole::CommentaryGuidance,
            "exampleGuidance" => LabelRole::ExampleGuidance,
            _ => LabelRole::Other(uri.to_string()),
        }
    }
}

/// A `link:label` resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Label {
    pub role: LabelRole,
    pub lang: Option<String>,
    pub text: String,
}

impl Label {
    fn from_resource(resource: &XmlElement) -> Self {
        // A label without a role is a standard label
        let role = resource
            .attr_ns(ns::XLINK, "role")
            .map(LabelRole::from_uri)
            .unwrap_or(LabelRole::Standard);
        Self {
            role,
            lang: resource.attr_ns(ns::XML, "lang").map(str::to_string),
            text: resource.text().to_string(),
        }
    }
}

/// Element names of one label link family
pub trait LabelSyntax: fmt::Debug + Send + Sync + 'static {
    /// Extractor name
    const NAME: &'static str;
    /// `(namespace, local name)` of the extended link
    const LINK: (&'static str, &'static str);
    const RESOURCE: (&'static str, &'static str);
    const ARC: (&'static str, &'static str);
    /// Arcs with any other arcrole are skipped
    const ARCROLE: Option<&'static str>;

    fn applies(linkbase: &Linkbase, document: &XmlDocument) -> bool;
}

/// `link:labelLink` / `link:label` / `link:labelArc`
#[derive(Debug)]
pub struct StandardLabels;

impl LabelSyntax for StandardLabels {
    const NAME: &'static str = "labels";
    const LINK: (&'static str, &'static str) = (ns::LINK, "labelLink");
    const RESOURCE: (&'static str, &'static str) = (ns::LINK, "label");
    const ARC: (&'static str, &'static str) = (ns::LINK, "labelArc");
    const ARCROLE: Option<&'static str> = None;

    fn applies(linkbase: &Linkbase, document: &XmlDocument) -> bool {
        match linkbase.role() {
            Some(role) => role == LABEL_LINKBASE_REF,
            None => document.root.child(Self::LINK.0, Self::LINK.1).is_some(),
        }
    }
}

/// `gen:link` / `label:label` / `gen:arc` with the element-label arcrole
#[derive(Debug)]
pub struct GenericLabels;

impl LabelSyntax for GenericLabels {
    const NAME: &'static str = "generic-labels";
    const LINK: (&'static str, &'static str) = (ns::GEN, "link");
    const RESOURCE: (&'static str, &'static str) = (ns::LABEL, "label");
    const ARC: (&'static str, &'static str) = (ns::GEN, "arc");
    const ARCROLE: Option<&'static str> = Some(ELEMENT_LABEL_ARCROLE);

    fn applies(linkbase: &Linkbase, document: &XmlDocument) -> bool {
        linkbase.role().is_none_or(str::is_empty)
            && declares_arcrole(document, ELEMENT_LABEL_ARCROLE)
    }
}

/// Collects label links while reading and attaches the labels to their
/// elements once the whole taxonomy is known
#[derive(Debug)]
pub struct LabelLinkExtractor<S: LabelSyntax> {
    pending: Mutex<Vec<(Href, Label)>>,
    orphans: Mutex<Vec<(Href, Label)>>,
    _syntax: PhantomData<fn() -> S>,
}

pub type LabelExtractor = LabelLinkExtractor<StandardLabels>;
pub type GenericLabelExtractor = LabelLinkExtractor<GenericLabels>;

impl<S: LabelSyntax> LabelLinkExtractor<S> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            orphans: Mutex::new(Vec::new()),
            _syntax: PhantomData,
        }
    }

    /// Labels whose locator did not resolve to an element
    pub fn orphan_labels(&self) -> Vec<(Href, Label)> {
        self.orphans.lock().clone()
    }

    fn read_label_link(base: &str, link: &XmlElement) -> Result<Vec<(Href, Label)>> {
        let mut locators: HashMap<String, Vec<Href>> = HashMap::new();
        let mut resources: HashMap<String, Vec<Label>> = HashMap::new();
        let mut arcs = Vec::new();

        for child in &link.children {
            if child.is(ns::LINK, "loc") {
                let node = XlinkNode::from_element(base, child)?;
                if let (Some(label), Some(href)) = (node.label, node.href) {
                    locators.entry(label).or_default().push(href);
                }
            } else if child.is(S::RESOURCE.0, S::RESOURCE.1) {
                if let Some(label) = child.attr_ns(ns::XLINK, "label") {
                    resources
                        .entry(label.to_string())
                        .or_default()
                        .push(Label::from_resource(child));
                }
            } else if child.is(S::ARC.0, S::ARC.1) {
                let node = XlinkNode::from_element(base, child)?;
                if S::ARCROLE.is_some_and(|arcrole| node.arcrole.as_deref() != Some(arcrole)) {
                    continue;
                }
                let (Some(from), Some(to)) = (node.from, node.to) else {
                    return Err(TaxonomyError::parse_failed(
                        base,
                        format!("<{}> arc without from or to", S::ARC.1),
                    ));
                };
                arcs.push((from, to));
            }
        }

        let mut found = Vec::new();
        for (from, to) in arcs {
            let (Some(hrefs), Some(labels)) = (locators.get(&from), resources.get(&to)) else {
                tracing::debug!(document = base, from = %from, to = %to, "label arc with a dangling end");
                continue;
            };
            for href in hrefs {
                found.extend(labels.iter().map(|label| (href.clone(), label.clone())));
            }
        }
        Ok(found)
    }
}

impl<S: LabelSyntax> Default for LabelLinkExtractor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: LabelSyntax> Extractor for LabelLinkExtractor<S> {
    fn name(&self) -> &str {
        S::NAME
    }

    fn read_linkbase(
        &self,
        _queue: &DocumentQueue,
        linkbase: &Arc<Linkbase>,
        document: &XmlDocument,
    ) -> Extracted {
        if !S::applies(linkbase, document) {
            return Ok(None);
        }

        let mut labels = Vec::new();
        for link in document.root.children_named(S::LINK.0, S::LINK.1) {
            labels.extend(Self::read_label_link(linkbase.path(), link)?);
        }
        tracing::debug!(linkbase = linkbase.path(), extractor = S::NAME, labels = labels.len(), "read labels");
        self.pending.lock().extend(labels);
        Ok(None)
    }

    fn post_process(&self, set: &ComponentSet) -> Extracted {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut orphans = Vec::new();

        for (href, label) in pending {
            match set.component::<Element>(&href) {
                Some(element) if !element.is_shell() => {
                    element.update(|e| e.labels.push(label));
                }
                _ => orphans.push((href, label)),
            }
        }

        if !orphans.is_empty() {
            tracing::info!(extractor = S::NAME, orphans = orphans.len(), "labels without an element");
        }
        self.orphans.lock().extend(orphans);
        Ok(None)
    }
}
