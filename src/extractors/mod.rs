//! The standard extractor families
//!
//! Each extractor owns the tables for one component family. An instance
//! accumulates state for a single run; build a fresh set per
//! [`TaxonomyReader`](crate::engine::TaxonomyReader).

pub mod elements;
pub mod labels;
pub mod networks;
pub mod roles;
pub mod tables;

use std::sync::Arc;

use crate::engine::TaxonomyReader;
use crate::xml::{XmlDocument, ns};

pub use elements::{Balance, Element, ElementExtractor, PeriodType};
pub use labels::{
    GenericLabelExtractor, GenericLabels, Label, LabelExtractor, LabelLinkExtractor, LabelRole,
    LabelSyntax, StandardLabels,
};
pub use networks::{
    Calculation, CalculationExtractor, Definition, DefinitionExtractor, Network, NetworkExtractor,
    NetworkKind, NetworkNode, Presentation, PresentationExtractor,
};
pub use roles::{Arcrole, ArcroleExtractor, RoleExtractor, RoleType};
pub use tables::{TableGroup, TableGroupExtractor, TableGroupKind};

/// Whether a linkbase declares `arcrole` through a `link:arcroleRef`
pub(crate) fn declares_arcrole(document: &XmlDocument, arcrole: &str) -> bool {
    document
        .root
        .children_named(ns::LINK, "arcroleRef")
        .any(|r| r.attr("arcroleURI") == Some(arcrole))
}

/// Shared handles to the standard extractors of one run
///
/// The reader only sees them as `dyn Extractor`; keeping the concrete handles
/// lets callers query extractor-specific results such as orphan labels.
#[derive(Clone)]
pub struct StandardExtractors {
    pub elements: Arc<ElementExtractor>,
    pub roles: Arc<RoleExtractor>,
    pub arcroles: Arc<ArcroleExtractor>,
    pub definitions: Arc<DefinitionExtractor>,
    pub calculations: Arc<CalculationExtractor>,
    pub presentations: Arc<PresentationExtractor>,
    pub table_groups: Arc<TableGroupExtractor>,
    pub labels: Arc<LabelExtractor>,
    pub generic_labels: Arc<GenericLabelExtractor>,
}

impl StandardExtractors {
    pub fn new() -> Self {
        Self {
            elements: Arc::new(ElementExtractor::new()),
            roles: Arc::new(RoleExtractor::new()),
            arcroles: Arc::new(ArcroleExtractor::new()),
            definitions: Arc::new(DefinitionExtractor::new()),
            calculations: Arc::new(CalculationExtractor::new()),
            presentations: Arc::new(PresentationExtractor::new()),
            table_groups: Arc::new(TableGroupExtractor::new()),
            labels: Arc::new(LabelExtractor::new()),
            generic_labels: Arc::new(GenericLabelExtractor::new()),
        }
    }

    /// Register every extractor with `reader`: elements, roles, arcroles,
    /// definitions, calculations, presentations, table groups, labels,
    /// generic labels
    pub fn register(&self, reader: TaxonomyReader) -> TaxonomyReader {
        reader
            .register(self.elements.clone())
            .register(self.roles.clone())
            .register(self.arcroles.clone())
            .register(self.definitions.clone())
            .register(self.calculations.clone())
            .register(self.presentations.clone())
            .register(self.table_groups.clone())
            .register(self.labels.clone())
            .register(self.generic_labels.clone())
    }
}

impl Default for StandardExtractors {
    fn default() -> Self {
        Self::new()
    }
}
