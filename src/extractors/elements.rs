use std::sync::Arc;

use serde::Serialize;

use crate::component::{Component, ComponentData, ComponentHandle};
use crate::container::Schema;
use crate::engine::DocumentQueue;
use crate::extractor::{Extracted, Extractor};
use crate::xml::{QName, XmlDocument, XmlElement, ns};

use super::labels::Label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Instant,
    Duration,
}

impl PeriodType {
    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "instant" => Some(PeriodType::Instant),
            "duration" => Some(PeriodType::Duration),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Balance {
    Debit,
    Credit,
}

impl Balance {
    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "debit" => Some(Balance::Debit),
            "credit" => Some(Balance::Credit),
            _ => None,
        }
    }
}

/// A top-level `xs:element` declaration
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub name: Option<String>,
    pub type_name: Option<QName>,
    pub substitution_group: Option<QName>,
    pub is_abstract: bool,
    pub nillable: bool,
    pub period_type: Option<PeriodType>,
    pub balance: Option<Balance>,
    /// `model:creationDate`, kept as written
    pub creation_date: Option<String>,
    /// Attached once every label linkbase has been read
    pub labels: Vec<Label>,
}

impl ComponentData for Element {
    const KIND: &'static str = "element";
}

impl Element {
    fn from_declaration(declaration: &XmlElement) -> Self {
        let flag = |name: &str| {
            declaration
                .attr(name)
                .is_some_and(|v| matches!(v.trim(), "true" | "1"))
        };
        let qname = |name: &str| {
            declaration
                .attr(name)
                .and_then(|value| declaration.resolve_qname(value))
        };

        Self {
            name: declaration.attr("name").map(str::to_string),
            type_name: qname("type"),
            substitution_group: qname("substitutionGroup"),
            is_abstract: flag("abstract"),
            nillable: flag("nillable"),
            period_type: declaration
                .attr_ns(ns::XBRLI, "periodType")
                .and_then(PeriodType::parse),
            balance: declaration.attr_ns(ns::XBRLI, "balance").and_then(Balance::parse),
            creation_date: declaration
                .attr_ns(ns::MODEL, "creationDate")
                .map(str::to_string),
            labels: Vec::new(),
        }
    }

    /// First label with the given role and language
    pub fn label(&self, role: &super::labels::LabelRole, lang: &str) -> Option<&Label> {
        self.labels
            .iter()
            .find(|l| &l.role == role && l.lang.as_deref() == Some(lang))
    }
}

/// Reads element declarations; elements are looked up through the schema
/// that declares them
#[derive(Debug, Default)]
pub struct ElementExtractor;

impl ElementExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for ElementExtractor {
    fn name(&self) -> &str {
        "elements"
    }

    fn read_schema(
        &self,
        _queue: &DocumentQueue,
        schema: &Arc<Schema>,
        document: &XmlDocument,
    ) -> Extracted {
        let elements: Vec<ComponentHandle> = document
            .root
            .children_named(ns::XS, "element")
            .filter_map(|declaration| {
                let id = declaration.attr("id")?;
                let element = Element::from_declaration(declaration);
                Some(Component::new(id, schema.path(), element).into())
            })
            .collect();

        tracing::debug!(schema = schema.path(), elements = elements.len(), "read elements");
        Ok(Some(elements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
    xmlns:xbrli="http://www.xbrl.org/2003/instance"
    xmlns:model="http://www.eurofiling.info/xbrl/ext/model"
    xmlns:num="http://www.xbrl.org/dtr/type/numeric"
    targetNamespace="http://example.com/met">
  <xs:element id="met_ei1" name="ei1" type="num:monetaryItemType" substitutionGroup="xbrli:item"
      xbrli:periodType="instant" xbrli:balance="credit" nillable="true" model:creationDate="2014-07-01"/>
  <xs:element id="met_abs" name="abs" abstract="true" substitutionGroup="xbrli:item" xbrli:periodType="duration"/>
  <xs:element name="anonymous"/>
  <xs:complexType name="notAnElement"/>
</xs:schema>"#;

    #[test]
    fn test_declaration_fields() {
        let document = XmlDocument::parse(SCHEMA.as_bytes(), "/taxo/met.xsd").unwrap();
        let declaration = document.root.children_named(ns::XS, "element").next().unwrap();
        let element = Element::from_declaration(declaration);

        assert_eq!(element.name.as_deref(), Some("ei1"));
        let type_name = element.type_name.unwrap();
        assert!(type_name.is("http://www.xbrl.org/dtr/type/numeric", "monetaryItemType"));
        assert!(element.substitution_group.unwrap().is(ns::XBRLI, "item"));
        assert_eq!(element.period_type, Some(PeriodType::Instant));
        assert_eq!(element.balance, Some(Balance::Credit));
        assert!(element.nillable);
        assert!(!element.is_abstract);
        assert_eq!(element.creation_date.as_deref(), Some("2014-07-01"));
    }

    #[test]
    fn test_only_identified_elements_are_read() {
        let document = XmlDocument::parse(SCHEMA.as_bytes(), "/taxo/met.xsd").unwrap();
        let ids: Vec<String> = document
            .root
            .children_named(ns::XS, "element")
            .filter_map(|e| e.attr("id").map(str::to_string))
            .collect();
        assert_eq!(ids, vec!["met_ei1", "met_abs"]);

        let abs = Element::from_declaration(
            document.root.children_named(ns::XS, "element").nth(1).unwrap(),
        );
        assert!(abs.is_abstract);
        assert_eq!(abs.period_type, Some(PeriodType::Duration));
        assert_eq!(abs.balance, None);
    }

    #[test]
    fn test_boolean_lexical_forms() {
        let xml = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element id="a" name="a" abstract="1" nillable=" 0 "/>
  <xs:element id="b" name="b" abstract="false" nillable="1"/>
</xs:schema>"#;
        let document = XmlDocument::parse(xml.as_bytes(), "/taxo/flags.xsd").unwrap();
        let mut declarations = document.root.children_named(ns::XS, "element");

        let a = Element::from_declaration(declarations.next().unwrap());
        assert!(a.is_abstract);
        assert!(!a.nillable);

        let b = Element::from_declaration(declarations.next().unwrap());
        assert!(!b.is_abstract);
        assert!(b.nillable);
    }
}
