//! Owned, namespace-resolved XML tree
//!
//! Taxonomy documents are small enough to hold in memory, and extractors
//! need random access (children by name, attributes by namespace, QName
//! values resolved against the in-scope bindings), so every fetched document
//! is parsed once into an [`XmlDocument`] and shared read-only.

use std::fmt;
use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Result, TaxonomyError};

/// Namespace URIs the loader works with
pub mod ns {
    pub const XS: &str = "http://www.w3.org/2001/XMLSchema";
    pub const XLINK: &str = "http://www.w3.org/1999/xlink";
    pub const LINK: &str = "http://www.xbrl.org/2003/linkbase";
    pub const XBRLI: &str = "http://www.xbrl.org/2003/instance";
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
    pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";
    pub const GEN: &str = "http://xbrl.org/2008/generic";
    pub const LABEL: &str = "http://xbrl.org/2008/label";
    pub const MODEL: &str = "http://www.eurofiling.info/xbrl/ext/model";
}

/// Prefix to URI bindings visible at an element, innermost last
type Scope = Arc<Vec<(String, String)>>;

/// A namespace-qualified name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub namespace: Option<String>,
    pub local_name: String,
}

impl QName {
    pub fn new(namespace: Option<&str>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            local_name: local_name.into(),
        }
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local_name == local_name
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => write!(f, "{}", self.local_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub namespace: Option<String>,
    pub local_name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct XmlElement {
    pub namespace: Option<String>,
    pub local_name: String,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlElement>,
    text: String,
    scope: Scope,
}

impl XmlElement {
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local_name == local_name
    }

    pub fn name(&self) -> QName {
        QName {
            namespace: self.namespace.clone(),
            local_name: self.local_name.clone(),
        }
    }

    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children
            .iter()
            .filter(move |child| child.is(namespace, local_name))
    }

    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.is(namespace, local_name))
    }

    /// Unqualified attribute
    pub fn attr(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    pub fn attr_ns(&self, namespace: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == Some(namespace) && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    /// Character content directly inside this element, trimmed
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// Resolve a `prefix:local` value against the bindings in scope here
    ///
    /// An unprefixed value takes the default namespace. Returns `None` for an
    /// unbound prefix.
    pub fn resolve_qname(&self, value: &str) -> Option<QName> {
        let value = value.trim();
        let (prefix, local) = match value.split_once(':') {
            Some((prefix, local)) => (prefix, local),
            None => ("", value),
        };
        if local.is_empty() {
            return None;
        }
        let namespace = lookup(&self.scope, prefix);
        if namespace.is_none() && !prefix.is_empty() {
            return None;
        }
        Some(QName {
            namespace: namespace.map(str::to_string),
            local_name: local.to_string(),
        })
    }

    /// Depth-first iterator over this element and its descendants
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a XmlElement>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.stack.pop()?;
        self.stack.extend(element.children.iter().rev());
        Some(element)
    }
}

/// A parsed document together with the canonical path it was read from
#[derive(Debug, Clone)]
pub struct XmlDocument {
    pub path: String,
    pub root: XmlElement,
}

impl XmlDocument {
    /// Parse `bytes` into a namespace-resolved tree
    ///
    /// Malformed markup and prefixes without a binding are reported as
    /// `ParseFailed` against `path`.
    pub fn parse(bytes: &[u8], path: &str) -> Result<Self> {
        let content = std::str::from_utf8(strip_bom(bytes))
            .map_err(|e| TaxonomyError::parse_failed(path, e))?;
        let mut reader = Reader::from_str(content);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        let base_scope: Scope = Arc::new(vec![("xml".to_string(), ns::XML.to_string())]);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let parent = stack.last().map(|p| &p.scope).unwrap_or(&base_scope);
                    let element = open_element(&e, parent, path)?;
                    stack.push(element);
                }
                Ok(Event::Empty(e)) => {
                    let parent = stack.last().map(|p| &p.scope).unwrap_or(&base_scope);
                    let element = open_element(&e, parent, path)?;
                    attach(&mut stack, &mut root, element, path)?;
                }
                Ok(Event::End(_)) => {
                    let element = stack.pop().ok_or_else(|| {
                        TaxonomyError::parse_failed(path, "unbalanced end tag")
                    })?;
                    attach(&mut stack, &mut root, element, path)?;
                }
                Ok(Event::Text(e)) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
                Ok(Event::GeneralRef(e)) => {
                    if let Some(current) = stack.last_mut() {
                        let entity = String::from_utf8_lossy(e.as_ref());
                        let resolved = resolve_entity(&entity).ok_or_else(|| {
                            TaxonomyError::parse_failed(path, format!("unknown entity &{};", entity))
                        })?;
                        current.text.push_str(&resolved);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(TaxonomyError::parse_failed(
                        path,
                        format!("at byte {}: {}", reader.error_position(), e),
                    ));
                }
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(TaxonomyError::parse_failed(path, "unexpected end of document"));
        }
        let root = root.ok_or_else(|| TaxonomyError::parse_failed(path, "document has no root element"))?;

        Ok(Self {
            path: path.to_string(),
            root,
        })
    }
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
    path: &str,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(TaxonomyError::parse_failed(path, "more than one root element")),
    }
    Ok(())
}

fn open_element(start: &BytesStart<'_>, parent: &Scope, path: &str) -> Result<XmlElement> {
    let mut bindings: Vec<(String, String)> = Vec::new();
    let mut raw_attributes: Vec<(String, String)> = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(|e| TaxonomyError::parse_failed(path, e))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = unescape(&String::from_utf8_lossy(&attr.value))
            .ok_or_else(|| TaxonomyError::parse_failed(path, format!("bad entity in attribute {}", key)))?;

        if key == "xmlns" {
            bindings.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            bindings.push((prefix.to_string(), value));
        } else {
            raw_attributes.push((key, value));
        }
    }

    let scope = if bindings.is_empty() {
        Arc::clone(parent)
    } else {
        let mut scope = parent.as_ref().clone();
        scope.extend(bindings);
        Arc::new(scope)
    };

    let qualified = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let (namespace, local_name) = split_name(&scope, &qualified, true)
        .ok_or_else(|| TaxonomyError::parse_failed(path, format!("unbound prefix in <{}>", qualified)))?;

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let (namespace, local_name) = split_name(&scope, &key, false).ok_or_else(|| {
            TaxonomyError::parse_failed(path, format!("unbound prefix in attribute {}", key))
        })?;
        attributes.push(XmlAttribute {
            namespace,
            local_name,
            value,
        });
    }

    Ok(XmlElement {
        namespace,
        local_name,
        attributes,
        children: Vec::new(),
        text: String::new(),
        scope,
    })
}

/// Split a tag or attribute name into (namespace, local name)
///
/// Unprefixed attributes never take the default namespace.
fn split_name(scope: &Scope, name: &str, use_default: bool) -> Option<(Option<String>, String)> {
    match name.split_once(':') {
        Some((prefix, local)) => {
            let namespace = lookup(scope, prefix)?;
            Some((Some(namespace.to_string()), local.to_string()))
        }
        None if use_default => Some((lookup(scope, "").map(str::to_string), name.to_string())),
        None => Some((None, name.to_string())),
    }
}

fn lookup<'a>(scope: &'a Scope, prefix: &str) -> Option<&'a str> {
    scope
        .iter()
        .rev()
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.as_str())
        .filter(|uri| !uri.is_empty())
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

/// Replace entity and character references in an attribute value
fn unescape(raw: &str) -> Option<String> {
    if !raw.contains('&') {
        return Some(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let end = rest[start..].find(';')? + start;
        out.push_str(&resolve_entity(&rest[start + 1..end])?);
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x") {
        u32::from_str_radix(hex, 16).ok()?
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()?
    } else {
        return None;
    };
    char::from_u32(code).map(|c| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:link="http://www.xbrl.org/2003/linkbase"
           xmlns:xlink="http://www.w3.org/1999/xlink"
           xmlns:xbrli="http://www.xbrl.org/2003/instance"
           targetNamespace="http://example.com/taxo">
  <xs:annotation>
    <xs:appinfo>
      <link:linkbaseRef xlink:type="simple" xlink:href="lab.xml"/>
    </xs:appinfo>
  </xs:annotation>
  <xs:element id="t_A" name="A" type="xbrli:monetaryItemType"/>
  <xs:element id="t_B" name="B">
    <xs:annotation><xs:documentation>B &amp; C &#x41;</xs:documentation></xs:annotation>
  </xs:element>
</xs:schema>"#;

    #[test]
    fn test_parse_resolves_namespaces() {
        let doc = XmlDocument::parse(SCHEMA.as_bytes(), "/taxo/a.xsd").unwrap();
        assert!(doc.root.is(ns::XS, "schema"));
        assert_eq!(doc.root.attr("targetNamespace"), Some("http://example.com/taxo"));

        let elements: Vec<_> = doc.root.children_named(ns::XS, "element").collect();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].attr("name"), Some("A"));

        let link_ref = doc
            .root
            .descendants()
            .find(|e| e.is(ns::LINK, "linkbaseRef"))
            .unwrap();
        assert_eq!(link_ref.attr_ns(ns::XLINK, "href"), Some("lab.xml"));
        assert_eq!(link_ref.attr("href"), None);
    }

    #[test]
    fn test_resolve_qname_uses_scope() {
        let doc = XmlDocument::parse(SCHEMA.as_bytes(), "/taxo/a.xsd").unwrap();
        let element = doc.root.child(ns::XS, "element").unwrap();
        let type_name = element.resolve_qname("xbrli:monetaryItemType").unwrap();
        assert!(type_name.is(ns::XBRLI, "monetaryItemType"));
        assert_eq!(element.resolve_qname("nope:x"), None);
        assert_eq!(element.resolve_qname("plain").unwrap(), QName::new(None, "plain"));
    }

    #[test]
    fn test_text_and_entities() {
        let doc = XmlDocument::parse(SCHEMA.as_bytes(), "/taxo/a.xsd").unwrap();
        let documentation = doc
            .root
            .descendants()
            .find(|e| e.is(ns::XS, "documentation"))
            .unwrap();
        assert_eq!(documentation.text(), "B & C A");
    }

    #[test]
    fn test_default_namespace_and_attribute_escapes() {
        let xml = r#"<root xmlns="urn:a" title="x &lt; y"><inner xmlns=""/></root>"#;
        let doc = XmlDocument::parse(xml.as_bytes(), "doc.xml").unwrap();
        assert!(doc.root.is("urn:a", "root"));
        assert_eq!(doc.root.attr("title"), Some("x < y"));
        assert_eq!(doc.root.children[0].namespace, None);
    }

    #[test]
    fn test_malformed_documents() {
        for bad in [
            "<a><b></a>",
            "<a>",
            "",
            "just text",
            "<p:a/>",
            "<a/><b/>",
        ] {
            let result = XmlDocument::parse(bad.as_bytes(), "bad.xml");
            assert!(
                matches!(result, Err(TaxonomyError::ParseFailed { .. })),
                "expected parse failure for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_byte_order_mark_is_ignored() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"<a/>");
        let doc = XmlDocument::parse(&bytes, "bom.xml").unwrap();
        assert_eq!(doc.root.local_name, "a");
    }
}
