use crate::error::{Result, TaxonomyError};
use crate::href::Href;
use crate::xml::{XmlElement, ns};

/// The `xlink:type` of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XlinkKind {
    Simple,
    Extended,
    Locator,
    Arc,
    Resource,
    Title,
    None,
}

impl XlinkKind {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("simple") => XlinkKind::Simple,
            Some("extended") => XlinkKind::Extended,
            Some("locator") => XlinkKind::Locator,
            Some("arc") => XlinkKind::Arc,
            Some("resource") => XlinkKind::Resource,
            Some("title") => XlinkKind::Title,
            _ => XlinkKind::None,
        }
    }
}

/// Typed view of the xlink attributes carried by one element
#[derive(Debug, Clone)]
pub struct XlinkNode {
    pub kind: XlinkKind,
    /// `xlink:href` resolved against the document it appears in
    pub href: Option<Href>,
    pub role: Option<String>,
    pub arcrole: Option<String>,
    pub title: Option<String>,
    pub show: Option<String>,
    pub actuate: Option<String>,
    pub label: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub order: Option<f64>,
}

impl XlinkNode {
    /// Read the xlink attributes of `element`, found in the document at `base`
    pub fn from_element(base: &str, element: &XmlElement) -> Result<Self> {
        let get = |name: &str| element.attr_ns(ns::XLINK, name).map(str::to_string);

        let href = match element.attr_ns(ns::XLINK, "href") {
            Some(raw) => Some(Href::parse(Some(base), raw)?),
            None => None,
        };

        let order = match element.attr("order") {
            Some(raw) => Some(raw.trim().parse::<f64>().map_err(|_| {
                TaxonomyError::parse_failed(base, format!("invalid arc order '{}'", raw))
            })?),
            None => None,
        };

        Ok(Self {
            kind: XlinkKind::parse(element.attr_ns(ns::XLINK, "type")),
            href,
            role: get("role"),
            arcrole: get("arcrole"),
            title: get("title"),
            show: get("show"),
            actuate: get("actuate"),
            label: get("label"),
            from: get("from"),
            to: get("to"),
            order,
        })
    }

    pub fn kind_of(element: &XmlElement) -> XlinkKind {
        XlinkKind::parse(element.attr_ns(ns::XLINK, "type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlDocument;

    const LINKBASE: &str = r#"<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase"
    xmlns:xlink="http://www.w3.org/1999/xlink">
  <link:presentationLink xlink:type="extended" xlink:role="http://example.com/role/a">
    <link:loc xlink:type="locator" xlink:href="../dict/met.xsd#met_A" xlink:label="A"/>
    <link:presentationArc xlink:type="arc" xlink:arcrole="http://www.xbrl.org/2003/arcrole/parent-child"
        xlink:from="A" xlink:to="B" order="2.5"/>
    <link:presentationArc xlink:type="arc" xlink:from="A" xlink:to="C" order="first"/>
  </link:presentationLink>
</link:linkbase>"#;

    #[test]
    fn test_reads_locator_and_arc() {
        let doc = XmlDocument::parse(LINKBASE.as_bytes(), "/taxo/mod/pre.xml").unwrap();
        let link = &doc.root.children[0];
        assert_eq!(XlinkNode::kind_of(link), XlinkKind::Extended);

        let loc = XlinkNode::from_element(&doc.path, &link.children[0]).unwrap();
        assert_eq!(loc.kind, XlinkKind::Locator);
        assert_eq!(loc.label.as_deref(), Some("A"));
        let href = loc.href.unwrap();
        assert_eq!(href.document, "/taxo/dict/met.xsd");
        assert_eq!(href.resource_id.as_deref(), Some("met_A"));

        let arc = XlinkNode::from_element(&doc.path, &link.children[1]).unwrap();
        assert_eq!(arc.kind, XlinkKind::Arc);
        assert_eq!(arc.from.as_deref(), Some("A"));
        assert_eq!(arc.to.as_deref(), Some("B"));
        assert_eq!(arc.order, Some(2.5));
        assert!(arc.arcrole.unwrap().ends_with("parent-child"));
    }

    #[test]
    fn test_malformed_order_is_a_parse_failure() {
        let doc = XmlDocument::parse(LINKBASE.as_bytes(), "/taxo/mod/pre.xml").unwrap();
        let bad_arc = &doc.root.children[0].children[2];
        assert!(matches!(
            XlinkNode::from_element(&doc.path, bad_arc),
            Err(TaxonomyError::ParseFailed { .. })
        ));
    }
}
