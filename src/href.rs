use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::Result;
use crate::resolver::resolve;

/// A reference to a document, optionally narrowed to one resource in it
///
/// Two hrefs are equal when they point at the same canonical document and
/// the same resource id, however they were spelled.
#[derive(Debug, Clone)]
pub struct Href {
    /// Canonical path of the referenced document
    pub document: String,
    /// Fragment identifying a resource inside the document
    pub resource_id: Option<String>,
    /// Reference as it appeared in the source document
    pub original: String,
}

impl Href {
    /// Resolve `raw` (`path#fragment`) against the document `base`
    ///
    /// A bare fragment refers back to `base` itself.
    pub fn parse(base: Option<&str>, raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (path, fragment) = match trimmed.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment)),
            None => (trimmed, None),
        };

        let document = match (path.is_empty(), base) {
            (true, Some(base)) => resolve(None, base)?,
            _ => resolve(base, path)?,
        };

        Ok(Self {
            document,
            resource_id: fragment.filter(|f| !f.is_empty()).map(str::to_string),
            original: raw.to_string(),
        })
    }

    /// Href to a whole document that is already canonical
    pub fn document(path: impl Into<String>) -> Self {
        let document = path.into();
        Self {
            original: document.clone(),
            document,
            resource_id: None,
        }
    }

    pub fn with_resource(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }
}

impl PartialEq for Href {
    fn eq(&self, other: &Self) -> bool {
        self.document == other.document && self.resource_id == other.resource_id
    }
}

impl Eq for Href {}

impl Hash for Href {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.document.hash(state);
        self.resource_id.hash(state);
    }
}

impl fmt::Display for Href {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_id {
            Some(id) => write!(f, "{}#{}", self.document, id),
            None => write!(f, "{}", self.document),
        }
    }
}
