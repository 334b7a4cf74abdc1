//! Table groups
//!
//! Eurofiling taxonomies arrange their tables in groups declared by generic
//! links carrying the `group-table` arcrole. A group is a tree whose leaves
//! point at table resources and whose inner nodes point at abstract elements.
//! Only the grouping is read; tables themselves are not modelled, so leaf
//! nodes keep their href with no element attached.

use crate::container::Linkbase;
use crate::xml::{XmlDocument, ns};

use super::declares_arcrole;
use super::networks::{Network, NetworkExtractor, NetworkKind};

pub const GROUP_TABLE_ARCROLE: &str = "http://www.eurofiling.info/xbrl/arcrole/group-table";

#[derive(Debug)]
pub struct TableGroupKind;

impl NetworkKind for TableGroupKind {
    const KIND: &'static str = "table-group";
    const NAME: &'static str = "table-groups";
    const LINK_NAMESPACE: &'static str = ns::GEN;
    const LINK: &'static str = "link";
    const LINKBASE_REF_ROLE: &'static str = "";
    const REQUIRE_TREE: bool = true;

    /// Generic linkbases are referenced without a role; the `arcroleRef`
    /// tells group linkbases apart from generic label linkbases
    fn applies(linkbase: &Linkbase, document: &XmlDocument) -> bool {
        linkbase.role().is_none_or(str::is_empty)
            && declares_arcrole(document, GROUP_TABLE_ARCROLE)
    }
}

pub type TableGroup = Network<TableGroupKind>;
pub type TableGroupExtractor = NetworkExtractor<TableGroupKind>;
