use std::sync::Arc;

use crate::component::ComponentHandle;
use crate::container::{ComponentSet, Linkbase, Schema};
use crate::engine::DocumentQueue;
use crate::error::Result;
use crate::xml::XmlDocument;

/// What a hook hands back to the engine
///
/// `None` means the hook did not apply to this document. It is not an error.
pub type Extracted = Result<Option<Vec<ComponentHandle>>>;

/// A pluggable reader for one family of components
///
/// Phase 1 hooks ([`read_schema`](Extractor::read_schema),
/// [`read_linkbase`](Extractor::read_linkbase)) run concurrently across
/// documents while the taxonomy is being discovered; they may queue further
/// documents and create shells for ids defined elsewhere. Within one document
/// extractors run one after another in registration order.
///
/// [`post_process`](Extractor::post_process) runs exactly once per extractor,
/// in registration order, after every document has been read. It sees the
/// complete [`ComponentSet`] and is where hrefs captured in phase 1 get
/// resolved.
///
/// Components returned from a hook are registered with the container the
/// hook ran against (or the set, for `post_process`). Returning a different
/// instance for an id that is already registered is a conflict.
pub trait Extractor: Send + Sync {
    /// Identity used when attributing errors and timings
    fn name(&self) -> &str;

    fn read_schema(
        &self,
        _queue: &DocumentQueue,
        _schema: &Arc<Schema>,
        _document: &XmlDocument,
    ) -> Extracted {
        Ok(None)
    }

    fn read_linkbase(
        &self,
        _queue: &DocumentQueue,
        _linkbase: &Arc<Linkbase>,
        _document: &XmlDocument,
    ) -> Extracted {
        Ok(None)
    }

    fn post_process(&self, _set: &ComponentSet) -> Extracted {
        Ok(None)
    }
}
