use std::sync::Arc;

use crate::printed_document::PrintedDocument;

/// Originator of the pages of a document (a tab, a text buffer, ...).
///
/// Name and url are read once when a document is built. Implementations are
/// called from the worker thread and must hop to their own render thread if
/// they need one.
pub trait PrintedPagesSource: Send + Sync {
    fn render_source_name(&self) -> String;

    fn render_source_url(&self) -> String;

    /// Asks the source to render `page_index` (0-based) and hand it back with
    /// [`PrintedDocument::set_page`]. The default does nothing.
    fn render_one_printed_page(&self, document: &Arc<PrintedDocument>, page_index: u32) {
        let _ = (document, page_index);
    }
}
