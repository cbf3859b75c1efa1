use crate::metafile::{Metafile, Size};

/// One rendered page of a [`crate::PrintedDocument`].
///
/// Immutable once built; shared as `Arc<PrintedPage>` between the document
/// and whoever is spooling or observing it.
#[derive(Debug)]
pub struct PrintedPage {
    page_number: u32,
    metafile: Metafile,
    page_size: Size,
}

impl PrintedPage {
    pub fn new(page_number: u32, metafile: Metafile, page_size: Size) -> Self {
        debug_assert!(page_number >= 1, "page numbers shown to users are 1-based");
        Self {
            page_number,
            metafile,
            page_size,
        }
    }

    /// 1-based page number.
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn metafile(&self) -> &Metafile {
        &self.metafile
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }
}
