use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;

use crate::device::{DeviceContext, SavedState, Transform};
use crate::dump::dump_page;
use crate::environment::PrintEnvironment;
use crate::metafile::{Metafile, Point};
use crate::notification::{Notification, NotificationService};
use crate::overlays::{replace_variables, Alignment, OverlayTemplate};
use crate::page_number::PageNumber;
use crate::platform::BackendError;
use crate::printed_page::PrintedPage;
use crate::settings::{PageRange, PrintSettings, Rect};
use crate::source::PrintedPagesSource;

/// Width of one glyph relative to the font size, used to align overlay text.
const GLYPH_WIDTH_RATIO: f32 = 0.6;

/// Pages of one print job, filled in by the source and drained by the worker.
///
/// Settings, metadata and the cookie never change after construction. Pages,
/// counts and the shrink factor sit behind one lock that is held only for the
/// map or counter access, never while drawing.
pub struct PrintedDocument {
    settings: PrintSettings,
    name: String,
    url: String,
    date: String,
    time: String,
    cookie: i32,
    debug_dump_dir: Option<PathBuf>,
    bus: NotificationService,
    state: Mutex<DocumentState>,
}

struct DocumentState {
    source: Option<Arc<dyn PrintedPagesSource>>,
    /// `None` entries were requested from the source but are not rendered yet.
    pages: BTreeMap<u32, Option<Arc<PrintedPage>>>,
    expected_page_count: u32,
    page_count: Option<u32>,
    shrink_factor: Option<f64>,
}

impl PrintedDocument {
    pub fn new(
        settings: PrintSettings,
        source: Arc<dyn PrintedPagesSource>,
        cookie: i32,
        env: &PrintEnvironment,
    ) -> Self {
        let now = Local::now();
        let expected_page_count = PageRange::get_total_pages(&settings.ranges);
        Self {
            name: source.render_source_name(),
            url: source.render_source_url(),
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            settings,
            cookie,
            debug_dump_dir: env.config.debug_dump_dir.clone(),
            bus: env.bus.clone(),
            state: Mutex::new(DocumentState {
                source: Some(source),
                pages: BTreeMap::new(),
                expected_page_count,
                page_count: None,
                shrink_factor: None,
            }),
        }
    }

    /// Stores the rendering of `page_index` (0-based) and announces it.
    ///
    /// # Panics
    ///
    /// When `shrink` differs from the value given with the first page.
    pub fn set_page(&self, page_index: u32, metafile: Metafile, shrink: f64) {
        assert!(shrink > 0.0, "shrink factor must be positive");
        let page = Arc::new(PrintedPage::new(
            page_index + 1,
            metafile,
            self.settings.page_setup.physical_size,
        ));
        {
            let mut state = self.state.lock();
            match state.shrink_factor {
                None => state.shrink_factor = Some(shrink),
                Some(existing) => assert!(
                    existing == shrink,
                    "shrink factor changed from {existing} to {shrink}"
                ),
            }
            state.pages.insert(page_index, Some(Arc::clone(&page)));
        }

        if let Some(dir) = &self.debug_dump_dir {
            if let Err(err) = dump_page(dir, &self.name, &self.date, &self.time, &page) {
                log::warn!("failed to dump page {}: {err}", page.page_number());
            }
        }
        self.bus.notify(Notification::PrintedDocumentUpdated {
            cookie: self.cookie,
            page: Some(page),
        });
    }

    /// Returns the page when it is rendered.
    ///
    /// The first miss on an index asks the source to render it; later misses
    /// only report that the page is not ready.
    pub fn get_page(self: &Arc<Self>, page_index: u32) -> Option<Arc<PrintedPage>> {
        let source = {
            let mut state = self.state.lock();
            match state.pages.get(&page_index) {
                Some(Some(page)) => return Some(Arc::clone(page)),
                Some(None) => return None,
                None => {
                    state.pages.insert(page_index, None);
                    state.source.clone()
                }
            }
        };
        if let Some(source) = source {
            source.render_one_printed_page(self, page_index);
        }
        None
    }

    /// Draws `page` into `context`: scaled content first, then the header
    /// and footer. The context state is restored whatever happens.
    pub fn render_printed_page(
        &self,
        page: &PrintedPage,
        context: &mut dyn DeviceContext,
    ) -> Result<(), BackendError> {
        let shrink = self.state.lock().shrink_factor.unwrap_or(1.0);
        let content = self.settings.page_setup.content_area();
        {
            let mut saved = SavedState::new(&mut *context);
            saved.set_transform(Transform {
                scale: (1.0 / shrink) as f32,
                dx: content.origin.x,
                dy: content.origin.y,
            });
            saved.play_metafile(page.metafile())?;
        }

        let mut saved = SavedState::new(&mut *context);
        saved.reset_transform();
        let setup = &self.settings.page_setup;
        let overlays = &self.settings.overlays;
        self.draw_band(&mut *saved, &overlays.header, page, setup.header_area())?;
        self.draw_band(&mut *saved, &overlays.footer, page, setup.footer_area())?;
        Ok(())
    }

    fn draw_band(
        &self,
        context: &mut dyn DeviceContext,
        template: &OverlayTemplate,
        page: &PrintedPage,
        band: Rect,
    ) -> Result<(), BackendError> {
        if template.is_empty() || band.size.height <= 0.0 {
            return Ok(());
        }
        let rendered = replace_variables(template, self, page);
        let font_size = band.size.height * 0.75;
        for alignment in Alignment::ALL {
            let text = rendered.slot(alignment);
            if text.is_empty() {
                continue;
            }
            let width = text.chars().count() as f32 * font_size * GLYPH_WIDTH_RATIO;
            let x = match alignment {
                Alignment::Left => band.origin.x,
                Alignment::Center => band.origin.x + (band.size.width - width) / 2.0,
                Alignment::Right => band.right() - width,
            };
            context.draw_text(text, Point { x, y: band.origin.y }, font_size)?;
        }
        Ok(())
    }

    /// True once the page count is known and every page to print is rendered.
    pub fn is_complete(&self) -> bool {
        let state = self.state.lock();
        let Some(page_count) = state.page_count else {
            return false;
        };
        PageNumber::new(&self.settings, page_count)
            .all(|index| matches!(state.pages.get(&index), Some(Some(_))))
    }

    /// # Panics
    ///
    /// When the page count was already set.
    pub fn set_page_count(&self, page_count: u32) {
        {
            let mut state = self.state.lock();
            assert!(
                state.page_count.is_none(),
                "page count of document {} set twice",
                self.cookie
            );
            state.page_count = Some(page_count);
            if self.settings.ranges.is_empty() {
                state.expected_page_count = page_count;
            }
        }
        self.bus.notify(Notification::PrintedDocumentUpdated {
            cookie: self.cookie,
            page: None,
        });
    }

    /// Marks every page still missing as requested and asks the source for it.
    ///
    /// Returns false when there is nothing to walk yet, or when pages are
    /// missing and the source is gone.
    pub fn request_missing_pages(self: &Arc<Self>) -> bool {
        let (missing, source) = {
            let mut state = self.state.lock();
            let cursor = PageNumber::new(&self.settings, state.page_count.unwrap_or(0));
            if cursor.is_npos() {
                return false;
            }
            let mut missing = Vec::new();
            for index in cursor {
                match state.pages.get(&index) {
                    Some(Some(_)) => {}
                    _ => {
                        state.pages.insert(index, None);
                        missing.push(index);
                    }
                }
            }
            (missing, state.source.clone())
        };
        if missing.is_empty() {
            return true;
        }
        let Some(source) = source else {
            return false;
        };
        log::debug!(
            "requesting {} missing pages of document {}",
            missing.len(),
            self.cookie
        );
        for index in missing {
            source.render_one_printed_page(self, index);
        }
        true
    }

    /// Forgets the source; requests for pages become no-ops.
    pub fn disconnect_source(&self) {
        self.state.lock().source = None;
    }

    pub fn source(&self) -> Option<Arc<dyn PrintedPagesSource>> {
        self.state.lock().source.clone()
    }

    pub fn settings(&self) -> &PrintSettings {
        &self.settings
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn cookie(&self) -> i32 {
        self.cookie
    }

    /// Total page count, `0` until [`PrintedDocument::set_page_count`] ran.
    pub fn page_count(&self) -> u32 {
        self.state.lock().page_count.unwrap_or(0)
    }

    pub fn known_page_count(&self) -> Option<u32> {
        self.state.lock().page_count
    }

    pub fn expected_page_count(&self) -> u32 {
        self.state.lock().expected_page_count
    }

    pub fn shrink_factor(&self) -> Option<f64> {
        self.state.lock().shrink_factor
    }
}

impl fmt::Debug for PrintedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintedDocument")
            .field("cookie", &self.cookie)
            .field("name", &self.name)
            .field("page_count", &self.known_page_count())
            .finish_non_exhaustive()
    }
}
