use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use spoolkit_printing::{Metafile, Point, PrintSettings, PrintedDocument, PrintedPagesSource};

/// 文字檔的頁面來源，於背景執行緒排版。 / Page source for a plain text file,
/// laid out on a background thread whenever the pipeline asks for a page.
pub struct TextSource {
    name: String,
    url: String,
    lines: Arc<Vec<String>>,
    font_size_pt: f32,
    lines_per_page: Mutex<u32>,
}

impl TextSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, text: &str, font_size_pt: f32) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            lines: Arc::new(text.lines().map(|line| line.replace('\t', "    ")).collect()),
            font_size_pt,
            lines_per_page: Mutex::new(1),
        }
    }

    /// Fixes how many lines go on a page and returns the resulting page count.
    /// An empty file still prints one blank page.
    pub fn paginate(&self, lines_per_page: u32) -> u32 {
        let lines_per_page = lines_per_page.max(1);
        *self.lines_per_page.lock() = lines_per_page;
        let pages = (self.lines.len() as u32).div_ceil(lines_per_page);
        pages.max(1)
    }

    /// Lines fitting in the content area of `settings` at the source font.
    pub fn lines_fitting(&self, settings: &PrintSettings) -> u32 {
        let line_height = self.line_height(settings.dpi);
        let height = settings.page_setup.content_area().size.height;
        ((height / line_height).floor() as u32).max(1)
    }

    fn line_height(&self, dpi: u32) -> f32 {
        self.font_size_pt * 1.2 * dpi.max(1) as f32 / 72.0
    }
}

impl PrintedPagesSource for TextSource {
    fn render_source_name(&self) -> String {
        self.name.clone()
    }

    fn render_source_url(&self) -> String {
        self.url.clone()
    }

    fn render_one_printed_page(&self, document: &Arc<PrintedDocument>, page_index: u32) {
        let lines_per_page = *self.lines_per_page.lock() as usize;
        let dpi = document.settings().dpi.max(1);
        let font_size = self.font_size_pt * dpi as f32 / 72.0;
        let line_height = self.line_height(dpi);
        let lines = Arc::clone(&self.lines);
        let document = Arc::clone(document);

        let spawned = thread::Builder::new()
            .name(format!("text-layout-{page_index}"))
            .spawn(move || {
                let start = page_index as usize * lines_per_page;
                let mut metafile = Metafile::new();
                for (row, line) in lines.iter().skip(start).take(lines_per_page).enumerate() {
                    let position = Point {
                        x: 0.0,
                        y: row as f32 * line_height,
                    };
                    metafile.push_text(line.as_str(), position, font_size);
                }
                log::debug!("laid out page {} ({} commands)", page_index + 1, metafile.len());
                document.set_page(page_index, metafile, 1.0);
            });
        if let Err(err) = spawned {
            log::warn!("could not lay out page {}: {err}", page_index + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spoolkit_printing::{Orientation, PaperSize};

    #[test]
    fn paginate_rounds_up_and_keeps_one_page() {
        let source = TextSource::new("a", "", "1\n2\n3\n4\n5", 10.0);
        assert_eq!(source.paginate(2), 3);
        assert_eq!(source.paginate(5), 1);
        assert_eq!(source.paginate(0), 5);

        let empty = TextSource::new("empty", "", "", 10.0);
        assert_eq!(empty.paginate(40), 1);
    }

    #[test]
    fn lines_fitting_follows_dpi() {
        let source = TextSource::new("a", "", "", 10.0);
        let low = PrintSettings::for_paper("P", PaperSize::LETTER, Orientation::Portrait, 72);
        let high = PrintSettings::for_paper("P", PaperSize::LETTER, Orientation::Portrait, 300);
        let at_72 = source.lines_fitting(&low);
        let at_300 = source.lines_fitting(&high);
        assert!(at_72 > 40, "{at_72}");
        assert!(at_72.abs_diff(at_300) <= 1, "{at_72} vs {at_300}");
    }
}
