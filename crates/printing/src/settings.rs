use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metafile::{Point, Size};
use crate::overlays::PageOverlays;

/// Orientation of a print page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Portrait,
    Landscape,
}

/// Supported paper identifiers for quick selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaperId {
    A4,
    Letter,
    Legal,
    A3,
    Custom,
}

/// Represents a paper size in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaperSize {
    pub id: PaperId,
    pub width_mm: f32,
    pub height_mm: f32,
}

impl PaperSize {
    pub const A4: PaperSize = PaperSize::new(PaperId::A4, 210.0, 297.0);
    pub const LETTER: PaperSize = PaperSize::new(PaperId::Letter, 215.9, 279.4);

    pub const fn new(id: PaperId, width_mm: f32, height_mm: f32) -> Self {
        Self {
            id,
            width_mm,
            height_mm,
        }
    }

    /// Converts the paper to device units at `dpi`.
    pub fn to_device_units(&self, orientation: Orientation, dpi: u32) -> Size {
        const MM_PER_INCH: f32 = 25.4;
        let width = self.width_mm / MM_PER_INCH * dpi as f32;
        let height = self.height_mm / MM_PER_INCH * dpi as f32;
        match orientation {
            Orientation::Portrait => Size { width, height },
            Orientation::Landscape => Size {
                width: height,
                height: width,
            },
        }
    }
}

/// Axis-aligned rectangle in device units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            origin: Point { x, y },
            size: Size { width, height },
        }
    }

    pub fn right(&self) -> f32 {
        self.origin.x + self.size.width
    }

    pub fn bottom(&self) -> f32 {
        self.origin.y + self.size.height
    }
}

/// Page geometry consumed by the renderer: physical size, printable area and
/// the bands reserved for header and footer text.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageSetup {
    pub physical_size: Size,
    pub printable_area: Rect,
    pub header_height: f32,
    pub footer_height: f32,
}

impl PageSetup {
    /// Builds a setup where the printable area is inset by `margin` on every side.
    pub fn with_margin(physical_size: Size, margin: f32, text_height: f32) -> Self {
        let margin = margin.max(0.0);
        Self {
            physical_size,
            printable_area: Rect::new(
                margin,
                margin,
                (physical_size.width - 2.0 * margin).max(0.0),
                (physical_size.height - 2.0 * margin).max(0.0),
            ),
            header_height: text_height,
            footer_height: text_height,
        }
    }

    /// Area left for page content once header and footer bands are removed.
    pub fn content_area(&self) -> Rect {
        let area = self.printable_area;
        Rect::new(
            area.origin.x,
            area.origin.y + self.header_height,
            area.size.width,
            (area.size.height - self.header_height - self.footer_height).max(0.0),
        )
    }

    pub fn header_area(&self) -> Rect {
        let area = self.printable_area;
        Rect::new(
            area.origin.x,
            area.origin.y,
            area.size.width,
            self.header_height,
        )
    }

    pub fn footer_area(&self) -> Rect {
        let area = self.printable_area;
        Rect::new(
            area.origin.x,
            area.bottom() - self.footer_height,
            area.size.width,
            self.footer_height,
        )
    }
}

/// Inclusive, 0-based range of pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange {
    pub from: u32,
    pub to: u32,
}

/// Errors raised while parsing a user supplied page list such as `1-3,10-12`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageRangeError {
    #[error("invalid page number '{0}'")]
    InvalidNumber(String),
    #[error("page numbers start at 1")]
    ZeroPage,
    #[error("range {from}-{to} is reversed")]
    Reversed { from: u32, to: u32 },
}

impl PageRange {
    pub const fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, page: u32) -> bool {
        self.from <= page && page <= self.to
    }

    /// Expands `ranges` into the sorted list of unique page indices. The list
    /// holds [`PageRange::get_total_pages`] entries; check that first when the
    /// ranges come from a user.
    pub fn get_pages(ranges: &[PageRange]) -> Vec<u32> {
        Self::merge(ranges)
            .into_iter()
            .flat_map(|range| range.from..=range.to)
            .collect()
    }

    /// Number of unique pages covered by `ranges`, saturating at `u32::MAX`.
    /// Works on the merged ranges, so huge ranges cost nothing.
    pub fn get_total_pages(ranges: &[PageRange]) -> u32 {
        let total: u64 = Self::merge(ranges)
            .iter()
            .map(|range| u64::from(range.to - range.from) + 1)
            .sum();
        u32::try_from(total).unwrap_or(u32::MAX)
    }

    /// Sorts `ranges` and joins the ones that overlap or touch.
    pub fn merge(ranges: &[PageRange]) -> Vec<PageRange> {
        let mut sorted: Vec<PageRange> = ranges
            .iter()
            .copied()
            .filter(|range| range.from <= range.to)
            .collect();
        sorted.sort_unstable_by_key(|range| (range.from, range.to));

        let mut merged: Vec<PageRange> = Vec::with_capacity(sorted.len());
        for range in sorted {
            match merged.last_mut() {
                Some(last) if range.from <= last.to.saturating_add(1) => {
                    last.to = last.to.max(range.to);
                }
                _ => merged.push(range),
            }
        }
        merged
    }

    /// Parses a 1-based, comma separated list (`"1-3,7,10-12"`) into 0-based
    /// ranges sorted by their first page.
    pub fn parse_list(input: &str) -> Result<Vec<PageRange>, PageRangeError> {
        let mut ranges = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (from, to) = match part.split_once('-') {
                Some((from, to)) => (parse_page(from)?, parse_page(to)?),
                None => {
                    let page = parse_page(part)?;
                    (page, page)
                }
            };
            if from > to {
                return Err(PageRangeError::Reversed { from, to });
            }
            ranges.push(PageRange::new(from - 1, to - 1));
        }
        ranges.sort_by_key(|range| range.from);
        Ok(ranges)
    }
}

fn parse_page(text: &str) -> Result<u32, PageRangeError> {
    let text = text.trim();
    let page = text
        .parse::<u32>()
        .map_err(|_| PageRangeError::InvalidNumber(text.to_string()))?;
    if page == 0 {
        return Err(PageRangeError::ZeroPage);
    }
    Ok(page)
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from + 1)
        } else {
            write!(f, "{}-{}", self.from + 1, self.to + 1)
        }
    }
}

/// Snapshot of everything a printer needs to know about a job.
///
/// Two snapshots comparing equal means a document created for one can be
/// printed with the other.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrintSettings {
    pub printer_name: String,
    pub device_name: String,
    pub ranges: Vec<PageRange>,
    pub page_setup: PageSetup,
    pub dpi: u32,
    pub min_shrink: f64,
    pub max_shrink: f64,
    pub selection_only: bool,
    pub landscape: bool,
    pub overlays: PageOverlays,
}

impl PrintSettings {
    /// Settings for `paper` at `dpi` with a half inch margin and no ranges.
    pub fn for_paper(
        printer_name: impl Into<String>,
        paper: PaperSize,
        orientation: Orientation,
        dpi: u32,
    ) -> Self {
        let physical_size = paper.to_device_units(orientation, dpi);
        let margin = dpi as f32 / 2.0;
        let text_height = dpi as f32 / 4.0;
        let printer_name = printer_name.into();
        Self {
            device_name: printer_name.clone(),
            printer_name,
            ranges: Vec::new(),
            page_setup: PageSetup::with_margin(physical_size, margin, text_height),
            dpi,
            min_shrink: 1.25,
            max_shrink: 2.0,
            selection_only: false,
            landscape: orientation == Orientation::Landscape,
            overlays: PageOverlays::default(),
        }
    }

    /// Resets every field to the empty state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns a process-unique, strictly positive cookie.
    pub fn new_cookie() -> i32 {
        static COOKIE: AtomicI32 = AtomicI32::new(1);
        COOKIE.fetch_add(1, Ordering::Relaxed)
    }
}
