use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::{codecs::png::PngEncoder, ColorType, ImageEncoder, Rgba, RgbaImage};
use thiserror::Error;

use crate::metafile::{Color, DisplayCommand, Metafile, Point, Size};
use crate::printed_page::PrintedPage;

const MAX_PREVIEW_EDGE_PX: f32 = 2000.0;

/// Errors raised while dumping a page for debugging.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize metafile: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to encode preview: {0}")]
    Encode(String),
}

/// Files produced for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpedPage {
    pub metafile: PathBuf,
    pub preview: PathBuf,
}

/// Writes `page` into `dir` as a JSON metafile plus a PNG preview, named
/// `{date}_{time}_{name}_{page:02}_`.
pub fn dump_page(
    dir: &Path,
    document_name: &str,
    date: &str,
    time: &str,
    page: &PrintedPage,
) -> Result<DumpedPage, DumpError> {
    let stem = replace_illegal_characters(&format!(
        "{date}_{time}_{document_name}_{:02}_",
        page.page_number()
    ));
    fs::create_dir_all(dir).map_err(|source| DumpError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let metafile_path = dir.join(format!("{stem}.json"));
    let json = serde_json::to_vec_pretty(page.metafile())?;
    fs::write(&metafile_path, json).map_err(|source| DumpError::Io {
        path: metafile_path.clone(),
        source,
    })?;

    let preview_path = dir.join(format!("{stem}.png"));
    let png = render_preview_png(page.metafile(), page.page_size().width, page.page_size().height)?;
    fs::write(&preview_path, png).map_err(|source| DumpError::Io {
        path: preview_path.clone(),
        source,
    })?;

    Ok(DumpedPage {
        metafile: metafile_path,
        preview: preview_path,
    })
}

/// Replaces characters that are not allowed in file names with `_`.
pub fn replace_illegal_characters(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect()
}

fn render_preview_png(metafile: &Metafile, width: f32, height: f32) -> Result<Vec<u8>, DumpError> {
    let scale = (MAX_PREVIEW_EDGE_PX / width.max(height).max(1.0)).min(1.0);
    let mut canvas = PreviewCanvas::new(width, height, scale);

    for command in &metafile.commands {
        match command {
            DisplayCommand::Fill(rect) => canvas.fill(rect.origin, rect.size, rect.color),
            DisplayCommand::Text(run) => {
                // No glyphs: a run shows as a block of its estimated extent.
                let extent = Size {
                    width: run.text.chars().count() as f32 * run.font_size_pt * 0.6,
                    height: run.font_size_pt * 1.1,
                };
                canvas.fill(run.position, extent, run.color);
            }
            DisplayCommand::Rule { from, to, stroke } => {
                let left = from.x.min(to.x);
                let origin = Point { x: left, y: from.y };
                let extent = Size {
                    width: (to.x - from.x).abs(),
                    height: stroke.width.max(1.0 / scale),
                };
                canvas.fill(origin, extent, stroke.color);
            }
        }
    }
    canvas.encode()
}

/// White RGBA raster of a page, `scale` pixels per device unit.
struct PreviewCanvas {
    image: RgbaImage,
    scale: f32,
}

impl PreviewCanvas {
    fn new(width: f32, height: f32, scale: f32) -> Self {
        let width_px = (width * scale).ceil().max(1.0) as u32;
        let height_px = (height * scale).ceil().max(1.0) as u32;
        Self {
            image: RgbaImage::from_pixel(width_px, height_px, Rgba([255, 255, 255, 255])),
            scale,
        }
    }

    /// Paints the device-unit rectangle at `origin`, clipped to the page.
    /// Anything non-empty covers at least one pixel.
    fn fill(&mut self, origin: Point, size: Size, color: Color) {
        let clip = |value: f32, limit: u32| value.max(0.0).min(limit as f32) as u32;
        let (width, height) = self.image.dimensions();
        let left = (origin.x * self.scale).round();
        let top = (origin.y * self.scale).round();
        let right = left + (size.width * self.scale).ceil().max(1.0);
        let bottom = top + (size.height * self.scale).ceil().max(1.0);
        let pixel = Rgba(
            [color.r, color.g, color.b, color.a].map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8),
        );
        for y in clip(top, height)..clip(bottom, height) {
            for x in clip(left, width)..clip(right, width) {
                self.image.put_pixel(x, y, pixel);
            }
        }
    }

    fn encode(self) -> Result<Vec<u8>, DumpError> {
        let (width, height) = self.image.dimensions();
        let mut data = Vec::new();
        PngEncoder::new(&mut data)
            .write_image(self.image.as_raw(), width, height, ColorType::Rgba8)
            .map_err(|err| DumpError::Encode(err.to_string()))?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metafile::{Point, Size};
    use tempfile::tempdir;

    #[test]
    fn illegal_characters_are_replaced() {
        assert_eq!(
            replace_illegal_characters("2024-03-01_20:20:00_a/b?c_01_"),
            "2024-03-01_20_20_00_a_b_c_01_"
        );
    }

    #[test]
    fn dump_writes_metafile_and_preview() {
        let dir = tempdir().unwrap();
        let mut metafile = Metafile::new();
        metafile.push_text("hello", Point { x: 10.0, y: 10.0 }, 12.0);
        let page = PrintedPage::new(
            3,
            metafile.clone(),
            Size {
                width: 200.0,
                height: 100.0,
            },
        );

        let dumped = dump_page(dir.path(), "notes.txt", "2024-03-01", "08:15:00", &page).unwrap();
        assert_eq!(
            dumped.metafile.file_name().unwrap(),
            "2024-03-01_08_15_00_notes.txt_03_.json"
        );

        let restored: Metafile =
            serde_json::from_slice(&fs::read(&dumped.metafile).unwrap()).unwrap();
        assert_eq!(restored, metafile);

        let decoded = image::load_from_memory(&fs::read(&dumped.preview).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[test]
    fn preview_paints_fills_on_white() {
        let mut metafile = Metafile::new();
        metafile.push(DisplayCommand::Fill(crate::metafile::FilledRect {
            origin: Point { x: 0.0, y: 0.0 },
            size: Size {
                width: 10.0,
                height: 10.0,
            },
            color: Color::rgb(1.0, 0.0, 0.0),
        }));
        let png = render_preview_png(&metafile, 50.0, 50.0).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(5, 5), &Rgba([255, 0, 0, 255]));
        assert_eq!(decoded.get_pixel(30, 30), &Rgba([255, 255, 255, 255]));
    }
}
