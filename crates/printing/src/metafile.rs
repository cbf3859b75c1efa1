use serde::{Deserialize, Serialize};

/// Recorded drawing commands for one rendered page.
///
/// The pipeline treats a metafile as opaque: it is produced by the content
/// source, stored in a [`crate::PrintedPage`] and replayed into a
/// [`crate::DeviceContext`] when the page is spooled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metafile {
    pub commands: Vec<DisplayCommand>,
}

impl Metafile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command to the recording.
    pub fn push(&mut self, command: DisplayCommand) {
        self.commands.push(command);
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Convenience for sources that only emit text.
    pub fn push_text(&mut self, text: impl Into<String>, position: Point, font_size_pt: f32) {
        self.push(DisplayCommand::Text(TextRun {
            text: text.into(),
            font_family: "Helvetica".into(),
            font_size_pt,
            position,
            color: Color::BLACK,
        }));
    }
}

/// One recorded drawing operation, in device units of the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisplayCommand {
    Text(TextRun),
    Fill(FilledRect),
    /// Horizontal line from `from` to `to`.
    Rule { from: Point, to: Point, stroke: Stroke },
}

/// Single line of text; `position` is its top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub font_family: String,
    pub font_size_pt: f32,
    pub position: Point,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilledRect {
    pub origin: Point,
    pub size: Size,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Normalized RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub width: f32,
    pub color: Color,
}
