use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::PrintingConfig;
use crate::device::{DeviceContext, Transform};
use crate::dump::replace_illegal_characters;
use crate::metafile::{Color, DisplayCommand, Metafile, Point};
use crate::platform::{
    BackendError, DialogOutcome, DialogRequest, NativeCanceler, PrintBackend,
};
use crate::settings::PrintSettings;

/// "Print to file" backend writing each document as a PDF.
///
/// Pages are kept in memory until `end_doc`, so an aborted or canceled
/// document leaves nothing on disk. There is no native dialog: asking the
/// user returns the default settings.
pub struct PdfSpoolBackend {
    output_dir: PathBuf,
    default_settings: PrintSettings,
    settings: Option<PrintSettings>,
    document: Option<PendingDocument>,
    device: PdfDeviceContext,
    canceler: Arc<PdfCanceler>,
}

struct PendingDocument {
    target: PathBuf,
    pages: Vec<String>,
}

impl PdfSpoolBackend {
    pub fn new(output_dir: impl Into<PathBuf>, default_settings: PrintSettings) -> Self {
        Self {
            output_dir: output_dir.into(),
            default_settings,
            settings: None,
            document: None,
            device: PdfDeviceContext::default(),
            canceler: Arc::new(PdfCanceler::default()),
        }
    }

    pub fn from_config(output_dir: impl Into<PathBuf>, config: &PrintingConfig) -> Self {
        Self::new(output_dir, config.default_settings("PDF"))
    }

    /// File a document named `name` is written to when no redirection applies.
    pub fn document_path(output_dir: &Path, name: &str) -> PathBuf {
        output_dir.join(format!("{}.pdf", replace_illegal_characters(name)))
    }

    fn check_canceled(&self) -> Result<(), BackendError> {
        if self.canceler.canceled.load(Ordering::SeqCst) {
            Err(BackendError::Aborted)
        } else {
            Ok(())
        }
    }

    fn page_size(&self) -> (f32, f32) {
        let size = self
            .settings
            .as_ref()
            .map(|settings| settings.page_setup.physical_size)
            .unwrap_or(self.default_settings.page_setup.physical_size);
        (size.width, size.height)
    }
}

impl PrintBackend for PdfSpoolBackend {
    fn use_default_settings(&mut self) -> Result<PrintSettings, BackendError> {
        self.settings = Some(self.default_settings.clone());
        Ok(self.default_settings.clone())
    }

    fn ask_user_for_settings(
        &mut self,
        _request: &DialogRequest,
    ) -> Result<DialogOutcome, BackendError> {
        self.settings = Some(self.default_settings.clone());
        Ok(DialogOutcome::Accepted(self.default_settings.clone()))
    }

    fn init_with_settings(&mut self, settings: &PrintSettings) -> Result<(), BackendError> {
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn start_doc(&mut self, name: &str, print_to_file: Option<&Path>) -> Result<(), BackendError> {
        self.check_canceled()?;
        if self.settings.is_none() {
            return Err(BackendError::NoDevice);
        }
        let target = match print_to_file {
            Some(path) => path.to_path_buf(),
            None => Self::document_path(&self.output_dir, name),
        };
        log::debug!("spooling '{name}' to {}", target.display());
        self.document = Some(PendingDocument {
            target,
            pages: Vec::new(),
        });
        Ok(())
    }

    fn start_page(&mut self) -> Result<(), BackendError> {
        self.check_canceled()?;
        if self.document.is_none() {
            return Err(BackendError::NoDevice);
        }
        let (_, height) = self.page_size();
        self.device.begin_page(height);
        Ok(())
    }

    fn device_context(&mut self) -> &mut dyn DeviceContext {
        &mut self.device
    }

    fn end_page(&mut self) -> Result<(), BackendError> {
        self.check_canceled()?;
        let stream = self.device.take_stream();
        let document = self.document.as_mut().ok_or(BackendError::NoDevice)?;
        document.pages.push(stream);
        Ok(())
    }

    fn end_doc(&mut self) -> Result<(), BackendError> {
        self.check_canceled()?;
        let document = self.document.take().ok_or(BackendError::NoDevice)?;
        let (width, height) = self.page_size();
        let bytes = render_pdf_document(&document.pages, width, height)
            .map_err(|err| BackendError::Io(err.to_string()))?;
        if let Some(parent) = document.target.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| BackendError::Io(format!("{}: {err}", parent.display())))?;
        }
        fs::write(&document.target, bytes)
            .map_err(|err| BackendError::Io(format!("{}: {err}", document.target.display())))?;
        log::info!(
            "wrote {} page(s) to {}",
            document.pages.len(),
            document.target.display()
        );
        Ok(())
    }

    fn abort_doc(&mut self) {
        if let Some(document) = self.document.take() {
            log::debug!("discarding spool for {}", document.target.display());
        }
        self.device.take_stream();
    }

    fn release(&mut self) {
        self.settings = None;
    }

    fn canceler(&self) -> Arc<dyn NativeCanceler> {
        self.canceler.clone()
    }
}

#[derive(Default)]
struct PdfCanceler {
    canceled: AtomicBool,
}

impl NativeCanceler for PdfCanceler {
    fn cancel_device(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    fn dismiss_dialog(&self) {}

    fn reset(&self) {
        self.canceled.store(false, Ordering::SeqCst);
    }
}

/// Accumulates the content stream of the open page.
#[derive(Default)]
struct PdfDeviceContext {
    stream: String,
    page_height: f32,
    transform: Transform,
    saved: Vec<Transform>,
}

impl PdfDeviceContext {
    fn begin_page(&mut self, page_height: f32) {
        self.stream.clear();
        self.page_height = page_height;
        self.transform = Transform::IDENTITY;
        self.saved.clear();
    }

    fn take_stream(&mut self) -> String {
        std::mem::take(&mut self.stream)
    }

    fn write_text(&mut self, text: &str, origin: Point, font_size: f32, color: Color) {
        let origin = self.transform.apply(origin);
        let size = font_size * self.transform.scale;
        let _ = writeln!(
            self.stream,
            "{color} rg\nBT\n/F1 {size} Tf\n1 0 0 1 {x} {y} Tm\n({text}) Tj\nET",
            color = rgb_to_pdf(color),
            size = fmt_float(size),
            x = fmt_float(origin.x),
            y = fmt_float(self.page_height - origin.y - size),
            text = pdf_escape_text(text),
        );
    }
}

impl DeviceContext for PdfDeviceContext {
    fn save(&mut self) -> usize {
        self.saved.push(self.transform);
        self.saved.len()
    }

    fn restore(&mut self, depth: usize) {
        if depth == 0 || depth > self.saved.len() {
            return;
        }
        self.transform = self.saved[depth - 1];
        self.saved.truncate(depth - 1);
    }

    fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    fn play_metafile(&mut self, metafile: &Metafile) -> Result<(), BackendError> {
        let scale = self.transform.scale;
        for command in &metafile.commands {
            match command {
                DisplayCommand::Text(run) => {
                    self.write_text(&run.text, run.position, run.font_size_pt, run.color);
                }
                DisplayCommand::Fill(rect) => {
                    let origin = self.transform.apply(rect.origin);
                    let height = rect.size.height * scale;
                    let _ = writeln!(
                        self.stream,
                        "{color} rg\n{x} {y} {w} {h} re f",
                        color = rgb_to_pdf(rect.color),
                        x = fmt_float(origin.x),
                        y = fmt_float(self.page_height - origin.y - height),
                        w = fmt_float(rect.size.width * scale),
                        h = fmt_float(height),
                    );
                }
                DisplayCommand::Rule { from, to, stroke } => {
                    let from = self.transform.apply(*from);
                    let to = self.transform.apply(*to);
                    let y = fmt_float(self.page_height - from.y);
                    let _ = writeln!(
                        self.stream,
                        "{color} RG\n{width} w\n{x0} {y} m {x1} {y} l S",
                        color = rgb_to_pdf(stroke.color),
                        width = fmt_float(stroke.width * scale),
                        x0 = fmt_float(from.x),
                        x1 = fmt_float(to.x),
                    );
                }
            }
        }
        Ok(())
    }

    fn draw_text(&mut self, text: &str, origin: Point, font_size: f32) -> Result<(), BackendError> {
        self.write_text(text, origin, font_size, Color::BLACK);
        Ok(())
    }
}

fn render_pdf_document(pages: &[String], page_width: f32, page_height: f32) -> io::Result<Vec<u8>> {
    let mut builder = PdfBuilder::new();
    let pages_object = builder.reserve();
    let font_object = builder.add_object("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");
    let mut page_objects = Vec::with_capacity(pages.len());

    for stream in pages {
        let content_object = builder.add_stream(stream.as_bytes());
        let page_object = builder.add_object(format!(
            "<< /Type /Page /Parent {pages_object} 0 R /MediaBox [0 0 {width} {height}] \
             /Resources << /Font << /F1 {font_object} 0 R >> >> /Contents {content_object} 0 R >>",
            width = fmt_float(page_width),
            height = fmt_float(page_height),
        ));
        page_objects.push(page_object);
    }

    let kids = page_objects
        .iter()
        .map(|obj| format!("{obj} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");
    builder.fill(
        pages_object,
        format!(
            "<< /Type /Pages /Count {count} /Kids [{kids}] >>",
            count = pages.len()
        ),
    );
    let catalog = builder.add_object(format!("<< /Type /Catalog /Pages {pages_object} 0 R >>"));
    builder.finish(catalog)
}

fn fmt_float(value: f32) -> String {
    format!("{:.3}", value)
}

fn rgb_to_pdf(color: Color) -> String {
    format!(
        "{:.3} {:.3} {:.3}",
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0)
    )
}

fn pdf_escape_text(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '(' | ')' | '\\' => {
                output.push('\\');
                output.push(ch);
            }
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            _ => output.push(ch),
        }
    }
    output
}

/// Numbered object table serialized with a cross-reference section.
struct PdfBuilder {
    objects: Vec<String>,
}

impl PdfBuilder {
    fn new() -> Self {
        Self {
            objects: Vec::new(),
        }
    }

    /// Allocates an object number whose body is supplied later with `fill`.
    fn reserve(&mut self) -> usize {
        self.add_object(String::new())
    }

    fn fill(&mut self, number: usize, body: String) {
        self.objects[number - 1] = body;
    }

    fn add_object(&mut self, body: impl Into<String>) -> usize {
        self.objects.push(body.into());
        self.objects.len()
    }

    fn add_stream(&mut self, stream: &[u8]) -> usize {
        let mut body = format!("<< /Length {} >>\nstream\n", stream.len());
        body.push_str(&String::from_utf8_lossy(stream));
        body.push_str("\nendstream");
        self.add_object(body)
    }

    fn finish(self, root: usize) -> io::Result<Vec<u8>> {
        let mut output = Vec::new();
        output.extend_from_slice(b"%PDF-1.4\n%\xFF\xFF\xFF\xFF\n");
        let mut offsets = Vec::with_capacity(self.objects.len());

        for (index, body) in self.objects.iter().enumerate() {
            offsets.push(output.len());
            writeln!(output, "{} 0 obj\n{}\nendobj", index + 1, body)?;
        }

        let xref_start = output.len();
        writeln!(
            output,
            "xref\n0 {}\n0000000000 65535 f ",
            self.objects.len() + 1
        )?;
        for offset in &offsets {
            writeln!(output, "{:010} 00000 n ", offset)?;
        }
        writeln!(
            output,
            "trailer\n<< /Size {} /Root {} 0 R >>",
            self.objects.len() + 1,
            root
        )?;
        writeln!(output, "startxref\n{}\n%%EOF", xref_start)?;
        Ok(output)
    }
}
