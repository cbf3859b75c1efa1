//! Implementations of [`crate::PrintBackend`].

pub mod pdf;
pub mod recording;

pub use pdf::PdfSpoolBackend;
pub use recording::{BackendCall, DrawOp, RecordingBackend, RecordingDeviceContext};
