//! Asynchronous print job pipeline: documents rendered page by page are
//! spooled on a dedicated worker thread through a native printing backend.

pub mod backend;
pub mod config;
pub mod device;
pub mod dump;
pub mod environment;
pub mod manager;
pub mod metafile;
pub mod notification;
pub mod overlays;
pub mod page_number;
pub mod platform;
pub mod print_job;
pub mod printed_document;
pub mod printed_page;
pub mod printer_query;
pub mod printing_context;
pub mod settings;
pub mod source;
pub mod worker;

pub use backend::{BackendCall, DrawOp, PdfSpoolBackend, RecordingBackend, RecordingDeviceContext};
pub use config::{ConfigError, PrintingConfig};
pub use device::{DeviceContext, SavedState, Transform};
pub use dump::{dump_page, replace_illegal_characters, DumpError, DumpedPage};
pub use environment::PrintEnvironment;
pub use manager::PrintJobManager;
pub use metafile::{
    Color, DisplayCommand, FilledRect, Metafile, Point, Size, Stroke, TextRun,
};
pub use notification::{
    JobEventDetails, JobEventKind, Notification, NotificationObserver, NotificationService,
    ObserverId, PrintJobRef, Subscription,
};
pub use overlays::{
    replace_variables, Alignment, OverlayError, OverlayField, OverlayPart, OverlayTemplate,
    OverlayValues, PageOverlays, RenderedOverlay,
};
pub use page_number::PageNumber;
pub use platform::{
    BackendError, DialogOutcome, DialogRequest, NativeCanceler, NativeWindow, PrintBackend,
};
pub use print_job::{JobCanceler, PrintJob, PrintJobId, SharedPrintJob};
pub use printed_document::PrintedDocument;
pub use printed_page::PrintedPage;
pub use printer_query::{PrintJobWorkerOwner, PrinterQuery, SettingsCallback};
pub use printing_context::{
    nestable_tasks_allowed, ContextCanceler, ContextError, ContextStatus, NestableTasksScope,
    PrintingContext,
};
pub use settings::{
    Orientation, PageRange, PageRangeError, PageSetup, PaperId, PaperSize, PrintSettings, Rect,
};
pub use source::PrintedPagesSource;
pub use worker::{PrintJobWorker, ReplySink, WorkerError, WorkerMessage};
