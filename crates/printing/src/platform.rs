use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::device::DeviceContext;
use crate::settings::PrintSettings;

/// Errors reported by a native printing API.
/// 原生列印 API 回報的錯誤。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("no printer device is open")]
    NoDevice,
    #[error("the native job was aborted")]
    Aborted,
    #[error("printer driver error: {0}")]
    Driver(String),
    #[error("spool file error: {0}")]
    Io(String),
}

/// Opaque handle of the window a settings dialog is parented to.
/// 設定對話框所屬視窗的不透明代碼。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeWindow(pub u64);

/// Parameters of a print settings dialog.
/// 列印設定對話框的參數。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialogRequest {
    pub parent: Option<NativeWindow>,
    pub max_pages: u32,
    pub has_selection: bool,
}

/// What the user did with the settings dialog.
/// 使用者對設定對話框的操作結果。
#[derive(Debug, Clone, PartialEq)]
pub enum DialogOutcome {
    Accepted(PrintSettings),
    Declined,
}

/// Cross-thread half of a backend: safe to call from any thread at any time.
/// 後端可跨執行緒呼叫的部分，任何時候皆可安全呼叫。
pub trait NativeCanceler: Send + Sync {
    /// Makes the open device context fail its next operation.
    fn cancel_device(&self);
    /// Closes a settings dialog that is currently shown, if any.
    fn dismiss_dialog(&self);
    /// Forgets an earlier cancellation so the device can start a new document.
    fn reset(&self);
}

/// Abstraction over platform-specific print APIs.
/// 平台列印 API 的抽象介面。
///
/// Every method except [`PrintBackend::canceler`] is called from the job's
/// worker thread only. Settings calls and `start_doc` may block that thread,
/// for instance while a dialog runs its own event loop.
pub trait PrintBackend: Send {
    /// Opens the default printer and returns its settings.
    fn use_default_settings(&mut self) -> Result<PrintSettings, BackendError>;

    /// Shows the native settings dialog.
    fn ask_user_for_settings(
        &mut self,
        request: &DialogRequest,
    ) -> Result<DialogOutcome, BackendError>;

    /// Opens a device for previously obtained settings.
    fn init_with_settings(&mut self, settings: &PrintSettings) -> Result<(), BackendError>;

    /// Starts a spool job, optionally redirected to `print_to_file`.
    fn start_doc(&mut self, name: &str, print_to_file: Option<&Path>) -> Result<(), BackendError>;

    fn start_page(&mut self) -> Result<(), BackendError>;

    /// Drawing target of the open page.
    fn device_context(&mut self) -> &mut dyn DeviceContext;

    fn end_page(&mut self) -> Result<(), BackendError>;

    fn end_doc(&mut self) -> Result<(), BackendError>;

    /// Throws away the spool job in progress.
    fn abort_doc(&mut self);

    /// Closes the device.
    fn release(&mut self);

    fn canceler(&self) -> Arc<dyn NativeCanceler>;
}
