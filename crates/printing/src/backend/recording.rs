//! In-memory backend that records every native call.
//! 記錄所有原生呼叫的記憶體內後端。
//!
//! Failures, dialog outcomes and a gate holding `start_doc` can be scripted,
//! which makes cross-thread scenarios reproducible.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::device::{DeviceContext, Transform};
use crate::metafile::{Metafile, Point};
use crate::platform::{
    BackendError, DialogOutcome, DialogRequest, NativeCanceler, PrintBackend,
};
use crate::settings::{Orientation, PaperSize, PrintSettings};

/// One call made on a [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    DefaultSettings,
    AskUser { max_pages: u32, has_selection: bool },
    InitWithSettings,
    StartDoc {
        name: String,
        print_to_file: Option<PathBuf>,
    },
    StartPage,
    EndPage,
    EndDoc,
    AbortDoc,
    Release,
    CancelDevice,
    DismissDialog,
    ResetCanceler,
}

/// One operation made on a [`RecordingDeviceContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Save(usize),
    Restore(usize),
    SetTransform(Transform),
    PlayMetafile { commands: usize },
    DrawText {
        text: String,
        origin: Point,
        font_size: f32,
    },
}

#[derive(Default)]
struct ContextState {
    draws: Vec<DrawOp>,
    depth: usize,
    fail_playback: bool,
}

/// Device context that records draw operations. Clones share the record.
/// 記錄繪圖操作的裝置內容；複製品共用同一份紀錄。
#[derive(Clone, Default)]
pub struct RecordingDeviceContext {
    state: Arc<Mutex<ContextState>>,
}

impl RecordingDeviceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `play_metafile` fail.
    pub fn fail_playback(&self) {
        self.state.lock().fail_playback = true;
    }

    pub fn draws(&self) -> Vec<DrawOp> {
        self.state.lock().draws.clone()
    }

    /// Current depth of the saved-state stack.
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }
}

impl DeviceContext for RecordingDeviceContext {
    fn save(&mut self) -> usize {
        let mut state = self.state.lock();
        state.depth += 1;
        let depth = state.depth;
        state.draws.push(DrawOp::Save(depth));
        depth
    }

    fn restore(&mut self, depth: usize) {
        let mut state = self.state.lock();
        state.depth = depth.saturating_sub(1).min(state.depth);
        state.draws.push(DrawOp::Restore(depth));
    }

    fn set_transform(&mut self, transform: Transform) {
        self.state.lock().draws.push(DrawOp::SetTransform(transform));
    }

    fn play_metafile(&mut self, metafile: &Metafile) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.fail_playback {
            return Err(BackendError::Driver("metafile playback failed".into()));
        }
        state.draws.push(DrawOp::PlayMetafile {
            commands: metafile.len(),
        });
        Ok(())
    }

    fn draw_text(&mut self, text: &str, origin: Point, font_size: f32) -> Result<(), BackendError> {
        self.state.lock().draws.push(DrawOp::DrawText {
            text: text.to_string(),
            origin,
            font_size,
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum DialogScript {
    Accept(Option<PrintSettings>),
    Decline,
    Fail,
    /// Blocks until the dialog is dismissed, then reports it declined.
    BlockUntilDismissed,
}

struct BackendState {
    calls: Vec<BackendCall>,
    default_settings: PrintSettings,
    dialog: DialogScript,
    fail_default_settings: bool,
    fail_start_doc: bool,
    fail_start_page: Option<u32>,
    pages_started: u32,
    device_canceled: bool,
    dialog_dismissed: bool,
    dialog_open: bool,
    start_doc_held: bool,
    start_doc_waiting: bool,
}

struct Shared {
    state: Mutex<BackendState>,
    changed: Condvar,
}

impl Shared {
    fn record(&self, call: BackendCall) {
        self.state.lock().calls.push(call);
        self.changed.notify_all();
    }
}

/// Scriptable [`PrintBackend`] keeping a log of calls.
///
/// Cloning yields another handle on the same log, so a test can keep one
/// while a printing context owns the other.
#[derive(Clone)]
pub struct RecordingBackend {
    shared: Arc<Shared>,
    device: RecordingDeviceContext,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::with_settings(PrintSettings::for_paper(
            "Recording Printer",
            PaperSize::LETTER,
            Orientation::Portrait,
            72,
        ))
    }

    /// Backend whose default printer reports `settings`.
    pub fn with_settings(settings: PrintSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BackendState {
                    calls: Vec::new(),
                    default_settings: settings,
                    dialog: DialogScript::Accept(None),
                    fail_default_settings: false,
                    fail_start_doc: false,
                    fail_start_page: None,
                    pages_started: 0,
                    device_canceled: false,
                    dialog_dismissed: false,
                    dialog_open: false,
                    start_doc_held: false,
                    start_doc_waiting: false,
                }),
                changed: Condvar::new(),
            }),
            device: RecordingDeviceContext::new(),
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.shared.state.lock().calls.clone()
    }

    pub fn draws(&self) -> Vec<DrawOp> {
        self.device.draws()
    }

    pub fn device(&self) -> &RecordingDeviceContext {
        &self.device
    }

    /// Number of `start_page` calls so far.
    pub fn pages_started(&self) -> u32 {
        self.shared.state.lock().pages_started
    }

    pub fn fail_default_settings(&self) {
        self.shared.state.lock().fail_default_settings = true;
    }

    pub fn fail_start_doc(&self) {
        self.shared.state.lock().fail_start_doc = true;
    }

    /// Makes the `nth` (1-based) `start_page` call fail.
    pub fn fail_start_page(&self, nth: u32) {
        self.shared.state.lock().fail_start_page = Some(nth);
    }

    /// The dialog returns `settings`, or the default settings when `None`.
    pub fn accept_dialog(&self, settings: Option<PrintSettings>) {
        self.shared.state.lock().dialog = DialogScript::Accept(settings);
    }

    pub fn decline_dialog(&self) {
        self.shared.state.lock().dialog = DialogScript::Decline;
    }

    pub fn fail_dialog(&self) {
        self.shared.state.lock().dialog = DialogScript::Fail;
    }

    pub fn block_dialog_until_dismissed(&self) {
        self.shared.state.lock().dialog = DialogScript::BlockUntilDismissed;
    }

    /// Waits until a dialog is open. Returns false on timeout.
    pub fn wait_for_dialog(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if !state.dialog_open {
            self.shared
                .changed
                .wait_while_for(&mut state, |state| !state.dialog_open, timeout);
        }
        state.dialog_open
    }

    /// Makes `start_doc` block until [`RecordingBackend::release_start_doc`]
    /// or a device cancellation.
    pub fn hold_start_doc(&self) {
        self.shared.state.lock().start_doc_held = true;
    }

    pub fn release_start_doc(&self) {
        self.shared.state.lock().start_doc_held = false;
        self.shared.changed.notify_all();
    }

    /// Waits until `start_doc` is blocked on the gate. Returns false on timeout.
    pub fn wait_for_start_doc(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if !state.start_doc_waiting {
            self.shared
                .changed
                .wait_while_for(&mut state, |state| !state.start_doc_waiting, timeout);
        }
        state.start_doc_waiting
    }

    fn device_call(&self, call: BackendCall) -> Result<(), BackendError> {
        let canceled = {
            let mut state = self.shared.state.lock();
            state.calls.push(call);
            state.device_canceled
        };
        self.shared.changed.notify_all();
        if canceled {
            Err(BackendError::Aborted)
        } else {
            Ok(())
        }
    }
}

impl PrintBackend for RecordingBackend {
    fn use_default_settings(&mut self) -> Result<PrintSettings, BackendError> {
        self.shared.record(BackendCall::DefaultSettings);
        let state = self.shared.state.lock();
        if state.fail_default_settings {
            return Err(BackendError::Driver("no default printer".into()));
        }
        Ok(state.default_settings.clone())
    }

    fn ask_user_for_settings(
        &mut self,
        request: &DialogRequest,
    ) -> Result<DialogOutcome, BackendError> {
        self.shared.record(BackendCall::AskUser {
            max_pages: request.max_pages,
            has_selection: request.has_selection,
        });
        let mut state = self.shared.state.lock();
        match state.dialog.clone() {
            DialogScript::Accept(settings) => Ok(DialogOutcome::Accepted(
                settings.unwrap_or_else(|| state.default_settings.clone()),
            )),
            DialogScript::Decline => Ok(DialogOutcome::Declined),
            DialogScript::Fail => Err(BackendError::Driver("dialog failed".into())),
            DialogScript::BlockUntilDismissed => {
                state.dialog_open = true;
                state.dialog_dismissed = false;
                self.shared.changed.notify_all();
                self.shared
                    .changed
                    .wait_while(&mut state, |state| !state.dialog_dismissed);
                state.dialog_open = false;
                Ok(DialogOutcome::Declined)
            }
        }
    }

    fn init_with_settings(&mut self, _settings: &PrintSettings) -> Result<(), BackendError> {
        self.shared.record(BackendCall::InitWithSettings);
        Ok(())
    }

    fn start_doc(&mut self, name: &str, print_to_file: Option<&Path>) -> Result<(), BackendError> {
        self.shared.record(BackendCall::StartDoc {
            name: name.to_string(),
            print_to_file: print_to_file.map(Path::to_path_buf),
        });
        let mut state = self.shared.state.lock();
        if state.start_doc_held {
            state.start_doc_waiting = true;
            self.shared.changed.notify_all();
            self.shared.changed.wait_while(&mut state, |state| {
                state.start_doc_held && !state.device_canceled
            });
            state.start_doc_waiting = false;
        }
        if state.device_canceled {
            return Err(BackendError::Aborted);
        }
        if state.fail_start_doc {
            return Err(BackendError::Driver("spooler refused the document".into()));
        }
        Ok(())
    }

    fn start_page(&mut self) -> Result<(), BackendError> {
        let nth = {
            let mut state = self.shared.state.lock();
            state.pages_started += 1;
            state.pages_started
        };
        self.device_call(BackendCall::StartPage)?;
        if self.shared.state.lock().fail_start_page == Some(nth) {
            return Err(BackendError::Driver(format!("page {nth} rejected")));
        }
        Ok(())
    }

    fn device_context(&mut self) -> &mut dyn DeviceContext {
        &mut self.device
    }

    fn end_page(&mut self) -> Result<(), BackendError> {
        self.device_call(BackendCall::EndPage)
    }

    fn end_doc(&mut self) -> Result<(), BackendError> {
        self.device_call(BackendCall::EndDoc)
    }

    fn abort_doc(&mut self) {
        self.shared.record(BackendCall::AbortDoc);
    }

    fn release(&mut self) {
        self.shared.record(BackendCall::Release);
    }

    fn canceler(&self) -> Arc<dyn NativeCanceler> {
        Arc::new(RecordingCanceler {
            shared: Arc::clone(&self.shared),
        })
    }
}

struct RecordingCanceler {
    shared: Arc<Shared>,
}

impl NativeCanceler for RecordingCanceler {
    fn cancel_device(&self) {
        {
            let mut state = self.shared.state.lock();
            state.device_canceled = true;
            state.calls.push(BackendCall::CancelDevice);
        }
        self.shared.changed.notify_all();
    }

    fn dismiss_dialog(&self) {
        {
            let mut state = self.shared.state.lock();
            state.dialog_dismissed = true;
            state.calls.push(BackendCall::DismissDialog);
        }
        self.shared.changed.notify_all();
    }

    fn reset(&self) {
        let mut state = self.shared.state.lock();
        state.device_canceled = false;
        state.dialog_dismissed = false;
        state.calls.push(BackendCall::ResetCanceler);
    }
}
