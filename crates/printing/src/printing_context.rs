use std::cell::Cell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::device::DeviceContext;
use crate::dump::replace_illegal_characters;
use crate::platform::{BackendError, DialogOutcome, DialogRequest, NativeCanceler, PrintBackend};
use crate::settings::PrintSettings;

thread_local! {
    static NESTABLE_TASKS_ALLOWED: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread may process nested tasks, i.e. a native call is
/// allowed to run its own event loop.
pub fn nestable_tasks_allowed() -> bool {
    NESTABLE_TASKS_ALLOWED.with(Cell::get)
}

/// Allows nested tasks on the current thread until dropped.
pub struct NestableTasksScope {
    previous: bool,
}

impl NestableTasksScope {
    pub fn allow() -> Self {
        let previous = NESTABLE_TASKS_ALLOWED.with(|allowed| allowed.replace(true));
        Self { previous }
    }
}

impl Drop for NestableTasksScope {
    fn drop(&mut self) {
        NESTABLE_TASKS_ALLOWED.with(|allowed| allowed.set(self.previous));
    }
}

/// Why a printing context operation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The user declined the dialog or a cancellation took effect.
    #[error("printing was canceled")]
    Canceled,
    #[error("native printing call failed: {0}")]
    Failed(#[source] BackendError),
}

/// Outcome of a context operation, as carried across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    Ok,
    Canceled,
    Failed,
}

impl ContextStatus {
    pub fn of<T>(result: &Result<T, ContextError>) -> Self {
        match result {
            Ok(_) => ContextStatus::Ok,
            Err(ContextError::Canceled) => ContextStatus::Canceled,
            Err(ContextError::Failed(_)) => ContextStatus::Failed,
        }
    }
}

/// Cancellation flags of a [`PrintingContext`], shareable with other threads.
pub struct ContextCanceler {
    abort_printing: AtomicBool,
    dialog_dismissed: AtomicBool,
    native: Arc<dyn NativeCanceler>,
}

impl ContextCanceler {
    fn new(native: Arc<dyn NativeCanceler>) -> Self {
        Self {
            abort_printing: AtomicBool::new(false),
            dialog_dismissed: AtomicBool::new(false),
            native,
        }
    }

    /// Makes every following context operation report [`ContextError::Canceled`].
    pub fn cancel(&self) {
        self.abort_printing.store(true, Ordering::SeqCst);
        self.native.cancel_device();
        self.dismiss_dialog();
    }

    pub fn dismiss_dialog(&self) {
        self.dialog_dismissed.store(true, Ordering::SeqCst);
        self.native.dismiss_dialog();
    }

    pub fn is_canceled(&self) -> bool {
        self.abort_printing.load(Ordering::SeqCst)
    }

    fn dialog_was_dismissed(&self) -> bool {
        self.dialog_dismissed.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.abort_printing.store(false, Ordering::SeqCst);
        self.dialog_dismissed.store(false, Ordering::SeqCst);
        self.native.reset();
    }
}

/// Stateful wrapper around a native printing API.
///
/// `Uninitialized → settings obtained → new_document → {new_page → page_done}*
/// → document_done → Uninitialized`. Only the worker thread drives it; the
/// [`ContextCanceler`] is the single piece other threads may touch.
pub struct PrintingContext {
    backend: Box<dyn PrintBackend>,
    settings: PrintSettings,
    has_device: bool,
    in_print_job: bool,
    dialog_shown: bool,
    page_number: Option<u32>,
    print_to_file_dir: Option<PathBuf>,
    canceler: Arc<ContextCanceler>,
}

impl PrintingContext {
    /// `print_to_file_dir` redirects every document to a file in that directory.
    pub fn new(backend: Box<dyn PrintBackend>, print_to_file_dir: Option<PathBuf>) -> Self {
        let canceler = Arc::new(ContextCanceler::new(backend.canceler()));
        Self {
            backend,
            settings: PrintSettings::default(),
            has_device: false,
            in_print_job: false,
            dialog_shown: false,
            page_number: None,
            print_to_file_dir,
            canceler,
        }
    }

    pub fn use_default_settings(&mut self) -> Result<(), ContextError> {
        debug_assert!(!self.in_print_job);
        if self.canceler.is_canceled() {
            self.release_device();
            return Err(ContextError::Canceled);
        }
        match self.backend.use_default_settings() {
            Ok(settings) => {
                self.settings = settings;
                self.has_device = true;
                Ok(())
            }
            Err(err) => Err(self.on_error(err)),
        }
    }

    /// Runs the native dialog. Blocks until the user closes it or it is dismissed.
    pub fn ask_user_for_settings(&mut self, request: &DialogRequest) -> Result<(), ContextError> {
        debug_assert!(!self.in_print_job);
        if self.canceler.is_canceled() {
            self.release_device();
            return Err(ContextError::Canceled);
        }
        self.canceler.dialog_dismissed.store(false, Ordering::SeqCst);
        self.dialog_shown = true;
        let outcome = self.backend.ask_user_for_settings(request);
        self.dialog_shown = false;

        if self.canceler.dialog_was_dismissed() {
            self.release_device();
            return Err(ContextError::Canceled);
        }
        match outcome {
            Ok(DialogOutcome::Accepted(settings)) => {
                self.settings = settings;
                self.has_device = true;
                Ok(())
            }
            Ok(DialogOutcome::Declined) => {
                self.release_device();
                Err(ContextError::Canceled)
            }
            Err(err) => Err(self.on_error(err)),
        }
    }

    pub fn init_with_settings(&mut self, settings: PrintSettings) -> Result<(), ContextError> {
        debug_assert!(!self.in_print_job);
        if self.canceler.is_canceled() {
            self.release_device();
            return Err(ContextError::Canceled);
        }
        match self.backend.init_with_settings(&settings) {
            Ok(()) => {
                self.settings = settings;
                self.has_device = true;
                Ok(())
            }
            Err(err) => Err(self.on_error(err)),
        }
    }

    /// Opens the native spool job. May run a native event loop.
    pub fn new_document(&mut self, document_name: &str) -> Result<(), ContextError> {
        assert!(
            !nestable_tasks_allowed(),
            "new_document called while nested tasks are allowed"
        );
        debug_assert!(!self.in_print_job);
        if self.canceler.is_canceled() {
            return Err(ContextError::Canceled);
        }
        if !self.has_device {
            return Err(self.on_error(BackendError::NoDevice));
        }
        self.in_print_job = true;
        let print_to_file = self
            .print_to_file_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.prn", replace_illegal_characters(document_name))));
        if let Err(err) = self.backend.start_doc(document_name, print_to_file.as_deref()) {
            return Err(self.on_error(err));
        }
        self.page_number = Some(0);
        Ok(())
    }

    pub fn new_page(&mut self) -> Result<(), ContextError> {
        if self.canceler.is_canceled() {
            return Err(ContextError::Canceled);
        }
        assert!(self.in_print_job, "new_page called outside of a document");
        self.backend.start_page().map_err(|err| self.on_error(err))?;
        self.page_number = self.page_number.map(|page| page + 1);
        Ok(())
    }

    pub fn page_done(&mut self) -> Result<(), ContextError> {
        if self.canceler.is_canceled() {
            return Err(ContextError::Canceled);
        }
        assert!(self.in_print_job, "page_done called outside of a document");
        self.backend.end_page().map_err(|err| self.on_error(err))
    }

    /// Closes the spool job and goes back to the uninitialized state.
    pub fn document_done(&mut self) -> Result<(), ContextError> {
        if self.canceler.is_canceled() {
            return Err(ContextError::Canceled);
        }
        assert!(self.in_print_job, "document_done called outside of a document");
        self.backend.end_doc().map_err(|err| self.on_error(err))?;
        self.release_device();
        Ok(())
    }

    /// Safe from any thread through [`PrintingContext::canceler`].
    pub fn cancel(&self) {
        self.canceler.cancel();
    }

    pub fn dismiss_dialog(&self) {
        self.canceler.dismiss_dialog();
    }

    /// Closes the device, clears settings and cancellation so the context can
    /// be used for another job.
    pub fn reset_settings(&mut self) {
        if self.in_print_job {
            self.backend.abort_doc();
        }
        self.release_device();
        self.canceler.clear();
    }

    pub fn canceler(&self) -> Arc<ContextCanceler> {
        Arc::clone(&self.canceler)
    }

    pub fn settings(&self) -> &PrintSettings {
        &self.settings
    }

    pub fn in_print_job(&self) -> bool {
        self.in_print_job
    }

    pub fn is_dialog_shown(&self) -> bool {
        self.dialog_shown
    }

    /// Pages started in the current document.
    pub fn pages_started(&self) -> Option<u32> {
        self.page_number
    }

    /// Drawing target of the open page.
    pub fn context(&mut self) -> &mut dyn DeviceContext {
        self.backend.device_context()
    }

    fn on_error(&mut self, err: BackendError) -> ContextError {
        let canceled = self.canceler.is_canceled();
        if self.in_print_job {
            self.backend.abort_doc();
        }
        self.release_device();
        if canceled {
            log::debug!("native printing call failed after cancellation: {err}");
            ContextError::Canceled
        } else {
            log::warn!("native printing call failed: {err}");
            ContextError::Failed(err)
        }
    }

    fn release_device(&mut self) {
        if self.has_device {
            self.backend.release();
        }
        self.has_device = false;
        self.in_print_job = false;
        self.page_number = None;
        self.settings.clear();
    }
}

impl Drop for PrintingContext {
    fn drop(&mut self) {
        if self.in_print_job {
            self.backend.abort_doc();
        }
        self.release_device();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{BackendCall, RecordingBackend};

    fn ready_context(backend: &RecordingBackend) -> PrintingContext {
        let mut context = PrintingContext::new(Box::new(backend.clone()), None);
        context.use_default_settings().unwrap();
        context
    }

    #[test]
    fn full_document_cycle_returns_to_uninitialized() {
        let backend = RecordingBackend::new();
        let mut context = ready_context(&backend);
        assert!(!context.settings().is_empty());

        context.new_document("doc").unwrap();
        assert!(context.in_print_job());
        context.new_page().unwrap();
        context.page_done().unwrap();
        context.document_done().unwrap();

        assert!(!context.in_print_job());
        assert!(context.settings().is_empty());
        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::DefaultSettings,
                BackendCall::StartDoc {
                    name: "doc".into(),
                    print_to_file: None
                },
                BackendCall::StartPage,
                BackendCall::EndPage,
                BackendCall::EndDoc,
                BackendCall::Release,
            ]
        );
    }

    #[test]
    fn cancel_before_document_done_reports_canceled() {
        let backend = RecordingBackend::new();
        let mut context = ready_context(&backend);
        context.new_document("doc").unwrap();
        context.new_page().unwrap();

        context.canceler().cancel();

        assert_eq!(context.page_done(), Err(ContextError::Canceled));
        assert_eq!(context.new_page(), Err(ContextError::Canceled));
        assert_eq!(context.document_done(), Err(ContextError::Canceled));
        assert!(backend.calls().contains(&BackendCall::CancelDevice));
    }

    #[test]
    fn cancel_before_new_document_is_sticky_until_reset() {
        let backend = RecordingBackend::new();
        let mut context = ready_context(&backend);
        context.cancel();
        assert_eq!(context.new_document("doc"), Err(ContextError::Canceled));

        context.reset_settings();
        assert!(!context.canceler().is_canceled());
        assert!(backend.calls().contains(&BackendCall::ResetCanceler));
        context.use_default_settings().unwrap();
        context.new_document("doc").unwrap();
        context.new_page().unwrap();
        context.page_done().unwrap();
        context.document_done().unwrap();
    }

    #[test]
    fn driver_failure_resets_settings() {
        let backend = RecordingBackend::new();
        backend.fail_start_page(1);
        let mut context = ready_context(&backend);
        context.new_document("doc").unwrap();

        let err = context.new_page().unwrap_err();
        assert!(matches!(err, ContextError::Failed(_)));
        assert!(!context.in_print_job());
        assert!(context.settings().is_empty());
        assert!(backend.calls().contains(&BackendCall::AbortDoc));
    }

    #[test]
    fn declined_dialog_is_canceled_with_empty_settings() {
        let backend = RecordingBackend::new();
        backend.decline_dialog();
        let mut context = PrintingContext::new(Box::new(backend.clone()), None);
        let request = DialogRequest {
            parent: None,
            max_pages: 3,
            has_selection: false,
        };
        assert_eq!(
            context.ask_user_for_settings(&request),
            Err(ContextError::Canceled)
        );
        assert!(context.settings().is_empty());
    }

    #[test]
    fn new_document_without_device_fails() {
        let backend = RecordingBackend::new();
        let mut context = PrintingContext::new(Box::new(backend), None);
        assert_eq!(
            context.new_document("doc"),
            Err(ContextError::Failed(BackendError::NoDevice))
        );
    }

    #[test]
    fn nestable_scope_restores_previous_state() {
        assert!(!nestable_tasks_allowed());
        {
            let _outer = NestableTasksScope::allow();
            assert!(nestable_tasks_allowed());
            {
                let _inner = NestableTasksScope::allow();
            }
            assert!(nestable_tasks_allowed());
        }
        assert!(!nestable_tasks_allowed());
    }

    #[test]
    #[should_panic(expected = "nested tasks are allowed")]
    fn new_document_refuses_nested_tasks() {
        let backend = RecordingBackend::new();
        let mut context = ready_context(&backend);
        let _scope = NestableTasksScope::allow();
        let _ = context.new_document("doc");
    }

    #[test]
    fn print_to_file_dir_redirects_document() {
        let backend = RecordingBackend::new();
        let mut context =
            PrintingContext::new(Box::new(backend.clone()), Some(PathBuf::from("/tmp/dump")));
        context.use_default_settings().unwrap();
        context.new_document("a/b").unwrap();
        assert!(backend.calls().contains(&BackendCall::StartDoc {
            name: "a/b".into(),
            print_to_file: Some(PathBuf::from("/tmp/dump/a_b.prn")),
        }));
    }
}
