use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::environment::PrintEnvironment;
use crate::platform::{NativeWindow, PrintBackend};
use crate::printing_context::ContextStatus;
use crate::settings::PrintSettings;
use crate::worker::{PrintJobWorker, ReplySink, WorkerError, WorkerMessage};

/// Holder of a worker and the settings it obtained, able to hand both over.
pub trait PrintJobWorkerOwner {
    fn settings(&self) -> &PrintSettings;

    /// Cookie of the settings, `0` when none were obtained.
    fn cookie(&self) -> i32;

    /// Gives the worker away; its replies go to `new_owner` from now on.
    fn detach_worker(&mut self, new_owner: ReplySink) -> Option<PrintJobWorker>;
}

/// Called once the settings requested by [`PrinterQuery::get_settings`] arrived.
pub type SettingsCallback = Box<dyn FnOnce(&PrinterQuery) + Send>;

/// Fetches print settings ahead of a job, on its own worker thread.
///
/// The query is pumped by its owner with [`PrinterQuery::process_pending_tasks`]
/// or [`PrinterQuery::wait_for_settings`]; the worker is later handed to a
/// [`crate::PrintJob`] through [`PrintJobWorkerOwner::detach_worker`].
pub struct PrinterQuery {
    worker: Option<PrintJobWorker>,
    inbox: Receiver<WorkerMessage>,
    settings: PrintSettings,
    cookie: i32,
    last_status: ContextStatus,
    is_print_dialog_box_shown: bool,
    callback: Option<SettingsCallback>,
}

impl PrinterQuery {
    pub fn new(backend: Box<dyn PrintBackend>, env: &PrintEnvironment) -> Self {
        let (sender, inbox) = mpsc::channel();
        let reply: ReplySink = Box::new(move |message| {
            let _ = sender.send(message);
        });
        Self {
            worker: Some(PrintJobWorker::new(backend, env, reply)),
            inbox,
            settings: PrintSettings::default(),
            cookie: 0,
            last_status: ContextStatus::Ok,
            is_print_dialog_box_shown: false,
            callback: None,
        }
    }

    /// Starts the worker if needed and asks it for settings. `callback` runs
    /// when the answer is processed.
    pub fn get_settings(
        &mut self,
        ask_user: bool,
        parent: Option<NativeWindow>,
        expected_page_count: u32,
        has_selection: bool,
        callback: Option<SettingsCallback>,
    ) -> Result<(), WorkerError> {
        assert!(
            !self.is_print_dialog_box_shown,
            "settings requested while the dialog is shown"
        );
        let Some(worker) = self.worker.as_mut() else {
            return Err(WorkerError::AlreadyStarted);
        };
        if !worker.is_running() {
            worker.start()?;
        }
        self.callback = callback;
        self.is_print_dialog_box_shown = ask_user;
        worker.get_settings(ask_user, parent, expected_page_count, has_selection);
        Ok(())
    }

    /// Handles every reply already received. Returns how many were handled.
    pub fn process_pending_tasks(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.inbox.try_recv() {
            self.handle(message);
            handled += 1;
        }
        handled
    }

    /// Pumps replies until settings arrive. Returns false on timeout.
    pub fn wait_for_settings(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inbox.recv_timeout(remaining) {
                Ok(message) => {
                    if self.handle(message) {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
    }

    /// Returns true when `message` carried settings.
    fn handle(&mut self, message: WorkerMessage) -> bool {
        match message {
            WorkerMessage::SettingsDone { settings, status } => {
                self.get_settings_done(settings, status);
                true
            }
            WorkerMessage::Event(details) => {
                log::debug!("printer query ignores {:?}", details.kind);
                false
            }
        }
    }

    fn get_settings_done(&mut self, settings: PrintSettings, status: ContextStatus) {
        self.is_print_dialog_box_shown = false;
        self.last_status = status;
        if status == ContextStatus::Failed {
            self.cookie = 0;
        } else {
            self.settings = settings;
            self.cookie = PrintSettings::new_cookie();
        }
        if let Some(callback) = self.callback.take() {
            callback(self);
        }
    }

    pub fn last_status(&self) -> ContextStatus {
        self.last_status
    }

    pub fn is_callback_pending(&self) -> bool {
        self.callback.is_some()
    }

    /// True while the query still owns its worker.
    pub fn is_valid(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_print_dialog_box_shown(&self) -> bool {
        self.is_print_dialog_box_shown
    }

    /// Dismisses a pending dialog and joins the worker.
    pub fn stop_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.dismiss_dialog();
            worker.stop();
        }
    }
}

impl PrintJobWorkerOwner for PrinterQuery {
    fn settings(&self) -> &PrintSettings {
        &self.settings
    }

    fn cookie(&self) -> i32 {
        self.cookie
    }

    fn detach_worker(&mut self, new_owner: ReplySink) -> Option<PrintJobWorker> {
        debug_assert!(self.callback.is_none());
        let worker = self.worker.take()?;
        worker.set_new_owner(new_owner);
        Some(worker)
    }
}

impl Drop for PrinterQuery {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl fmt::Debug for PrinterQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrinterQuery")
            .field("cookie", &self.cookie)
            .field("last_status", &self.last_status)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}
