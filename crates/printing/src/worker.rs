//! Dedicated thread driving one [`PrintingContext`].
//! 驅動單一列印內容的專屬執行緒。
//!
//! The owner talks to the thread through [`WorkerCommand`]s on a channel and
//! hears back through a swappable reply sink. The one call that crosses
//! threads without the channel is [`PrintJobWorker::cancel`].

use std::fmt;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use thiserror::Error;

use crate::environment::PrintEnvironment;
use crate::notification::{
    JobEventDetails, JobEventKind, Notification, NotificationObserver,
};
use crate::page_number::PageNumber;
use crate::platform::{DialogRequest, NativeWindow, PrintBackend};
use crate::printed_document::PrintedDocument;
use crate::printed_page::PrintedPage;
use crate::printing_context::{
    nestable_tasks_allowed, ContextCanceler, ContextError, ContextStatus, NestableTasksScope,
    PrintingContext,
};
use crate::settings::PrintSettings;

/// 工作執行緒啟動失敗時回傳的錯誤。 / Errors raised while starting the worker thread.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker thread was already started")]
    AlreadyStarted,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Message posted by the worker thread to its owner.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    SettingsDone {
        settings: PrintSettings,
        status: ContextStatus,
    },
    Event(JobEventDetails),
}

/// Receives every [`WorkerMessage`]. Runs on the worker thread.
pub type ReplySink = Box<dyn Fn(WorkerMessage) + Send>;

pub(crate) enum WorkerCommand {
    GetSettings {
        ask_user: bool,
        parent: Option<NativeWindow>,
        page_count: u32,
        has_selection: bool,
    },
    StartPrinting(Arc<PrintedDocument>),
    OnDocumentChanged(Option<Arc<PrintedDocument>>),
    OnNewPage,
    RequestMissingPages,
    Shutdown,
}

/// Owner-side handle of the worker thread.
///
/// Commands sent before [`PrintJobWorker::start`] wait in the channel. Dropping
/// the handle stops and joins the thread.
pub struct PrintJobWorker {
    commands: Sender<WorkerCommand>,
    pending: Option<(Receiver<WorkerCommand>, PrintingContext)>,
    canceler: Arc<ContextCanceler>,
    reply: Arc<Mutex<ReplySink>>,
    thread: Option<JoinHandle<()>>,
    thread_name: String,
}

impl PrintJobWorker {
    pub fn new(backend: Box<dyn PrintBackend>, env: &PrintEnvironment, reply: ReplySink) -> Self {
        let context = PrintingContext::new(backend, env.config.debug_dump_dir.clone());
        let (commands, receiver) = mpsc::channel();
        Self {
            commands,
            canceler: context.canceler(),
            pending: Some((receiver, context)),
            reply: Arc::new(Mutex::new(reply)),
            thread: None,
            thread_name: env.config.worker_thread_name.clone(),
        }
    }

    /// Spawns the thread. A worker runs at most once.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        let (receiver, context) = self.pending.take().ok_or(WorkerError::AlreadyStarted)?;
        let worker = WorkerThread {
            context,
            document: None,
            page_cursor: None,
            reply: Arc::clone(&self.reply),
        };
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || worker.run(receiver))
            .map_err(WorkerError::Spawn)?;
        self.thread = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Asks the thread to exit once the commands already queued are handled,
    /// then waits for it.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if handle.join().is_err() {
            log::error!("print worker thread panicked");
        }
    }

    /// Redirects replies, for instance when a query hands its worker to a job.
    pub fn set_new_owner(&self, reply: ReplySink) {
        *self.reply.lock() = reply;
    }

    /// Callable from any thread; later native calls report cancellation.
    pub fn cancel(&self) {
        self.canceler.cancel();
    }

    pub fn dismiss_dialog(&self) {
        self.canceler.dismiss_dialog();
    }

    /// Shares the cancellation flags with threads that do not own the worker.
    pub fn canceler(&self) -> Arc<ContextCanceler> {
        Arc::clone(&self.canceler)
    }

    pub fn get_settings(
        &self,
        ask_user: bool,
        parent: Option<NativeWindow>,
        page_count: u32,
        has_selection: bool,
    ) {
        self.send(WorkerCommand::GetSettings {
            ask_user,
            parent,
            page_count,
            has_selection,
        });
    }

    pub fn start_printing(&self, document: Arc<PrintedDocument>) {
        self.send(WorkerCommand::StartPrinting(document));
    }

    pub fn on_document_changed(&self, document: Option<Arc<PrintedDocument>>) {
        self.send(WorkerCommand::OnDocumentChanged(document));
    }

    pub fn on_new_page(&self) {
        self.send(WorkerCommand::OnNewPage);
    }

    pub fn request_missing_pages(&self) {
        self.send(WorkerCommand::RequestMissingPages);
    }

    /// Bus observer turning updates of the document `cookie` into page wakeups.
    pub(crate) fn document_forwarder(&self, cookie: i32) -> Arc<dyn NotificationObserver> {
        Arc::new(DocumentUpdateForwarder {
            cookie,
            commands: self.commands.clone(),
        })
    }

    fn send(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("print worker is gone, command dropped");
        }
    }
}

impl Drop for PrintJobWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for PrintJobWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintJobWorker")
            .field("thread_name", &self.thread_name)
            .field("running", &self.is_running())
            .finish()
    }
}

struct DocumentUpdateForwarder {
    cookie: i32,
    commands: Sender<WorkerCommand>,
}

impl NotificationObserver for DocumentUpdateForwarder {
    fn observe(&self, notification: &Notification) {
        if let Notification::PrintedDocumentUpdated { cookie, .. } = notification {
            if *cookie == self.cookie {
                let _ = self.commands.send(WorkerCommand::OnNewPage);
            }
        }
    }
}

struct WorkerThread {
    context: PrintingContext,
    document: Option<Arc<PrintedDocument>>,
    /// `None` until the page count of the document is known.
    page_cursor: Option<PageNumber>,
    reply: Arc<Mutex<ReplySink>>,
}

impl WorkerThread {
    fn run(mut self, commands: Receiver<WorkerCommand>) {
        log::debug!("print worker started");
        for command in commands.iter() {
            match command {
                WorkerCommand::GetSettings {
                    ask_user,
                    parent,
                    page_count,
                    has_selection,
                } => self.get_settings(ask_user, parent, page_count, has_selection),
                WorkerCommand::StartPrinting(document) => self.start_printing(document),
                WorkerCommand::OnDocumentChanged(document) => self.on_document_changed(document),
                WorkerCommand::OnNewPage => self.on_new_page(),
                WorkerCommand::RequestMissingPages => self.request_missing_pages(),
                WorkerCommand::Shutdown => break,
            }
        }
        log::debug!("print worker exiting");
    }

    fn get_settings(
        &mut self,
        ask_user: bool,
        parent: Option<NativeWindow>,
        page_count: u32,
        has_selection: bool,
    ) {
        debug_assert!(!nestable_tasks_allowed());
        let result = {
            // The native dialog runs its own event loop.
            let _nested = NestableTasksScope::allow();
            if ask_user {
                self.context.ask_user_for_settings(&DialogRequest {
                    parent,
                    max_pages: page_count,
                    has_selection,
                })
            } else {
                self.context.use_default_settings()
            }
        };
        if let Err(err) = &result {
            log::info!("getting print settings did not succeed: {err}");
        }
        self.post(WorkerMessage::SettingsDone {
            settings: self.context.settings().clone(),
            status: ContextStatus::of(&result),
        });
    }

    fn start_printing(&mut self, document: Arc<PrintedDocument>) {
        let is_current = self
            .document
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &document));
        if !is_current || self.page_cursor.is_some() || self.context.in_print_job() {
            log::debug!("ignoring start request for document {}", document.cookie());
            return;
        }
        if document.settings() != self.context.settings() {
            log::warn!(
                "document {} does not match the printer settings",
                document.cookie()
            );
            self.on_failure();
            return;
        }
        if let Err(err) = self.context.new_document(document.name()) {
            log::warn!("failed to start document {}: {err}", document.cookie());
            self.on_failure();
            return;
        }
        // Pages may already be rendered, from a preview for instance.
        self.on_new_page();
    }

    fn on_document_changed(&mut self, document: Option<Arc<PrintedDocument>>) {
        if self.page_cursor.is_some() {
            log::debug!("document change ignored while printing");
            return;
        }
        self.document = document;
    }

    fn on_new_page(&mut self) {
        let Some(document) = self.document.clone() else {
            return;
        };
        if !self.context.in_print_job() {
            return;
        }
        if self.page_cursor.is_none() {
            // Overlays may need the total, so wait for it.
            let Some(page_count) = document.known_page_count() else {
                return;
            };
            self.page_cursor = Some(PageNumber::new(document.settings(), page_count));
        }

        loop {
            let next = match &self.page_cursor {
                Some(cursor) => cursor.get(),
                None => return,
            };
            let Some(index) = next else {
                self.on_document_done(document);
                return;
            };
            // A missing page comes back through a document update.
            let Some(page) = document.get_page(index) else {
                return;
            };
            if let Err(err) = self.spool_page(&document, page) {
                log::warn!("failed to spool page {}: {err}", index + 1);
                self.on_failure();
                return;
            }
            if let Some(cursor) = self.page_cursor.as_mut() {
                cursor.increment();
            }
        }
    }

    fn spool_page(
        &mut self,
        document: &Arc<PrintedDocument>,
        page: Arc<PrintedPage>,
    ) -> Result<(), ContextError> {
        self.post_event(JobEventKind::NewPage, Some(document), Some(&page));
        self.context.new_page()?;
        document
            .render_printed_page(&page, self.context.context())
            .map_err(ContextError::Failed)?;
        self.context.page_done()?;
        self.post_event(JobEventKind::PageDone, Some(document), Some(&page));
        Ok(())
    }

    fn on_document_done(&mut self, document: Arc<PrintedDocument>) {
        if let Err(err) = self.context.document_done() {
            log::warn!("failed to close document {}: {err}", document.cookie());
            self.on_failure();
            return;
        }
        self.page_cursor = None;
        self.post_event(JobEventKind::DocDone, Some(&document), None);
        self.document = None;
    }

    fn request_missing_pages(&mut self) {
        if self.context.in_print_job() {
            if let Some(document) = &self.document {
                document.request_missing_pages();
            }
        }
        let document = self.document.clone();
        self.post_event(JobEventKind::AllPagesRequested, document.as_ref(), None);
    }

    fn on_failure(&mut self) {
        let document = self.document.take();
        self.post_event(JobEventKind::Failed, document.as_ref(), None);
        self.context.cancel();
        self.page_cursor = None;
    }

    fn post_event(
        &self,
        kind: JobEventKind,
        document: Option<&Arc<PrintedDocument>>,
        page: Option<&Arc<PrintedPage>>,
    ) {
        self.post(WorkerMessage::Event(JobEventDetails::new(
            kind,
            document.cloned(),
            page.cloned(),
        )));
    }

    fn post(&self, message: WorkerMessage) {
        (self.reply.lock())(message);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::recording::{BackendCall, RecordingBackend};
    use crate::metafile::Metafile;
    use crate::source::PrintedPagesSource;

    struct NamedSource;

    impl PrintedPagesSource for NamedSource {
        fn render_source_name(&self) -> String {
            "worker".into()
        }

        fn render_source_url(&self) -> String {
            String::new()
        }
    }

    fn worker_with_channel(
        backend: &RecordingBackend,
        env: &PrintEnvironment,
    ) -> (PrintJobWorker, Receiver<WorkerMessage>) {
        let (sender, receiver) = mpsc::channel();
        let worker = PrintJobWorker::new(
            Box::new(backend.clone()),
            env,
            Box::new(move |message| {
                let _ = sender.send(message);
            }),
        );
        (worker, receiver)
    }

    fn next(receiver: &Receiver<WorkerMessage>) -> WorkerMessage {
        receiver.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn next_event(receiver: &Receiver<WorkerMessage>) -> (JobEventKind, Option<u32>) {
        match next(receiver) {
            WorkerMessage::Event(details) => (details.kind, details.page_number()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn default_settings_are_reported() {
        let backend = RecordingBackend::new();
        let env = PrintEnvironment::default();
        let (mut worker, replies) = worker_with_channel(&backend, &env);
        worker.start().unwrap();
        worker.get_settings(false, None, 0, false);

        match next(&replies) {
            WorkerMessage::SettingsDone { settings, status } => {
                assert_eq!(status, ContextStatus::Ok);
                assert_eq!(settings.printer_name, "Recording Printer");
            }
            other => panic!("unexpected {other:?}"),
        }
        worker.stop();
        assert!(!worker.is_running());
        assert!(matches!(worker.start(), Err(WorkerError::AlreadyStarted)));
    }

    #[test]
    fn cached_pages_are_spooled_in_order() {
        let backend = RecordingBackend::new();
        let env = PrintEnvironment::default();
        let (mut worker, replies) = worker_with_channel(&backend, &env);
        worker.start().unwrap();
        worker.get_settings(false, None, 0, false);
        let settings = match next(&replies) {
            WorkerMessage::SettingsDone { settings, .. } => settings,
            other => panic!("unexpected {other:?}"),
        };

        let document = Arc::new(PrintedDocument::new(settings, Arc::new(NamedSource), 1, &env));
        for index in [2, 0, 1] {
            document.set_page(index, Metafile::new(), 1.0);
        }
        document.set_page_count(3);
        worker.on_document_changed(Some(Arc::clone(&document)));
        worker.start_printing(Arc::clone(&document));

        let mut events = Vec::new();
        for _ in 0..7 {
            events.push(next_event(&replies));
        }
        assert_eq!(
            events,
            vec![
                (JobEventKind::NewPage, Some(1)),
                (JobEventKind::PageDone, Some(1)),
                (JobEventKind::NewPage, Some(2)),
                (JobEventKind::PageDone, Some(2)),
                (JobEventKind::NewPage, Some(3)),
                (JobEventKind::PageDone, Some(3)),
                (JobEventKind::DocDone, None),
            ]
        );
        worker.stop();
        assert!(replies.try_recv().is_err());
        assert_eq!(backend.pages_started(), 3);
        assert!(backend.calls().contains(&BackendCall::EndDoc));
    }

    #[test]
    fn replies_follow_the_new_owner() {
        let backend = RecordingBackend::new();
        let env = PrintEnvironment::default();
        let (mut worker, first) = worker_with_channel(&backend, &env);
        let (sender, second) = mpsc::channel();
        worker.set_new_owner(Box::new(move |message| {
            let _ = sender.send(message);
        }));
        worker.start().unwrap();
        worker.request_missing_pages();

        assert_eq!(next_event(&second), (JobEventKind::AllPagesRequested, None));
        worker.stop();
        assert!(first.try_recv().is_err());
    }
}
