//! Owner-side coordinator of one print job.
//! 單一列印作業在擁有者執行緒上的協調者。
//!
//! A [`PrintJob`] lives behind [`SharedPrintJob`] and is driven by whoever
//! pumps its inbox ([`PrintJob::process_pending_tasks`], the manager, or
//! [`PrintJob::flush_job`]). Worker replies and the job's own deferred tasks
//! arrive on that inbox in order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::environment::PrintEnvironment;
use crate::notification::{
    JobEventDetails, JobEventKind, Notification, ObserverId, PrintJobRef,
};
use crate::platform::{NativeWindow, PrintBackend};
use crate::printed_document::PrintedDocument;
use crate::printer_query::PrintJobWorkerOwner;
use crate::printing_context::{ContextCanceler, ContextStatus};
use crate::settings::PrintSettings;
use crate::source::PrintedPagesSource;
use crate::worker::{PrintJobWorker, ReplySink, WorkerMessage};

/// Print jobs are shared between their owner, the manager and event handles.
pub type SharedPrintJob = Arc<Mutex<PrintJob>>;

/// 列印作業的不透明識別碼。 / Opaque identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrintJobId(u64);

impl PrintJobId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PrintJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "print-job-{}", self.0)
    }
}

enum JobTask {
    Worker(WorkerMessage),
    /// Deferred end of job after DOC_DONE.
    FinishJob,
    /// Posted by a [`JobCanceler`] on another thread.
    Cancel,
}

/// Cancels a job without taking its lock.
///
/// The native job is aborted right away; FAILED and the stop happen on the
/// next turn of the job's inbox, which [`PrintJob::flush_job`] also runs.
#[derive(Clone)]
pub struct JobCanceler {
    id: PrintJobId,
    context: Option<Arc<ContextCanceler>>,
    outbox: Sender<JobTask>,
}

impl JobCanceler {
    pub fn cancel(&self) {
        log::debug!("print job {} canceled from another thread", self.id);
        if let Some(context) = &self.context {
            context.cancel();
        }
        let _ = self.outbox.send(JobTask::Cancel);
    }

    pub fn job_id(&self) -> PrintJobId {
        self.id
    }
}

impl fmt::Debug for JobCanceler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCanceler").field("id", &self.id).finish_non_exhaustive()
    }
}

/// 列印作業狀態機。 / Print job state machine.
///
/// The job publishes every event on the bus and reacts to its own events:
/// FAILED stops it, DOC_DONE schedules a stop plus a single JOB_DONE for the
/// next inbox turn. Bus observers run while the job is locked and must not
/// lock it again.
pub struct PrintJob {
    id: PrintJobId,
    this: Weak<Mutex<PrintJob>>,
    env: PrintEnvironment,
    source: Option<Arc<dyn PrintedPagesSource>>,
    worker: Option<PrintJobWorker>,
    inbox: Receiver<JobTask>,
    outbox: Sender<JobTask>,
    document: Option<Arc<PrintedDocument>>,
    settings: PrintSettings,
    forwarder: Option<ObserverId>,
    is_job_pending: bool,
    is_print_dialog_box_shown: bool,
    is_blocking: bool,
    is_canceling: bool,
    observing_own_events: bool,
    quit_requested: bool,
    job_done_sent: bool,
}

impl PrintJob {
    /// Job printing `source` through its own worker on `backend`.
    pub fn new(
        source: Arc<dyn PrintedPagesSource>,
        backend: Box<dyn PrintBackend>,
        env: &PrintEnvironment,
    ) -> SharedPrintJob {
        Arc::new_cyclic(|this| {
            let mut job = PrintJob::empty(this.clone(), env);
            job.source = Some(source);
            job.worker = Some(PrintJobWorker::new(backend, env, job.reply_sink()));
            job.observing_own_events = true;
            Mutex::new(job)
        })
    }

    /// Job without source nor worker, bound later with [`PrintJob::initialize`].
    pub fn unbound(env: &PrintEnvironment) -> SharedPrintJob {
        Arc::new_cyclic(|this| Mutex::new(PrintJob::empty(this.clone(), env)))
    }

    fn empty(this: Weak<Mutex<PrintJob>>, env: &PrintEnvironment) -> Self {
        let (outbox, inbox) = mpsc::channel();
        Self {
            id: PrintJobId::next(),
            this,
            env: env.clone(),
            source: None,
            worker: None,
            inbox,
            outbox,
            document: None,
            settings: PrintSettings::default(),
            forwarder: None,
            is_job_pending: false,
            is_print_dialog_box_shown: false,
            is_blocking: false,
            is_canceling: false,
            observing_own_events: false,
            quit_requested: false,
            job_done_sent: false,
        }
    }

    /// Takes over the worker and settings of `owner`, typically a
    /// [`crate::PrinterQuery`], and builds the document for `source`.
    ///
    /// # Panics
    ///
    /// When the job is already bound.
    pub fn initialize(
        &mut self,
        owner: &mut dyn PrintJobWorkerOwner,
        source: Arc<dyn PrintedPagesSource>,
    ) {
        assert!(
            self.source.is_none() && self.worker.is_none() && self.document.is_none(),
            "print job {} is already initialized",
            self.id
        );
        assert!(!self.is_job_pending && !self.is_print_dialog_box_shown);

        self.source = Some(Arc::clone(&source));
        self.worker = owner.detach_worker(self.reply_sink());
        if self.worker.is_none() {
            log::warn!("print job {} got no worker from its owner", self.id);
        }
        self.settings = owner.settings().clone();
        let document = Arc::new(PrintedDocument::new(
            self.settings.clone(),
            source,
            owner.cookie(),
            &self.env,
        ));
        self.update_printed_document(Some(document));
        self.observing_own_events = true;
    }

    fn reply_sink(&self) -> ReplySink {
        let outbox = self.outbox.clone();
        Box::new(move |message| {
            let _ = outbox.send(JobTask::Worker(message));
        })
    }

    fn worker_running(&self) -> bool {
        self.worker.as_ref().is_some_and(PrintJobWorker::is_running)
    }

    /// Asks the worker for settings, showing the native dialog when `ask_user`.
    pub fn get_settings(&mut self, ask_user: bool, parent: Option<NativeWindow>) {
        if self.is_job_pending || self.is_print_dialog_box_shown || self.is_blocking {
            return;
        }
        let page_count = self.document.as_ref().map_or(0, |document| document.page_count());
        let Some(worker) = self.worker.as_mut() else {
            log::warn!("print job {} has no worker", self.id);
            return;
        };
        if !worker.is_running() {
            if let Err(err) = worker.start() {
                log::error!("print job {} could not start its worker: {err}", self.id);
                return;
            }
        }
        self.is_print_dialog_box_shown = ask_user;
        worker.get_settings(ask_user, parent, page_count, false);
    }

    fn get_settings_done(&mut self, settings: PrintSettings, status: ContextStatus) {
        let Some(source) = self.source.clone() else {
            log::info!("source of print job {} is gone", self.id);
            self.cancel();
            return;
        };
        if status == ContextStatus::Failed {
            self.cancel();
            return;
        }
        if !self.is_print_dialog_box_shown && status != ContextStatus::Ok {
            // Only a cancellation can stop default settings short.
            self.cancel();
            return;
        }

        let unchanged = self
            .document
            .as_ref()
            .is_some_and(|document| *document.settings() == settings);
        if !unchanged {
            let document = Arc::new(PrintedDocument::new(
                settings,
                source,
                PrintSettings::new_cookie(),
                &self.env,
            ));
            self.update_printed_document(Some(document));
        }

        let kind = if self.is_print_dialog_box_shown {
            self.is_print_dialog_box_shown = false;
            if status == ContextStatus::Ok {
                JobEventKind::UserInitDone
            } else {
                JobEventKind::UserInitCanceled
            }
        } else {
            JobEventKind::DefaultInitDone
        };
        let document = self.document.clone();
        self.broadcast(JobEventDetails::new(kind, document, None));
    }

    /// Posts the document to the worker and announces NEW_DOC.
    pub fn start_printing(&mut self) {
        if self.is_job_pending || self.is_print_dialog_box_shown || self.is_blocking {
            return;
        }
        if !self.worker_running() {
            log::debug!("print job {} has no running worker", self.id);
            return;
        }
        let Some(document) = self.document.clone() else {
            log::warn!("print job {} has no document to print", self.id);
            return;
        };

        self.unregister_forwarder();
        if let Some(worker) = &self.worker {
            let forwarder = worker.document_forwarder(document.cookie());
            self.forwarder = Some(self.env.bus.add_observer(forwarder));
            worker.start_printing(Arc::clone(&document));
        }
        self.is_job_pending = true;
        self.broadcast(JobEventDetails::new(
            JobEventKind::NewDoc,
            Some(document),
            None,
        ));
    }

    /// Shuts the worker down and drops the document. Calling it again does
    /// nothing.
    pub fn stop(&mut self) {
        if self.is_blocking {
            self.quit_requested = true;
        }
        if let Some(worker) = self.worker.as_mut().filter(|worker| worker.is_running()) {
            worker.dismiss_dialog();
            worker.stop();
            self.is_job_pending = false;
            self.is_print_dialog_box_shown = false;
            self.observing_own_events = false;
            // Whatever the worker said last is stale now.
            let dropped = self.inbox.try_iter().count();
            if dropped > 0 {
                log::debug!("print job {} dropped {dropped} stale task(s)", self.id);
            }
        }
        self.unregister_forwarder();
        self.update_printed_document(None);
    }

    /// Cancels the native job, announces FAILED and stops.
    pub fn cancel(&mut self) {
        if self.is_canceling {
            return;
        }
        self.is_canceling = true;
        if let Some(worker) = self.worker.as_ref().filter(|worker| worker.is_running()) {
            worker.cancel();
        }
        self.broadcast(JobEventDetails::new(JobEventKind::Failed, None, None));
        self.stop();
        self.is_canceling = false;
    }

    /// Handle able to cancel this job from any thread, even while the job is
    /// locked by [`PrintJob::flush_job`].
    pub fn canceler(&self) -> JobCanceler {
        JobCanceler {
            id: self.id,
            context: self.worker.as_ref().map(PrintJobWorker::canceler),
            outbox: self.outbox.clone(),
        }
    }

    /// Asks the worker to request every page not rendered yet.
    pub fn request_missing_pages(&mut self) -> bool {
        if !self.is_job_pending || self.is_print_dialog_box_shown {
            return false;
        }
        match self.worker.as_ref().filter(|worker| worker.is_running()) {
            Some(worker) => {
                worker.request_missing_pages();
                true
            }
            None => false,
        }
    }

    /// Runs the inbox until the job stops or `timeout` elapses. Returns true
    /// when the job stopped.
    pub fn flush_job(&mut self, timeout: Option<Duration>) -> bool {
        if !self.worker_running() {
            return true;
        }
        self.request_missing_pages();
        self.is_blocking = true;
        self.quit_requested = false;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        while !self.quit_requested {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    self.inbox.recv_timeout(remaining)
                }
                None => self
                    .inbox
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(task) => self.handle_task(task),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.is_blocking = false;
        let stopped = std::mem::take(&mut self.quit_requested);
        if !stopped {
            log::warn!("print job {} did not finish in time", self.id);
        }
        stopped
    }

    /// Handles every task already queued. Returns how many were handled.
    pub fn process_pending_tasks(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(task) = self.inbox.try_recv() {
            self.handle_task(task);
            handled += 1;
        }
        handled
    }

    /// Waits up to `timeout` for one task and handles it.
    pub fn process_next_task(&mut self, timeout: Duration) -> bool {
        match self.inbox.recv_timeout(timeout) {
            Ok(task) => {
                self.handle_task(task);
                true
            }
            Err(_) => false,
        }
    }

    fn handle_task(&mut self, task: JobTask) {
        match task {
            JobTask::Worker(WorkerMessage::SettingsDone { settings, status }) => {
                self.get_settings_done(settings, status);
            }
            JobTask::Worker(WorkerMessage::Event(details)) => self.broadcast(details),
            JobTask::FinishJob => self.on_document_done(),
            // Nothing left to cancel once the worker is gone.
            JobTask::Cancel if self.worker_running() => self.cancel(),
            JobTask::Cancel => {}
        }
    }

    fn broadcast(&mut self, details: JobEventDetails) {
        log::debug!("print job {}: {:?}", self.id, details.kind);
        self.env.bus.notify(Notification::PrintJobEvent {
            job: self.job_ref(),
            details: details.clone(),
        });
        if self.observing_own_events {
            self.on_notify_print_job_event(&details);
        }
    }

    fn on_notify_print_job_event(&mut self, details: &JobEventDetails) {
        match details.kind {
            JobEventKind::Failed => {
                self.settings.clear();
                self.is_print_dialog_box_shown = false;
                self.stop();
            }
            // Stopping here would join the worker from inside its own event.
            JobEventKind::DocDone => {
                let _ = self.outbox.send(JobTask::FinishJob);
            }
            _ => {}
        }
    }

    fn on_document_done(&mut self) {
        let document = self.document.clone();
        self.stop();
        if self.job_done_sent {
            return;
        }
        self.job_done_sent = true;
        self.broadcast(JobEventDetails::new(JobEventKind::JobDone, document, None));
    }

    fn update_printed_document(&mut self, document: Option<Arc<PrintedDocument>>) {
        let same = match (&self.document, &document) {
            (Some(current), Some(next)) => Arc::ptr_eq(current, next),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }
        self.document = document;
        if let Some(document) = &self.document {
            self.settings = document.settings().clone();
        }
        if let Some(worker) = self.worker.as_ref().filter(|worker| worker.is_running()) {
            debug_assert!(!self.is_job_pending);
            worker.on_document_changed(self.document.clone());
        }
    }

    fn unregister_forwarder(&mut self) {
        if let Some(id) = self.forwarder.take() {
            self.env.bus.remove_observer(id);
        }
    }

    /// Forgets the source; the document stops asking it for pages.
    pub fn disconnect_source(&mut self) {
        self.source = None;
        if let Some(document) = &self.document {
            document.disconnect_source();
        }
    }

    pub fn id(&self) -> PrintJobId {
        self.id
    }

    pub fn is_job_pending(&self) -> bool {
        self.is_job_pending
    }

    pub fn is_print_dialog_box_shown(&self) -> bool {
        self.is_print_dialog_box_shown
    }

    pub fn is_worker_running(&self) -> bool {
        self.worker_running()
    }

    pub fn document(&self) -> Option<Arc<PrintedDocument>> {
        self.document.clone()
    }

    pub fn settings(&self) -> &PrintSettings {
        &self.settings
    }

    /// Cookie of the current document, `0` without one.
    pub fn cookie(&self) -> i32 {
        self.document.as_ref().map_or(0, |document| document.cookie())
    }

    /// Handle used in notifications emitted by this job.
    pub fn job_ref(&self) -> PrintJobRef {
        PrintJobRef::new(self.id, self.this.clone())
    }
}

impl Drop for PrintJob {
    fn drop(&mut self) {
        if self.worker_running() {
            log::warn!("print job {} dropped while its worker runs", self.id);
            self.stop();
        }
        self.unregister_forwarder();
        if !std::thread::panicking() {
            debug_assert!(
                !self.is_job_pending && !self.is_print_dialog_box_shown && !self.is_blocking,
                "print job {} dropped before it quiesced",
                self.id
            );
        }
    }
}

impl fmt::Debug for PrintJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintJob")
            .field("id", &self.id)
            .field("cookie", &self.cookie())
            .field("is_job_pending", &self.is_job_pending)
            .field("is_print_dialog_box_shown", &self.is_print_dialog_box_shown)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}
