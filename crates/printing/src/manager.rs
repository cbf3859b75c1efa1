use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::environment::PrintEnvironment;
use crate::notification::{
    JobEventDetails, JobEventKind, Notification, NotificationObserver, ObserverId, PrintJobRef,
};
use crate::print_job::{PrintJobId, SharedPrintJob};
use crate::printer_query::{PrintJobWorkerOwner, PrinterQuery};

/// Registry of the print jobs in flight and of the printer queries waiting
/// to be claimed by a job.
///
/// The manager follows jobs through the bus: a job is tracked from its
/// NEW_DOC event until its JOB_DONE or FAILED event.
pub struct PrintJobManager {
    env: PrintEnvironment,
    jobs: Mutex<Vec<(PrintJobId, SharedPrintJob)>>,
    queued_queries: Mutex<Vec<PrinterQuery>>,
    observer: Mutex<Option<ObserverId>>,
}

struct ManagerObserver {
    manager: Weak<PrintJobManager>,
}

impl NotificationObserver for ManagerObserver {
    fn observe(&self, notification: &Notification) {
        if let (Some(manager), Notification::PrintJobEvent { job, details }) =
            (self.manager.upgrade(), notification)
        {
            manager.on_print_job_event(job, details);
        }
    }
}

impl PrintJobManager {
    /// Creates the manager and registers it on the bus of `env`.
    pub fn new(env: &PrintEnvironment) -> Arc<Self> {
        let manager = Arc::new(Self {
            env: env.clone(),
            jobs: Mutex::new(Vec::new()),
            queued_queries: Mutex::new(Vec::new()),
            observer: Mutex::new(None),
        });
        let id = env.bus.add_observer(Arc::new(ManagerObserver {
            manager: Arc::downgrade(&manager),
        }));
        *manager.observer.lock() = Some(id);
        manager
    }

    /// Parks `query` until a job claims it by cookie.
    pub fn queue_printer_query(&self, query: PrinterQuery) {
        debug_assert!(query.is_valid());
        self.queued_queries.lock().push(query);
    }

    /// Takes the queued query whose settings carry `cookie`. Queries still
    /// waiting for their callback are skipped.
    pub fn pop_printer_query(&self, cookie: i32) -> Option<PrinterQuery> {
        let mut queries = self.queued_queries.lock();
        let position = queries
            .iter()
            .position(|query| query.cookie() == cookie && !query.is_callback_pending())?;
        Some(queries.remove(position))
    }

    pub fn queued_query_count(&self) -> usize {
        self.queued_queries.lock().len()
    }

    fn on_print_job_event(&self, job: &PrintJobRef, details: &JobEventDetails) {
        match details.kind {
            JobEventKind::NewDoc => {
                let Some(shared) = job.upgrade() else {
                    return;
                };
                let mut jobs = self.jobs.lock();
                if jobs.iter().any(|(id, _)| *id == job.id()) {
                    log::warn!("{} announced a second document", job.id());
                    return;
                }
                jobs.push((job.id(), shared));
            }
            JobEventKind::JobDone => {
                let removed = self.remove_job(job.id());
                debug_assert!(removed, "{} finished without being tracked", job.id());
            }
            // The job may have failed before it ever started.
            JobEventKind::Failed => {
                self.remove_job(job.id());
            }
            _ => {}
        }
    }

    fn remove_job(&self, id: PrintJobId) -> bool {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|(existing, _)| *existing != id);
        jobs.len() != before
    }

    pub fn current_job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn current_job_ids(&self) -> Vec<PrintJobId> {
        self.jobs.lock().iter().map(|(id, _)| *id).collect()
    }

    /// Handles the queued tasks of every active job. Returns how many ran.
    pub fn pump_jobs(&self) -> usize {
        self.snapshot()
            .iter()
            .map(|job| job.lock().process_pending_tasks())
            .sum()
    }

    /// Flushes then stops every active job, drops queued queries and leaves
    /// the bus. Meant to run once, at shutdown.
    pub fn on_quit(&self) {
        let jobs = self.snapshot();
        if !jobs.is_empty() {
            log::info!("waiting for {} print job(s) to spool", jobs.len());
        }
        let timeout = self.env.config.flush_timeout();
        for job in jobs {
            let mut job = job.lock();
            if !job.flush_job(Some(timeout)) {
                log::warn!("{} is stopped before it finished spooling", job.id());
            }
            job.stop();
        }
        self.jobs.lock().clear();

        let queries = std::mem::take(&mut *self.queued_queries.lock());
        drop(queries);

        if let Some(id) = self.observer.lock().take() {
            self.env.bus.remove_observer(id);
        }
    }

    // Copy so jobs can leave the list while they are flushed.
    fn snapshot(&self) -> Vec<SharedPrintJob> {
        self.jobs
            .lock()
            .iter()
            .map(|(_, job)| Arc::clone(job))
            .collect()
    }
}

impl Drop for PrintJobManager {
    fn drop(&mut self) {
        if let Some(id) = self.observer.get_mut().take() {
            self.env.bus.remove_observer(id);
        }
    }
}

impl fmt::Debug for PrintJobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintJobManager")
            .field("jobs", &self.current_job_ids())
            .field("queued_queries", &self.queued_query_count())
            .finish()
    }
}
