//! Process-wide notification bus for print job lifecycle events.
//! 列印作業生命週期事件的行程層級通知匯流排。
//!
//! Events are typed ([`Notification`]) and delivered either synchronously to
//! registered [`NotificationObserver`]s or as messages on a channel obtained
//! through [`NotificationService::subscribe`].
//! 事件具型別，可同步送給觀察者，或以訊息形式送進訂閱的通道。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::print_job::{PrintJob, PrintJobId, SharedPrintJob};
use crate::printed_document::PrintedDocument;
use crate::printed_page::PrintedPage;

/// Kind of a print job event.
/// 列印作業事件的種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    /// A document started spooling.
    NewDoc,
    /// A page is about to be spooled.
    NewPage,
    /// A page was spooled.
    PageDone,
    /// The native document was closed.
    DocDone,
    /// The job is finished and its worker released.
    JobDone,
    /// The job failed or was canceled.
    Failed,
    UserInitDone,
    UserInitCanceled,
    DefaultInitDone,
    AllPagesRequested,
}

/// Payload of a [`JobEventKind`].
/// 事件附帶的文件與頁面。
#[derive(Clone)]
pub struct JobEventDetails {
    pub kind: JobEventKind,
    pub document: Option<Arc<PrintedDocument>>,
    pub page: Option<Arc<PrintedPage>>,
}

impl JobEventDetails {
    pub fn new(
        kind: JobEventKind,
        document: Option<Arc<PrintedDocument>>,
        page: Option<Arc<PrintedPage>>,
    ) -> Self {
        Self {
            kind,
            document,
            page,
        }
    }

    /// 1-based number of the attached page, if any.
    pub fn page_number(&self) -> Option<u32> {
        self.page.as_ref().map(|page| page.page_number())
    }
}

impl fmt::Debug for JobEventDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobEventDetails")
            .field("kind", &self.kind)
            .field("document", &self.document.as_ref().map(|doc| doc.cookie()))
            .field("page", &self.page_number())
            .finish()
    }
}

/// Weak handle identifying the job that emitted an event.
/// 指向發出事件之列印作業的弱參照。
#[derive(Clone)]
pub struct PrintJobRef {
    id: PrintJobId,
    handle: Weak<Mutex<PrintJob>>,
}

impl PrintJobRef {
    pub(crate) fn new(id: PrintJobId, handle: Weak<Mutex<PrintJob>>) -> Self {
        Self { id, handle }
    }

    pub fn id(&self) -> PrintJobId {
        self.id
    }

    /// Strong handle, `None` once the job is gone.
    pub fn upgrade(&self) -> Option<SharedPrintJob> {
        self.handle.upgrade()
    }
}

impl fmt::Debug for PrintJobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrintJobRef({})", self.id)
    }
}

/// Everything published on the bus.
/// 匯流排上發佈的所有通知。
#[derive(Debug, Clone)]
pub enum Notification {
    PrintJobEvent {
        job: PrintJobRef,
        details: JobEventDetails,
    },
    /// Page data or the page count of a document changed.
    PrintedDocumentUpdated {
        cookie: i32,
        page: Option<Arc<PrintedPage>>,
    },
}

impl Notification {
    /// Event kind for job events, `None` for document updates.
    pub fn job_event_kind(&self) -> Option<JobEventKind> {
        match self {
            Notification::PrintJobEvent { details, .. } => Some(details.kind),
            Notification::PrintedDocumentUpdated { .. } => None,
        }
    }
}

/// Synchronous receiver of notifications. Called on the publishing thread.
/// 同步接收通知的觀察者，於發佈者的執行緒上呼叫。
pub trait NotificationObserver: Send + Sync {
    fn observe(&self, notification: &Notification);
}

/// Registration handle returned by [`NotificationService::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    observers: Mutex<Vec<(ObserverId, Arc<dyn NotificationObserver>)>>,
}

/// Cloneable, thread-safe notification bus.
/// 可複製且執行緒安全的通知匯流排。
#[derive(Clone, Default)]
pub struct NotificationService {
    registry: Arc<Registry>,
}

impl NotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: Arc<dyn NotificationObserver>) -> ObserverId {
        let id = ObserverId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry.observers.lock().push((id, observer));
        id
    }

    /// Returns false when `id` was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.registry.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.registry.observers.lock().len()
    }

    /// Delivers `notification` to every observer registered at call time.
    pub fn notify(&self, notification: Notification) {
        // Snapshot so observers may (un)register while being notified.
        let observers: Vec<Arc<dyn NotificationObserver>> = self
            .registry
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer.observe(&notification);
        }
    }

    /// Channel subscription receiving every notification from now on.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let id = self.add_observer(Arc::new(ChannelObserver { sender }));
        Subscription {
            id,
            receiver,
            service: self.clone(),
        }
    }
}

impl fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationService")
            .field("observers", &self.observer_count())
            .finish()
    }
}

struct ChannelObserver {
    sender: Sender<Notification>,
}

impl NotificationObserver for ChannelObserver {
    fn observe(&self, notification: &Notification) {
        let _ = self.sender.send(notification.clone());
    }
}

/// Receiving end of [`NotificationService::subscribe`]. Unregisters on drop.
/// 訂閱的接收端；釋放時自動取消註冊。
pub struct Subscription {
    id: ObserverId,
    receiver: Receiver<Notification>,
    service: NotificationService,
}

impl Subscription {
    /// 嘗試取得下一個通知（非阻塞）。 / Next notification without blocking.
    pub fn try_next(&self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    /// 在期限內等待通知。 / Waits up to `timeout` for the next notification.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Notification> {
        match self.receiver.recv_timeout(timeout) {
            Ok(notification) => Some(notification),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything queued so far.
    pub fn drain(&self) -> Vec<Notification> {
        self.receiver.try_iter().collect()
    }

    /// Queued job event kinds, in publication order.
    pub fn drain_job_events(&self) -> Vec<JobEventKind> {
        self.drain()
            .iter()
            .filter_map(Notification::job_event_kind)
            .collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.service.remove_observer(self.id);
    }
}
