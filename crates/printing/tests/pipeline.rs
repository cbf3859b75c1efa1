use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spoolkit_printing::{
    BackendCall, JobEventKind, Metafile, NativeWindow, Notification, Orientation, PageRange,
    PaperSize, Point, PrintEnvironment, PrintJob, PrintJobManager, PrintJobWorkerOwner, PrintSettings,
    PrintedDocument, PrintedPagesSource, PrinterQuery, RecordingBackend, SharedPrintJob,
    Subscription,
};

const WAIT: Duration = Duration::from_secs(5);

type Event = (JobEventKind, Option<u32>);

/// Renders a page synchronously whenever the document asks for it.
#[derive(Default)]
struct OnDemandSource {
    requests: Mutex<Vec<u32>>,
}

impl PrintedPagesSource for OnDemandSource {
    fn render_source_name(&self) -> String {
        "report.txt".into()
    }

    fn render_source_url(&self) -> String {
        "file:///tmp/report.txt".into()
    }

    fn render_one_printed_page(&self, document: &Arc<PrintedDocument>, page_index: u32) {
        self.requests.lock().push(page_index);
        let mut metafile = Metafile::new();
        metafile.push_text(format!("page {}", page_index + 1), Point::default(), 10.0);
        document.set_page(page_index, metafile, 1.0);
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn job_events(subscription: &Subscription) -> Vec<Event> {
    subscription
        .drain()
        .into_iter()
        .filter_map(|notification| match notification {
            Notification::PrintJobEvent { details, .. } => {
                Some((details.kind, details.page_number()))
            }
            Notification::PrintedDocumentUpdated { .. } => None,
        })
        .collect()
}

/// Pumps `job` until `kind` was published, returning every event seen.
fn pump_until(job: &SharedPrintJob, subscription: &Subscription, kind: JobEventKind) -> Vec<Event> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        job.lock().process_next_task(Duration::from_millis(10));
        seen.extend(job_events(subscription));
        if seen.iter().any(|(seen_kind, _)| *seen_kind == kind) {
            return seen;
        }
        assert!(Instant::now() < deadline, "no {kind:?} after {seen:?}");
    }
}

fn default_settings_job(
    backend: &RecordingBackend,
    source: Arc<OnDemandSource>,
    env: &PrintEnvironment,
    subscription: &Subscription,
) -> SharedPrintJob {
    let job = PrintJob::new(source, Box::new(backend.clone()), env);
    job.lock().get_settings(false, None);
    let events = pump_until(&job, subscription, JobEventKind::DefaultInitDone);
    assert_eq!(events, vec![(JobEventKind::DefaultInitDone, None)]);
    job
}

#[test]
fn three_pages_are_spooled_in_order_and_finish_once() {
    init_logger();
    let env = PrintEnvironment::default();
    let subscription = env.bus.subscribe();
    let manager = PrintJobManager::new(&env);
    let backend = RecordingBackend::new();
    let source = Arc::new(OnDemandSource::default());
    let job = default_settings_job(&backend, source.clone(), &env, &subscription);

    let document = job.lock().document().expect("document after settings");
    document.set_page_count(3);
    job.lock().start_printing();
    assert!(job.lock().is_job_pending());
    assert_eq!(manager.current_job_count(), 1);

    let events = pump_until(&job, &subscription, JobEventKind::JobDone);
    assert_eq!(
        events,
        vec![
            (JobEventKind::NewDoc, None),
            (JobEventKind::NewPage, Some(1)),
            (JobEventKind::PageDone, Some(1)),
            (JobEventKind::NewPage, Some(2)),
            (JobEventKind::PageDone, Some(2)),
            (JobEventKind::NewPage, Some(3)),
            (JobEventKind::PageDone, Some(3)),
            (JobEventKind::DocDone, None),
            (JobEventKind::JobDone, None),
        ]
    );
    assert_eq!(*source.requests.lock(), vec![0, 1, 2]);
    assert!(document.is_complete());

    let job = job.lock();
    assert!(!job.is_job_pending());
    assert!(!job.is_worker_running());
    assert!(job.document().is_none());
    assert_eq!(manager.current_job_count(), 0);
    assert_eq!(backend.pages_started(), 3);
    assert!(backend.calls().contains(&BackendCall::EndDoc));
}

#[test]
fn stop_twice_is_a_no_op() {
    init_logger();
    let env = PrintEnvironment::default();
    let subscription = env.bus.subscribe();
    let backend = RecordingBackend::new();
    let job = default_settings_job(&backend, Arc::default(), &env, &subscription);
    job.lock().document().unwrap().set_page_count(1);
    job.lock().start_printing();
    pump_until(&job, &subscription, JobEventKind::JobDone);

    job.lock().stop();
    job.lock().stop();
    assert_eq!(job.lock().process_pending_tasks(), 0);
    assert!(job_events(&subscription).is_empty());
    let releases = backend
        .calls()
        .iter()
        .filter(|call| **call == BackendCall::Release)
        .count();
    assert_eq!(releases, 1);
}

#[test]
fn page_ranges_drive_the_walk() {
    init_logger();
    let env = PrintEnvironment::default();
    let subscription = env.bus.subscribe();
    let mut settings =
        PrintSettings::for_paper("Ranged", PaperSize::A4, Orientation::Portrait, 72);
    settings.ranges = vec![PageRange::new(1, 3), PageRange::new(10, 12)];
    let backend = RecordingBackend::with_settings(settings);
    let source = Arc::new(OnDemandSource::default());
    let job = default_settings_job(&backend, source.clone(), &env, &subscription);

    let document = job.lock().document().unwrap();
    assert_eq!(document.expected_page_count(), 6);
    document.set_page_count(20);
    assert_eq!(document.expected_page_count(), 6);
    job.lock().start_printing();

    let spooled: Vec<u32> = pump_until(&job, &subscription, JobEventKind::JobDone)
        .into_iter()
        .filter(|(kind, _)| *kind == JobEventKind::PageDone)
        .filter_map(|(_, page)| page)
        .collect();
    assert_eq!(spooled, vec![2, 3, 4, 11, 12, 13]);
    assert_eq!(*source.requests.lock(), vec![1, 2, 3, 10, 11, 12]);
}

#[test]
fn native_failure_on_second_page_fails_the_job() {
    init_logger();
    let env = PrintEnvironment::default();
    let subscription = env.bus.subscribe();
    let manager = PrintJobManager::new(&env);
    let backend = RecordingBackend::new();
    backend.fail_start_page(2);
    let job = default_settings_job(&backend, Arc::default(), &env, &subscription);
    job.lock().document().unwrap().set_page_count(3);
    job.lock().start_printing();
    assert_eq!(manager.current_job_count(), 1);

    let events = pump_until(&job, &subscription, JobEventKind::Failed);
    assert_eq!(
        events,
        vec![
            (JobEventKind::NewDoc, None),
            (JobEventKind::NewPage, Some(1)),
            (JobEventKind::PageDone, Some(1)),
            (JobEventKind::NewPage, Some(2)),
            (JobEventKind::Failed, None),
        ]
    );

    let mut job = job.lock();
    job.process_pending_tasks();
    assert!(job_events(&subscription).is_empty());
    assert!(!job.is_job_pending());
    assert!(!job.is_worker_running());
    assert!(job.settings().is_empty());
    assert_eq!(manager.current_job_count(), 0);
}

#[test]
fn cancel_while_spooling_reports_failed_once() {
    init_logger();
    let env = PrintEnvironment::default();
    let subscription = env.bus.subscribe();
    let manager = PrintJobManager::new(&env);
    let backend = RecordingBackend::new();
    backend.hold_start_doc();
    let job = default_settings_job(&backend, Arc::default(), &env, &subscription);
    job.lock().document().unwrap().set_page_count(2);
    job.lock().start_printing();
    assert!(backend.wait_for_start_doc(WAIT));

    job.lock().cancel();
    job.lock().cancel();
    job.lock().process_pending_tasks();

    let events = job_events(&subscription);
    assert_eq!(
        events,
        vec![(JobEventKind::NewDoc, None), (JobEventKind::Failed, None)]
    );
    assert!(backend.calls().contains(&BackendCall::CancelDevice));
    assert_eq!(backend.pages_started(), 0);
    assert!(!job.lock().is_job_pending());
    assert_eq!(manager.current_job_count(), 0);
}

#[test]
fn declined_dialog_is_user_init_canceled() {
    init_logger();
    let env = PrintEnvironment::default();
    let subscription = env.bus.subscribe();
    let backend = RecordingBackend::new();
    backend.decline_dialog();
    let job = PrintJob::new(
        Arc::new(OnDemandSource::default()),
        Box::new(backend.clone()),
        &env,
    );

    job.lock().get_settings(true, Some(NativeWindow(42)));
    assert!(job.lock().is_print_dialog_box_shown());
    // A second request while the dialog is up is ignored.
    job.lock().get_settings(true, None);

    let events = pump_until(&job, &subscription, JobEventKind::UserInitCanceled);
    assert_eq!(events, vec![(JobEventKind::UserInitCanceled, None)]);
    assert!(!job.lock().is_print_dialog_box_shown());
    let asks = backend
        .calls()
        .iter()
        .filter(|call| matches!(call, BackendCall::AskUser { .. }))
        .count();
    assert_eq!(asks, 1);
    job.lock().stop();
}

#[test]
fn accepted_dialog_is_user_init_done() {
    init_logger();
    let env = PrintEnvironment::default();
    let subscription = env.bus.subscribe();
    let backend = RecordingBackend::new();
    let job = PrintJob::new(
        Arc::new(OnDemandSource::default()),
        Box::new(backend.clone()),
        &env,
    );
    job.lock().get_settings(true, None);

    pump_until(&job, &subscription, JobEventKind::UserInitDone);
    let job = job.lock();
    assert_eq!(job.settings().printer_name, "Recording Printer");
    assert!(job.cookie() > 0);
}

#[test]
fn stop_dismisses_an_open_dialog() {
    init_logger();
    let env = PrintEnvironment::default();
    let backend = RecordingBackend::new();
    backend.block_dialog_until_dismissed();
    let job = PrintJob::new(
        Arc::new(OnDemandSource::default()),
        Box::new(backend.clone()),
        &env,
    );
    job.lock().get_settings(true, None);
    assert!(backend.wait_for_dialog(WAIT));

    job.lock().stop();
    let job = job.lock();
    assert!(!job.is_worker_running());
    assert!(!job.is_print_dialog_box_shown());
    assert!(backend.calls().contains(&BackendCall::DismissDialog));
}

#[test]
fn missing_source_cancels_on_settings() {
    init_logger();
    let env = PrintEnvironment::default();
    let subscription = env.bus.subscribe();
    let backend = RecordingBackend::new();
    let job = PrintJob::new(
        Arc::new(OnDemandSource::default()),
        Box::new(backend.clone()),
        &env,
    );
    job.lock().get_settings(false, None);
    job.lock().disconnect_source();

    let events = pump_until(&job, &subscription, JobEventKind::Failed);
    assert_eq!(events, vec![(JobEventKind::Failed, None)]);
    assert!(job.lock().document().is_none());
    assert!(!job.lock().is_worker_running());
}

#[test]
fn printer_query_hands_its_worker_to_a_job() {
    init_logger();
    let env = PrintEnvironment::default();
    let subscription = env.bus.subscribe();
    let manager = PrintJobManager::new(&env);
    let backend = RecordingBackend::new();

    let mut query = PrinterQuery::new(Box::new(backend.clone()), &env);
    query.get_settings(false, None, 0, false, None).unwrap();
    assert!(query.wait_for_settings(WAIT));
    let cookie = query.cookie();
    manager.queue_printer_query(query);

    let mut query = manager.pop_printer_query(cookie).expect("queued query");
    assert!(manager.pop_printer_query(cookie).is_none());
    let job = PrintJob::unbound(&env);
    job.lock().initialize(&mut query, Arc::new(OnDemandSource::default()));
    assert!(!query.is_valid());
    assert_eq!(job.lock().cookie(), cookie);
    assert!(job.lock().is_worker_running());

    job.lock().document().unwrap().set_page_count(2);
    job.lock().start_printing();
    let events = pump_until(&job, &subscription, JobEventKind::JobDone);
    assert_eq!(
        events
            .iter()
            .filter(|(kind, _)| *kind == JobEventKind::PageDone)
            .count(),
        2
    );
    let defaults = backend
        .calls()
        .iter()
        .filter(|call| **call == BackendCall::DefaultSettings)
        .count();
    assert_eq!(defaults, 1);
    assert_eq!(manager.current_job_count(), 0);
}

#[test]
fn start_printing_without_settings_does_nothing() {
    init_logger();
    let env = PrintEnvironment::default();
    let subscription = env.bus.subscribe();
    let job = PrintJob::new(
        Arc::new(OnDemandSource::default()),
        Box::new(RecordingBackend::new()),
        &env,
    );
    job.lock().start_printing();
    assert!(!job.lock().is_job_pending());
    assert!(!job.lock().request_missing_pages());
    assert!(job_events(&subscription).is_empty());
}
