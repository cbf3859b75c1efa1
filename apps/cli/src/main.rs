mod text_source;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::json;
use spoolkit_printing::{
    replace_illegal_characters, JobEventKind, Notification, PageNumber, PageRange,
    PdfSpoolBackend, PrintBackend, PrintEnvironment, PrintJob, PrintJobManager, PrintSettings,
    PrintedDocument, PrintingConfig, RecordingBackend, SharedPrintJob, Subscription,
};

use crate::text_source::TextSource;

#[derive(Parser)]
#[command(
    name = "spoolkit",
    about = "Spool text files through the asynchronous print job pipeline",
    author,
    version
)]
struct Cli {
    /// 提高記錄詳細程度（可重複）。 / Raise log verbosity (repeatable).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// JSON 格式的列印設定檔。 / Printing configuration file (JSON).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 將文字檔排版並列印。 / Paginate a text file and print it.
    Print(PrintArgs),
    /// 顯示頁面範圍展開後的結果。 / Show how a page list is walked.
    Pages(PagesArgs),
}

#[derive(Args)]
struct PrintArgs {
    /// 要列印的文字檔。 / Text file to print.
    input: PathBuf,

    /// 輸出資料夾；預設為輸入檔所在處。 / Output directory; defaults to the input's directory.
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// 要列印的頁面，例如 `1-3,10-12`。 / Pages to print, e.g. `1-3,10-12`.
    #[arg(long, value_name = "RANGES")]
    pages: Option<String>,

    /// 每頁行數；預設依紙張計算。 / Lines per page; computed from the paper when omitted.
    #[arg(long, value_name = "N")]
    lines_per_page: Option<u32>,

    /// 文件標題；預設為檔名。 / Document title; defaults to the file name.
    #[arg(long)]
    title: Option<String>,

    #[arg(long, default_value_t = 10.0, value_name = "PT")]
    font_size: f32,

    /// 使用記錄後端，不寫出檔案。 / Use the recording backend and write nothing.
    #[arg(long)]
    dry_run: bool,

    /// 等待作業完成的上限（毫秒）。 / How long to wait for the job, in milliseconds.
    #[arg(long, default_value_t = 30_000, value_name = "MS")]
    timeout_ms: u64,
}

#[derive(Args)]
struct PagesArgs {
    /// 以 1 為起點的頁面清單。 / 1-based page list.
    ranges: String,

    /// 文件總頁數；提供時會走訪游標。 / Document page count; walks the cursor when given.
    #[arg(long, value_name = "N")]
    page_count: Option<u32>,

    /// 以 JSON 輸出。 / Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Print(args) => execute_print(args, config),
        Commands::Pages(args) => execute_pages(args),
    }
}

fn init_logging(verbose: u8) {
    env_logger::Builder::new()
        .filter_level(match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .parse_default_env()
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PrintingConfig> {
    match path {
        Some(path) => PrintingConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display())),
        None => Ok(PrintingConfig::default()),
    }
}

fn parse_ranges(list: Option<&str>) -> Result<Vec<PageRange>> {
    match list {
        Some(list) => {
            PageRange::parse_list(list).with_context(|| format!("invalid page list '{list}'"))
        }
        None => Ok(Vec::new()),
    }
}

fn execute_print(args: PrintArgs, config: PrintingConfig) -> Result<()> {
    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let title = args.title.clone().unwrap_or_else(|| {
        args.input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string())
    });
    let url = fs::canonicalize(&args.input)
        .map(|path| format!("file://{}", path.display()))
        .unwrap_or_default();
    let output_dir = resolve_output_dir(&args);
    let ranges = parse_ranges(args.pages.as_deref())?;

    let printer = if args.dry_run { "Dry Run" } else { "PDF" };
    let mut settings = config.default_settings(printer);
    settings.ranges = ranges;

    let source = Arc::new(TextSource::new(title, url, &text, args.font_size));
    let lines_per_page = args
        .lines_per_page
        .unwrap_or_else(|| source.lines_fitting(&settings));
    let page_count = source.paginate(lines_per_page);
    check_ranges(&settings, page_count)?;
    log::info!(
        "{} paginated into {page_count} page(s) of {lines_per_page} line(s)",
        args.input.display()
    );

    let recording = RecordingBackend::with_settings(settings.clone());
    let backend: Box<dyn PrintBackend> = if args.dry_run {
        Box::new(recording.clone())
    } else {
        Box::new(PdfSpoolBackend::new(&output_dir, settings))
    };

    let env = PrintEnvironment::new(config);
    let manager = PrintJobManager::new(&env);
    let subscription = env.bus.subscribe();
    let job = PrintJob::new(source, backend, &env);
    let timeout = Duration::from_millis(args.timeout_ms);

    let outcome = spool(&job, &subscription, page_count, timeout);
    manager.on_quit();
    let (document, pages) = outcome?;

    if args.dry_run {
        println!(
            "Dry run: spooled {pages} page(s) of '{}' ({} native calls)",
            document.name(),
            recording.calls().len()
        );
    } else {
        println!(
            "Spooled {pages} page(s) of '{}' to {}",
            document.name(),
            spool_target(&env, &output_dir, &document).display()
        );
    }
    Ok(())
}

/// Drives `job` from settings to JOB_DONE. Returns the document and the
/// number of pages spooled.
fn spool(
    job: &SharedPrintJob,
    subscription: &Subscription,
    page_count: u32,
    timeout: Duration,
) -> Result<(Arc<PrintedDocument>, usize)> {
    job.lock().get_settings(false, None);
    let document = wait_for_document(job, subscription, timeout)?;
    document.set_page_count(page_count);

    job.lock().start_printing();
    if !job.lock().is_job_pending() {
        job.lock().stop();
        bail!("print job {} did not start", job.lock().id());
    }
    let finished = job.lock().flush_job(Some(timeout));

    let mut pages = 0;
    let mut done = false;
    let mut failed = false;
    for kind in subscription.drain_job_events() {
        match kind {
            JobEventKind::PageDone => pages += 1,
            JobEventKind::JobDone => done = true,
            JobEventKind::Failed => failed = true,
            _ => {}
        }
    }
    if failed {
        bail!("print job failed after {pages} page(s)");
    }
    if !finished || !done {
        job.lock().stop();
        bail!("printing did not finish within {} ms", timeout.as_millis());
    }
    Ok((document, pages))
}

fn wait_for_document(
    job: &SharedPrintJob,
    subscription: &Subscription,
    timeout: Duration,
) -> Result<Arc<PrintedDocument>> {
    let deadline = Instant::now() + timeout;
    loop {
        job.lock().process_next_task(Duration::from_millis(20));
        for notification in subscription.drain() {
            if let Notification::PrintJobEvent { details, .. } = notification {
                match details.kind {
                    JobEventKind::DefaultInitDone => {
                        if let Some(document) = job.lock().document() {
                            return Ok(document);
                        }
                    }
                    JobEventKind::Failed => bail!("the printer reported no usable settings"),
                    _ => {}
                }
            }
        }
        if Instant::now() >= deadline {
            job.lock().stop();
            bail!("no printer settings within {} ms", timeout.as_millis());
        }
    }
}

fn check_ranges(settings: &PrintSettings, page_count: u32) -> Result<()> {
    if let Some(range) = settings.ranges.iter().find(|range| range.to >= page_count) {
        bail!("page range {range} is past the last page ({page_count})");
    }
    Ok(())
}

fn resolve_output_dir(args: &PrintArgs) -> PathBuf {
    if let Some(dir) = &args.output {
        return dir.clone();
    }
    args.input
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Where the backend wrote the document: the dump directory wins when set.
fn spool_target(env: &PrintEnvironment, output_dir: &Path, document: &PrintedDocument) -> PathBuf {
    match &env.config.debug_dump_dir {
        Some(dir) => dir.join(format!("{}.prn", replace_illegal_characters(document.name()))),
        None => PdfSpoolBackend::document_path(output_dir, document.name()),
    }
}

/// Upper bound on the pages `pages` prints one by one.
const MAX_LISTED_PAGES: u32 = 100_000;

fn execute_pages(args: PagesArgs) -> Result<()> {
    let ranges = parse_ranges(Some(&args.ranges))?;
    let selected_count = PageRange::get_total_pages(&ranges);
    let walked_count = match args.page_count {
        Some(page_count) if ranges.is_empty() => page_count,
        _ => selected_count,
    };
    let listed = selected_count.max(walked_count);
    if listed > MAX_LISTED_PAGES {
        bail!("'{}' covers {listed} pages; at most {MAX_LISTED_PAGES} can be listed", args.ranges);
    }
    let selected: Vec<u32> = PageRange::get_pages(&ranges)
        .into_iter()
        .map(|page| page + 1)
        .collect();
    let walk: Option<Vec<u32>> = args.page_count.map(|page_count| {
        let settings = PrintSettings {
            ranges: ranges.clone(),
            ..PrintSettings::default()
        };
        PageNumber::new(&settings, page_count)
            .map(|page| page + 1)
            .collect()
    });

    if args.json {
        let value = json!({
            "ranges": ranges.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "pages": selected,
            "walk": walk,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Ranges: {}", join_display(ranges.iter()));
    println!("Pages ({}): {}", selected.len(), join_display(selected.iter()));
    if let (Some(walk), Some(page_count)) = (walk, args.page_count) {
        println!("Walk over {page_count} page(s): {}", join_display(walk.iter()));
    }
    Ok(())
}

fn join_display<T: ToString>(items: impl Iterator<Item = T>) -> String {
    items.map(|item| item.to_string()).collect::<Vec<_>>().join(" ")
}
