use std::collections::VecDeque;
use std::fs;
use std::io::{self, Stdout, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use crossterm::event::{self, Event as TermEvent, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use super::assistant::Assistant;
use super::controller::{AnalysisTarget, Controller, Effect, Event};
use super::error::{AiError, AppError, ErrorReport};
use super::export::write_book;
use super::fetch::SiteClient;
use super::logging::{self, LOG_FILE_NAME};
use super::store::{JsonFileStore, Library, StateStore};
use super::tui::{self, KeyOutcome, UiState};
use super::types::{Cli, Settings};
use super::ui_utils::{open_url_in_browser, reader_text};

const TICK_RATE: Duration = Duration::from_millis(120);
const HEADLESS_TEXT_WIDTH: usize = 100;
const REPORT_FILE_NAME: &str = "last-error-report.md";

static IN_DRAW: AtomicBool = AtomicBool::new(false);

pub async fn run() -> io::Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings();

    if cli.no_tui {
        logging::init_stderr();
        return run_headless(&cli, &settings).await.map_err(Into::into);
    }

    let log_file = settings
        .log_file
        .clone()
        .unwrap_or_else(|| settings.data_dir.join(LOG_FILE_NAME));
    let _guard = logging::init_file(&log_file)?;
    run_tui(&cli, &settings).map_err(Into::into)
}

/// Controller plus the store its persistence effects are written to.
pub struct Session<S> {
    controller: Controller,
    library: Library<S>,
}

impl<S: StateStore> Session<S> {
    pub fn new(mut store: S, base_url: &str, limit: usize) -> Self {
        store.subscribe(Box::new(|key, value| {
            let entries = value.as_array().map_or(0, Vec::len);
            debug!(key, entries, "state updated");
        }));
        let library = Library::new(store);
        let controller = Controller::new(base_url, limit, library.saved(), library.history());
        Self {
            controller,
            library,
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    pub fn library(&self) -> &Library<S> {
        &self.library
    }

    /// Applies `event`, writes persistence effects immediately and returns
    /// the effects that need I/O.
    pub fn dispatch(&mut self, event: Event) -> Vec<Effect> {
        let mut pending = Vec::new();
        for effect in self.controller.handle(event) {
            let written = match &effect {
                Effect::PersistSaved(saved) => self.library.persist_saved(saved),
                Effect::PersistHistory(history) => self.library.persist_history(history),
                _ => {
                    pending.push(effect);
                    continue;
                }
            };
            if let Err(err) = written {
                warn!(error = %err, "failed to persist reader state");
                self.controller
                    .push_notice(format!("Could not save reader state: {err}"));
            }
        }
        pending
    }
}

/// Executes effects and reports each outcome back as an [`Event`].
#[derive(Debug, Clone)]
pub struct Services {
    site: SiteClient,
    assistant: Assistant,
    out_dir: PathBuf,
}

impl Services {
    pub fn new(site: SiteClient, assistant: Assistant, out_dir: PathBuf) -> Self {
        Self {
            site,
            assistant,
            out_dir,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let site = SiteClient::new(settings.site.clone())?;
        let assistant = Assistant::new(settings.assistant.clone())?;
        if !assistant.is_configured() {
            info!("no Gemini API key configured; AI features will report an error");
        }
        Ok(Self::new(site, assistant, settings.out_dir.clone()))
    }

    pub async fn execute(&self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Search { query, page, limit } => {
                Some(match self.site.search(&query, page, limit).await {
                    Ok(outcome) => Event::SearchCompleted {
                        query,
                        page,
                        outcome,
                    },
                    Err(error) => {
                        warn!(query = %query, page, kind = error.kind(), error = %error, "search failed");
                        Event::SearchFailed { query, page, error }
                    }
                })
            }
            Effect::FetchArticle { title } => Some(match self.site.fetch_article(&title).await {
                Ok(article) => Event::ArticleLoaded(article),
                Err(error) => {
                    warn!(title = %title, kind = error.kind(), error = %error, "article failed");
                    Event::ArticleFailed { title, error }
                }
            }),
            Effect::GenerateMindMap { topic } => {
                Some(match self.assistant.generate_mind_map(&topic).await {
                    Ok(map) => Event::MindMapReady { topic, map },
                    Err(error) => Event::MindMapFailed { topic, error },
                })
            }
            Effect::AnalyzeError(report) => Some(analysis_event(
                AnalysisTarget::ErrorReport,
                self.assistant.analyze_error(&report).await,
            )),
            Effect::AnalyzeVisualIssue {
                title,
                html,
                description,
            } => Some(analysis_event(
                AnalysisTarget::VisualIssue,
                self.assistant
                    .analyze_visual_issue(&title, &html, &description)
                    .await,
            )),
            Effect::ExportBook(article) => {
                let dir = self.out_dir.clone();
                let written = tokio::task::spawn_blocking(move || write_book(&article, &dir)).await;
                Some(match written {
                    Ok(Ok(path)) => Event::ExportFinished(path),
                    Ok(Err(err)) => {
                        warn!(error = %err, "book export failed");
                        Event::ExportFailed(err.to_string())
                    }
                    Err(err) => Event::ExportFailed(err.to_string()),
                })
            }
            Effect::OpenUrl(url) => {
                if let Err(err) = open_url_in_browser(&url) {
                    warn!(url = %url, error = %err, "could not open browser");
                }
                None
            }
            Effect::PersistSaved(_) | Effect::PersistHistory(_) => None,
        }
    }
}

fn analysis_event(target: AnalysisTarget, result: Result<String, AiError>) -> Event {
    match result {
        Ok(text) => Event::AnalysisReady { target, text },
        Err(error) => {
            warn!(?target, error = %error, "analysis failed");
            Event::AnalysisFailed { target, error }
        }
    }
}

fn open_session(settings: &Settings) -> Result<Session<JsonFileStore>, AppError> {
    let store = JsonFileStore::in_dir(&settings.data_dir)?;
    info!(path = %store.path().display(), "reader state opened");
    Ok(Session::new(store, &settings.site.base_url, settings.limit))
}

fn headless_command(cli: &Cli) -> Result<Event, AppError> {
    startup_event(cli).ok_or(AppError::NoAction)
}

async fn run_headless(cli: &Cli, settings: &Settings) -> Result<(), AppError> {
    let first = headless_command(cli)?;
    let services = Services::from_settings(settings)?;
    let mut session = open_session(settings)?;

    let mut exported = drive(&mut session, &services, first).await;
    let loaded = session.controller().error().is_none() && session.controller().article().is_some();
    if loaded && cli.export_epub.is_some() {
        exported = drive(&mut session, &services, Event::ExportBook).await;
    } else if let (true, Some(description)) = (loaded, &cli.explain_visual) {
        drive(
            &mut session,
            &services,
            Event::ReportVisualIssue(description.clone()),
        )
        .await;
    }

    if let Some(report) = session.controller().error() {
        eprintln!("{}", report.to_markdown());
        return Err(AppError::Reported(report.message.clone()));
    }

    let mut stdout = io::stdout().lock();
    print_outcome(session.controller(), exported.as_deref(), &mut stdout)?;
    stdout.flush()?;
    Ok(())
}

/// Runs `event` and every completion it causes to quiescence. Returns the
/// path of a book written along the way.
async fn drive<S: StateStore>(
    session: &mut Session<S>,
    services: &Services,
    event: Event,
) -> Option<PathBuf> {
    let mut exported = None;
    let mut queue = VecDeque::from([event]);
    while let Some(event) = queue.pop_front() {
        for effect in session.dispatch(event) {
            if let Some(next) = services.execute(effect).await {
                if let Event::ExportFinished(path) = &next {
                    exported = Some(path.clone());
                }
                queue.push_back(next);
            }
        }
        for notice in session.controller_mut().drain_notices() {
            eprintln!("{notice}");
        }
    }
    exported
}

fn print_outcome(
    controller: &Controller,
    exported: Option<&Path>,
    out: &mut impl Write,
) -> io::Result<()> {
    if let Some(path) = exported {
        return writeln!(out, "{}", path.display());
    }
    if let Some(visual) = controller.visual_report() {
        return writeln!(out, "{}", visual.analysis.as_deref().unwrap_or_default());
    }
    if let Some((topic, map)) = controller.mind_map() {
        writeln!(out, "Mind map: {topic}")?;
        for (label, items) in map.categories() {
            writeln!(out, "\n{label}")?;
            for item in items {
                writeln!(out, "  - {item}")?;
            }
        }
        return Ok(());
    }
    if let Some(article) = controller.article() {
        writeln!(out, "# {}\n", article.title)?;
        return write!(out, "{}", reader_text(&article.html, HEADLESS_TEXT_WIDTH));
    }

    if controller.results().is_empty() {
        writeln!(out, "No results found for \"{}\".", controller.query())?;
        return Ok(());
    }
    let offset = (controller.page() - 1) * controller.limit();
    for (idx, result) in controller.results().iter().enumerate() {
        writeln!(out, "{:>3}. {}", offset + idx + 1, result.title)?;
        if !result.snippet.is_empty() {
            writeln!(out, "     {}", result.snippet)?;
        }
    }
    writeln!(
        out,
        "\nPage {} of {} ({} results{})",
        controller.page(),
        controller.total_pages().max(1),
        controller.total_hits(),
        if controller.total_is_exact() {
            ""
        } else {
            ", estimated"
        }
    )
}

/// First event for the command line, shared by both front ends. Order:
/// `--mindmap`, `--export-epub`, `--article`, then the search query.
fn startup_event(cli: &Cli) -> Option<Event> {
    if let Some(topic) = &cli.mindmap {
        return Some(Event::Explore(topic.clone()));
    }
    if let Some(title) = cli.export_epub.as_ref().or(cli.article.as_ref()) {
        return Some(Event::OpenArticle(title.clone()));
    }
    cli.query.as_ref().map(|query| Event::SubmitSearch {
        query: query.clone(),
        page: cli.page,
    })
}

fn spawn_effects(services: &Services, tx: &UnboundedSender<Event>, effects: Vec<Effect>) {
    for effect in effects {
        let services = services.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(event) = services.execute(effect).await {
                let _ = tx.send(event);
            }
        });
    }
}

fn run_tui(cli: &Cli, settings: &Settings) -> Result<(), AppError> {
    let services = Services::from_settings(settings)?;
    let mut session = open_session(settings)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    if let Some(event) = startup_event(cli) {
        let effects = session.dispatch(event);
        spawn_effects(&services, &tx, effects);
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    install_panic_hook();
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let tui_result = draw_loop(
        &mut terminal,
        &mut session,
        &services,
        &tx,
        &mut rx,
        &settings.data_dir,
    );

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    tui_result
}

/// Restores the terminal before the default hook prints the panic. Panics
/// caught around a draw are logged and left to the render-failure screen.
fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if cfg!(panic = "unwind") && IN_DRAW.load(Ordering::SeqCst) {
            error!(panic = %info, "render panicked");
            return;
        }
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        default_hook(info);
    }));
}

fn draw_loop<S: StateStore>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    session: &mut Session<S>,
    services: &Services,
    tx: &UnboundedSender<Event>,
    rx: &mut UnboundedReceiver<Event>,
    data_dir: &Path,
) -> Result<(), AppError> {
    let mut ui = UiState::default();
    let mut last_tick = Instant::now();

    loop {
        while let Ok(event) = rx.try_recv() {
            let effects = session.dispatch(event);
            spawn_effects(services, tx, effects);
        }
        for notice in session.controller_mut().drain_notices() {
            ui.push_status(notice);
        }

        IN_DRAW.store(true, Ordering::SeqCst);
        let drawn = panic::catch_unwind(AssertUnwindSafe(|| {
            terminal
                .draw(|f| tui::draw(f, session.controller(), &mut ui))
                .map(|_| ())
        }));
        IN_DRAW.store(false, Ordering::SeqCst);
        let failure = match drawn {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        if let Some(message) = failure {
            if session.controller().fatal().is_some() {
                return Err(AppError::Render(message));
            }
            error!(error = %message, "render failed");
            session.dispatch(Event::RenderFailed(message));
            ui = UiState::default();
            terminal.clear()?;
            continue;
        }

        let timeout = TICK_RATE.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let TermEvent::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match tui::handle_key(&mut ui, session.controller(), key) {
                        KeyOutcome::None => {}
                        KeyOutcome::Quit => break,
                        KeyOutcome::Dispatch(event) => {
                            let effects = session.dispatch(event);
                            spawn_effects(services, tx, effects);
                        }
                        KeyOutcome::CopyReport(report) => {
                            match write_report(data_dir, &report) {
                                Ok(path) => {
                                    ui.push_status(format!("Report written to {}", path.display()))
                                }
                                Err(err) => {
                                    ui.push_status(format!("Could not write report: {err}"))
                                }
                            }
                        }
                    }
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            last_tick = Instant::now();
        }
    }

    debug!(
        views = session.controller().view_trace().len(),
        "terminal session ended"
    );
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn write_report(dir: &Path, report: &ErrorReport) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(REPORT_FILE_NAME);
    fs::write(&path, report.to_markdown())?;
    info!(path = %path.display(), "error report written");
    Ok(path)
}
