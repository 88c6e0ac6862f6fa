use std::collections::VecDeque;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};

use super::controller::{Controller, Event, VisualReport};
use super::error::ErrorReport;
use super::scrape::{ArticleLink, article_links};
use super::types::View;
use super::ui_utils::{
    accent_style, centered_rect, error_style, highlight_style, muted_style, reader_text,
    truncate_chars,
};

const SCROLL_PAGE: u16 = 10;
const STATUS_CAPACITY: usize = 20;
const SAVE_OPTIONS: [&str; 3] = ["Toggle bookmark", "Download EPUB", "View saved articles"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Search,
    VisualIssue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modal {
    SaveOptions { selected: usize },
    Links { links: Vec<ArticleLink>, selected: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyOutcome {
    None,
    Quit,
    Dispatch(Event),
    CopyReport(ErrorReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Main,
    Side,
}

#[derive(Debug)]
struct RenderCache {
    key: (String, usize, u16, u16),
    main: String,
    side: String,
}

/// Screen-local state: selections, scroll offsets, inputs and modals.
#[derive(Debug)]
pub struct UiState {
    input: Option<InputMode>,
    buffer: String,
    help: bool,
    modal: Option<Modal>,
    selected: usize,
    column: usize,
    scroll: u16,
    side_scroll: u16,
    pane: Pane,
    last_view: View,
    status: VecDeque<String>,
    cache: Option<RenderCache>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            input: None,
            buffer: String::new(),
            help: false,
            modal: None,
            selected: 0,
            column: 0,
            scroll: 0,
            side_scroll: 0,
            pane: Pane::Main,
            last_view: View::Welcome,
            status: VecDeque::new(),
            cache: None,
        }
    }
}

impl UiState {
    pub fn push_status(&mut self, message: String) {
        self.status.push_front(message);
        while self.status.len() > STATUS_CAPACITY {
            self.status.pop_back();
        }
    }

    /// Resets per-view cursors when the controller switched views.
    fn sync_view(&mut self, view: View) {
        if self.last_view != view {
            self.last_view = view;
            self.selected = 0;
            self.column = 0;
            self.scroll = 0;
            self.side_scroll = 0;
            self.pane = Pane::Main;
            self.modal = None;
        }
    }

    fn pane_scroll(&mut self) -> &mut u16 {
        match self.pane {
            Pane::Main => &mut self.scroll,
            Pane::Side => &mut self.side_scroll,
        }
    }

    fn scroll_by(&mut self, delta: i32) {
        let scroll = self.pane_scroll();
        *scroll = (i32::from(*scroll) + delta).clamp(0, i32::from(u16::MAX)) as u16;
    }

    fn start_input(&mut self, mode: InputMode) {
        self.input = Some(mode);
        self.buffer.clear();
    }
}

pub fn handle_key(ui: &mut UiState, controller: &Controller, key: KeyEvent) -> KeyOutcome {
    ui.sync_view(controller.view());

    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return KeyOutcome::Quit;
    }

    if let Some(fatal) = controller.fatal() {
        return match key.code {
            KeyCode::Char('c') => KeyOutcome::CopyReport(fatal.clone()),
            KeyCode::Char('q') | KeyCode::Esc => KeyOutcome::Quit,
            _ => KeyOutcome::None,
        };
    }

    if let Some(mode) = ui.input {
        return handle_input_key(ui, mode, key);
    }

    if ui.help {
        if matches!(key.code, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('?')) {
            ui.help = false;
        }
        return KeyOutcome::None;
    }

    if let Some(modal) = ui.modal.take() {
        return handle_modal_key(ui, modal, key);
    }

    // Same stacking as `draw`: the error overlay sits above the visual report.
    if let Some(report) = controller.error() {
        return match key.code {
            KeyCode::Char('a') => KeyOutcome::Dispatch(Event::AnalyzeError),
            KeyCode::Char('c') => KeyOutcome::CopyReport(report.clone()),
            KeyCode::Esc | KeyCode::Enter => KeyOutcome::Dispatch(Event::DismissError),
            KeyCode::Char('q') => KeyOutcome::Quit,
            _ => KeyOutcome::None,
        };
    }

    if controller.visual_report().is_some() {
        return match key.code {
            KeyCode::Esc | KeyCode::Enter => KeyOutcome::Dispatch(Event::DismissVisualReport),
            _ => KeyOutcome::None,
        };
    }

    match key.code {
        KeyCode::Char('q') => return KeyOutcome::Quit,
        KeyCode::Char('?') => {
            ui.help = true;
            return KeyOutcome::None;
        }
        KeyCode::Char('/') => {
            ui.start_input(InputMode::Search);
            return KeyOutcome::None;
        }
        KeyCode::Char('H') => return KeyOutcome::Dispatch(Event::Home),
        KeyCode::Char('S') => return KeyOutcome::Dispatch(Event::OpenSaved),
        KeyCode::Esc | KeyCode::Backspace if controller.view().shows_back() => {
            return KeyOutcome::Dispatch(Event::Back);
        }
        _ => {}
    }

    match controller.view() {
        View::Welcome => welcome_key(ui, controller, key),
        View::Results => results_key(ui, controller, key),
        View::Article => article_key(ui, controller, key),
        View::Saved => saved_key(ui, controller, key),
        View::MindMap => mind_map_key(ui, controller, key),
        View::Searching => KeyOutcome::None,
    }
}

fn handle_input_key(ui: &mut UiState, mode: InputMode, key: KeyEvent) -> KeyOutcome {
    match key.code {
        KeyCode::Esc => {
            ui.input = None;
            KeyOutcome::None
        }
        KeyCode::Enter => {
            ui.input = None;
            let text = std::mem::take(&mut ui.buffer);
            if text.trim().is_empty() {
                return KeyOutcome::None;
            }
            KeyOutcome::Dispatch(match mode {
                InputMode::Search => Event::SubmitSearch {
                    query: text,
                    page: 1,
                },
                InputMode::VisualIssue => Event::ReportVisualIssue(text),
            })
        }
        KeyCode::Backspace => {
            ui.buffer.pop();
            KeyOutcome::None
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            ui.buffer.clear();
            KeyOutcome::None
        }
        KeyCode::Char(ch) => {
            ui.buffer.push(ch);
            KeyOutcome::None
        }
        _ => KeyOutcome::None,
    }
}

fn handle_modal_key(ui: &mut UiState, modal: Modal, key: KeyEvent) -> KeyOutcome {
    match modal {
        Modal::SaveOptions { selected } => match key.code {
            KeyCode::Esc => KeyOutcome::None,
            KeyCode::Up | KeyCode::Char('k') => {
                ui.modal = Some(Modal::SaveOptions {
                    selected: selected.saturating_sub(1),
                });
                KeyOutcome::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                ui.modal = Some(Modal::SaveOptions {
                    selected: (selected + 1).min(SAVE_OPTIONS.len() - 1),
                });
                KeyOutcome::None
            }
            KeyCode::Enter => KeyOutcome::Dispatch(match selected {
                0 => Event::ToggleBookmark,
                1 => Event::ExportBook,
                _ => Event::OpenSaved,
            }),
            _ => {
                ui.modal = Some(Modal::SaveOptions { selected });
                KeyOutcome::None
            }
        },
        Modal::Links { links, selected } => match key.code {
            KeyCode::Esc => KeyOutcome::None,
            KeyCode::Enter => match links.get(selected) {
                Some(link) => KeyOutcome::Dispatch(Event::OpenArticle(link.title.clone())),
                None => KeyOutcome::None,
            },
            code => {
                let selected = move_selection(selected, links.len(), code);
                ui.modal = Some(Modal::Links { links, selected });
                KeyOutcome::None
            }
        },
    }
}

fn move_selection(selected: usize, len: usize, code: KeyCode) -> usize {
    if len == 0 {
        return 0;
    }
    match code {
        KeyCode::Up | KeyCode::Char('k') => selected.saturating_sub(1),
        KeyCode::Down | KeyCode::Char('j') => (selected + 1).min(len - 1),
        KeyCode::PageUp => selected.saturating_sub(SCROLL_PAGE as usize),
        KeyCode::PageDown => (selected + SCROLL_PAGE as usize).min(len - 1),
        KeyCode::Home | KeyCode::Char('g') => 0,
        KeyCode::End | KeyCode::Char('G') => len - 1,
        _ => selected.min(len - 1),
    }
}

fn welcome_key(ui: &mut UiState, controller: &Controller, key: KeyEvent) -> KeyOutcome {
    let history = controller.history();
    match key.code {
        KeyCode::Enter => match history.get(ui.selected) {
            Some(query) => KeyOutcome::Dispatch(Event::SubmitSearch {
                query: query.clone(),
                page: 1,
            }),
            None => {
                ui.start_input(InputMode::Search);
                KeyOutcome::None
            }
        },
        KeyCode::Char('C') => KeyOutcome::Dispatch(Event::ClearHistory),
        code => {
            ui.selected = move_selection(ui.selected, history.len(), code);
            KeyOutcome::None
        }
    }
}

fn results_key(ui: &mut UiState, controller: &Controller, key: KeyEvent) -> KeyOutcome {
    let results = controller.results();
    match key.code {
        KeyCode::Enter => match results.get(ui.selected) {
            Some(result) => KeyOutcome::Dispatch(Event::OpenArticle(result.title.clone())),
            None => KeyOutcome::None,
        },
        KeyCode::Char('n') | KeyCode::Right => {
            KeyOutcome::Dispatch(Event::ChangePage(controller.page() + 1))
        }
        KeyCode::Char('p') | KeyCode::Left if controller.page() > 1 => {
            KeyOutcome::Dispatch(Event::ChangePage(controller.page() - 1))
        }
        KeyCode::Char('m') => match results.get(ui.selected) {
            Some(result) => KeyOutcome::Dispatch(Event::Explore(result.title.clone())),
            None => KeyOutcome::None,
        },
        code => {
            ui.selected = move_selection(ui.selected, results.len(), code);
            KeyOutcome::None
        }
    }
}

fn article_key(ui: &mut UiState, controller: &Controller, key: KeyEvent) -> KeyOutcome {
    let Some(article) = controller.article() else {
        return KeyOutcome::None;
    };
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => ui.scroll_by(-1),
        KeyCode::Down | KeyCode::Char('j') => ui.scroll_by(1),
        KeyCode::PageUp => ui.scroll_by(-i32::from(SCROLL_PAGE)),
        KeyCode::PageDown | KeyCode::Char(' ') => ui.scroll_by(i32::from(SCROLL_PAGE)),
        KeyCode::Home | KeyCode::Char('g') => *ui.pane_scroll() = 0,
        KeyCode::Tab if !article.side_blocks.is_empty() => {
            ui.pane = match ui.pane {
                Pane::Main => Pane::Side,
                Pane::Side => Pane::Main,
            };
        }
        KeyCode::Char('b') => ui.modal = Some(Modal::SaveOptions { selected: 0 }),
        KeyCode::Char('l') => {
            let links = article_links(&article.html, controller.base_url());
            if links.is_empty() {
                ui.push_status("This article has no links to other articles".to_string());
            } else {
                ui.modal = Some(Modal::Links { links, selected: 0 });
            }
        }
        KeyCode::Char('v') => ui.start_input(InputMode::VisualIssue),
        KeyCode::Char('e') => return KeyOutcome::Dispatch(Event::ExportBook),
        KeyCode::Char('m') => return KeyOutcome::Dispatch(Event::Explore(article.title.clone())),
        KeyCode::Char('o') => return KeyOutcome::Dispatch(Event::OpenInBrowser),
        _ => {}
    }
    KeyOutcome::None
}

fn saved_key(ui: &mut UiState, controller: &Controller, key: KeyEvent) -> KeyOutcome {
    let saved = controller.saved();
    let current = saved.get(ui.selected).map(|entry| entry.query.clone());
    match (key.code, current) {
        (KeyCode::Enter, Some(query)) => KeyOutcome::Dispatch(Event::ViewSaved(query)),
        (KeyCode::Char('x') | KeyCode::Delete, Some(query)) => {
            if ui.selected + 1 >= saved.len() {
                ui.selected = ui.selected.saturating_sub(1);
            }
            KeyOutcome::Dispatch(Event::RemoveSaved(query))
        }
        (KeyCode::Char('m'), Some(query)) => KeyOutcome::Dispatch(Event::Explore(query)),
        (code, _) => {
            ui.selected = move_selection(ui.selected, saved.len(), code);
            KeyOutcome::None
        }
    }
}

fn mind_map_key(ui: &mut UiState, controller: &Controller, key: KeyEvent) -> KeyOutcome {
    let Some((_, map)) = controller.mind_map() else {
        return KeyOutcome::None;
    };
    let categories = map.categories();
    match key.code {
        KeyCode::Left | KeyCode::Char('h') => {
            ui.column = ui.column.saturating_sub(1);
        }
        KeyCode::Right | KeyCode::Char('l') | KeyCode::Tab => {
            ui.column = (ui.column + 1).min(categories.len() - 1);
        }
        KeyCode::Enter => {
            if let Some(item) = categories[ui.column].1.get(ui.selected) {
                return KeyOutcome::Dispatch(Event::SubmitSearch {
                    query: item.clone(),
                    page: 1,
                });
            }
            return KeyOutcome::None;
        }
        code => {
            ui.selected = move_selection(ui.selected, categories[ui.column].1.len(), code);
            return KeyOutcome::None;
        }
    }
    ui.selected = ui.selected.min(categories[ui.column].1.len().saturating_sub(1));
    KeyOutcome::None
}

pub fn draw(f: &mut Frame, controller: &Controller, ui: &mut UiState) {
    ui.sync_view(controller.view());

    if let Some(fatal) = controller.fatal() {
        draw_fatal(f, fatal);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(f.area());

    draw_header(f, chunks[0], controller);
    match controller.view() {
        View::Welcome => draw_welcome(f, chunks[1], controller, ui),
        View::Searching => draw_loading(f, chunks[1]),
        View::Results => draw_results(f, chunks[1], controller, ui),
        View::Article => draw_article(f, chunks[1], controller, ui),
        View::Saved => draw_saved(f, chunks[1], controller, ui),
        View::MindMap => draw_mind_map(f, chunks[1], controller, ui),
    }
    draw_footer(f, chunks[2], controller, ui);

    if let Some(report) = controller.error() {
        draw_error(f, report, controller.analysis_pending());
    } else if let Some(visual) = controller.visual_report() {
        draw_visual_report(f, visual);
    }

    if let Some(modal) = &ui.modal {
        draw_modal(f, modal, controller);
    }
    if let Some(mode) = ui.input {
        draw_input(f, mode, &ui.buffer);
    }
    if ui.help {
        draw_help(f);
    }
}

fn draw_header(f: &mut Frame, area: Rect, controller: &Controller) {
    let sep = Span::styled("  |  ", muted_style());
    let mut spans = vec![
        Span::styled("grokreader", accent_style()),
        sep.clone(),
        Span::styled(controller.view().title(), Style::default().fg(Color::White)),
    ];
    if !controller.query().is_empty() {
        spans.push(sep.clone());
        spans.push(Span::styled(
            format!("\"{}\"", controller.query()),
            Style::default().fg(Color::LightCyan),
        ));
    }
    spans.push(sep);
    spans.push(Span::styled(
        format!("{} saved", controller.saved().len()),
        Style::default().fg(Color::Yellow),
    ));
    if controller.busy() {
        spans.push(Span::styled("  loading...", Style::default().fg(Color::LightYellow)));
    }
    f.render_widget(
        Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn draw_loading(f: &mut Frame, area: Rect) {
    f.render_widget(
        Paragraph::new(vec![
            Line::from(""),
            Line::styled("Loading...", accent_style()),
        ])
        .alignment(ratatui::layout::Alignment::Center)
        .block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn draw_welcome(f: &mut Frame, area: Rect, controller: &Controller, ui: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(3)])
        .split(area);
    f.render_widget(
        Paragraph::new(vec![
            Line::styled("Grokipedia, in reader mode.", accent_style()),
            Line::from("Press / to search. Articles open distraction-free, with infoboxes"),
            Line::from("in a side column. Save articles, export EPUBs, or explore a topic"),
            Line::from("as an AI mind map."),
        ])
        .block(Block::default().borders(Borders::ALL).title("Welcome"))
        .wrap(Wrap { trim: true }),
        chunks[0],
    );

    let history = controller.history();
    if history.is_empty() {
        f.render_widget(
            Paragraph::new(Line::styled("No recent searches.", muted_style()))
                .block(Block::default().borders(Borders::ALL).title("Recent Searches")),
            chunks[1],
        );
        return;
    }
    let rows = history
        .iter()
        .map(|query| Row::new(vec![Cell::from(query.clone())]))
        .collect::<Vec<_>>();
    let table = Table::new(rows, [Constraint::Min(10)])
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Recent Searches (enter: search again, C: clear)"),
        )
        .row_highlight_style(highlight_style());
    let mut state = TableState::default().with_selected(Some(ui.selected));
    f.render_stateful_widget(table, chunks[1], &mut state);
}

fn draw_results(f: &mut Frame, area: Rect, controller: &Controller, ui: &UiState) {
    let total = if controller.total_is_exact() {
        format!("{} results", controller.total_hits())
    } else {
        format!("about {} results", controller.total_hits())
    };
    let title = format!(
        "Results for \"{}\" | {} | page {} of {}",
        controller.query(),
        total,
        controller.page(),
        controller.total_pages().max(1)
    );

    if controller.results().is_empty() {
        f.render_widget(
            Paragraph::new(vec![
                Line::from(format!("No results found for \"{}\".", controller.query())),
                Line::styled("Try a different spelling or a broader term.", muted_style()),
            ])
            .block(Block::default().borders(Borders::ALL).title(title)),
            area,
        );
        return;
    }

    let snippet_width = area.width.saturating_sub(40) as usize;
    let offset = (controller.page() - 1) * controller.limit();
    let rows = controller
        .results()
        .iter()
        .enumerate()
        .map(|(idx, result)| {
            Row::new(vec![
                Cell::from((offset + idx + 1).to_string()).style(muted_style()),
                Cell::from(result.title.clone()).style(Style::default().add_modifier(Modifier::BOLD)),
                Cell::from(truncate_chars(&result.snippet, snippet_width.max(10))),
            ])
        })
        .collect::<Vec<_>>();
    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Length(30),
            Constraint::Min(10),
        ],
    )
    .header(Row::new(vec!["#", "Title", "Snippet"]).style(accent_style()))
    .block(Block::default().borders(Borders::ALL).title(title))
    .row_highlight_style(highlight_style());
    let mut state = TableState::default().with_selected(Some(ui.selected));
    f.render_stateful_widget(table, area, &mut state);
}

fn draw_article(f: &mut Frame, area: Rect, controller: &Controller, ui: &mut UiState) {
    let Some(article) = controller.article() else {
        draw_loading(f, area);
        return;
    };
    let has_side = !article.side_blocks.is_empty();
    let columns = if has_side {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(64), Constraint::Percentage(36)])
            .split(area)
    } else {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(100)])
            .split(area)
    };

    let main_width = columns[0].width.saturating_sub(2);
    let side_width = columns.get(1).map_or(0, |rect| rect.width.saturating_sub(2));
    let key = (
        article.title.clone(),
        article.html.len(),
        main_width,
        side_width,
    );
    if ui.cache.as_ref().is_none_or(|cache| cache.key != key) {
        let side = article
            .side_blocks
            .iter()
            .map(|block| reader_text(block, side_width as usize))
            .collect::<Vec<_>>()
            .join("\n");
        ui.cache = Some(RenderCache {
            key,
            main: reader_text(&article.main_html, main_width as usize),
            side,
        });
    }
    let Some(cache) = ui.cache.as_ref() else {
        return;
    };

    let saved_marker = if controller.article_is_saved() {
        " [saved]"
    } else {
        ""
    };
    let focus_style = |pane: Pane| {
        if ui.pane == pane {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        }
    };
    f.render_widget(
        Paragraph::new(Text::raw(cache.main.as_str()))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(focus_style(Pane::Main))
                    .title(format!("{}{}", article.title, saved_marker)),
            )
            .scroll((ui.scroll, 0)),
        columns[0],
    );
    if has_side {
        f.render_widget(
            Paragraph::new(Text::raw(cache.side.as_str()))
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(focus_style(Pane::Side))
                        .title("Infobox"),
                )
                .scroll((ui.side_scroll, 0)),
            columns[1],
        );
    }
}

fn draw_saved(f: &mut Frame, area: Rect, controller: &Controller, ui: &UiState) {
    let saved = controller.saved();
    if saved.is_empty() {
        f.render_widget(
            Paragraph::new(vec![
                Line::from("No saved articles yet."),
                Line::styled("Press b in an article to save it.", muted_style()),
            ])
            .block(Block::default().borders(Borders::ALL).title("Saved Articles")),
            area,
        );
        return;
    }
    let rows = saved
        .iter()
        .map(|entry| {
            Row::new(vec![
                Cell::from(entry.query.clone()),
                Cell::from(format!("{} KB", entry.content.len().div_ceil(1024))).style(muted_style()),
            ])
        })
        .collect::<Vec<_>>();
    let table = Table::new(rows, [Constraint::Min(20), Constraint::Length(10)])
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Saved Articles (enter: open, x: remove, m: explore)"),
        )
        .row_highlight_style(highlight_style());
    let mut state = TableState::default().with_selected(Some(ui.selected));
    f.render_stateful_widget(table, area, &mut state);
}

fn draw_mind_map(f: &mut Frame, area: Rect, controller: &Controller, ui: &UiState) {
    let Some((topic, map)) = controller.mind_map() else {
        draw_loading(f, area);
        return;
    };
    let outer = Block::default()
        .borders(Borders::ALL)
        .title(format!("Mind Map: {topic} (enter: search a concept)"));
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(inner);
    for (idx, (label, items)) in map.categories().into_iter().enumerate() {
        let active = idx == ui.column;
        let rows = items
            .iter()
            .map(|item| Row::new(vec![Cell::from(item.clone())]))
            .collect::<Vec<_>>();
        let table = Table::new(rows, [Constraint::Min(6)])
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(if active {
                        Style::default().fg(Color::Yellow)
                    } else {
                        Style::default()
                    })
                    .title(label),
            )
            .row_highlight_style(highlight_style());
        let mut state = TableState::default().with_selected(active.then_some(ui.selected));
        f.render_stateful_widget(table, columns[idx], &mut state);
    }
}

fn draw_footer(f: &mut Frame, area: Rect, controller: &Controller, ui: &UiState) {
    let hints = match controller.view() {
        View::Welcome => "/ search  up/down select  enter search  S saved  ? help  q quit",
        View::Searching => "loading...  q quit",
        View::Results => "enter open  n/p page  m explore  esc back  / search  ? help",
        View::Article => {
            "j/k scroll  tab pane  b save  e epub  m explore  l links  o browser  v report  esc back"
        }
        View::Saved => "enter open  x remove  m explore  esc back  H home",
        View::MindMap => "left/right column  up/down concept  enter search  esc back",
    };
    let status = ui
        .status
        .front()
        .map(|message| Line::from(message.clone()))
        .unwrap_or_else(|| Line::styled("Ready", muted_style()));
    f.render_widget(
        Paragraph::new(vec![status, Line::styled(hints, muted_style())])
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .wrap(Wrap { trim: true }),
        area,
    );
}

fn draw_error(f: &mut Frame, report: &ErrorReport, analysis_pending: bool) {
    let label = |name: &str| Span::styled(format!("{name}: "), muted_style());
    let mut lines = vec![
        Line::styled(report.message.clone(), error_style()),
        Line::from(""),
    ];
    if let Some(raw) = &report.raw_error {
        lines.push(Line::from(vec![label("Error"), Span::raw(raw.clone())]));
    }
    if let Some(url) = &report.target_url {
        lines.push(Line::from(vec![label("URL"), Span::raw(url.clone())]));
    }
    if let (Some(stage), Some(selector)) = (&report.scraping_stage, &report.failed_selector) {
        lines.push(Line::from(vec![
            label("Stage"),
            Span::raw(stage.clone()),
            Span::styled("  selector ", muted_style()),
            Span::raw(selector.clone()),
        ]));
    }
    lines.push(Line::from(""));
    match (&report.analysis, analysis_pending) {
        (_, true) => lines.push(Line::from("Asking the AI service for an analysis...")),
        (Some(text), false) => {
            lines.push(Line::styled("AI analysis", accent_style()));
            lines.extend(text.lines().map(|line| Line::from(line.to_string())));
        }
        (None, false) => {}
    }
    lines.push(Line::from(""));
    lines.push(Line::styled(
        "a: analyze with AI   c: copy full report   esc: dismiss",
        muted_style(),
    ));
    draw_text_popup(f, "Error", &lines);
}

fn draw_visual_report(f: &mut Frame, visual: &VisualReport) {
    let mut lines = vec![
        Line::from(vec![
            Span::styled("You reported: ", muted_style()),
            Span::raw(visual.description.clone()),
        ]),
        Line::from(""),
    ];
    match (&visual.analysis, visual.pending) {
        (_, true) => lines.push(Line::from("Analyzing the article markup...")),
        (Some(text), false) => {
            lines.extend(text.lines().map(|line| Line::from(line.to_string())));
        }
        (None, false) => {}
    }
    lines.push(Line::from(""));
    lines.push(Line::styled("esc: close", muted_style()));
    draw_text_popup(f, "Visual Issue Analysis", &lines);
}

fn draw_fatal(f: &mut Frame, report: &ErrorReport) {
    let mut lines = vec![
        Line::styled(report.message.clone(), error_style()),
        Line::styled("c: copy full report   q: quit", muted_style()),
        Line::from(""),
    ];
    lines.extend(
        report
            .to_markdown()
            .lines()
            .map(|line| Line::from(line.to_string())),
    );
    f.render_widget(
        Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(error_style())
                    .title("grokreader stopped rendering"),
            )
            .wrap(Wrap { trim: false }),
        f.area(),
    );
}

fn draw_text_popup(f: &mut Frame, title: &str, lines: &[Line]) {
    let area = centered_rect(76, 64, f.area());
    f.render_widget(Clear, area);
    f.render_widget(
        Paragraph::new(lines.to_vec())
            .block(
                Block::default()
                    .title(title.to_string())
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn draw_modal(f: &mut Frame, modal: &Modal, controller: &Controller) {
    let (title, rows, selected) = match modal {
        Modal::SaveOptions { selected } => {
            let rows = SAVE_OPTIONS
                .iter()
                .enumerate()
                .map(|(idx, option)| {
                    let label = if idx == 0 && controller.article_is_saved() {
                        "Remove bookmark"
                    } else {
                        option
                    };
                    Row::new(vec![Cell::from(label)])
                })
                .collect::<Vec<_>>();
            ("Save Options", rows, *selected)
        }
        Modal::Links { links, selected } => {
            let rows = links
                .iter()
                .map(|link| {
                    Row::new(vec![
                        Cell::from(link.label.clone()),
                        Cell::from(link.title.clone()).style(muted_style()),
                    ])
                })
                .collect::<Vec<_>>();
            ("Linked Articles", rows, *selected)
        }
    };
    let area = centered_rect(60, 50, f.area());
    f.render_widget(Clear, area);
    let table = Table::new(rows, [Constraint::Percentage(55), Constraint::Percentage(45)])
        .block(
            Block::default()
                .title(format!("{title} (enter: choose, esc: close)"))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .row_highlight_style(highlight_style());
    let mut state = TableState::default().with_selected(Some(selected));
    f.render_stateful_widget(table, area, &mut state);
}

fn draw_input(f: &mut Frame, mode: InputMode, buffer: &str) {
    let (title, hint) = match mode {
        InputMode::Search => ("Search Grokipedia", "Enter to search. Esc to cancel. Ctrl+u to clear."),
        InputMode::VisualIssue => (
            "Report a Visual Issue",
            "Describe what looks wrong, e.g. \"the table is cut off\". Enter to analyze.",
        ),
    };
    let area = centered_rect(64, 24, f.area());
    f.render_widget(Clear, area);
    f.render_widget(
        Paragraph::new(vec![
            Line::from(vec![
                Span::styled("> ", accent_style()),
                Span::raw(buffer.to_string()),
                Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
            ]),
            Line::from(""),
            Line::styled(hint, muted_style()),
        ])
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .wrap(Wrap { trim: true }),
        area,
    );
}

fn draw_help(f: &mut Frame) {
    let lines = [
        "Global",
        "  /: search   H: home   S: saved articles   esc: back   q: quit",
        "",
        "Lists",
        "  up/down or j/k: move   pgup/pgdn: jump   enter: open",
        "  results: n/p next/previous page, m explore",
        "",
        "Article",
        "  j/k, space, pgup/pgdn: scroll   tab: switch to infobox column",
        "  b: save options   e: export EPUB   m: mind map   l: linked articles",
        "  o: open in browser   v: report a visual issue",
        "",
        "Errors",
        "  a: ask the AI for an analysis   c: write the full report to a file",
    ]
    .into_iter()
    .map(Line::from)
    .collect::<Vec<_>>();
    draw_text_popup(f, "Help (? or esc to close)", &lines);
}

#[cfg(test)]
impl UiState {
    fn input(&self) -> Option<InputMode> {
        self.input
    }

    fn modal(&self) -> Option<&Modal> {
        self.modal.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::{ArticleContent, MindMap, SearchPage, SearchResult};
    use crossterm::event::KeyEventKind;
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(ui: &mut UiState, controller: &Controller, text: &str) {
        for ch in text.chars() {
            assert_eq!(handle_key(ui, controller, key(KeyCode::Char(ch))), KeyOutcome::None);
        }
    }

    fn with_results() -> Controller {
        let mut c = Controller::new("https://grokipedia.com", 10, Vec::new(), Vec::new());
        c.handle(Event::SubmitSearch {
            query: "Mars".to_string(),
            page: 1,
        });
        c.handle(Event::SearchCompleted {
            query: "Mars".to_string(),
            page: 1,
            outcome: SearchPage {
                results: vec![
                    SearchResult {
                        title: "Mars".to_string(),
                        snippet: "Fourth planet".to_string(),
                    },
                    SearchResult {
                        title: "Phobos".to_string(),
                        snippet: "Moon".to_string(),
                    },
                ],
                total_hits: 30,
                total_is_exact: false,
            },
        });
        c
    }

    fn with_article() -> Controller {
        let mut c = with_results();
        c.handle(Event::OpenArticle("Mars".to_string()));
        c.handle(Event::ArticleLoaded(ArticleContent::from_markup(
            "Mars",
            concat!(
                r#"<table class="infobox"><tr><td>Mass 6.4e23 kg</td></tr></table>"#,
                r#"<p>Mars orbits the Sun. See <a href="https://grokipedia.com/page/Phobos">Phobos</a>.</p>"#
            )
            .to_string(),
        )));
        c
    }

    #[test]
    fn search_input_submits_typed_query() {
        let c = Controller::new("https://grokipedia.com", 10, Vec::new(), Vec::new());
        let mut ui = UiState::default();
        handle_key(&mut ui, &c, key(KeyCode::Char('/')));
        assert_eq!(ui.input(), Some(InputMode::Search));
        type_text(&mut ui, &c, "red planet");
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Enter)),
            KeyOutcome::Dispatch(Event::SubmitSearch {
                query: "red planet".to_string(),
                page: 1,
            })
        );
        assert_eq!(ui.input(), None);
    }

    #[test]
    fn results_keys_open_and_paginate() {
        let c = with_results();
        let mut ui = UiState::default();
        handle_key(&mut ui, &c, key(KeyCode::Down));
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Enter)),
            KeyOutcome::Dispatch(Event::OpenArticle("Phobos".to_string()))
        );
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Char('n'))),
            KeyOutcome::Dispatch(Event::ChangePage(2))
        );
        assert_eq!(handle_key(&mut ui, &c, key(KeyCode::Char('p'))), KeyOutcome::None);
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Esc)),
            KeyOutcome::Dispatch(Event::Back)
        );
    }

    #[test]
    fn save_modal_maps_options_to_events() {
        let c = with_article();
        let mut ui = UiState::default();
        handle_key(&mut ui, &c, key(KeyCode::Char('b')));
        assert!(matches!(ui.modal(), Some(Modal::SaveOptions { selected: 0 })));
        handle_key(&mut ui, &c, key(KeyCode::Down));
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Enter)),
            KeyOutcome::Dispatch(Event::ExportBook)
        );
        assert!(ui.modal().is_none());
    }

    #[test]
    fn links_modal_opens_linked_article() {
        let c = with_article();
        let mut ui = UiState::default();
        handle_key(&mut ui, &c, key(KeyCode::Char('l')));
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Enter)),
            KeyOutcome::Dispatch(Event::OpenArticle("Phobos".to_string()))
        );
    }

    #[test]
    fn visual_issue_input_reports_description() {
        let c = with_article();
        let mut ui = UiState::default();
        handle_key(&mut ui, &c, key(KeyCode::Char('v')));
        type_text(&mut ui, &c, "cut off");
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Enter)),
            KeyOutcome::Dispatch(Event::ReportVisualIssue("cut off".to_string()))
        );
    }

    #[test]
    fn error_overlay_captures_keys() {
        let mut c = with_article();
        c.handle(Event::ExportFailed("disk full".to_string()));
        let mut ui = UiState::default();
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Char('a'))),
            KeyOutcome::Dispatch(Event::AnalyzeError)
        );
        assert!(matches!(
            handle_key(&mut ui, &c, key(KeyCode::Char('c'))),
            KeyOutcome::CopyReport(report) if report.raw_error.as_deref() == Some("disk full")
        ));
        assert_eq!(handle_key(&mut ui, &c, key(KeyCode::Char('m'))), KeyOutcome::None);
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Esc)),
            KeyOutcome::Dispatch(Event::DismissError)
        );
    }

    #[test]
    fn error_overlay_takes_keys_over_visual_report() {
        let mut c = with_article();
        c.handle(Event::ReportVisualIssue("table overflows".to_string()));
        c.handle(Event::ExportFailed("disk full".to_string()));
        assert!(c.visual_report().is_some());
        let mut ui = UiState::default();
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Esc)),
            KeyOutcome::Dispatch(Event::DismissError)
        );
        c.handle(Event::DismissError);
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Esc)),
            KeyOutcome::Dispatch(Event::DismissVisualReport)
        );
    }

    #[test]
    fn mind_map_enter_searches_selected_concept() {
        let mut c = with_article();
        c.handle(Event::Explore("Mars".to_string()));
        c.handle(Event::MindMapReady {
            topic: "Mars".to_string(),
            map: MindMap {
                foundational: vec!["Orbit".into(), "Gravity".into(), "Rock".into()],
                deeper_dive: vec!["Olympus Mons".into(), "Dust".into(), "Ice".into()],
                related_branches: vec!["Earth".into(), "Venus".into(), "Areology".into()],
            },
        });
        let mut ui = UiState::default();
        handle_key(&mut ui, &c, key(KeyCode::Right));
        handle_key(&mut ui, &c, key(KeyCode::Down));
        assert_eq!(
            handle_key(&mut ui, &c, key(KeyCode::Enter)),
            KeyOutcome::Dispatch(Event::SubmitSearch {
                query: "Dust".to_string(),
                page: 1,
            })
        );
    }

    #[test]
    fn ctrl_c_always_quits() {
        let c = with_article();
        let mut ui = UiState::default();
        handle_key(&mut ui, &c, key(KeyCode::Char('v')));
        let mut ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        ctrl_c.kind = KeyEventKind::Press;
        assert_eq!(handle_key(&mut ui, &c, ctrl_c), KeyOutcome::Quit);
    }

    #[test]
    fn article_view_renders_both_columns() {
        let c = with_article();
        let mut ui = UiState::default();
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| draw(f, &c, &mut ui)).unwrap();
        let screen = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect::<String>();
        assert!(screen.contains("Mars orbits the Sun."));
        assert!(screen.contains("Infobox"));
        assert!(screen.contains("Mass 6.4e23 kg"));
    }
}
