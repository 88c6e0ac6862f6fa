//! View state machine.
//!
//! [`Controller::handle`] applies one [`Event`] and returns the [`Effect`]s the
//! runtime must execute. It performs no I/O itself; completions of effects
//! come back as events.

use std::path::PathBuf;

use tracing::{debug, info};

use super::error::{AiError, ErrorReport, ScrapeError};
use super::fetch::{article_url, search_url};
use super::store::{is_saved, record_search, toggle_saved};
use super::types::{ArticleContent, MindMap, SavedArticle, SearchPage, SearchResult, View};

/// Most recent view transitions kept for render-failure reports.
const TRACE_LIMIT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisTarget {
    ErrorReport,
    VisualIssue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SubmitSearch { query: String, page: usize },
    ChangePage(usize),
    OpenArticle(String),
    OpenSaved,
    ViewSaved(String),
    RemoveSaved(String),
    ToggleBookmark,
    Explore(String),
    Back,
    Home,
    ClearHistory,
    ExportBook,
    OpenInBrowser,
    DismissError,
    AnalyzeError,
    ReportVisualIssue(String),
    DismissVisualReport,
    RenderFailed(String),

    SearchCompleted {
        query: String,
        page: usize,
        outcome: SearchPage,
    },
    SearchFailed {
        query: String,
        page: usize,
        error: ScrapeError,
    },
    ArticleLoaded(ArticleContent),
    ArticleFailed {
        title: String,
        error: ScrapeError,
    },
    MindMapReady {
        topic: String,
        map: MindMap,
    },
    MindMapFailed {
        topic: String,
        error: AiError,
    },
    ExportFinished(PathBuf),
    ExportFailed(String),
    AnalysisReady {
        target: AnalysisTarget,
        text: String,
    },
    AnalysisFailed {
        target: AnalysisTarget,
        error: AiError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Search {
        query: String,
        page: usize,
        limit: usize,
    },
    FetchArticle {
        title: String,
    },
    GenerateMindMap {
        topic: String,
    },
    AnalyzeError(Box<ErrorReport>),
    AnalyzeVisualIssue {
        title: String,
        html: String,
        description: String,
    },
    ExportBook(SavedArticle),
    OpenUrl(String),
    PersistSaved(Vec<SavedArticle>),
    PersistHistory(Vec<String>),
}

/// A user-reported rendering defect and the AI explanation, once it arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualReport {
    pub description: String,
    pub analysis: Option<String>,
    pub pending: bool,
}

#[derive(Debug)]
pub struct Controller {
    base_url: String,
    limit: usize,
    view: View,
    view_before_explore: View,
    trace: Vec<View>,
    busy: bool,
    query: String,
    page: usize,
    /// Query and page the displayed results belong to.
    shown: (String, usize),
    results: Vec<SearchResult>,
    total_hits: usize,
    total_is_exact: bool,
    article: Option<ArticleContent>,
    saved: Vec<SavedArticle>,
    history: Vec<String>,
    mind_map: Option<(String, MindMap)>,
    error: Option<ErrorReport>,
    analysis_pending: bool,
    visual: Option<VisualReport>,
    fatal: Option<ErrorReport>,
    notices: Vec<String>,
}

impl Controller {
    pub fn new(
        base_url: impl Into<String>,
        limit: usize,
        saved: Vec<SavedArticle>,
        history: Vec<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            limit: limit.max(1),
            view: View::Welcome,
            view_before_explore: View::Welcome,
            trace: vec![View::Welcome],
            busy: false,
            query: String::new(),
            page: 1,
            shown: (String::new(), 1),
            results: Vec::new(),
            total_hits: 0,
            total_is_exact: true,
            article: None,
            saved,
            history,
            mind_map: None,
            error: None,
            analysis_pending: false,
            visual: None,
            fatal: None,
            notices: Vec::new(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// The most recent views entered, oldest first.
    pub fn view_trace(&self) -> &[View] {
        &self.trace
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn total_hits(&self) -> usize {
        self.total_hits
    }

    pub fn total_is_exact(&self) -> bool {
        self.total_is_exact
    }

    pub fn total_pages(&self) -> usize {
        self.total_hits.div_ceil(self.limit)
    }

    pub fn article(&self) -> Option<&ArticleContent> {
        self.article.as_ref()
    }

    pub fn article_is_saved(&self) -> bool {
        self.article
            .as_ref()
            .is_some_and(|article| is_saved(&self.saved, &article.title))
    }

    pub fn saved(&self) -> &[SavedArticle] {
        &self.saved
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn mind_map(&self) -> Option<(&str, &MindMap)> {
        self.mind_map
            .as_ref()
            .map(|(topic, map)| (topic.as_str(), map))
    }

    pub fn error(&self) -> Option<&ErrorReport> {
        self.error.as_ref()
    }

    pub fn analysis_pending(&self) -> bool {
        self.analysis_pending
    }

    pub fn visual_report(&self) -> Option<&VisualReport> {
        self.visual.as_ref()
    }

    pub fn fatal(&self) -> Option<&ErrorReport> {
        self.fatal.as_ref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn push_notice(&mut self, notice: impl Into<String>) {
        self.notices.push(notice.into());
    }

    /// Status lines produced since the last call.
    pub fn drain_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::SubmitSearch { query, page } => self.submit_search(&query, page),
            Event::ChangePage(page) => self.change_page(page),
            Event::OpenArticle(title) => self.open_article(&title),
            Event::OpenSaved => {
                self.set_view(View::Saved);
                Vec::new()
            }
            Event::ViewSaved(query) => {
                if let Some(saved) = self.saved.iter().find(|entry| entry.query == query) {
                    self.article = Some(ArticleContent::from(saved));
                    self.query = query;
                    self.error = None;
                    self.set_view(View::Article);
                }
                Vec::new()
            }
            Event::RemoveSaved(query) => {
                let before = self.saved.len();
                self.saved.retain(|entry| entry.query != query);
                if self.saved.len() == before {
                    return Vec::new();
                }
                self.notices.push(format!("Removed \"{query}\" from saved articles"));
                vec![Effect::PersistSaved(self.saved.clone())]
            }
            Event::ToggleBookmark => self.toggle_bookmark(),
            Event::Explore(topic) => self.explore(&topic),
            Event::Back => {
                self.back();
                Vec::new()
            }
            Event::Home => {
                self.error = None;
                self.article = None;
                self.clear_search();
                self.set_view(View::Welcome);
                Vec::new()
            }
            Event::ClearHistory => {
                if self.history.is_empty() {
                    return Vec::new();
                }
                self.history.clear();
                vec![Effect::PersistHistory(Vec::new())]
            }
            Event::ExportBook => match &self.article {
                Some(article) => vec![Effect::ExportBook(article.to_saved())],
                None => Vec::new(),
            },
            Event::OpenInBrowser => match &self.article {
                Some(article) => vec![Effect::OpenUrl(article_url(&self.base_url, &article.title))],
                None => Vec::new(),
            },
            Event::DismissError => {
                self.error = None;
                self.analysis_pending = false;
                Vec::new()
            }
            Event::AnalyzeError => self.analyze_error(),
            Event::ReportVisualIssue(description) => self.report_visual_issue(&description),
            Event::DismissVisualReport => {
                self.visual = None;
                Vec::new()
            }
            Event::RenderFailed(message) => {
                self.fatal = Some(
                    ErrorReport::new("The interface failed to render.")
                        .with_raw_error(message)
                        .with_component_stack(self.component_stack()),
                );
                Vec::new()
            }

            Event::SearchCompleted {
                query,
                page,
                outcome,
            } => {
                self.busy = false;
                self.shown = (query.clone(), page);
                self.query = query;
                self.page = page;
                self.results = outcome.results;
                self.total_hits = outcome.total_hits;
                self.total_is_exact = outcome.total_is_exact;
                self.set_view(View::Results);
                Vec::new()
            }
            Event::SearchFailed { query, page, error } => {
                self.busy = false;
                let url = search_url(&self.base_url, &query, page, self.limit);
                self.raise(ErrorReport::from_scrape(
                    format!(
                        "Failed to fetch search results for \"{query}\". The website might be \
                         temporarily unavailable or has changed its structure."
                    ),
                    &error,
                    &url,
                ));
                self.return_to_results();
                Vec::new()
            }
            Event::ArticleLoaded(article) => {
                self.busy = false;
                self.query = article.title.clone();
                self.article = Some(article);
                self.set_view(View::Article);
                Vec::new()
            }
            Event::ArticleFailed { title, error } => {
                self.busy = false;
                let url = article_url(&self.base_url, &title);
                self.raise(ErrorReport::from_scrape(
                    format!(
                        "Failed to load the article \"{title}\". It might not exist or there \
                         was a network issue."
                    ),
                    &error,
                    &url,
                ));
                self.return_to_results();
                Vec::new()
            }
            Event::MindMapReady { topic, map } => {
                self.busy = false;
                self.mind_map = Some((topic, map));
                self.set_view(View::MindMap);
                Vec::new()
            }
            Event::MindMapFailed { topic, error } => {
                self.busy = false;
                self.raise(
                    ErrorReport::new(format!(
                        "Failed to generate the mind map for \"{topic}\" using the AI service."
                    ))
                    .with_raw_error(error.to_string()),
                );
                self.set_view(self.view_before_explore);
                Vec::new()
            }
            Event::ExportFinished(path) => {
                self.notices
                    .push(format!("Saved EPUB to {}", path.display()));
                Vec::new()
            }
            Event::ExportFailed(message) => {
                self.raise(
                    ErrorReport::new("EPUB generation failed. Please try again.")
                        .with_raw_error(message),
                );
                Vec::new()
            }
            Event::AnalysisReady { target, text } => {
                self.apply_analysis(target, text);
                Vec::new()
            }
            Event::AnalysisFailed { target, error } => {
                self.apply_analysis(
                    target,
                    format!("An error occurred while trying to analyze the report: {error}"),
                );
                Vec::new()
            }
        }
    }

    fn submit_search(&mut self, query: &str, page: usize) -> Vec<Effect> {
        let query = query.trim();
        if query.is_empty() || self.reject_busy("search") {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if record_search(&mut self.history, query) {
            effects.push(Effect::PersistHistory(self.history.clone()));
        }
        self.start_search(query.to_string(), page.max(1));
        effects.push(Effect::Search {
            query: self.query.clone(),
            page: self.page,
            limit: self.limit,
        });
        effects
    }

    fn change_page(&mut self, page: usize) -> Vec<Effect> {
        let pages = self.total_pages();
        if self.query.is_empty() || page == 0 || page == self.page || (pages > 0 && page > pages)
        {
            return Vec::new();
        }
        if self.reject_busy("page change") {
            return Vec::new();
        }
        self.start_search(self.query.clone(), page);
        vec![Effect::Search {
            query: self.query.clone(),
            page,
            limit: self.limit,
        }]
    }

    fn start_search(&mut self, query: String, page: usize) {
        info!(query = %query, page, "search submitted");
        self.busy = true;
        self.error = None;
        self.query = query;
        self.page = page;
        self.set_view(View::Searching);
    }

    fn open_article(&mut self, title: &str) -> Vec<Effect> {
        let title = title.trim();
        if title.is_empty() || self.reject_busy("article") {
            return Vec::new();
        }
        self.busy = true;
        self.error = None;
        self.query = title.to_string();
        self.set_view(View::Searching);
        vec![Effect::FetchArticle {
            title: title.to_string(),
        }]
    }

    fn explore(&mut self, topic: &str) -> Vec<Effect> {
        let topic = topic.trim();
        if topic.is_empty() || self.reject_busy("explore") {
            return Vec::new();
        }
        self.busy = true;
        self.error = None;
        self.view_before_explore = self.view;
        self.set_view(View::Searching);
        vec![Effect::GenerateMindMap {
            topic: topic.to_string(),
        }]
    }

    fn toggle_bookmark(&mut self) -> Vec<Effect> {
        let Some(article) = &self.article else {
            return Vec::new();
        };
        let entry = article.to_saved();
        let added = toggle_saved(&mut self.saved, &entry);
        self.notices.push(if added {
            format!("Saved \"{}\"", entry.query)
        } else {
            format!("Removed \"{}\" from saved articles", entry.query)
        });
        vec![Effect::PersistSaved(self.saved.clone())]
    }

    fn back(&mut self) {
        self.error = None;
        match self.view {
            View::Article => {
                self.article = None;
                self.return_to_results();
            }
            View::Results | View::Saved | View::MindMap => {
                self.clear_search();
                self.set_view(View::Welcome);
            }
            _ => self.set_view(View::Welcome),
        }
    }

    fn analyze_error(&mut self) -> Vec<Effect> {
        match &self.error {
            Some(report) if report.analysis.is_none() && !self.analysis_pending => {
                self.analysis_pending = true;
                vec![Effect::AnalyzeError(Box::new(report.clone()))]
            }
            _ => Vec::new(),
        }
    }

    fn report_visual_issue(&mut self, description: &str) -> Vec<Effect> {
        let description = description.trim();
        let Some(article) = &self.article else {
            return Vec::new();
        };
        if description.is_empty() || self.visual.as_ref().is_some_and(|v| v.pending) {
            return Vec::new();
        }
        self.visual = Some(VisualReport {
            description: description.to_string(),
            analysis: None,
            pending: true,
        });
        vec![Effect::AnalyzeVisualIssue {
            title: article.title.clone(),
            html: article.html.clone(),
            description: description.to_string(),
        }]
    }

    fn apply_analysis(&mut self, target: AnalysisTarget, text: String) {
        match target {
            AnalysisTarget::ErrorReport => {
                self.analysis_pending = false;
                if let Some(report) = self.error.as_mut() {
                    report.analysis = Some(text);
                }
            }
            AnalysisTarget::VisualIssue => {
                if let Some(visual) = self.visual.as_mut() {
                    visual.pending = false;
                    visual.analysis = Some(text);
                }
            }
        }
    }

    fn raise(&mut self, report: ErrorReport) {
        info!(message = %report.message, "error surfaced");
        self.analysis_pending = false;
        self.error = Some(report);
    }

    /// Shows the current results with the query and page they belong to,
    /// or `Welcome` when there are none.
    fn return_to_results(&mut self) {
        if self.results.is_empty() {
            self.set_view(View::Welcome);
        } else {
            (self.query, self.page) = self.shown.clone();
            self.set_view(View::Results);
        }
    }

    fn clear_search(&mut self) {
        self.query.clear();
        self.page = 1;
        self.shown = (String::new(), 1);
        self.results.clear();
        self.total_hits = 0;
        self.total_is_exact = true;
    }

    fn reject_busy(&self, action: &str) -> bool {
        if self.busy {
            debug!(action, "ignored while a request is outstanding");
        }
        self.busy
    }

    fn set_view(&mut self, view: View) {
        if self.view != view {
            debug!(from = self.view.title(), to = view.title(), "view transition");
            self.view = view;
            if self.trace.len() == TRACE_LIMIT {
                self.trace.remove(0);
            }
            self.trace.push(view);
        }
    }

    fn component_stack(&self) -> String {
        let trail = self
            .trace
            .iter()
            .map(|view| view.title())
            .collect::<Vec<_>>()
            .join(" > ");
        format!("view: {}\ntrace: {trail}", self.view.title())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://grokipedia.com";

    fn controller() -> Controller {
        Controller::new(BASE, 10, Vec::new(), Vec::new())
    }

    fn page_of(titles: &[&str], total_hits: usize) -> SearchPage {
        SearchPage {
            results: titles
                .iter()
                .map(|title| SearchResult {
                    title: title.to_string(),
                    snippet: String::new(),
                })
                .collect(),
            total_hits,
            total_is_exact: true,
        }
    }

    fn article(title: &str) -> ArticleContent {
        ArticleContent::from_markup(title, format!("<p>{title} body</p>"))
    }

    fn mind_map() -> MindMap {
        MindMap {
            foundational: vec!["a".into(), "b".into(), "c".into()],
            deeper_dive: vec!["d".into(), "e".into(), "f".into()],
            related_branches: vec!["g".into(), "h".into(), "i".into()],
        }
    }

    fn search_to_results(c: &mut Controller, query: &str) {
        c.handle(Event::SubmitSearch {
            query: query.to_string(),
            page: 1,
        });
        c.handle(Event::SearchCompleted {
            query: query.to_string(),
            page: 1,
            outcome: page_of(&["Mars", "Phobos"], 25),
        });
    }

    #[test]
    fn search_flow_passes_through_searching() {
        let mut c = controller();
        let effects = c.handle(Event::SubmitSearch {
            query: "  Mars ".to_string(),
            page: 1,
        });
        assert_eq!(
            effects,
            vec![
                Effect::PersistHistory(vec!["Mars".to_string()]),
                Effect::Search {
                    query: "Mars".to_string(),
                    page: 1,
                    limit: 10,
                },
            ]
        );
        assert!(c.busy());
        c.handle(Event::SearchCompleted {
            query: "Mars".to_string(),
            page: 1,
            outcome: page_of(&["Mars"], 1),
        });
        assert_eq!(
            c.view_trace(),
            &[View::Welcome, View::Searching, View::Results]
        );
        assert!(!c.busy());
    }

    #[test]
    fn busy_flag_rejects_network_commands() {
        let mut c = controller();
        c.handle(Event::SubmitSearch {
            query: "Mars".to_string(),
            page: 1,
        });
        assert!(c.handle(Event::OpenArticle("Phobos".to_string())).is_empty());
        assert!(c.handle(Event::Explore("Phobos".to_string())).is_empty());
        assert!(
            c.handle(Event::SubmitSearch {
                query: "Venus".to_string(),
                page: 1,
            })
            .is_empty()
        );
        assert_eq!(c.history(), &["Mars".to_string()]);
    }

    #[test]
    fn blank_query_is_ignored() {
        let mut c = controller();
        assert!(
            c.handle(Event::SubmitSearch {
                query: "   ".to_string(),
                page: 1,
            })
            .is_empty()
        );
        assert_eq!(c.view(), View::Welcome);
    }

    #[test]
    fn search_failure_without_results_returns_to_welcome_with_report() {
        let mut c = controller();
        c.handle(Event::SubmitSearch {
            query: "Mars".to_string(),
            page: 1,
        });
        c.handle(Event::SearchFailed {
            query: "Mars".to_string(),
            page: 1,
            error: ScrapeError::not_found("search results", ".mw-search-results-container", "<p/>"),
        });
        assert_eq!(c.view(), View::Welcome);
        let report = c.error().unwrap();
        assert_eq!(report.scraping_stage.as_deref(), Some("search results"));
        assert_eq!(
            report.target_url.as_deref(),
            Some("https://grokipedia.com/w/index.php?search=Mars&limit=10&offset=0")
        );
    }

    #[test]
    fn article_failure_with_results_returns_to_results() {
        let mut c = controller();
        search_to_results(&mut c, "Mars");
        c.handle(Event::OpenArticle("Phobos".to_string()));
        assert_eq!(c.view(), View::Searching);
        c.handle(Event::ArticleFailed {
            title: "Phobos".to_string(),
            error: ScrapeError::network("https://grokipedia.com/page/Phobos", "timeout"),
        });
        assert_eq!(c.view(), View::Results);
        assert_eq!(c.results().len(), 2);
        assert!(c.error().is_some());
    }

    #[test]
    fn mind_map_failure_returns_to_previous_view() {
        let mut c = controller();
        search_to_results(&mut c, "Mars");
        c.handle(Event::OpenArticle("Mars".to_string()));
        c.handle(Event::ArticleLoaded(article("Mars")));
        c.handle(Event::Explore("Mars".to_string()));
        c.handle(Event::MindMapFailed {
            topic: "Mars".to_string(),
            error: AiError::Generation("bad json".to_string()),
        });
        assert_eq!(c.view(), View::Article);
        assert!(c.error().unwrap().raw_error.as_deref().unwrap().contains("bad json"));

        c.handle(Event::Explore("Mars".to_string()));
        c.handle(Event::MindMapReady {
            topic: "Mars".to_string(),
            map: mind_map(),
        });
        assert_eq!(c.view(), View::MindMap);
        assert_eq!(c.mind_map().unwrap().0, "Mars");
    }

    #[test]
    fn stale_completion_is_still_applied() {
        let mut c = controller();
        c.handle(Event::SubmitSearch {
            query: "Mars".to_string(),
            page: 1,
        });
        c.handle(Event::Home);
        c.handle(Event::SearchCompleted {
            query: "Mars".to_string(),
            page: 1,
            outcome: page_of(&["Mars"], 1),
        });
        assert_eq!(c.view(), View::Results);
        assert!(!c.busy());
    }

    #[test]
    fn back_navigation_rules() {
        let mut c = controller();
        search_to_results(&mut c, "Mars");
        c.handle(Event::OpenArticle("Mars".to_string()));
        c.handle(Event::ArticleLoaded(article("Mars")));

        c.handle(Event::Back);
        assert_eq!(c.view(), View::Results);
        assert!(c.article().is_none());

        c.handle(Event::Back);
        assert_eq!(c.view(), View::Welcome);
        assert!(c.query().is_empty());
        assert!(c.results().is_empty());

        c.handle(Event::OpenSaved);
        c.handle(Event::Back);
        assert_eq!(c.view(), View::Welcome);
    }

    #[test]
    fn back_from_article_without_results_goes_home_and_clears_error() {
        let mut c = controller();
        c.handle(Event::OpenArticle("Mars".to_string()));
        c.handle(Event::ArticleLoaded(article("Mars")));
        c.handle(Event::ExportFailed("disk full".to_string()));
        assert!(c.error().is_some());
        c.handle(Event::Back);
        assert_eq!(c.view(), View::Welcome);
        assert!(c.error().is_none());
    }

    #[test]
    fn bookmark_toggle_persists_and_restores() {
        let mut c = Controller::new(
            BASE,
            10,
            vec![SavedArticle {
                query: "Venus".to_string(),
                content: "<p>v</p>".to_string(),
            }],
            Vec::new(),
        );
        c.handle(Event::OpenArticle("Mars".to_string()));
        c.handle(Event::ArticleLoaded(article("Mars")));

        let effects = c.handle(Event::ToggleBookmark);
        assert!(c.article_is_saved());
        assert!(matches!(&effects[..], [Effect::PersistSaved(list)] if list.len() == 2));

        c.handle(Event::ToggleBookmark);
        assert!(!c.article_is_saved());
        assert_eq!(c.saved()[0].query, "Venus");
        assert_eq!(c.saved().len(), 1);
    }

    #[test]
    fn saved_articles_open_without_network() {
        let mut c = Controller::new(
            BASE,
            10,
            vec![SavedArticle {
                query: "Venus".to_string(),
                content: r#"<p>v</p><div class="infobox">box</div>"#.to_string(),
            }],
            Vec::new(),
        );
        c.handle(Event::OpenSaved);
        assert!(c.handle(Event::ViewSaved("Venus".to_string())).is_empty());
        assert_eq!(c.view(), View::Article);
        assert_eq!(c.article().unwrap().side_blocks.len(), 1);

        let effects = c.handle(Event::RemoveSaved("Venus".to_string()));
        assert_eq!(effects, vec![Effect::PersistSaved(Vec::new())]);
    }

    #[test]
    fn pagination_is_bounded_by_total_pages() {
        let mut c = controller();
        search_to_results(&mut c, "Mars");
        assert_eq!(c.total_pages(), 3);
        assert!(c.handle(Event::ChangePage(4)).is_empty());
        assert!(c.handle(Event::ChangePage(0)).is_empty());
        assert_eq!(
            c.handle(Event::ChangePage(3)),
            vec![Effect::Search {
                query: "Mars".to_string(),
                page: 3,
                limit: 10,
            }]
        );
    }

    #[test]
    fn error_analysis_attaches_to_overlay() {
        let mut c = controller();
        c.handle(Event::ExportFailed("disk full".to_string()));
        let effects = c.handle(Event::AnalyzeError);
        assert!(matches!(&effects[..], [Effect::AnalyzeError(_)]));
        assert!(c.analysis_pending());
        assert!(c.handle(Event::AnalyzeError).is_empty());

        c.handle(Event::AnalysisReady {
            target: AnalysisTarget::ErrorReport,
            text: "## Cause".to_string(),
        });
        assert!(!c.analysis_pending());
        assert_eq!(c.error().unwrap().analysis.as_deref(), Some("## Cause"));
    }

    #[test]
    fn visual_issue_requires_article_and_description() {
        let mut c = controller();
        assert!(c.handle(Event::ReportVisualIssue("broken".to_string())).is_empty());

        c.handle(Event::OpenArticle("Mars".to_string()));
        c.handle(Event::ArticleLoaded(article("Mars")));
        assert!(c.handle(Event::ReportVisualIssue("  ".to_string())).is_empty());

        let effects = c.handle(Event::ReportVisualIssue("table overflows".to_string()));
        assert_eq!(
            effects,
            vec![Effect::AnalyzeVisualIssue {
                title: "Mars".to_string(),
                html: "<p>Mars body</p>".to_string(),
                description: "table overflows".to_string(),
            }]
        );
        c.handle(Event::AnalysisFailed {
            target: AnalysisTarget::VisualIssue,
            error: AiError::NotConfigured,
        });
        let visual = c.visual_report().unwrap();
        assert!(!visual.pending);
        assert!(visual.analysis.as_deref().unwrap().contains("not configured"));
    }

    #[test]
    fn share_and_export_target_current_article() {
        let mut c = controller();
        assert!(c.handle(Event::OpenInBrowser).is_empty());
        c.handle(Event::OpenArticle("Olympus Mons".to_string()));
        c.handle(Event::ArticleLoaded(article("Olympus Mons")));
        assert_eq!(
            c.handle(Event::OpenInBrowser),
            vec![Effect::OpenUrl(
                "https://grokipedia.com/page/Olympus_Mons".to_string()
            )]
        );
        assert!(matches!(
            &c.handle(Event::ExportBook)[..],
            [Effect::ExportBook(saved)] if saved.query == "Olympus Mons"
        ));
        c.handle(Event::ExportFinished(PathBuf::from("olympus_mons.epub")));
        assert_eq!(c.drain_notices(), vec!["Saved EPUB to olympus_mons.epub"]);
    }

    #[test]
    fn render_failure_becomes_fatal_report() {
        let mut c = controller();
        c.handle(Event::RenderFailed("index out of bounds".to_string()));
        let fatal = c.fatal().unwrap();
        assert_eq!(fatal.raw_error.as_deref(), Some("index out of bounds"));
        assert_eq!(
            fatal.component_stack.as_deref(),
            Some("view: Welcome\ntrace: Welcome")
        );
    }

    #[test]
    fn render_failure_stack_lists_recent_views() {
        let mut c = controller();
        search_to_results(&mut c, "Mars");
        c.handle(Event::RenderFailed("overflow".to_string()));
        assert_eq!(
            c.fatal().unwrap().component_stack.as_deref(),
            Some("view: Results\ntrace: Welcome > Loading > Results")
        );
    }

    #[test]
    fn view_trace_keeps_only_recent_views() {
        let mut c = controller();
        for _ in 0..TRACE_LIMIT {
            c.handle(Event::OpenSaved);
            c.handle(Event::Back);
        }
        assert_eq!(c.view_trace().len(), TRACE_LIMIT);
        assert_eq!(c.view_trace().last(), Some(&View::Welcome));
    }

    #[test]
    fn failed_page_change_restores_the_shown_page() {
        let mut c = controller();
        search_to_results(&mut c, "Mars");
        assert_eq!(c.handle(Event::ChangePage(2)).len(), 1);
        assert_eq!(c.page(), 2);
        c.handle(Event::SearchFailed {
            query: "Mars".to_string(),
            page: 2,
            error: ScrapeError::network("https://grokipedia.com/w/index.php", "timeout"),
        });
        assert_eq!(c.view(), View::Results);
        assert_eq!(c.page(), 1);
        assert!(c.error().is_some());
        assert!(matches!(
            &c.handle(Event::ChangePage(2))[..],
            [Effect::Search { page: 2, .. }]
        ));
    }

    #[test]
    fn back_from_article_paginates_the_original_query() {
        let mut c = controller();
        search_to_results(&mut c, "Mars");
        c.handle(Event::OpenArticle("Phobos".to_string()));
        c.handle(Event::ArticleLoaded(article("Phobos")));
        assert_eq!(c.query(), "Phobos");
        c.handle(Event::Back);
        assert_eq!(c.view(), View::Results);
        assert_eq!(c.query(), "Mars");
        assert!(matches!(
            &c.handle(Event::ChangePage(2))[..],
            [Effect::Search { query, page: 2, .. }] if query == "Mars"
        ));
    }

    #[test]
    fn failed_new_search_keeps_previous_query_with_its_results() {
        let mut c = controller();
        search_to_results(&mut c, "Mars");
        c.handle(Event::SubmitSearch {
            query: "Venus".to_string(),
            page: 1,
        });
        c.handle(Event::SearchFailed {
            query: "Venus".to_string(),
            page: 1,
            error: ScrapeError::network("https://grokipedia.com/w/index.php", "timeout"),
        });
        assert_eq!(c.view(), View::Results);
        assert_eq!(c.query(), "Mars");
        assert_eq!(c.results().len(), 2);
    }

    #[test]
    fn clear_history_persists_once() {
        let mut c = Controller::new(BASE, 10, Vec::new(), vec!["Mars".to_string()]);
        assert_eq!(
            c.handle(Event::ClearHistory),
            vec![Effect::PersistHistory(Vec::new())]
        );
        assert!(c.handle(Event::ClearHistory).is_empty());
    }
}
