use std::io;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;

const SNIPPET_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScrapeError {
    /// The page did not have the markup shape a selector strategy expected.
    #[error("could not find the {stage} on the page (selector `{selector}`)")]
    NotFound {
        stage: &'static str,
        selector: String,
        snippet: String,
    },
    #[error("no results")]
    NoResults,
    #[error("{message}")]
    NetworkFailure { url: String, message: String },
}

impl ScrapeError {
    pub fn not_found(stage: &'static str, selector: &str, markup: &str) -> Self {
        ScrapeError::NotFound {
            stage,
            selector: selector.to_string(),
            snippet: markup_snippet(markup),
        }
    }

    pub fn network(url: &str, message: impl Into<String>) -> Self {
        ScrapeError::NetworkFailure {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::NotFound { .. } => "scrape_structure_mismatch",
            ScrapeError::NoResults => "no_results",
            ScrapeError::NetworkFailure { .. } => "network_failure",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AiError {
    #[error("AI service is not configured (set GEMINI_API_KEY)")]
    NotConfigured,
    #[error("AI request failed: {0}")]
    Request(String),
    #[error("AI service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("AI service returned no text")]
    EmptyResponse,
    #[error("generation failed: {0}")]
    Generation(String),
}

impl AiError {
    /// Collapses any failure into the single generation-failed variant.
    pub fn into_generation(self) -> Self {
        match self {
            AiError::Generation(_) => self,
            other => AiError::Generation(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("write error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file error: {0}")]
    Io(#[from] io::Error),
    #[error("state encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("http client setup failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("interface failure: {0}")]
    Render(String),
    /// A failure already presented to the user as an [`ErrorReport`].
    #[error("{0}")]
    Reported(String),
    #[error("nothing to do: pass a QUERY, --article, --mindmap or --export-epub")]
    NoAction,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<AppError> for io::Error {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Io(err) => err,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// User-facing failure plus the context needed to diagnose it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub raw_error: Option<String>,
    pub target_url: Option<String>,
    pub scraping_stage: Option<String>,
    pub failed_selector: Option<String>,
    pub raw_html_snippet: Option<String>,
    pub component_stack: Option<String>,
    pub timestamp: String,
    pub environment: String,
    pub analysis: Option<String>,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw_error: None,
            target_url: None,
            scraping_stage: None,
            failed_selector: None,
            raw_html_snippet: None,
            component_stack: None,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            environment: environment_info(),
            analysis: None,
        }
    }

    pub fn from_scrape(message: impl Into<String>, err: &ScrapeError, target_url: &str) -> Self {
        let mut report = Self::new(message)
            .with_raw_error(err.to_string())
            .with_target_url(target_url);
        match err {
            ScrapeError::NotFound {
                stage,
                selector,
                snippet,
            } => {
                report.scraping_stage = Some((*stage).to_string());
                report.failed_selector = Some(selector.clone());
                report.raw_html_snippet = Some(snippet.clone());
            }
            ScrapeError::NetworkFailure { url, .. } => {
                report.target_url = Some(url.clone());
            }
            ScrapeError::NoResults => {}
        }
        report
    }

    pub fn with_raw_error(mut self, raw: impl Into<String>) -> Self {
        self.raw_error = Some(raw.into());
        self
    }

    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn with_component_stack(mut self, stack: impl Into<String>) -> Self {
        self.component_stack = Some(stack.into());
        self
    }

    /// Plain-text report suitable for pasting into an issue.
    pub fn to_markdown(&self) -> String {
        let na = |value: &Option<String>| value.clone().unwrap_or_else(|| "N/A".to_string());
        let snippet = self
            .raw_html_snippet
            .as_deref()
            .map(|s| s.chars().take(SNIPPET_MAX_CHARS).collect::<String>())
            .unwrap_or_else(|| "N/A".to_string());

        format!(
            "## Grokreader Error Report\n\n\
             **Message:**\n{}\n\n\
             **Raw Error:**\n{}\n\n\
             **Failed URL:** {}\n\n\
             **Scraping Trace:**\n- Stage: {}\n- Selector: `{}`\n\n\
             **Timestamp:** {}\n\
             **Environment:** {}\n\n\
             **Component Stack:**\n```\n{}\n```\n\n\
             **Raw HTML Snippet (first {} chars):**\n```html\n{}\n```\n",
            self.message,
            na(&self.raw_error),
            na(&self.target_url),
            na(&self.scraping_stage),
            na(&self.failed_selector),
            self.timestamp,
            self.environment,
            na(&self.component_stack),
            SNIPPET_MAX_CHARS,
            snippet,
        )
    }
}

pub fn environment_info() -> String {
    format!(
        "{}/{} ({} {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Bounded excerpt of offending markup; never empty.
pub fn markup_snippet(markup: &str) -> String {
    let trimmed = markup.trim();
    if trimmed.is_empty() {
        return "<empty document>".to_string();
    }
    trimmed.chars().take(SNIPPET_MAX_CHARS).collect()
}
