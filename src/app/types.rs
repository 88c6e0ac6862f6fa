use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use super::assistant::{
    AssistantConfig, DEFAULT_ANALYSIS_MODEL, DEFAULT_GEMINI_BASE_URL, DEFAULT_MIND_MAP_MODEL,
};
use super::fetch::{DEFAULT_BASE_URL, DEFAULT_PROXY_PREFIX, SiteConfig};
use super::layout::split_article;

pub const ITEMS_PER_PAGE: usize = 10;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "grokreader",
    version,
    about = "Terminal reader mode for Grokipedia with AI mind maps and EPUB export"
)]
pub struct Cli {
    /// Search query to run on startup.
    #[arg(value_name = "QUERY")]
    pub query: Option<String>,

    /// Open an article by title instead of searching.
    #[arg(long, value_name = "TITLE", conflicts_with = "query")]
    pub article: Option<String>,

    #[arg(long, value_name = "N", default_value_t = 1)]
    pub page: usize,

    #[arg(long, value_name = "N", default_value_t = ITEMS_PER_PAGE)]
    pub limit: usize,

    /// Generate a mind map for TOPIC.
    #[arg(long, value_name = "TOPIC")]
    pub mindmap: Option<String>,

    /// Fetch TITLE and write it as an EPUB into --out-dir.
    #[arg(long, value_name = "TITLE")]
    pub export_epub: Option<String>,

    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Describe a rendering defect of --article and ask the AI to explain it.
    #[arg(long, value_name = "DESCRIPTION", requires = "article")]
    pub explain_visual: Option<String>,

    #[arg(long, default_value_t = false)]
    pub no_tui: bool,

    #[arg(
        long,
        value_name = "URL",
        env = "GROKREADER_BASE_URL",
        default_value = DEFAULT_BASE_URL
    )]
    pub base_url: String,

    #[arg(
        long,
        value_name = "PREFIX",
        env = "GROKREADER_PROXY",
        default_value = DEFAULT_PROXY_PREFIX
    )]
    pub proxy: String,

    #[arg(long, value_name = "UA")]
    pub user_agent: Option<String>,

    #[arg(long, value_name = "MS", default_value_t = 20_000)]
    pub timeout_ms: u64,

    #[arg(long, value_name = "KEY", env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(
        long,
        value_name = "URL",
        env = "GROKREADER_GEMINI_BASE_URL",
        default_value = DEFAULT_GEMINI_BASE_URL
    )]
    pub gemini_base_url: String,

    #[arg(long, value_name = "MODEL", default_value = DEFAULT_MIND_MAP_MODEL)]
    pub mindmap_model: String,

    #[arg(long, value_name = "MODEL", default_value = DEFAULT_ANALYSIS_MODEL)]
    pub analysis_model: String,

    #[arg(long, value_name = "DIR", env = "GROKREADER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub site: SiteConfig,
    pub assistant: AssistantConfig,
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
    pub limit: usize,
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn settings(&self) -> Settings {
        let timeout = Duration::from_millis(self.timeout_ms.clamp(200, 120_000));
        let user_agent = self.user_agent.clone().unwrap_or_else(|| {
            format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        });
        let data_dir = self
            .data_dir
            .clone()
            .unwrap_or_else(default_data_dir);

        Settings {
            site: SiteConfig {
                base_url: self.base_url.trim_end_matches('/').to_string(),
                proxy_prefix: self.proxy.clone(),
                user_agent,
                timeout,
            },
            assistant: AssistantConfig {
                api_key: self
                    .gemini_api_key
                    .as_deref()
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(ToString::to_string),
                base_url: self.gemini_base_url.trim_end_matches('/').to_string(),
                mind_map_model: self.mindmap_model.clone(),
                analysis_model: self.analysis_model.clone(),
                timeout: timeout.max(Duration::from_secs(60)),
            },
            data_dir,
            out_dir: self.out_dir.clone(),
            limit: self.limit.clamp(1, 100),
            log_file: self.log_file.clone(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("grokreader")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    pub total_hits: usize,
    /// False when `total_hits` is the offset + count estimate.
    pub total_is_exact: bool,
}

impl SearchPage {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            total_hits: 0,
            total_is_exact: true,
        }
    }
}

/// A fetched article: the rewritten content-root markup plus its two-column split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleContent {
    pub title: String,
    pub html: String,
    pub main_html: String,
    pub side_blocks: Vec<String>,
}

impl ArticleContent {
    pub fn from_markup(title: impl Into<String>, html: String) -> Self {
        let split = split_article(&html);
        Self {
            title: title.into(),
            html,
            main_html: split.main_html,
            side_blocks: split.side_blocks,
        }
    }

    pub fn to_saved(&self) -> SavedArticle {
        SavedArticle {
            query: self.title.clone(),
            content: self.html.clone(),
        }
    }
}

impl From<&SavedArticle> for ArticleContent {
    fn from(saved: &SavedArticle) -> Self {
        ArticleContent::from_markup(saved.query.clone(), saved.content.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedArticle {
    pub query: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindMap {
    pub foundational: Vec<String>,
    pub deeper_dive: Vec<String>,
    pub related_branches: Vec<String>,
}

impl MindMap {
    pub fn categories(&self) -> [(&'static str, &[String]); 3] {
        [
            ("Foundational", self.foundational.as_slice()),
            ("Deeper Dive", self.deeper_dive.as_slice()),
            ("Related Branches", self.related_branches.as_slice()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Welcome,
    Searching,
    Results,
    Article,
    Saved,
    MindMap,
}

impl View {
    pub fn title(self) -> &'static str {
        match self {
            View::Welcome => "Welcome",
            View::Searching => "Loading",
            View::Results => "Results",
            View::Article => "Article",
            View::Saved => "Saved",
            View::MindMap => "Mind Map",
        }
    }

    pub fn shows_back(self) -> bool {
        matches!(
            self,
            View::Article | View::Results | View::Saved | View::MindMap
        )
    }
}
