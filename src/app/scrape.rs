//! Search and article scraping over the encyclopedia's MediaWiki markup.
//!
//! Each page shape is recognised by a small pure strategy tried in order;
//! the first strategy that recognises the page decides the outcome.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use super::error::ScrapeError;
use super::fetch::{SiteClient, title_from_article_url};
use super::markup::{Serializer, element_text, normalize_text, select_first};
use super::types::{ArticleContent, SearchPage, SearchResult};

pub const SEARCH_RESULTS_SELECTOR: &str = ".mw-search-results-container";
pub const ARTICLE_ROOT_SELECTORS: [&str; 2] =
    ["#mw-content-text .mw-parser-output", "#mw-content-text"];

const NO_RESULTS_SELECTOR: &str = ".mw-search-nonefound";
const CONTENT_TEXT_SELECTOR: &str = "#mw-content-text";
const FIRST_HEADING_SELECTOR: &str = "h1#firstHeading";
const RESULT_ROW_SELECTOR: &str = "li.mw-search-result";
const RESULT_TITLE_SELECTOR: &str = ".mw-search-result-heading a";
const RESULT_SNIPPET_SELECTOR: &str = ".searchresult";
const RESULT_META_SELECTOR: &str = ".search-result-meta";
const RESULTS_INFO_SELECTOR: &str = ".results-info";

pub const DIRECT_MATCH_SNIPPET: &str = "Direct match for this article.";

static RESULTS_INFO_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"of ([\d,]+)").expect("results-info pattern is valid"));

#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a> {
    pub query: &'a str,
    pub offset: usize,
    pub limit: usize,
}

type SearchStrategy = fn(&Html, &SearchContext) -> Option<SearchPage>;

const SEARCH_STRATEGIES: [(&str, SearchStrategy); 3] = [
    ("results list", results_list),
    ("no results marker", no_results_marker),
    ("direct match", direct_match),
];

impl SiteClient {
    pub async fn search(
        &self,
        query: &str,
        page: usize,
        limit: usize,
    ) -> Result<SearchPage, ScrapeError> {
        let limit = limit.max(1);
        let page = page.max(1);
        let url = self.search_url(query, page, limit);
        let html = self.fetch_html(&url).await?;
        let ctx = SearchContext {
            query,
            offset: (page - 1) * limit,
            limit,
        };
        let outcome = parse_search_page(&html, &ctx)?;
        info!(
            query,
            page,
            results = outcome.results.len(),
            total_hits = outcome.total_hits,
            exact = outcome.total_is_exact,
            "search completed"
        );
        Ok(outcome)
    }

    pub async fn fetch_article(&self, title: &str) -> Result<ArticleContent, ScrapeError> {
        let url = self.article_url(title);
        let html = self.fetch_html(&url).await?;
        let markup = extract_article_markup(&html, self.base_url())?;
        let article = ArticleContent::from_markup(title.trim(), markup);
        info!(
            title,
            bytes = article.html.len(),
            side_blocks = article.side_blocks.len(),
            "article loaded"
        );
        Ok(article)
    }
}

pub fn parse_search_page(html: &str, ctx: &SearchContext) -> Result<SearchPage, ScrapeError> {
    let doc = Html::parse_document(html);
    for (name, strategy) in SEARCH_STRATEGIES {
        if let Some(page) = strategy(&doc, ctx) {
            debug!(strategy = name, "search page recognised");
            return Ok(page);
        }
    }
    Err(ScrapeError::not_found(
        "search results",
        SEARCH_RESULTS_SELECTOR,
        html,
    ))
}

fn results_list(doc: &Html, ctx: &SearchContext) -> Option<SearchPage> {
    let container = select_first(doc, SEARCH_RESULTS_SELECTOR)?;
    let results = parse_result_rows(container);
    // An info line without a readable count falls back to the rows shown.
    let (total_hits, total_is_exact) = match select_first(doc, RESULTS_INFO_SELECTOR) {
        Some(info) => match results_info_total(info) {
            Some(total) => (total, true),
            None => (results.len(), false),
        },
        None => estimate_total_hits(ctx.offset, results.len(), ctx.limit),
    };
    Some(SearchPage {
        results,
        total_hits,
        total_is_exact,
    })
}

fn no_results_marker(doc: &Html, _ctx: &SearchContext) -> Option<SearchPage> {
    select_first(doc, NO_RESULTS_SELECTOR).map(|_| SearchPage::empty())
}

fn direct_match(doc: &Html, ctx: &SearchContext) -> Option<SearchPage> {
    select_first(doc, CONTENT_TEXT_SELECTOR)?;
    let title = select_first(doc, FIRST_HEADING_SELECTOR)
        .map(element_text)
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| ctx.query.trim().to_string());
    Some(SearchPage {
        results: vec![SearchResult {
            title,
            snippet: DIRECT_MATCH_SNIPPET.to_string(),
        }],
        total_hits: 1,
        total_is_exact: true,
    })
}

fn parse_result_rows(container: ElementRef) -> Vec<SearchResult> {
    let (Ok(row_sel), Ok(title_sel), Ok(snippet_sel), Ok(meta_sel)) = (
        Selector::parse(RESULT_ROW_SELECTOR),
        Selector::parse(RESULT_TITLE_SELECTOR),
        Selector::parse(RESULT_SNIPPET_SELECTOR),
        Selector::parse(RESULT_META_SELECTOR),
    ) else {
        return Vec::new();
    };

    container
        .select(&row_sel)
        .filter_map(|row| {
            let title = row.select(&title_sel).next()?;
            let snippet = row.select(&snippet_sel).next()?;
            let mut snippet_text = snippet.text().collect::<String>();
            if let Some(meta) = snippet.select(&meta_sel).next() {
                let meta_text = meta.text().collect::<String>();
                if !meta_text.is_empty() {
                    snippet_text = snippet_text.replacen(&meta_text, "", 1);
                }
            }
            Some(SearchResult {
                title: element_text(title),
                snippet: normalize_text(&snippet_text),
            })
        })
        .collect()
}

fn results_info_total(info: ElementRef) -> Option<usize> {
    let text = info.text().collect::<String>();
    let digits = RESULTS_INFO_TOTAL.captures(&text)?.get(1)?.as_str().replace(',', "");
    digits.parse().ok()
}

/// Approximate total when the page renders no explicit count.
///
/// A full page counts one extra hit so pagination offers a next page; the
/// real total can be larger. Returns `(total, is_exact)`.
pub fn estimate_total_hits(offset: usize, count: usize, limit: usize) -> (usize, bool) {
    if count == 0 {
        return (0, true);
    }
    let extra = usize::from(count == limit);
    (offset + count + extra, false)
}

/// Locates the content root and returns its inner markup with root-relative
/// link and image references made absolute.
pub fn extract_article_markup(html: &str, base_url: &str) -> Result<String, ScrapeError> {
    let doc = Html::parse_document(html);
    for selector in ARTICLE_ROOT_SELECTORS {
        if let Some(root) = select_first(&doc, selector) {
            debug!(selector, "article root located");
            return Ok(Serializer::new().absolute_urls(base_url).inner(root));
        }
    }
    Err(ScrapeError::not_found(
        "article content",
        &ARTICLE_ROOT_SELECTORS.join(", "),
        html,
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleLink {
    pub label: String,
    pub title: String,
}

/// Links in article markup that point at other articles on the same site.
pub fn article_links(html: &str, base_url: &str) -> Vec<ArticleLink> {
    let fragment = Html::parse_fragment(html);
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut seen = std::collections::HashSet::new();
    fragment
        .select(&anchor)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let title = title_from_article_url(base_url, href)?;
            if !seen.insert(title.to_lowercase()) {
                return None;
            }
            let label = element_text(a);
            Some(ArticleLink {
                label: if label.is_empty() { title.clone() } else { label },
                title,
            })
        })
        .collect()
}
