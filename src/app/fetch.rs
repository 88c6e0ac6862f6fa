use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tracing::{debug, warn};
use url::Url;

use super::error::ScrapeError;

pub const DEFAULT_BASE_URL: &str = "https://grokipedia.com";
pub const DEFAULT_PROXY_PREFIX: &str = "https://api.allorigins.win/raw?url=";

const ERROR_BODY_MAX_CHARS: usize = 1000;

// Same unreserved set as JavaScript's encodeURIComponent.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub base_url: String,
    pub proxy_prefix: String,
    pub user_agent: String,
    pub timeout: Duration,
}

/// HTTP access to the encyclopedia, always routed through the relay proxy.
#[derive(Debug, Clone)]
pub struct SiteClient {
    http: reqwest::Client,
    config: SiteConfig,
}

impl SiteClient {
    pub fn new(config: SiteConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn search_url(&self, query: &str, page: usize, limit: usize) -> String {
        search_url(&self.config.base_url, query, page, limit)
    }

    pub fn article_url(&self, title: &str) -> String {
        article_url(&self.config.base_url, title)
    }

    pub fn proxied(&self, url: &str) -> String {
        format!("{}{}", self.config.proxy_prefix, encode_component(url))
    }

    /// GETs `url` through the proxy and returns the body text.
    pub async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError> {
        let proxied = self.proxied(url);
        debug!(target_url = url, "fetching page");

        let response = self.http.get(&proxied).send().await.map_err(|err| {
            warn!(target_url = url, error = %err, "request failed");
            ScrapeError::network(url, format!("Failed to fetch from URL: {url}. Reason: {err}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target_url = url, status = status.as_u16(), "non-success status");
            return Err(ScrapeError::network(
                url,
                format!(
                    "Request failed with status {} {}. Body: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or(""),
                    body.chars().take(ERROR_BODY_MAX_CHARS).collect::<String>()
                ),
            ));
        }

        response.text().await.map_err(|err| {
            ScrapeError::network(url, format!("Failed to read body from URL: {url}. Reason: {err}"))
        })
    }
}

pub fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, URI_COMPONENT).to_string()
}

pub fn search_url(base_url: &str, query: &str, page: usize, limit: usize) -> String {
    let limit = limit.max(1);
    let offset = page.max(1).saturating_sub(1) * limit;
    format!(
        "{base_url}/w/index.php?search={}&limit={limit}&offset={offset}",
        encode_component(query)
    )
}

pub fn article_url(base_url: &str, title: &str) -> String {
    format!(
        "{base_url}/page/{}",
        encode_component(&title.trim().replace(' ', "_"))
    )
}

/// Maps a `/page/<title>` link on the site back to an article title.
/// Relative links resolve against `base_url`.
pub fn title_from_article_url(base_url: &str, url: &str) -> Option<String> {
    let base = Url::parse(base_url).ok()?;
    let link = base.join(url).ok()?;
    if link.origin() != base.origin() {
        return None;
    }
    let mut segments = link.path_segments()?;
    if segments.next() != Some("page") {
        return None;
    }
    let path = segments.collect::<Vec<_>>().join("/");
    if path.is_empty() {
        return None;
    }
    let decoded = percent_decode_str(&path).decode_utf8().ok()?;
    let title = decoded.replace('_', " ").trim().to_string();
    if title.is_empty() { None } else { Some(title) }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::net::SocketAddr;

    pub(crate) async fn spawn_proxy(pages: HashMap<String, (StatusCode, String)>) -> String {
        let app = Router::new().route(
            "/raw",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let pages = pages.clone();
                async move {
                    let target = params.get("url").cloned().unwrap_or_default();
                    match pages.get(&target) {
                        Some((status, body)) => (*status, body.clone()),
                        None => (StatusCode::NOT_FOUND, format!("no fixture for {target}")),
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/raw?url=")
    }

    pub(crate) fn client_for(proxy_prefix: String) -> SiteClient {
        SiteClient::new(SiteConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            proxy_prefix,
            user_agent: "grokreader-test".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn builds_search_and_article_urls() {
        assert_eq!(
            search_url(DEFAULT_BASE_URL, "red planet & moons", 3, 10),
            "https://grokipedia.com/w/index.php?search=red%20planet%20%26%20moons&limit=10&offset=20"
        );
        assert_eq!(
            article_url(DEFAULT_BASE_URL, "Olympus Mons"),
            "https://grokipedia.com/page/Olympus_Mons"
        );
        assert_eq!(
            article_url(DEFAULT_BASE_URL, "C (programming language)"),
            "https://grokipedia.com/page/C_(programming_language)"
        );
    }

    #[test]
    fn page_zero_is_treated_as_first_page() {
        assert!(search_url(DEFAULT_BASE_URL, "x", 0, 10).ends_with("offset=0"));
    }

    #[test]
    fn article_titles_round_trip_through_links() {
        let url = article_url(DEFAULT_BASE_URL, "Café Terrace");
        assert_eq!(
            title_from_article_url(DEFAULT_BASE_URL, &url).as_deref(),
            Some("Café Terrace")
        );
        assert_eq!(
            title_from_article_url(DEFAULT_BASE_URL, "https://grokipedia.com/page/Mars#Moons")
                .as_deref(),
            Some("Mars")
        );
        assert_eq!(
            title_from_article_url(DEFAULT_BASE_URL, "https://example.com/page/Mars"),
            None
        );
        assert_eq!(
            title_from_article_url(DEFAULT_BASE_URL, "/page/Olympus_Mons?action=view").as_deref(),
            Some("Olympus Mons")
        );
        assert_eq!(
            title_from_article_url(DEFAULT_BASE_URL, "https://grokipedia.com/w/index.php"),
            None
        );
        assert_eq!(title_from_article_url(DEFAULT_BASE_URL, "#cite"), None);
    }

    #[tokio::test]
    async fn proxied_fetch_returns_body() {
        let target = article_url(DEFAULT_BASE_URL, "Mars");
        let mut pages = HashMap::new();
        pages.insert(target.clone(), (StatusCode::OK, "<html>ok</html>".to_string()));
        let client = client_for(spawn_proxy(pages).await);

        let body = client.fetch_html(&target).await.unwrap();
        assert_eq!(body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn http_failure_is_a_network_error_with_body() {
        let target = article_url(DEFAULT_BASE_URL, "Mars");
        let mut pages = HashMap::new();
        pages.insert(
            target.clone(),
            (StatusCode::BAD_GATEWAY, "upstream down".to_string()),
        );
        let client = client_for(spawn_proxy(pages).await);

        match client.fetch_html(&target).await {
            Err(ScrapeError::NetworkFailure { url, message }) => {
                assert_eq!(url, target);
                assert!(message.contains("502"));
                assert!(message.contains("upstream down"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
