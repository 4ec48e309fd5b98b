//! HTTP page fetcher
//!
//! Fetches and crudely extracts web pages for the `web` intent: rotated
//! browser User-Agent strings, jittered exponential backoff across up to
//! three attempts, and an anti-scrape heuristic (tiny body, or a blocklist
//! phrase in the title or leading content).

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

use chat_agent_config::FetchSettings;
use chat_agent_core::{FetchError, PageContent, PageFetcher};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
];

/// Phrases that mark an anti-scrape interstitial
const ANTI_SCRAPE_MARKERS: &[&str] = &[
    "安全验证", "验证", "人机验证", "captcha", "robot", "bot", "请稍后再试", "访问过于频繁",
];

/// A body shorter than this is treated as blocked
const MIN_CONTENT_CHARS: usize = 100;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));
static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?si)<script\b.*?</script>|<style\b.*?</style>|<nav\b.*?</nav>|<footer\b.*?</footer>|<header\b.*?</header>|<aside\b.*?</aside>",
    )
    .expect("valid regex")
});
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)<title[^>]*>(.*?)</title>").expect("valid regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Fetcher configuration
#[derive(Debug, Clone)]
pub struct PageFetcherConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_content_chars: usize,
}

impl Default for PageFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 3,
            max_content_chars: 4000,
        }
    }
}

impl From<&FetchSettings> for PageFetcherConfig {
    fn from(settings: &FetchSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_seconds),
            max_retries: settings.max_retries,
            max_content_chars: settings.max_content_length,
        }
    }
}

/// reqwest-based page fetcher
pub struct HttpPageFetcher {
    client: reqwest::Client,
    config: PageFetcherConfig,
}

impl HttpPageFetcher {
    pub fn new(config: PageFetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn attempt(&self, url: &str) -> Result<PageContent, FetchError> {
        let user_agent = USER_AGENTS[rand::thread_rng().gen_range(0..USER_AGENTS.len())];

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Http(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Http(format!("status {}", response.status())));
        }

        let html = response.text().await.map_err(|e| FetchError::Http(e.to_string()))?;
        let (title, content) = extract_page(&html, self.config.max_content_chars);

        if is_anti_scrape(&title, &content) {
            return Err(FetchError::AntiScrape { title });
        }
        if content.is_empty() {
            return Err(FetchError::Http("no extractable content".to_string()));
        }

        Ok(PageContent { url: url.to_string(), title, content })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<PageContent, FetchError> {
        let parsed = url::parse_scheme(url)?;
        if parsed != "http" && parsed != "https" {
            return Err(FetchError::InvalidUrl(format!("unsupported scheme: {parsed}")));
        }

        let mut last_error = FetchError::Http("no attempts made".to_string());
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                let base = 1u64 << attempt;
                let jitter = rand::thread_rng().gen_range(0..500);
                let backoff = Duration::from_millis(base * 1000 + jitter);
                tracing::info!(url, attempt, ?backoff, "retrying page fetch");
                tokio::time::sleep(backoff).await;
            }

            match self.attempt(url).await {
                Ok(page) => {
                    tracing::info!(url, title = %page.title, chars = page.content.chars().count(),
                        "page fetched");
                    return Ok(page);
                },
                Err(e) => {
                    tracing::warn!(url, attempt, error = %e, "page fetch attempt failed");
                    last_error = e;
                },
            }
        }

        Err(last_error)
    }
}

mod url {
    use chat_agent_core::FetchError;

    pub fn parse_scheme(url: &str) -> Result<String, FetchError> {
        url.split_once("://")
            .map(|(scheme, rest)| (scheme.to_lowercase(), rest))
            .filter(|(_, rest)| !rest.is_empty())
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))
    }
}

/// Strip markup and pull out the title and body text
fn extract_page(html: &str, max_chars: usize) -> (String, String) {
    let title = TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| WHITESPACE_RE.replace_all(m.as_str(), " ").trim().to_string())
        .filter(|t| !t.is_empty())
        .map(|t| t.chars().take(200).collect())
        .unwrap_or_else(|| "无标题".to_string());

    let body = SCRIPT_RE.replace_all(html, " ");
    let text = TAG_RE.replace_all(&body, " ");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    let content: String = text.trim().chars().take(max_chars).collect();

    (title, content)
}

/// Anti-scrape heuristic: tiny body, or a blocklist phrase in the title or
/// the first 200 characters of content
fn is_anti_scrape(title: &str, content: &str) -> bool {
    if content.chars().count() < MIN_CONTENT_CHARS {
        return true;
    }
    let title_lower = title.to_lowercase();
    let head: String = content.chars().take(200).collect::<String>().to_lowercase();
    ANTI_SCRAPE_MARKERS
        .iter()
        .any(|marker| title_lower.contains(marker) || head.contains(marker))
}
