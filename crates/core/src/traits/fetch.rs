//! Page-fetch seam

use async_trait::async_trait;
use thiserror::Error;

/// Extracted page content
#[derive(Debug, Clone)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    pub content: String,
}

/// Page-fetch failure modes
///
/// `AntiScrape` is special-cased by the intent classifier: the request stays
/// on the `web` intent with an error-prefixed content block so the model can
/// explain the failure to the user.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("anti-scrape protection detected (title: {title})")]
    AntiScrape { title: String },

    #[error("request timed out")]
    Timeout,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Interface to the page fetcher
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PageContent, FetchError>;
}
