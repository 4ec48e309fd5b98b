//! Web-search seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
}

/// A full search response
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchResults {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

impl SearchResults {
    /// Source URLs, in result order
    pub fn source_urls(&self) -> Vec<String> {
        self.results.iter().map(|hit| hit.url.clone()).collect()
    }
}

/// Interface to the external web-search API
#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResults>;
}
