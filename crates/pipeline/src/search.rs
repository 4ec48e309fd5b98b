//! Tavily web-search client

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chat_agent_config::SearchSettings;
use chat_agent_core::{Error, Result, SearchHit, SearchResults, WebSearcher};

const TAVILY_URL: &str = "https://api.tavily.com/search";

/// Tavily JSON API client
pub struct TavilySearcher {
    client: reqwest::Client,
    settings: SearchSettings,
}

impl TavilySearcher {
    pub fn new(settings: SearchSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| Error::Search(e.to_string()))?;
        Ok(Self { client, settings })
    }

    pub fn is_configured(&self) -> bool {
        !self.settings.api_key.trim().is_empty()
    }
}

#[async_trait]
impl WebSearcher for TavilySearcher {
    async fn search(&self, query: &str) -> Result<SearchResults> {
        let query = query.trim();
        if query.len() < 2 {
            return Err(Error::Search("query too short".to_string()));
        }
        if !self.is_configured() {
            return Err(Error::Search("search API key not configured".to_string()));
        }

        let request = TavilyRequest {
            api_key: &self.settings.api_key,
            query,
            search_depth: &self.settings.search_depth,
            include_answer: true,
            include_raw_content: false,
            max_results: self.settings.max_results,
        };

        let response = self
            .client
            .post(TAVILY_URL)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Search(format!("search API returned {}", response.status())));
        }

        let body: TavilyResponse =
            response.json().await.map_err(|e| Error::Search(e.to_string()))?;

        let results = SearchResults {
            query: query.to_string(),
            answer: body.answer.filter(|a| !a.is_empty()),
            results: body
                .results
                .into_iter()
                .map(|r| SearchHit {
                    title: r.title,
                    url: r.url,
                    content: r.content,
                    score: r.score,
                    published_date: r.published_date,
                })
                .collect(),
        };

        tracing::info!(query, count = results.results.len(), "search complete");
        Ok(results)
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    include_answer: bool,
    include_raw_content: bool,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    published_date: Option<String>,
}
