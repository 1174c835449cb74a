//! Search providers.
//!
//! A [`SearchProvider`] turns one query into ranked raw text results. Each
//! call either succeeds completely or fails with a [`SearchError`]; the
//! research hunter decides what a failure means for the round.
//!
//! - `TavilySearchProvider`: Tavily search API with a relevance-score gate.
//! - `DuckDuckGoSearchProvider`: DuckDuckGo instant answers, no key required.
//! - `MockSearchProvider`: deterministic offline results for tests and demos.

use crate::config::{SearchBackend, SearchConfig};
use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A single raw search hit, held only until its facts are extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSearchResult {
    pub title: String,
    pub content: String,
    pub url: String,
    pub score: f64,
}

impl RawSearchResult {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        url: impl Into<String>,
        score: f64,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            url: url.into(),
            score,
        }
    }
}

/// Trait for search backends.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one query and return ranked results.
    async fn search(&self, query: &str) -> Result<Vec<RawSearchResult>, SearchError>;

    /// Short provider name for logs and status endpoints.
    fn name(&self) -> &str;

    /// Whether results are synthetic rather than fetched.
    fn is_mock(&self) -> bool {
        false
    }
}

/// Build the configured search provider.
///
/// Tavily without an API key falls back to mock mode.
pub fn build_search_provider(config: &SearchConfig) -> Arc<dyn SearchProvider> {
    match config.backend {
        SearchBackend::Tavily => match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => match TavilySearchProvider::new(key, config) {
                Ok(provider) => Arc::new(provider),
                Err(e) => {
                    warn!(error = %e, "Failed to initialize Tavily client; using mock mode");
                    Arc::new(MockSearchProvider::new())
                }
            },
            _ => {
                info!(
                    env = %config.api_key_env,
                    "No Tavily API key provided; search mock mode enabled"
                );
                Arc::new(MockSearchProvider::new())
            }
        },
        SearchBackend::Duckduckgo => match DuckDuckGoSearchProvider::new(config) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                warn!(error = %e, "Failed to initialize DuckDuckGo client; using mock mode");
                Arc::new(MockSearchProvider::new())
            }
        },
        SearchBackend::Mock => Arc::new(MockSearchProvider::new()),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("sleuth/", env!("CARGO_PKG_VERSION")))
        .build()
}

fn map_request_error(query: &str, timeout_secs: u64, e: reqwest::Error) -> SearchError {
    if e.is_timeout() {
        SearchError::Timeout {
            query: query.to_string(),
            timeout_secs,
        }
    } else {
        SearchError::Request {
            query: query.to_string(),
            message: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tavily
// ---------------------------------------------------------------------------

/// Search via the Tavily API.
pub struct TavilySearchProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    max_results: usize,
    min_relevance_score: f64,
    timeout_secs: u64,
}

impl TavilySearchProvider {
    pub fn new(api_key: String, config: &SearchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            endpoint: "https://api.tavily.com/search".to_string(),
            max_results: config.max_results,
            min_relevance_score: config.min_relevance_score,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Convert a Tavily response body into results that pass the quality gate.
    fn parse_results(&self, query: &str, body: &serde_json::Value) -> Result<Vec<RawSearchResult>, SearchError> {
        let items = body
            .get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| SearchError::ResponseParse {
                query: query.to_string(),
                message: "missing 'results' array".to_string(),
            })?;

        let results = items
            .iter()
            .filter_map(|item| {
                let score = item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
                if score < self.min_relevance_score {
                    return None;
                }
                let text = |key: &str| {
                    item.get(key)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                Some(RawSearchResult {
                    title: text("title"),
                    content: text("content"),
                    url: text("url"),
                    score,
                })
            })
            .collect();
        Ok(results)
    }
}

#[async_trait]
impl SearchProvider for TavilySearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<RawSearchResult>, SearchError> {
        let body = serde_json::json!({
            "query": query,
            "search_depth": "advanced",
            "max_results": self.max_results,
            "include_raw_content": false,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error(query, self.timeout_secs, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SearchError::AuthFailed {
                provider: "tavily".to_string(),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SearchError::Request {
                query: query.to_string(),
                message: format!("HTTP {}: {}", status, text),
            });
        }

        let json: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| SearchError::ResponseParse {
                    query: query.to_string(),
                    message: e.to_string(),
                })?;

        let results = self.parse_results(query, &json)?;
        debug!(query, results = results.len(), "Tavily search complete");
        Ok(results)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

// ---------------------------------------------------------------------------
// DuckDuckGo
// ---------------------------------------------------------------------------

/// Search using the DuckDuckGo instant answers API.
///
/// No API key required. Instant answers are sparse, so this backend is best
/// suited to encyclopedic questions.
pub struct DuckDuckGoSearchProvider {
    client: reqwest::Client,
    max_results: usize,
    timeout_secs: u64,
}

impl DuckDuckGoSearchProvider {
    pub fn new(config: &SearchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            max_results: config.max_results,
            timeout_secs: config.timeout_secs,
        })
    }

    fn parse_results(&self, body: &serde_json::Value) -> Vec<RawSearchResult> {
        let mut results = Vec::new();

        // Abstract (main answer)
        if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str())
            && !abstract_text.is_empty()
        {
            let source = body
                .get("AbstractSource")
                .and_then(|v| v.as_str())
                .unwrap_or("DuckDuckGo");
            let url = body
                .get("AbstractURL")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            results.push(RawSearchResult::new(source, abstract_text, url, 1.0));
        }

        // Results first, then related topics
        for key in ["Results", "RelatedTopics"] {
            let Some(items) = body.get(key).and_then(|v| v.as_array()) else {
                continue;
            };
            for item in items {
                if results.len() >= self.max_results {
                    return results;
                }
                let (Some(text), Some(url)) = (
                    item.get("Text").and_then(|v| v.as_str()),
                    item.get("FirstURL").and_then(|v| v.as_str()),
                ) else {
                    continue;
                };
                let title = text.split(" - ").next().unwrap_or(text);
                let score = (0.9 - 0.05 * results.len() as f64).max(0.1);
                results.push(RawSearchResult::new(title, text, url, score));
            }
        }

        results.truncate(self.max_results);
        results
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<RawSearchResult>, SearchError> {
        let url = format!(
            "https://api.duckduckgo.com/?q={}&format=json&no_html=1&skip_disambig=1",
            urlencoding::encode(query)
        );

        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_request_error(query, self.timeout_secs, e))?
            .json()
            .await
            .map_err(|e| SearchError::ResponseParse {
                query: query.to_string(),
                message: e.to_string(),
            })?;

        Ok(self.parse_results(&body))
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

/// What a [`MockSearchProvider`] returns for queries without an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    /// One synthetic, high-scoring result per query.
    Synthetic,
    /// No results.
    Empty,
    /// Every query fails.
    Failing,
}

/// Deterministic search provider for tests and keyless runs.
pub struct MockSearchProvider {
    mode: MockMode,
    overrides: Mutex<HashMap<String, Result<Vec<RawSearchResult>, String>>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self::with_mode(MockMode::Synthetic)
    }

    pub fn with_mode(mode: MockMode) -> Self {
        Self {
            mode,
            overrides: Mutex::new(HashMap::new()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose every query fails.
    pub fn failing() -> Self {
        Self::with_mode(MockMode::Failing)
    }

    /// Sleep before answering each query.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return `results` for `query`.
    pub fn set_results(&self, query: &str, results: Vec<RawSearchResult>) {
        self.overrides
            .lock()
            .unwrap()
            .insert(query.to_string(), Ok(results));
    }

    /// Fail `query` with `message`.
    pub fn set_error(&self, query: &str, message: &str) {
        self.overrides
            .lock()
            .unwrap()
            .insert(query.to_string(), Err(message.to_string()));
    }

    /// Queries received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// The synthetic result produced for `query`.
    pub fn synthetic_result(query: &str) -> RawSearchResult {
        let digest = Sha256::digest(query.as_bytes());
        let article = u16::from_be_bytes([digest[0], digest[1]]) % 10_000;
        RawSearchResult {
            title: format!("Mock Result for: {}", query),
            content: format!(
                "This is detailed mock content regarding '{}'. It contains relevant \
                 information that would typically be extracted from real search results.",
                query
            ),
            url: format!("https://mock-source.com/article/{}", article),
            score: 0.95,
        }
    }
}

impl Default for MockSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<RawSearchResult>, SearchError> {
        self.calls.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let overridden = self.overrides.lock().unwrap().get(query).cloned();
        let outcome = match overridden {
            Some(outcome) => outcome,
            None => match self.mode {
                MockMode::Synthetic => Ok(vec![Self::synthetic_result(query)]),
                MockMode::Empty => Ok(Vec::new()),
                MockMode::Failing => Err("mock search backend unavailable".to_string()),
            },
        };

        outcome.map_err(|message| SearchError::Request {
            query: query.to_string(),
            message,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn is_mock(&self) -> bool {
        true
    }
}
