//! DuckDuckGo search backend.
//!
//! Uses the instant-answer JSON API (no API key required). The abstract,
//! related topics and results arrays are flattened into one ranked list.

use async_trait::async_trait;
use inquest_core::config::WebConfig;
use inquest_core::error::SourceError;
use inquest_core::research::{SearchBackend, SearchHit};
use serde_json::Value;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com/";

pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
    timeout_secs: u64,
}

impl DuckDuckGoSearch {
    pub fn new(config: &WebConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| SourceError::BackendUnavailable {
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: config.timeout_secs,
        })
    }

    /// Point the backend at a different instant-answer endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Split DuckDuckGo's `"Title - description"` topic text.
fn split_topic_text(text: &str) -> (String, String) {
    match text.split_once(" - ") {
        Some((title, rest)) if !title.trim().is_empty() => {
            (title.trim().to_string(), rest.trim().to_string())
        }
        _ => (String::new(), text.trim().to_string()),
    }
}

fn push_hit(hits: &mut Vec<SearchHit>, url: &str, title: String, snippet: String) {
    let url = url.trim();
    if url.is_empty() || hits.iter().any(|h| h.url == url) {
        return;
    }
    hits.push(SearchHit {
        url: url.to_string(),
        title,
        snippet,
    });
}

fn collect_topics(topics: &[Value], hits: &mut Vec<SearchHit>) {
    for topic in topics {
        // Disambiguation groups nest their entries under "Topics".
        if let Some(nested) = topic.get("Topics").and_then(|v| v.as_array()) {
            collect_topics(nested, hits);
            continue;
        }
        let (Some(text), Some(url)) = (
            topic.get("Text").and_then(|v| v.as_str()),
            topic.get("FirstURL").and_then(|v| v.as_str()),
        ) else {
            continue;
        };
        let (title, snippet) = split_topic_text(text);
        push_hit(hits, url, title, snippet);
    }
}

/// Flatten an instant-answer response into ranked hits.
pub fn parse_instant_answer(body: &Value, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str())
        && !abstract_text.is_empty()
    {
        let url = body
            .get("AbstractURL")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let title = body
            .get("Heading")
            .and_then(|v| v.as_str())
            .or_else(|| body.get("AbstractSource").and_then(|v| v.as_str()))
            .unwrap_or("")
            .to_string();
        push_hit(&mut hits, url, title, abstract_text.to_string());
    }

    if let Some(results) = body.get("Results").and_then(|v| v.as_array()) {
        collect_topics(results, &mut hits);
    }
    if let Some(topics) = body.get("RelatedTopics").and_then(|v| v.as_array()) {
        collect_topics(topics, &mut hits);
    }

    hits.truncate(max_results);
    hits
}

#[async_trait]
impl SearchBackend for DuckDuckGoSearch {
    async fn search(
        &self,
        question: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SourceError> {
        let url = format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            self.endpoint,
            urlencoding::encode(question)
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout {
                    location: format!("search: {question}"),
                    timeout_secs: self.timeout_secs,
                }
            } else {
                SourceError::BackendUnavailable {
                    message: format!("Search request failed: {e}"),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::BackendUnavailable {
                message: format!("Search returned HTTP {status}"),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::BackendUnavailable {
                message: format!("Failed to parse search response: {e}"),
            })?;

        let hits = parse_instant_answer(&body, max_results);
        debug!(question = %question, hits = hits.len(), "DuckDuckGo search complete");
        Ok(hits)
    }
}
