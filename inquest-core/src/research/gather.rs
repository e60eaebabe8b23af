//! Evidence gathering for a single sub-task.
//!
//! The gatherer is assembled from three collaborators: a search backend,
//! a document fetcher and a text extractor. Concrete web implementations
//! live in the `inquest-tools` crate.

use super::decomposition::SubTask;
use super::evidence::{ContentKind, EvidenceItem};
use crate::error::SourceError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Bytes fetched from a location, before extraction.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub location: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Plain text pulled out of a [`RawDocument`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub kind: ContentKind,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Ranked hits for `question`, at most `max_results`.
    async fn search(&self, question: &str, max_results: usize)
    -> Result<Vec<SearchHit>, SourceError>;
}

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<RawDocument, SourceError>;
}

pub trait TextExtractor: Send + Sync {
    /// `Unparseable` and `Empty` are distinct outcomes.
    fn extract(&self, raw: &RawDocument) -> Result<ExtractedText, SourceError>;
}

/// A source that was found but could not be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedSource {
    pub location: String,
    pub reason: String,
}

/// Result of gathering one sub-task.
#[derive(Debug, Clone, Default)]
pub struct GatherOutcome {
    pub items: Vec<EvidenceItem>,
    pub dropped: Vec<DroppedSource>,
}

/// Produces evidence for one sub-task.
///
/// Per-source failures are reported in [`GatherOutcome::dropped`]; an `Err`
/// means no search could be made for the sub-task at all.
#[async_trait]
pub trait SourceGatherer: Send + Sync {
    async fn gather(
        &self,
        sub_task: &SubTask,
        max_results: usize,
    ) -> Result<GatherOutcome, SourceError>;
}

/// Search, then fetch and extract every hit concurrently.
pub struct WebSourceGatherer {
    search: Arc<dyn SearchBackend>,
    fetcher: Arc<dyn DocumentFetcher>,
    extractor: Arc<dyn TextExtractor>,
    min_content_chars: usize,
    call_timeout: Duration,
}

impl WebSourceGatherer {
    pub fn new(
        search: Arc<dyn SearchBackend>,
        fetcher: Arc<dyn DocumentFetcher>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            search,
            fetcher,
            extractor,
            min_content_chars: 50,
            call_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_min_content_chars(mut self, min_content_chars: usize) -> Self {
        self.min_content_chars = min_content_chars;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn retrieve(&self, hit: &SearchHit) -> Result<ExtractedText, SourceError> {
        let raw = tokio::time::timeout(self.call_timeout, self.fetcher.fetch(&hit.url))
            .await
            .map_err(|_| SourceError::Timeout {
                location: hit.url.clone(),
                timeout_secs: self.call_timeout.as_secs(),
            })??;

        // Extraction is CPU-bound and may panic on malformed input; either way
        // only this source is lost.
        let extractor = Arc::clone(&self.extractor);
        let content_type = raw.content_type.clone().unwrap_or_else(|| "unknown".into());
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&raw))
            .await
            .map_err(|e| {
                warn!(source = %hit.url, error = %e, "Text extraction aborted");
                SourceError::Unparseable {
                    location: hit.url.clone(),
                    content_type,
                }
            })??;
        if extracted.text.trim().chars().count() < self.min_content_chars {
            return Err(SourceError::Empty {
                location: hit.url.clone(),
            });
        }
        Ok(extracted)
    }
}

#[async_trait]
impl SourceGatherer for WebSourceGatherer {
    async fn gather(
        &self,
        sub_task: &SubTask,
        max_results: usize,
    ) -> Result<GatherOutcome, SourceError> {
        if max_results == 0 {
            return Ok(GatherOutcome::default());
        }

        let hits = tokio::time::timeout(
            self.call_timeout,
            self.search.search(&sub_task.question, max_results),
        )
        .await
        .map_err(|_| SourceError::Timeout {
            location: format!("search: {}", sub_task.question),
            timeout_secs: self.call_timeout.as_secs(),
        })??;

        debug!(sub_task = %sub_task.id, hits = hits.len(), "Search complete");

        let fetches = hits
            .iter()
            .take(max_results)
            .map(|hit| self.retrieve(hit));
        let results = futures::future::join_all(fetches).await;

        let mut outcome = GatherOutcome::default();
        for (rank, (hit, result)) in hits.iter().zip(results).enumerate() {
            match result {
                Ok(extracted) => outcome.items.push(EvidenceItem {
                    source_id: format!("{}-S{}", sub_task.id, rank + 1),
                    sub_task_id: sub_task.id.clone(),
                    location: hit.url.clone(),
                    title: if hit.title.trim().is_empty() {
                        hit.url.clone()
                    } else {
                        hit.title.clone()
                    },
                    snippet: hit.snippet.clone(),
                    content_kind: extracted.kind,
                    extracted_text: extracted.text,
                    retrieved_at: Utc::now(),
                }),
                Err(e) => {
                    debug!(sub_task = %sub_task.id, source = %hit.url, error = %e, "Dropping source");
                    outcome.dropped.push(DroppedSource {
                        location: hit.url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            sub_task = %sub_task.id,
            kept = outcome.items.len(),
            dropped = outcome.dropped.len(),
            "Gathered evidence"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedSearch(Vec<SearchHit>);

    #[async_trait]
    impl SearchBackend for FixedSearch {
        async fn search(&self, _q: &str, max: usize) -> Result<Vec<SearchHit>, SourceError> {
            Ok(self.0.iter().take(max).cloned().collect())
        }
    }

    struct MapFetcher(HashMap<String, Result<String, SourceError>>);

    #[async_trait]
    impl DocumentFetcher for MapFetcher {
        async fn fetch(&self, location: &str) -> Result<RawDocument, SourceError> {
            match self.0.get(location) {
                Some(Ok(body)) => Ok(RawDocument {
                    location: location.to_string(),
                    content_type: Some("text/plain".into()),
                    body: body.clone().into_bytes(),
                }),
                Some(Err(e)) => Err(e.clone()),
                None => Err(SourceError::NotRetrievable {
                    location: location.to_string(),
                    reason: "HTTP 404".into(),
                }),
            }
        }
    }

    struct Utf8Extractor;

    impl TextExtractor for Utf8Extractor {
        fn extract(&self, raw: &RawDocument) -> Result<ExtractedText, SourceError> {
            Ok(ExtractedText {
                text: String::from_utf8_lossy(&raw.body).into_owned(),
                kind: ContentKind::Text,
            })
        }
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: String::new(),
            snippet: "snippet".into(),
        }
    }

    fn long_text(word: &str) -> String {
        format!("{} ", word).repeat(20)
    }

    #[tokio::test]
    async fn test_gather_drops_failed_and_short_sources() {
        let mut pages = HashMap::new();
        pages.insert("https://a.org".to_string(), Ok(long_text("alpha")));
        pages.insert("https://b.org".to_string(), Ok("too short".to_string()));
        let gatherer = WebSourceGatherer::new(
            Arc::new(FixedSearch(vec![
                hit("https://a.org"),
                hit("https://b.org"),
                hit("https://c.org"),
            ])),
            Arc::new(MapFetcher(pages)),
            Arc::new(Utf8Extractor),
        );

        let task = SubTask::new("T1", "What is alpha?", "definitions");
        let outcome = gatherer.gather(&task, 5).await.unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].source_id, "T1-S1");
        assert_eq!(outcome.items[0].title, "https://a.org");
        assert_eq!(outcome.dropped.len(), 2);
    }

    #[tokio::test]
    async fn test_extractor_panic_drops_only_that_source() {
        struct FragileExtractor;

        impl TextExtractor for FragileExtractor {
            fn extract(&self, raw: &RawDocument) -> Result<ExtractedText, SourceError> {
                if raw.location.contains("malformed") {
                    panic!("corrupt xref table");
                }
                Utf8Extractor.extract(raw)
            }
        }

        let mut pages = HashMap::new();
        for url in ["https://a.org/1", "https://malformed.org/2.pdf", "https://c.org/3"] {
            pages.insert(url.to_string(), Ok(long_text("gamma")));
        }
        let gatherer = WebSourceGatherer::new(
            Arc::new(FixedSearch(vec![
                hit("https://a.org/1"),
                hit("https://malformed.org/2.pdf"),
                hit("https://c.org/3"),
            ])),
            Arc::new(MapFetcher(pages)),
            Arc::new(FragileExtractor),
        );

        let outcome = gatherer
            .gather(&SubTask::new("T1", "What is gamma?", ""), 5)
            .await
            .unwrap();
        let kept: Vec<&str> = outcome.items.iter().map(|i| i.location.as_str()).collect();
        assert_eq!(kept, vec!["https://a.org/1", "https://c.org/3"]);
        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].location, "https://malformed.org/2.pdf");
    }

    #[tokio::test]
    async fn test_gather_respects_max_results() {
        let mut pages = HashMap::new();
        let hits: Vec<SearchHit> = (1..=6)
            .map(|i| {
                let url = format!("https://s{i}.org");
                pages.insert(url.clone(), Ok(long_text("beta")));
                hit(&url)
            })
            .collect();
        let gatherer = WebSourceGatherer::new(
            Arc::new(FixedSearch(hits)),
            Arc::new(MapFetcher(pages)),
            Arc::new(Utf8Extractor),
        );
        let outcome = gatherer
            .gather(&SubTask::new("T2", "Q?", ""), 3)
            .await
            .unwrap();
        assert_eq!(outcome.items.len(), 3);
    }

    #[tokio::test]
    async fn test_gather_search_unavailable_is_error() {
        struct DownSearch;

        #[async_trait]
        impl SearchBackend for DownSearch {
            async fn search(&self, _q: &str, _m: usize) -> Result<Vec<SearchHit>, SourceError> {
                Err(SourceError::BackendUnavailable {
                    message: "dns failure".into(),
                })
            }
        }

        let gatherer = WebSourceGatherer::new(
            Arc::new(DownSearch),
            Arc::new(MapFetcher(HashMap::new())),
            Arc::new(Utf8Extractor),
        );
        let err = gatherer
            .gather(&SubTask::new("T1", "Q?", ""), 3)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }
}
