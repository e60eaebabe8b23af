//! Document fetching over HTTP(S) or from the local filesystem.

use async_trait::async_trait;
use inquest_core::config::WebConfig;
use inquest_core::error::SourceError;
use inquest_core::research::{DocumentFetcher, RawDocument};
use std::path::Path;
use tracing::debug;

pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(config: &WebConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| SourceError::BackendUnavailable {
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn fetch_http(&self, url: &str) -> Result<RawDocument, SourceError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout {
                    location: url.to_string(),
                    timeout_secs: self.timeout_secs,
                }
            } else {
                SourceError::NotRetrievable {
                    location: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::NotRetrievable {
                location: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout {
                    location: url.to_string(),
                    timeout_secs: self.timeout_secs,
                }
            } else {
                SourceError::NotRetrievable {
                    location: url.to_string(),
                    reason: format!("Failed to read response body: {e}"),
                }
            }
        })?;

        debug!(url = %url, bytes = body.len(), "Fetched document");
        Ok(RawDocument {
            location: url.to_string(),
            content_type,
            body: body.to_vec(),
        })
    }
}

/// Content type implied by a file extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "html" | "htm" | "xhtml" => Some("text/html"),
        "md" | "markdown" => Some("text/markdown"),
        "txt" | "text" | "log" | "csv" => Some("text/plain"),
        "json" => Some("application/json"),
        _ => None,
    }
}

async fn read_local(location: &str) -> Result<RawDocument, SourceError> {
    let path = Path::new(location.strip_prefix("file://").unwrap_or(location));
    let body = tokio::fs::read(path)
        .await
        .map_err(|e| SourceError::NotRetrievable {
            location: location.to_string(),
            reason: e.to_string(),
        })?;
    Ok(RawDocument {
        location: location.to_string(),
        content_type: content_type_for_path(path).map(str::to_string),
        body,
    })
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, location: &str) -> Result<RawDocument, SourceError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            self.fetch_http(location).await
        } else {
            read_local(location).await
        }
    }
}
