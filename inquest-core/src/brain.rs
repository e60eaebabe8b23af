//! Brain module: LLM provider abstraction.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions used by
//! every research role (planner, synthesizer, reviser), and a scriptable
//! `MockLlmProvider` for tests and offline runs.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the context window size for this provider/model.
    fn context_window(&self) -> usize;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync>;

/// A mock LLM provider for testing and development.
///
/// Responses are taken from the queue first; once it is empty the responder
/// closure (if any) answers, otherwise a fixed placeholder text is returned.
pub struct MockLlmProvider {
    model: String,
    context_window: usize,
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            context_window: 128_000,
            responses: Mutex::new(VecDeque::new()),
            responder: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let text = text.to_string();
        Self::with_responder(move |_| Ok(text.clone()))
    }

    /// Create a MockLlmProvider whose answer is computed from the request.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Create a MockLlmProvider that fails every call with `error`.
    pub fn failing(error: LlmError) -> Self {
        Self::with_responder(move |_| Err(error.clone()))
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(text.into()));
    }

    /// Queue a failure to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(error));
    }

    /// Number of `complete` calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    fn next_answer(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let queued = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match (queued, &self.responder) {
            (Some(answer), _) => answer,
            (None, Some(responder)) => responder(request),
            (None, None) => Ok("I'm a mock LLM. No queued responses available.".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            match request.timeout {
                Some(timeout) if timeout < delay => {
                    tokio::time::sleep(timeout).await;
                    return Err(LlmError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    });
                }
                _ => tokio::time::sleep(delay).await,
            }
        }

        let text = self.next_answer(&request)?;
        Ok(Self::text_response(&text))
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_default_text() {
        let provider = MockLlmProvider::new();
        let response = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap();
        assert!(response.text.contains("mock LLM"));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_provider_queue_order() {
        let provider = MockLlmProvider::new();
        provider.queue_response("first");
        provider.queue_response("second");

        let r1 = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap();
        let r2 = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap();
        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "second");
    }

    #[tokio::test]
    async fn test_mock_provider_queue_takes_priority_over_responder() {
        let provider = MockLlmProvider::with_response("fallback");
        provider.queue_error(LlmError::Timeout { timeout_secs: 1 });

        let first = provider.complete(CompletionRequest::default()).await;
        assert!(matches!(first, Err(LlmError::Timeout { .. })));

        let second = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap();
        assert_eq!(second.text, "fallback");
    }

    #[tokio::test]
    async fn test_mock_provider_responder_sees_request() {
        let provider = MockLlmProvider::with_responder(|req| {
            Ok(format!("echo: {}", req.last_user_text().unwrap_or_default()))
        });
        let response = provider
            .complete(CompletionRequest::prompt("sys", "hello"))
            .await
            .unwrap();
        assert_eq!(response.text, "echo: hello");
    }

    #[tokio::test]
    async fn test_mock_provider_delay_respects_timeout() {
        let provider =
            MockLlmProvider::with_response("late").with_delay(Duration::from_millis(200));
        let request = CompletionRequest::default().with_timeout(Duration::from_millis(10));
        let result = provider.complete(request).await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
    }
}
