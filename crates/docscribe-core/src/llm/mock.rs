//! Mock LLM backend for testing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ChatRequest, Completion, LlmBackend, LlmError, Usage};

/// A configurable mock response for [`MockLlm`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Answer with this message content.
    Text(String),
    /// Simulate a 429 rate-limit response.
    RateLimited { retry_after: Option<Duration> },
    /// Simulate a 5xx.
    Server(u16),
    /// Simulate a rejected API key.
    Unauthorized,
    /// Simulate a connection failure.
    Transport(String),
}

/// A hand-rolled mock implementing [`LlmBackend`] for tests.
///
/// Supports a fixed response or a sequence (one per call, repeating the
/// last once exhausted), optional per-call latency, call counting and
/// capture of the most recent request.
pub struct MockLlm {
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
}

impl MockLlm {
    /// Create a mock that always returns `response`.
    pub fn new(response: MockResponse) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Shorthand for a mock that always answers with `content`.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(MockResponse::Text(content.into()))
    }

    /// Create a mock that returns responses in order, repeating the last one.
    /// An empty sequence behaves like an empty text answer.
    pub fn with_sequence(mut responses: Vec<MockResponse>) -> Self {
        // Reverse so we can pop() from the front cheaply.
        responses.reverse();
        let fallback = responses
            .first()
            .cloned()
            .unwrap_or_else(|| MockResponse::Text(String::new()));
        Self {
            responses: Mutex::new(responses),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Set simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `complete()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// The request passed to the most recent `complete()` call.
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }

    fn next_response(&self) -> MockResponse {
        match self.responses.lock() {
            Ok(mut seq) => seq.pop().unwrap_or_else(|| self.fallback.clone()),
            Err(_) => self.fallback.clone(),
        }
    }
}

impl LlmBackend for MockLlm {
    fn name(&self) -> &str {
        "Mock"
    }

    fn complete<'a>(
        &'a self,
        request: &'a ChatRequest,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, LlmError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }

            match response {
                MockResponse::Text(content) => Ok(Completion {
                    usage: Some(Usage {
                        prompt_tokens: request
                            .messages
                            .iter()
                            .map(|m| m.content.split_whitespace().count() as u32)
                            .sum(),
                        completion_tokens: content.split_whitespace().count() as u32,
                    }),
                    content,
                    model: Some(request.model.clone()),
                    finish_reason: Some("stop".into()),
                }),
                MockResponse::RateLimited { retry_after } => {
                    Err(LlmError::RateLimited { retry_after })
                }
                MockResponse::Server(status) => Err(LlmError::Server {
                    status,
                    message: "mock server error".into(),
                }),
                MockResponse::Unauthorized => {
                    Err(LlmError::Unauthorized("invalid api key".into()))
                }
                MockResponse::Transport(msg) => Err(LlmError::Transport(msg)),
            }
        })
    }
}
