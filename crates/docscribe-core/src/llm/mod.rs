//! Language-model backend trait and implementations.

pub mod mock;
pub mod openai;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A provider-neutral chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Request a JSON object response where the provider supports it.
    pub json_mode: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// The model's answer.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

/// Error type for LLM calls, distinguishing retryable conditions.
#[derive(Debug, Clone)]
pub enum LlmError {
    /// Server returned 429 Too Many Requests.
    RateLimited { retry_after: Option<Duration> },
    /// 401/403: bad or missing key. Never retried.
    Unauthorized(String),
    /// Any other 4xx.
    Client { status: u16, message: String },
    /// 5xx.
    Server { status: u16, message: String },
    /// Connection failure or timeout.
    Transport(String),
    /// The body could not be decoded or had no usable choice.
    InvalidResponse(String),
}

impl LlmError {
    /// Whether the same request may succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Server { .. } | LlmError::Transport(_)
        )
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::RateLimited {
                retry_after: Some(d),
            } => write!(f, "Rate limited (429), retry after {:.1}s", d.as_secs_f64()),
            LlmError::RateLimited { retry_after: None } => write!(f, "Rate limited (429)"),
            LlmError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            LlmError::Client { status, message } => write!(f, "HTTP {}: {}", status, message),
            LlmError::Server { status, message } => {
                write!(f, "Server error HTTP {}: {}", status, message)
            }
            LlmError::Transport(msg) => write!(f, "{}", msg),
            LlmError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

/// A chat-completion service the pipeline can send prompts to.
pub trait LlmBackend: Send + Sync {
    /// The provider name used in logs (e.g., "OpenAI").
    fn name(&self) -> &str;

    /// Send one chat request and wait for the full answer.
    fn complete<'a>(
        &'a self,
        request: &'a ChatRequest,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, LlmError>> + Send + 'a>>;
}
