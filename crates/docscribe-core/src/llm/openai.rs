use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, ChatRequest, Completion, LlmBackend, LlmError, Usage};
use crate::rate_limit::parse_retry_after;
use crate::{Config, CoreError};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Client for any OpenAI-compatible Chat Completions endpoint
/// (OpenAI, Azure-style proxies, Ollama, vLLM, LM Studio...).
pub struct OpenAiBackend {
    api_base: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key,
        }
    }

    /// Build from config. The hosted OpenAI endpoint requires a key;
    /// self-hosted compatible servers usually don't.
    pub fn from_config(config: &Config) -> Result<Self, CoreError> {
        let hosted = config.api_base.contains("api.openai.com");
        if hosted && config.api_key.is_none() {
            return Err(CoreError::MissingApiKey(config.api_base.clone()));
        }
        Ok(Self::new(config.api_base.clone(), config.api_key.clone()))
    }

    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat {
    JsonObject,
    Text,
}

impl<'a> OpenAiRequest<'a> {
    fn new(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
            response_format: if request.json_mode {
                ResponseFormat::JsonObject
            } else {
                ResponseFormat::Text
            },
        }
    }
}

// Leaving out id, created, object and system_fingerprint
#[derive(Deserialize, Debug)]
struct OpenAiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize, Debug)]
struct OpenAiChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<OpenAiResponse> for Completion {
    type Error = LlmError;

    fn try_from(response: OpenAiResponse) -> Result<Self, Self::Error> {
        let OpenAiResponse {
            model,
            choices,
            usage,
        } = response;
        let choice = choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".into()))?;
        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse(format!(
                "empty message content (finish_reason: {})",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(Completion {
            content,
            model,
            usage: usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }
}

/// Pull the human-readable message out of an OpenAI-style error body.
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .or_else(|| v["message"].as_str())
                .map(String::from)
        });
    from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.chars().count() > 300 {
            let cut: String = trimmed.chars().take(300).collect();
            format!("{}...", cut)
        } else {
            trimmed.to_string()
        }
    })
}

/// Map a non-success status to an [`LlmError`].
fn error_from_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> LlmError {
    let message = error_message(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Unauthorized(message),
        s if s.is_server_error() => LlmError::Server {
            status: s.as_u16(),
            message,
        },
        s => LlmError::Client {
            status: s.as_u16(),
            message,
        },
    }
}

impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "OpenAI"
    }

    fn complete<'a>(
        &'a self,
        request: &'a ChatRequest,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            let body = OpenAiRequest::new(request);

            let mut req = client
                .post(self.chat_url())
                .header("Content-Type", "application/json")
                .timeout(timeout)
                .json(&body);
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    LlmError::Transport(format!("request timed out after {}s", timeout.as_secs()))
                } else {
                    LlmError::Transport(format!("error sending request: {}", e))
                }
            })?;

            let status = resp.status();
            if !status.is_success() {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let text = resp.text().await.unwrap_or_default();
                return Err(error_from_status(status, retry_after, &text));
            }

            let parsed: OpenAiResponse = resp
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse(format!("error parsing response: {}", e)))?;
            Completion::try_from(parsed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json_mode: bool) -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            temperature: Some(0.2),
            max_tokens: None,
            json_mode,
        }
    }

    #[test]
    fn request_body_shape() {
        let req = request(true);
        let body = serde_json::to_value(OpenAiRequest::new(&req)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["stream"], false);
        assert!(body.get("max_tokens").is_none());

        let req = request(false);
        let body = serde_json::to_value(OpenAiRequest::new(&req)).unwrap();
        assert_eq!(body["response_format"]["type"], "text");
    }

    #[test]
    fn chat_url_handles_trailing_slash() {
        let a = OpenAiBackend::new("http://localhost:11434/v1/", None);
        let b = OpenAiBackend::new("http://localhost:11434/v1", None);
        assert_eq!(a.chat_url(), "http://localhost:11434/v1/chat/completions");
        assert_eq!(a.chat_url(), b.chat_url());
    }

    #[test]
    fn hosted_endpoint_requires_key() {
        let config = Config::default();
        assert!(matches!(
            OpenAiBackend::from_config(&config),
            Err(CoreError::MissingApiKey(_))
        ));

        let local = Config {
            api_base: "http://127.0.0.1:8000/v1".into(),
            ..Config::default()
        };
        assert!(OpenAiBackend::from_config(&local).is_ok());
    }

    #[test]
    fn response_without_choices_is_invalid() {
        let resp: OpenAiResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            Completion::try_from(resp),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn response_maps_usage_and_content() {
        let resp: OpenAiResponse = serde_json::from_str(
            r#"{"model":"m","choices":[{"index":0,"message":{"role":"assistant","content":"{}"},"finish_reason":"stop"}],
               "usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#,
        )
        .unwrap();
        let completion = Completion::try_from(resp).unwrap();
        assert_eq!(completion.content, "{}");
        assert_eq!(completion.model.as_deref(), Some("m"));
        assert_eq!(
            completion.usage,
            Some(Usage {
                prompt_tokens: 12,
                completion_tokens: 3
            })
        );
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn status_mapping() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        match error_from_status(StatusCode::UNAUTHORIZED, None, body) {
            LlmError::Unauthorized(msg) => assert_eq!(msg, "Incorrect API key provided"),
            other => panic!("expected Unauthorized, got {:?}", other),
        }
        assert!(matches!(
            error_from_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), ""),
            LlmError::RateLimited {
                retry_after: Some(_)
            }
        ));
        assert!(matches!(
            error_from_status(StatusCode::BAD_GATEWAY, None, "<html>bad gateway</html>"),
            LlmError::Server { status: 502, .. }
        ));
        assert!(matches!(
            error_from_status(StatusCode::BAD_REQUEST, None, "{}"),
            LlmError::Client { status: 400, .. }
        ));
    }

    #[test]
    fn long_plain_error_body_is_truncated() {
        let body = "x".repeat(1000);
        let msg = error_message(&body);
        assert!(msg.ends_with("..."));
        assert_eq!(msg.chars().count(), 303);
    }
}
