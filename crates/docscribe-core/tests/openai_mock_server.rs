//! End-to-end tests of [`OpenAiBackend`] against an in-process
//! Chat Completions server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use docscribe_core::{
    AdaptiveLimiter, Config, CoreError, ExtractedText, GenerationOptions, LlmError, OpenAiBackend,
    ParseMode, ProgressEvent, Task, generate_document,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
enum Scenario {
    Ok,
    RateLimitedOnce,
    BadKey,
    AlwaysDown,
    NoChoices,
}

#[derive(Clone)]
struct MockState {
    scenario: Scenario,
    hits: Arc<AtomicUsize>,
    last_body: Arc<std::sync::Mutex<Option<Value>>>,
}

const DOC: &str = r#"{"title":"Lease Summary","summary":"A two-year lease.","sections":[{"heading":"Terms","paragraphs":["Rent is due monthly."],"bullets":["Deposit: two months"]}]}"#;

fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 0,
        "model": "gpt-4o-mini-2024-07-18",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 40, "total_tokens": 160}
    })
}

async fn chat_completions(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    if let Ok(mut last) = state.last_body.lock() {
        *last = Some(body);
    }

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer sk-test");

    match state.scenario {
        Scenario::BadKey => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}})),
        )
            .into_response(),
        _ if !authorized => StatusCode::UNAUTHORIZED.into_response(),
        Scenario::RateLimitedOnce if hit == 0 => (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", "0")],
            Json(json!({"error": {"message": "Rate limit reached"}})),
        )
            .into_response(),
        Scenario::AlwaysDown => (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response(),
        Scenario::NoChoices => Json(json!({"id": "x", "choices": []})).into_response(),
        Scenario::Ok | Scenario::RateLimitedOnce => Json(completion(DOC)).into_response(),
    }
}

async fn spawn_server(scenario: Scenario) -> (String, MockState) {
    let state = MockState {
        scenario,
        hits: Arc::new(AtomicUsize::new(0)),
        last_body: Arc::new(std::sync::Mutex::new(None)),
    };
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), state)
}

fn config(api_base: &str, max_retries: u32) -> Config {
    Config {
        api_base: api_base.to_string(),
        api_key: Some("sk-test".into()),
        max_retries,
        llm_timeout_secs: 5,
        rate_limiter: Arc::new(AdaptiveLimiter::per_minute(0)),
        ..Config::default()
    }
}

async fn run(config: &Config) -> Result<docscribe_core::GenerationOutcome, CoreError> {
    let backend = OpenAiBackend::from_config(config).unwrap();
    let source = ExtractedText::new("lease.pdf", "The tenant shall pay rent monthly.", 1);
    generate_document(
        &source,
        &GenerationOptions::new(Task::Summary, Some("Keep it short".into())),
        config,
        &backend,
        &reqwest::Client::new(),
        &|_: ProgressEvent| {},
        &CancellationToken::new(),
    )
    .await
}

#[tokio::test]
async fn generates_document_over_http() {
    let (base, state) = spawn_server(Scenario::Ok).await;
    let outcome = run(&config(&base, 0)).await.unwrap();

    assert_eq!(outcome.document.title, "Lease Summary");
    assert_eq!(outcome.parse_mode, ParseMode::Json);
    assert_eq!(outcome.usage.map(|u| u.prompt_tokens), Some(120));
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);

    let body = state.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["response_format"]["type"], "json_object");
    assert_eq!(body["messages"][0]["role"], "system");
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("Keep it short"));
    assert!(user.contains("The tenant shall pay rent monthly."));
}

#[tokio::test]
async fn retries_after_429() {
    let (base, state) = spawn_server(Scenario::RateLimitedOnce).await;
    let config = config(&base, 2);
    let outcome = run(&config).await.unwrap();

    assert_eq!(outcome.document.sections.len(), 1);
    assert_eq!(state.hits.load(Ordering::SeqCst), 2);
    assert_eq!(config.rate_limiter.current_factor(), 2);
}

#[tokio::test]
async fn bad_key_is_not_retried() {
    let (base, state) = spawn_server(Scenario::BadKey).await;
    let err = run(&config(&base, 3)).await.unwrap_err();

    match err {
        CoreError::Llm(LlmError::Unauthorized(msg)) => {
            assert_eq!(msg, "Incorrect API key provided")
        }
        other => panic!("expected Unauthorized, got {other:?}"),
    }
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_surface_after_retries() {
    let (base, state) = spawn_server(Scenario::AlwaysDown).await;
    let mut config = config(&base, 1);
    // Caps the backoff sleep between attempts.
    config.llm_timeout_secs = 1;
    let err = run(&config).await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::Llm(LlmError::Server { status: 503, .. })
    ));
    assert_eq!(state.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn empty_choices_is_invalid_response() {
    let (base, _) = spawn_server(Scenario::NoChoices).await;
    let err = run(&config(&base, 0)).await.unwrap_err();
    assert!(matches!(err, CoreError::Llm(LlmError::InvalidResponse(_))));
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = run(&config(&format!("http://{addr}/v1"), 0))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Llm(LlmError::Transport(_))));
}
