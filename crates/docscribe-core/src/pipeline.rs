//! Single-document generation: source text in, structured document out.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::llm::{LlmBackend, Usage};
use crate::rate_limit::complete_with_retry;
use crate::response::{ParseMode, parse_document};
use crate::{
    Config, CoreError, ExtractedText, GeneratedDocument, GenerationOptions, ProgressEvent, prompt,
};

/// Everything known about one successful generation.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub filename: String,
    pub document: GeneratedDocument,
    pub parse_mode: ParseMode,
    /// Whether the source text was cut to fit `max_input_chars`.
    pub truncated: bool,
    pub input_chars: usize,
    pub usage: Option<Usage>,
    pub elapsed: Duration,
}

/// Generate a document from one extracted source.
///
/// Emits `Generating`, zero or more `Retrying`, then `Generated` on success.
pub async fn generate_document(
    source: &ExtractedText,
    options: &GenerationOptions,
    config: &Config,
    backend: &dyn LlmBackend,
    client: &reqwest::Client,
    progress: &(dyn Fn(ProgressEvent) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<GenerationOutcome, CoreError> {
    if source.is_blank() {
        return Err(CoreError::EmptyInput(source.filename.clone()));
    }
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }

    let start = Instant::now();
    let (request, stats) = prompt::build_request(source, options, config);
    if stats.truncated {
        tracing::warn!(
            file = %source.filename,
            sent = stats.input_chars,
            total = stats.original_chars,
            "source text truncated to fit max_input_chars"
        );
    }

    progress(ProgressEvent::Generating {
        filename: source.filename.clone(),
        model: request.model.clone(),
        input_chars: stats.input_chars,
        truncated: stats.truncated,
    });

    let on_retry = |attempt: u32, wait: Duration, err: &crate::LlmError| {
        progress(ProgressEvent::Retrying {
            filename: source.filename.clone(),
            attempt,
            wait,
            reason: err.to_string(),
        });
    };

    let completion = complete_with_retry(
        backend,
        &request,
        client,
        config.llm_timeout(),
        &config.rate_limiter,
        config.max_retries,
        &on_retry,
        cancel,
    )
    .await?;

    let (mut document, parse_mode) = parse_document(&completion.content);
    tracing::debug!(
        file = %source.filename,
        mode = parse_mode.as_str(),
        finish_reason = completion.finish_reason.as_deref().unwrap_or("unknown"),
        "parsed model response"
    );
    if document.is_empty() {
        return Err(CoreError::EmptyDocument);
    }
    document.ensure_title(&source.filename);

    progress(ProgressEvent::Generated {
        filename: source.filename.clone(),
        sections: document.sections.len(),
        parse_mode,
        usage: completion.usage,
    });

    Ok(GenerationOutcome {
        filename: source.filename.clone(),
        document,
        parse_mode,
        truncated: stats.truncated,
        input_chars: stats.input_chars,
        usage: completion.usage,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockLlm, MockResponse};
    use crate::{AdaptiveLimiter, Task};
    use std::sync::{Arc, Mutex};

    fn fast_config() -> Config {
        Config {
            rate_limiter: Arc::new(AdaptiveLimiter::per_second(1000)),
            ..Config::default()
        }
    }

    fn collect() -> (Arc<Mutex<Vec<ProgressEvent>>>, impl Fn(ProgressEvent) + Send + Sync) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (events, move |e: ProgressEvent| sink.lock().unwrap().push(e))
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_emits_events_in_order() {
        let llm = MockLlm::text(
            r#"{"sections":[{"heading":"Overview","paragraphs":["It works."]}]}"#,
        );
        let source = ExtractedText::new("meeting_notes.pdf", "Some source text.", 2);
        let (events, progress) = collect();

        let outcome = generate_document(
            &source,
            &GenerationOptions::new(Task::Notes, None),
            &fast_config(),
            &llm,
            &reqwest::Client::new(),
            &progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.document.title, "meeting notes");
        assert_eq!(outcome.parse_mode, ParseMode::Json);
        assert!(!outcome.truncated);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ProgressEvent::Generating { .. }));
        assert!(matches!(
            events[1],
            ProgressEvent::Generated { sections: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn blank_source_never_calls_model() {
        let llm = MockLlm::text("{}");
        let source = ExtractedText::new("scan.pdf", " \n\n ", 4);
        let (_, progress) = collect();

        let err = generate_document(
            &source,
            &GenerationOptions::default(),
            &fast_config(),
            &llm,
            &reqwest::Client::new(),
            &progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CoreError::EmptyInput(ref f) if f == "scan.pdf"));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_answer_is_an_error() {
        let llm = MockLlm::text(r#"{"title":"Nothing","sections":[]}"#);
        let source = ExtractedText::new("a.pdf", "text", 1);
        let (_, progress) = collect();

        let err = generate_document(
            &source,
            &GenerationOptions::default(),
            &fast_config(),
            &llm,
            &reqwest::Client::new(),
            &progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CoreError::EmptyDocument));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_reported() {
        let llm = MockLlm::with_sequence(vec![
            MockResponse::Server(502),
            MockResponse::Text("# Title\n\nBody text.".into()),
        ]);
        let source = ExtractedText::new("a.pdf", "text", 1);
        let (events, progress) = collect();

        let outcome = generate_document(
            &source,
            &GenerationOptions::default(),
            &fast_config(),
            &llm,
            &reqwest::Client::new(),
            &progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.parse_mode, ParseMode::Markdown);
        assert_eq!(outcome.document.title, "Title");
        let events = events.lock().unwrap();
        assert!(matches!(
            events[1],
            ProgressEvent::Retrying { attempt: 1, .. }
        ));
    }
}
