use axum::response::sse::Event;
use base64::Engine;
use docscribe_core::{GeneratedDocument, GenerationOutcome, OutputFormat, ParseMode};
use serde::{Deserialize, Serialize};

// ── Rendered file JSON ──────────────────────────────────────────────────

/// A generated file sent inline in an SSE payload.
#[derive(Debug, Clone, Serialize)]
pub struct OutputJson {
    pub filename: String,
    pub mime_type: String,
    pub data_base64: String,
}

impl OutputJson {
    pub fn new(source_filename: &str, format: OutputFormat, bytes: &[u8]) -> Self {
        OutputJson {
            filename: docscribe_render::output_filename(source_filename, format),
            mime_type: format.mime_type().to_string(),
            data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// Render an outcome into the requested format for sending to the browser.
pub fn render_output(outcome: &GenerationOutcome, format: OutputFormat) -> Result<OutputJson, String> {
    let bytes = docscribe_render::render(&outcome.document, format)
        .map_err(|e| format!("{}: {}", outcome.filename, e))?;
    Ok(OutputJson::new(&outcome.filename, format, &bytes))
}

// ── SSE Event Structs ───────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ExtractionCompleteEvent {
    pub filename: String,
    pub pages: usize,
    pub chars: usize,
    pub words: usize,
}

#[derive(Serialize)]
pub struct GeneratingEvent {
    pub filename: String,
    pub model: String,
    pub input_chars: usize,
    pub truncated: bool,
}

#[derive(Serialize)]
pub struct RetryingEvent {
    pub filename: String,
    pub attempt: u32,
    pub wait_secs: f64,
    pub reason: String,
}

#[derive(Serialize)]
pub struct WarningEvent {
    pub message: String,
}

#[derive(Serialize)]
pub struct ArchiveStartEvent {
    pub file_count: usize,
}

#[derive(Serialize)]
pub struct FileStartEvent {
    pub file_index: usize,
    pub file_count: usize,
    pub filename: String,
}

/// Result for one archive member, sent as `file_complete` and repeated
/// in the final `complete` event.
#[derive(Debug, Clone, Serialize)]
pub struct FileResultJson {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<GeneratedDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileResultJson {
    pub fn failed(filename: impl Into<String>, error: impl Into<String>) -> Self {
        FileResultJson {
            filename: filename.into(),
            success: false,
            document: None,
            parse_mode: None,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn from_outcome(outcome: GenerationOutcome, format: OutputFormat) -> Self {
        match render_output(&outcome, format) {
            Ok(output) => FileResultJson {
                filename: outcome.filename,
                success: true,
                document: Some(outcome.document),
                parse_mode: Some(outcome.parse_mode),
                output: Some(output),
                error: None,
            },
            Err(e) => FileResultJson::failed(outcome.filename, e),
        }
    }
}

/// Final event. Single uploads fill the document fields; archives fill
/// `file_count` and `files`.
#[derive(Serialize)]
pub struct CompleteEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<GeneratedDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileResultJson>>,
}

#[derive(Serialize)]
pub struct ErrorEvent {
    pub message: String,
}

// ── Render DTOs ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RenderRequest {
    pub document: GeneratedDocument,
    #[serde(default)]
    pub format: OutputFormat,
    pub filename: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ── SSE Helper ──────────────────────────────────────────────────────────

pub fn sse_event<T: Serialize>(event_type: &str, data: &T) -> Event {
    Event::default()
        .event(event_type)
        .data(serde_json::to_string(data).unwrap_or_default())
}
