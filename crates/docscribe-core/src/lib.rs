use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub mod backend;
pub mod config_file;
pub mod llm;
pub mod pipeline;
pub mod pool;
pub mod prompt;
pub mod rate_limit;
pub mod response;

// Re-export for convenience
pub use backend::{BackendError, PdfBackend};
pub use llm::openai::{DEFAULT_API_BASE, OpenAiBackend};
pub use llm::{ChatMessage, ChatRequest, Completion, LlmBackend, LlmError, Role, Usage};
pub use pipeline::{GenerationOutcome, generate_document};
pub use pool::{GenerationJob, GenerationPool, generate_batch};
pub use rate_limit::AdaptiveLimiter;
pub use response::{ParseMode, parse_document};

/// Default model requested from the Chat Completions endpoint.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Text pulled out of an uploaded document.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub filename: String,
    pub text: String,
    /// Number of pages in the source (1 for plain-text inputs).
    pub page_count: usize,
}

impl ExtractedText {
    pub fn new(filename: impl Into<String>, text: impl Into<String>, page_count: usize) -> Self {
        Self {
            filename: filename.into(),
            text: text.into(),
            page_count,
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// True when the source yielded no usable text (e.g. a scanned PDF).
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// What the model should produce from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    #[default]
    Summary,
    Report,
    Notes,
    /// Driven entirely by the user's instructions.
    Custom,
}

impl Task {
    pub const ALL: [Task; 4] = [Task::Summary, Task::Report, Task::Notes, Task::Custom];

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Summary => "summary",
            Task::Report => "report",
            Task::Notes => "notes",
            Task::Custom => "custom",
        }
    }

    /// Built-in instructions sent to the model for this task.
    pub fn instructions(&self) -> &'static str {
        match self {
            Task::Summary => {
                "Write a concise executive summary of the source document. Open with a \
                 two to three sentence overview, then cover the main points in short \
                 sections. Preserve key figures, names and dates."
            }
            Task::Report => {
                "Turn the source document into a structured report with sections for \
                 background, key findings, analysis and recommendations. Use bullet \
                 points for lists of findings or actions."
            }
            Task::Notes => {
                "Produce study notes from the source document: one section per topic, \
                 each with a short explanation and bullet points for definitions, facts \
                 and takeaways worth remembering."
            }
            Task::Custom => "Follow the user's instructions below.",
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "summary" | "summarize" => Ok(Task::Summary),
            "report" => Ok(Task::Report),
            "notes" | "study_notes" | "study-notes" => Ok(Task::Notes),
            "custom" => Ok(Task::Custom),
            other => Err(format!(
                "unknown task '{}' (expected summary, report, notes or custom)",
                other
            )),
        }
    }
}

/// Output document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Docx,
    Pdf,
    Markdown,
    Text,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Docx => "docx",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Markdown => "md",
            OutputFormat::Text => "txt",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Markdown => "text/markdown; charset=utf-8",
            OutputFormat::Text => "text/plain; charset=utf-8",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "docx" | "word" => Ok(OutputFormat::Docx),
            "pdf" => Ok(OutputFormat::Pdf),
            "md" | "markdown" => Ok(OutputFormat::Markdown),
            "txt" | "text" => Ok(OutputFormat::Text),
            other => Err(format!(
                "unknown output format '{}' (expected docx, pdf, md or txt)",
                other
            )),
        }
    }
}

/// Per-request generation options chosen by the user.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub task: Task,
    pub instructions: Option<String>,
}

impl GenerationOptions {
    pub fn new(task: Task, instructions: Option<String>) -> Self {
        let instructions = instructions
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self { task, instructions }
    }
}

/// A structured document as produced by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    #[serde(default, alias = "document_title")]
    pub title: String,
    #[serde(
        default,
        alias = "abstract",
        alias = "overview",
        skip_serializing_if = "Option::is_none"
    )]
    pub summary: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// One headed section of a [`GeneratedDocument`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, alias = "title", alias = "header")]
    pub heading: String,
    #[serde(
        default,
        alias = "content",
        alias = "text",
        alias = "body",
        deserialize_with = "string_or_list"
    )]
    pub paragraphs: Vec<String>,
    #[serde(
        default,
        alias = "items",
        alias = "points",
        alias = "bullet_points",
        deserialize_with = "string_or_list"
    )]
    pub bullets: Vec<String>,
}

/// Models sometimes emit a single string where a list is expected.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Null(()) => Vec::new(),
    })
}

impl GeneratedDocument {
    /// True when there is nothing worth rendering.
    pub fn is_empty(&self) -> bool {
        self.summary.as_deref().is_none_or(|s| s.trim().is_empty())
            && self
                .sections
                .iter()
                .all(|s| s.paragraphs.is_empty() && s.bullets.is_empty())
    }

    /// Fill in a title derived from the source filename when the model gave none.
    pub fn ensure_title(&mut self, source_filename: &str) {
        if !self.title.trim().is_empty() {
            return;
        }
        let name = std::path::Path::new(source_filename)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        // ".pdf" is all extension, unlike Path::file_stem's reading of it
        let stem = name.rsplit_once('.').map_or(name.as_str(), |(stem, _)| stem);
        let title = stem
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        self.title = if title.is_empty() {
            "Generated document".to_string()
        } else {
            title
        };
    }

    /// Trim whitespace, split multi-paragraph strings, strip stray bullet
    /// markers and drop empty entries.
    pub fn normalize(&mut self) {
        self.title = self.title.trim().trim_matches('#').trim().to_string();
        self.summary = self
            .summary
            .take()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        for section in &mut self.sections {
            section.heading = section.heading.trim().trim_matches('#').trim().to_string();
            section.paragraphs = section
                .paragraphs
                .iter()
                .flat_map(|p| p.split("\n\n"))
                .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|p| !p.is_empty())
                .collect();
            section.bullets = section
                .bullets
                .iter()
                .flat_map(|b| b.lines())
                .map(response::strip_bullet_marker)
                .filter(|b| !b.is_empty())
                .collect();
        }

        self.sections
            .retain(|s| !(s.heading.is_empty() && s.paragraphs.is_empty() && s.bullets.is_empty()));
    }
}

/// Progress events emitted during generation.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The request is about to be sent to the model.
    Generating {
        filename: String,
        model: String,
        input_chars: usize,
        truncated: bool,
    },
    /// A retryable failure occurred; the call will be retried after `wait`.
    Retrying {
        filename: String,
        attempt: u32,
        wait: Duration,
        reason: String,
    },
    /// The model answered and the answer was parsed.
    Generated {
        filename: String,
        sections: usize,
        parse_mode: ParseMode,
        usage: Option<Usage>,
    },
    /// Generation for this file failed (batch mode).
    Failed { filename: String, message: String },
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("no text could be extracted from {0}")]
    EmptyInput(String),
    #[error("no API key configured for {0}; set OPENAI_API_KEY or api_keys.openai_api_key")]
    MissingApiKey(String),
    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),
    #[error("the model returned an empty document")]
    EmptyDocument,
    #[error("generation cancelled")]
    Cancelled,
}

/// Runtime configuration for generation.
#[derive(Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the endpoint for a JSON object response.
    pub json_mode: bool,
    /// Maximum characters of source text sent to the model (0 = unlimited).
    pub max_input_chars: usize,
    pub llm_timeout_secs: u64,
    pub max_retries: u32,
    pub num_workers: usize,
    pub requests_per_minute: u32,
    pub max_archive_size_mb: u32,
    pub default_format: OutputFormat,
    pub default_task: Task,
    pub output_dir: Option<PathBuf>,
    pub rate_limiter: Arc<AdaptiveLimiter>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("json_mode", &self.json_mode)
            .field("max_input_chars", &self.max_input_chars)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("num_workers", &self.num_workers)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("max_archive_size_mb", &self.max_archive_size_mb)
            .field("default_format", &self.default_format)
            .field("default_task", &self.default_task)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: Some(0.2),
            max_tokens: Some(4096),
            json_mode: true,
            max_input_chars: 60_000,
            llm_timeout_secs: 120,
            max_retries: 3,
            num_workers: 2,
            requests_per_minute: 60,
            max_archive_size_mb: 200,
            default_format: OutputFormat::Docx,
            default_task: Task::Summary,
            output_dir: None,
            rate_limiter: Arc::new(AdaptiveLimiter::per_minute(60)),
        }
    }
}

impl Config {
    /// Build a runtime config from a (merged) config file, filling gaps with defaults.
    pub fn from_config_file(file: &config_file::ConfigFile) -> Self {
        let mut config = Config::default();

        if let Some(ref llm) = file.llm {
            if let Some(ref base) = llm.api_base {
                config.api_base = base.clone();
            }
            if let Some(ref model) = llm.model {
                config.model = model.clone();
            }
            if llm.temperature.is_some() {
                config.temperature = llm.temperature;
            }
            if llm.max_tokens.is_some() {
                config.max_tokens = llm.max_tokens;
            }
            if let Some(json_mode) = llm.json_mode {
                config.json_mode = json_mode;
            }
        }

        if let Some(key) = file.api_keys.as_ref().and_then(|k| k.openai_api_key.clone()) {
            config.api_key = Some(key);
        }

        if let Some(ref limits) = file.limits {
            if let Some(n) = limits.max_input_chars {
                config.max_input_chars = n;
            }
            if let Some(n) = limits.llm_timeout_secs {
                config.llm_timeout_secs = n;
            }
            if let Some(n) = limits.max_retries {
                config.max_retries = n;
            }
            if let Some(n) = limits.num_workers {
                config.num_workers = n.max(1);
            }
            if let Some(n) = limits.requests_per_minute {
                config.requests_per_minute = n;
            }
            if let Some(n) = limits.max_archive_size_mb {
                config.max_archive_size_mb = n;
            }
        }

        if let Some(ref output) = file.output {
            if let Some(ref format) = output.format {
                match format.parse() {
                    Ok(f) => config.default_format = f,
                    Err(e) => tracing::warn!(error = %e, "ignoring output.format from config"),
                }
            }
            if let Some(ref task) = output.task {
                match task.parse() {
                    Ok(t) => config.default_task = t,
                    Err(e) => tracing::warn!(error = %e, "ignoring output.task from config"),
                }
            }
            if let Some(ref dir) = output.output_dir {
                config.output_dir = Some(PathBuf::from(dir));
            }
        }

        let rpm = config.requests_per_minute;
        config.with_rate_limit(rpm)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply environment-style overrides from an arbitrary lookup.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("DOCSCRIBE_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(base) = get("DOCSCRIBE_API_BASE").or_else(|| get("OPENAI_BASE_URL")) {
            self.api_base = base;
        }
        if let Some(model) = get("DOCSCRIBE_MODEL") {
            self.model = model;
        }
        if let Some(secs) = get("LLM_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            self.llm_timeout_secs = secs;
        }
        if let Some(n) = get("MAX_INPUT_CHARS").and_then(|v| v.trim().parse().ok()) {
            self.max_input_chars = n;
        }
        self
    }

    /// Replace the shared limiter with one allowing `requests_per_minute` calls.
    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self.rate_limiter = Arc::new(AdaptiveLimiter::per_minute(requests_per_minute));
        self
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs.max(1))
    }

    /// Maximum total bytes extracted from an uploaded archive (0 = unlimited).
    pub fn max_archive_bytes(&self) -> u64 {
        self.max_archive_size_mb as u64 * 1024 * 1024
    }
}

/// Shared HTTP client tuned for a handful of long-running LLM calls.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("docscribe/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(2)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn task_and_format_parse_aliases() {
        assert_eq!("Study-Notes".parse::<Task>().unwrap(), Task::Notes);
        assert_eq!("summarize".parse::<Task>().unwrap(), Task::Summary);
        assert!("poem".parse::<Task>().is_err());

        assert_eq!("word".parse::<OutputFormat>().unwrap(), OutputFormat::Docx);
        assert_eq!(".PDF".parse::<OutputFormat>().unwrap(), OutputFormat::Pdf);
        assert_eq!("markdown".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("odt".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn options_drop_blank_instructions() {
        let opts = GenerationOptions::new(Task::Custom, Some("   ".into()));
        assert!(opts.instructions.is_none());
        let opts = GenerationOptions::new(Task::Custom, Some(" be brief ".into()));
        assert_eq!(opts.instructions.as_deref(), Some("be brief"));
    }

    #[test]
    fn section_accepts_string_content() {
        let json = r#"{"title":"T","sections":[{"title":"Intro","content":"One.\n\nTwo.","items":"- a\n- b"}]}"#;
        let mut doc: GeneratedDocument = serde_json::from_str(json).unwrap();
        doc.normalize();
        assert_eq!(doc.sections[0].heading, "Intro");
        assert_eq!(doc.sections[0].paragraphs, vec!["One.", "Two."]);
        assert_eq!(doc.sections[0].bullets, vec!["a", "b"]);
    }

    #[test]
    fn section_accepts_null_lists() {
        let json = r#"{"title":"T","sections":[{"heading":"H","paragraphs":null,"bullets":["x"]}]}"#;
        let doc: GeneratedDocument = serde_json::from_str(json).unwrap();
        assert!(doc.sections[0].paragraphs.is_empty());
        assert_eq!(doc.sections[0].bullets, vec!["x"]);
    }

    #[test]
    fn ensure_title_uses_filename_stem() {
        let mut doc = GeneratedDocument::default();
        doc.ensure_title("uploads/annual_report-2024.pdf");
        assert_eq!(doc.title, "annual report 2024");

        let mut doc = GeneratedDocument::default();
        doc.ensure_title(".pdf");
        assert_eq!(doc.title, "Generated document");

        let mut doc = GeneratedDocument::default();
        doc.ensure_title("uploads/.md");
        assert_eq!(doc.title, "Generated document");

        let mut doc = GeneratedDocument::default();
        doc.ensure_title("README");
        assert_eq!(doc.title, "README");

        let mut doc = GeneratedDocument {
            title: "Kept".into(),
            ..Default::default()
        };
        doc.ensure_title("other.pdf");
        assert_eq!(doc.title, "Kept");
    }

    #[test]
    fn empty_document_detection() {
        let mut doc = GeneratedDocument {
            title: "Only a title".into(),
            summary: Some("  ".into()),
            sections: vec![Section {
                heading: "Heading".into(),
                ..Default::default()
            }],
        };
        assert!(doc.is_empty());
        doc.sections[0].bullets.push("point".into());
        assert!(!doc.is_empty());
    }

    #[test]
    fn env_overrides_prefer_docscribe_keys() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-openai"),
            ("DOCSCRIBE_API_KEY", "sk-docscribe"),
            ("OPENAI_BASE_URL", "http://localhost:11434/v1"),
            ("DOCSCRIBE_MODEL", "llama3"),
            ("LLM_TIMEOUT", "30"),
            ("MAX_INPUT_CHARS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-docscribe"));
        assert_eq!(config.api_base, "http://localhost:11434/v1");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.llm_timeout_secs, 30);
        assert_eq!(config.max_input_chars, 60_000);
    }

    #[test]
    fn debug_masks_api_key() {
        let config = Config {
            api_key: Some("sk-secret".into()),
            ..Config::default()
        };
        let dbg = format!("{:?}", config);
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("***"));
    }

    #[test]
    fn from_config_file_applies_sections() {
        let file: config_file::ConfigFile = toml::from_str(
            r#"
            [llm]
            model = "gpt-4.1"
            json_mode = false

            [limits]
            num_workers = 0
            requests_per_minute = 10

            [output]
            format = "pdf"
            task = "nonsense"
            "#,
        )
        .unwrap();

        let config = Config::from_config_file(&file);
        assert_eq!(config.model, "gpt-4.1");
        assert!(!config.json_mode);
        assert_eq!(config.num_workers, 1);
        assert_eq!(config.requests_per_minute, 10);
        assert_eq!(config.default_format, OutputFormat::Pdf);
        assert_eq!(config.default_task, Task::Summary);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }
}
