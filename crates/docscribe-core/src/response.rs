//! Turning model output into a [`GeneratedDocument`].
//!
//! Models are asked for JSON but do not always comply. Parsing tries, in
//! order: the whole answer as JSON, a fenced ```json block, the outermost
//! `{...}` span, and finally a lenient Markdown reading.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::{GeneratedDocument, Section};

/// Which strategy produced the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Json,
    FencedJson,
    EmbeddedJson,
    Markdown,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Json => "json",
            ParseMode::FencedJson => "fenced_json",
            ParseMode::EmbeddedJson => "embedded_json",
            ParseMode::Markdown => "markdown",
        }
    }
}

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```").unwrap());

static BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+•–]|\d{1,3}[.)])\s+").unwrap());

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap());

/// Parse the model's answer. Never fails: anything that is not JSON is read
/// as Markdown. The result is normalized but may be empty.
pub fn parse_document(content: &str) -> (GeneratedDocument, ParseMode) {
    let trimmed = content.trim();

    let (mut doc, mode) = if let Some(doc) = parse_json(trimmed) {
        (doc, ParseMode::Json)
    } else if let Some(doc) = FENCE_RE
        .captures_iter(trimmed)
        .find_map(|c| c.get(1).and_then(|m| parse_json(m.as_str().trim())))
    {
        (doc, ParseMode::FencedJson)
    } else if let Some(doc) = embedded_json(trimmed).and_then(parse_json) {
        (doc, ParseMode::EmbeddedJson)
    } else {
        (parse_markdown(trimmed), ParseMode::Markdown)
    };

    doc.normalize();
    (doc, mode)
}

/// Decode a JSON document, unwrapping a `{"document": {...}}` envelope.
/// Objects with none of the expected fields are rejected.
fn parse_json(s: &str) -> Option<GeneratedDocument> {
    if !s.starts_with('{') {
        return None;
    }
    let mut value: serde_json::Value = serde_json::from_str(s).ok()?;
    if let Some(inner) = value.get_mut("document").filter(|v| v.is_object()) {
        value = inner.take();
    }
    let obj = value.as_object()?;
    let recognised = [
        "title",
        "document_title",
        "summary",
        "abstract",
        "overview",
        "sections",
    ];
    if !recognised.iter().any(|k| obj.contains_key(*k)) {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn embedded_json(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

/// Remove a leading list marker (`-`, `*`, `•`, `1.`, `2)` ...) from a line.
pub fn strip_bullet_marker(line: &str) -> String {
    BULLET_RE.replace(line, "").trim().to_string()
}

fn strip_inline_markup(line: &str) -> String {
    line.replace("**", "").replace("__", "").trim().to_string()
}

/// A line that is only `**Bold text**` reads as a heading.
fn bold_heading(line: &str) -> Option<&str> {
    let inner = line.strip_prefix("**")?.strip_suffix("**")?;
    let inner = inner.trim().trim_end_matches(':');
    (!inner.is_empty() && !inner.contains("**")).then_some(inner)
}

fn parse_markdown(content: &str) -> GeneratedDocument {
    let mut doc = GeneratedDocument::default();
    let mut paragraph: Vec<String> = Vec::new();

    fn flush(paragraph: &mut Vec<String>, sections: &mut Vec<Section>) {
        if paragraph.is_empty() {
            return;
        }
        let text = paragraph.join(" ");
        paragraph.clear();
        current(sections).paragraphs.push(text);
    }

    fn current(sections: &mut Vec<Section>) -> &mut Section {
        if sections.is_empty() {
            sections.push(Section::default());
        }
        let last = sections.len() - 1;
        &mut sections[last]
    }

    for raw in content.lines() {
        let line = raw.trim();

        if line.is_empty() {
            flush(&mut paragraph, &mut doc.sections);
            continue;
        }
        if line.starts_with("```") {
            continue;
        }

        if let Some(caps) = HEADING_RE.captures(line) {
            flush(&mut paragraph, &mut doc.sections);
            let level = caps.get(1).map_or(1, |m| m.as_str().len());
            let text = strip_inline_markup(caps.get(2).map_or("", |m| m.as_str()));
            if level == 1 && doc.title.is_empty() {
                doc.title = text;
            } else {
                doc.sections.push(Section {
                    heading: text,
                    ..Default::default()
                });
            }
            continue;
        }

        if let Some(heading) = bold_heading(line) {
            flush(&mut paragraph, &mut doc.sections);
            doc.sections.push(Section {
                heading: heading.to_string(),
                ..Default::default()
            });
            continue;
        }

        if BULLET_RE.is_match(line) {
            flush(&mut paragraph, &mut doc.sections);
            let item = strip_inline_markup(&strip_bullet_marker(line));
            current(&mut doc.sections).bullets.push(item);
            continue;
        }

        paragraph.push(strip_inline_markup(line));
    }
    flush(&mut paragraph, &mut doc.sections);

    doc
}
