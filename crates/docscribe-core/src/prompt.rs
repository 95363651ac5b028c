//! Prompt construction for document generation.

use crate::llm::{ChatMessage, ChatRequest};
use crate::{Config, ExtractedText, GenerationOptions, Task};

/// Size bookkeeping for one prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptStats {
    /// Characters of source text actually sent.
    pub input_chars: usize,
    /// Characters of source text available.
    pub original_chars: usize,
    pub truncated: bool,
}

const TRUNCATION_NOTE: &str = "[Source text truncated]";

/// Cut `text` to at most `max_chars` characters (0 = unlimited).
///
/// The cut lands on a char boundary, and is pulled back to the last
/// whitespace when that keeps at least 80% of the allowance.
pub fn truncate_text(text: &str, max_chars: usize) -> (&str, bool) {
    if max_chars == 0 {
        return (text, false);
    }
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return (text, false);
    };
    let head = &text[..cut];
    let min_keep = head.len() * 4 / 5;
    match head.rfind(char::is_whitespace) {
        Some(ws) if ws >= min_keep => (head[..ws].trim_end(), true),
        _ => (head, true),
    }
}

/// The system message: role, output contract and formatting rules.
pub fn system_prompt(json_mode: bool) -> String {
    let mut prompt = String::from(
        "You are a careful technical writer. You turn the text of an uploaded document \
         into a new, well-structured document for the user. Only use information found \
         in the source text; do not invent facts, figures or citations. Write in the \
         language of the source unless the user asks otherwise.\n\n",
    );
    if json_mode {
        prompt.push_str(
            "Respond with a single JSON object and nothing else, using this shape:\n\
             {\n\
             \x20 \"title\": \"document title\",\n\
             \x20 \"summary\": \"optional short overview paragraph\",\n\
             \x20 \"sections\": [\n\
             \x20   {\"heading\": \"section heading\", \"paragraphs\": [\"...\"], \"bullets\": [\"...\"]}\n\
             \x20 ]\n\
             }\n\
             Paragraphs are plain prose. Bullets are short items without leading markers. \
             Either list may be empty. Do not use Markdown inside JSON strings.",
        );
    } else {
        prompt.push_str(
            "Respond in Markdown: a single '# ' title line, an optional overview paragraph, \
             then '## ' section headings with paragraphs and '- ' bullet lists. \
             If your client supports it you may instead answer with a JSON object of the \
             form {\"title\", \"summary\", \"sections\": [{\"heading\", \"paragraphs\", \"bullets\"}]}.",
        );
    }
    prompt
}

/// The user message: task instructions, optional user instructions and the source.
pub fn user_prompt(
    source: &ExtractedText,
    options: &GenerationOptions,
    text: &str,
    truncated: bool,
) -> String {
    let task_instructions = match (options.task, options.instructions.is_some()) {
        // Custom with nothing to follow degrades to a summary.
        (Task::Custom, false) => Task::Summary.instructions(),
        (task, _) => task.instructions(),
    };

    let mut prompt = format!("Task: {}\n", task_instructions);
    if let Some(ref extra) = options.instructions {
        prompt.push_str("\nAdditional instructions from the user:\n");
        prompt.push_str(extra);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nSource document: {} ({} page{})\n",
        source.filename,
        source.page_count,
        if source.page_count == 1 { "" } else { "s" }
    ));
    prompt.push_str("\n<source>\n");
    prompt.push_str(text);
    if truncated {
        prompt.push('\n');
        prompt.push_str(TRUNCATION_NOTE);
    }
    prompt.push_str("\n</source>\n");
    prompt
}

/// Build the chat request for one source document.
pub fn build_request(
    source: &ExtractedText,
    options: &GenerationOptions,
    config: &Config,
) -> (ChatRequest, PromptStats) {
    let (text, truncated) = truncate_text(&source.text, config.max_input_chars);
    let stats = PromptStats {
        input_chars: text.chars().count(),
        original_chars: source.char_count(),
        truncated,
    };

    let request = ChatRequest {
        model: config.model.clone(),
        messages: vec![
            ChatMessage::system(system_prompt(config.json_mode)),
            ChatMessage::user(user_prompt(source, options, text, truncated)),
        ],
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        json_mode: config.json_mode,
    };
    (request, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn zero_means_unlimited() {
        assert_eq!(truncate_text("hello world", 0), ("hello world", false));
        assert_eq!(truncate_text("short", 100), ("short", false));
        assert_eq!(truncate_text("exact", 5), ("exact", false));
    }

    #[test]
    fn cuts_at_whitespace_when_close() {
        let (out, truncated) = truncate_text("alpha beta gamma delta", 13);
        assert!(truncated);
        assert_eq!(out, "alpha beta");
    }

    #[test]
    fn hard_cut_when_no_nearby_whitespace() {
        let (out, truncated) = truncate_text("a bcdefghijklmnopqrstuvwxyz", 20);
        assert!(truncated);
        assert_eq!(out, "a bcdefghijklmnopqrs");
    }

    #[test]
    fn never_splits_multibyte_chars() {
        let text = "ééééé ééééé";
        let (out, truncated) = truncate_text(text, 3);
        assert!(truncated);
        assert_eq!(out, "ééé");

        let emoji = "📄📄📄📄";
        let (out, _) = truncate_text(emoji, 2);
        assert_eq!(out.chars().count(), 2);
    }

    #[test]
    fn system_prompt_mentions_json_in_json_mode() {
        // OpenAI rejects json_object responses unless the prompt mentions JSON
        assert!(system_prompt(true).contains("JSON"));
        assert!(system_prompt(false).contains("Markdown"));
    }

    #[test]
    fn custom_without_instructions_falls_back_to_summary() {
        let source = ExtractedText::new("a.pdf", "text", 1);
        let opts = GenerationOptions::new(Task::Custom, None);
        let prompt = user_prompt(&source, &opts, "text", false);
        assert!(prompt.contains(Task::Summary.instructions()));

        let opts = GenerationOptions::new(Task::Custom, Some("List every date".into()));
        let prompt = user_prompt(&source, &opts, "text", false);
        assert!(prompt.contains(Task::Custom.instructions()));
        assert!(prompt.contains("List every date"));
    }

    #[test]
    fn build_request_applies_config_and_truncation() {
        let source = ExtractedText::new("paper.pdf", "word ".repeat(100), 3);
        let config = Config {
            max_input_chars: 50,
            model: "gpt-x".into(),
            json_mode: false,
            ..Config::default()
        };
        let (req, stats) = build_request(&source, &GenerationOptions::default(), &config);

        assert_eq!(req.model, "gpt-x");
        assert!(!req.json_mode);
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert!(stats.truncated);
        assert!(stats.input_chars <= 50);
        assert_eq!(stats.original_chars, 500);

        let user = &req.messages[1].content;
        assert!(user.contains("paper.pdf (3 pages)"));
        assert!(user.contains(TRUNCATION_NOTE));
    }
}
