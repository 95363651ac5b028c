use std::io::Write;
use std::path::Path;

use docscribe_core::{Config, ExtractedText, GenerationOutcome, ProgressEvent};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print a warning line (archive size limit, skipped members, ...).
pub fn print_warning(w: &mut dyn Write, message: &str, color: ColorMode) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} {}", "WARNING:".yellow(), message)
    } else {
        writeln!(w, "WARNING: {}", message)
    }
}

/// Print a one-line summary after text extraction.
pub fn print_extraction_summary(
    w: &mut dyn Write,
    text: &ExtractedText,
    color: ColorMode,
) -> std::io::Result<()> {
    let stats = format!(
        "({} pages, {} words, {} chars)",
        text.page_count,
        text.word_count(),
        text.char_count()
    );
    if color.enabled() {
        writeln!(w, "Extracted {} {}", text.filename.bold(), stats.dimmed())?;
    } else {
        writeln!(w, "Extracted {} {}", text.filename, stats)?;
    }
    if text.is_blank() {
        print_warning(
            w,
            &format!(
                "{} contains no extractable text (scanned PDF?)",
                text.filename
            ),
            color,
        )?;
    }
    Ok(())
}

/// Print a real-time progress event.
pub fn print_progress(
    w: &mut dyn Write,
    event: &ProgressEvent,
    color: ColorMode,
) -> std::io::Result<()> {
    match event {
        ProgressEvent::Generating {
            filename,
            model,
            input_chars,
            truncated,
        } => {
            let note = if *truncated { ", truncated" } else { "" };
            writeln!(
                w,
                "Generating {} with {} ({} chars{})",
                filename, model, input_chars, note
            )?;
        }
        ProgressEvent::Retrying {
            filename,
            attempt,
            wait,
            reason,
        } => {
            let msg = format!(
                "{}: retry {} in {:.1}s ({})",
                filename,
                attempt,
                wait.as_secs_f64(),
                reason
            );
            if color.enabled() {
                writeln!(w, "{}", msg.yellow())?;
            } else {
                writeln!(w, "{}", msg)?;
            }
        }
        ProgressEvent::Generated {
            filename,
            sections,
            parse_mode,
            usage,
        } => {
            let tokens = usage
                .map(|u| format!(", {} + {} tokens", u.prompt_tokens, u.completion_tokens))
                .unwrap_or_default();
            if color.enabled() {
                writeln!(
                    w,
                    "{} -> {} ({} sections, {}{})",
                    filename,
                    "DONE".green(),
                    sections,
                    parse_mode.as_str(),
                    tokens
                )?;
            } else {
                writeln!(
                    w,
                    "{} -> DONE ({} sections, {}{})",
                    filename,
                    sections,
                    parse_mode.as_str(),
                    tokens
                )?;
            }
        }
        ProgressEvent::Failed { filename, message } => {
            if color.enabled() {
                writeln!(w, "{} -> {} {}", filename, "FAILED".red(), message)?;
            } else {
                writeln!(w, "{} -> FAILED {}", filename, message)?;
            }
        }
    }
    Ok(())
}

/// Print where a generated document was written.
pub fn print_written(
    w: &mut dyn Write,
    outcome: &GenerationOutcome,
    path: &Path,
    color: ColorMode,
) -> std::io::Result<()> {
    let title = &outcome.document.title;
    let secs = format!("{:.1}s", outcome.elapsed.as_secs_f64());
    if color.enabled() {
        writeln!(
            w,
            "{} {} \"{}\" {}",
            "Wrote".green(),
            path.display().bold(),
            title,
            secs.dimmed()
        )
    } else {
        writeln!(w, "Wrote {} \"{}\" {}", path.display(), title, secs)
    }
}

/// Print the closing summary of a generate run.
pub fn print_summary(
    w: &mut dyn Write,
    succeeded: usize,
    failed: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    let sep = "=".repeat(40);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(
            w,
            "{} generated, {} failed",
            succeeded.to_string().green(),
            if failed > 0 {
                failed.to_string().red().to_string()
            } else {
                failed.to_string()
            }
        )?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "{} generated, {} failed", succeeded, failed)?;
    }
    Ok(())
}

/// Print the resolved runtime configuration. The API key is masked.
pub fn print_config(
    w: &mut dyn Write,
    config: &Config,
    sources: &[(String, bool)],
    color: ColorMode,
) -> std::io::Result<()> {
    let key = match &config.api_key {
        Some(k) if k.chars().count() > 8 => {
            let chars: Vec<char> = k.chars().collect();
            let head: String = chars[..3].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        }
        Some(_) => "***".to_string(),
        None => "(not set)".to_string(),
    };
    let opt = |v: Option<String>| v.unwrap_or_else(|| "(default)".to_string());

    let rows: Vec<(&str, String)> = vec![
        ("api_base", config.api_base.clone()),
        ("api_key", key),
        ("model", config.model.clone()),
        ("temperature", opt(config.temperature.map(|t| t.to_string()))),
        ("max_tokens", opt(config.max_tokens.map(|t| t.to_string()))),
        ("json_mode", config.json_mode.to_string()),
        ("max_input_chars", config.max_input_chars.to_string()),
        ("llm_timeout_secs", config.llm_timeout_secs.to_string()),
        ("max_retries", config.max_retries.to_string()),
        ("num_workers", config.num_workers.to_string()),
        ("requests_per_minute", config.requests_per_minute.to_string()),
        ("max_archive_size_mb", config.max_archive_size_mb.to_string()),
        ("format", config.default_format.to_string()),
        ("task", config.default_task.to_string()),
        (
            "output_dir",
            opt(config.output_dir.as_ref().map(|p| p.display().to_string())),
        ),
    ];

    for (name, value) in rows {
        if color.enabled() {
            writeln!(w, "{:>20} = {}", name.bold(), value)?;
        } else {
            writeln!(w, "{:>20} = {}", name, value)?;
        }
    }

    writeln!(w)?;
    for (path, exists) in sources {
        let status = if *exists { "found" } else { "not found" };
        if color.enabled() {
            writeln!(w, "{} {}", path, format!("({})", status).dimmed())?;
        } else {
            writeln!(w, "{} ({})", path, status)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docscribe_core::{ParseMode, Usage};
    use std::time::Duration;

    fn render(event: ProgressEvent) -> String {
        let mut buf = Vec::new();
        print_progress(&mut buf, &event, ColorMode(false)).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn progress_lines() {
        assert_eq!(
            render(ProgressEvent::Generating {
                filename: "a.pdf".into(),
                model: "gpt-4o-mini".into(),
                input_chars: 1200,
                truncated: true,
            }),
            "Generating a.pdf with gpt-4o-mini (1200 chars, truncated)\n"
        );
        assert_eq!(
            render(ProgressEvent::Retrying {
                filename: "a.pdf".into(),
                attempt: 2,
                wait: Duration::from_millis(1500),
                reason: "rate limited".into(),
            }),
            "a.pdf: retry 2 in 1.5s (rate limited)\n"
        );
        assert_eq!(
            render(ProgressEvent::Generated {
                filename: "a.pdf".into(),
                sections: 3,
                parse_mode: ParseMode::FencedJson,
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5
                }),
            }),
            "a.pdf -> DONE (3 sections, fenced_json, 10 + 5 tokens)\n"
        );
        assert_eq!(
            render(ProgressEvent::Failed {
                filename: "b.txt".into(),
                message: "boom".into(),
            }),
            "b.txt -> FAILED boom\n"
        );
    }

    #[test]
    fn config_masks_key() {
        let config = Config {
            api_key: Some("sk-abcdefghijklmnop".into()),
            ..Config::default()
        };
        let mut buf = Vec::new();
        print_config(&mut buf, &config, &[], ColorMode(false)).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("api_key = sk-...mnop"));
        assert!(!out.contains("abcdefghijkl"));
    }

    #[test]
    fn blank_extraction_warns() {
        let mut buf = Vec::new();
        let text = ExtractedText::new("scan.pdf", "   ", 3);
        print_extraction_summary(&mut buf, &text, ColorMode(false)).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.starts_with("Extracted scan.pdf (3 pages, 0 words, 3 chars)\n"));
        assert!(out.contains("WARNING: scan.pdf contains no extractable text"));
    }
}
