//! Markdown and plain-text output.

use docscribe_core::GeneratedDocument;

fn md_escape(s: &str) -> String {
    // Only characters that would change block structure at line start.
    let trimmed = s.trim_start();
    if trimmed.starts_with('#')
        || trimmed.starts_with("- ")
        || trimmed.starts_with("* ")
        || trimmed.starts_with("+ ")
        || trimmed.starts_with('>')
    {
        format!("\\{}", trimmed)
    } else {
        s.to_string()
    }
}

pub fn render_markdown(doc: &GeneratedDocument) -> String {
    let mut out = format!("# {}\n\n", doc.title.trim());

    if let Some(summary) = &doc.summary {
        out.push_str(&format!("{}\n\n", md_escape(summary)));
    }

    for section in &doc.sections {
        if !section.heading.is_empty() {
            out.push_str(&format!("## {}\n\n", section.heading));
        }
        for p in &section.paragraphs {
            out.push_str(&format!("{}\n\n", md_escape(p)));
        }
        if !section.bullets.is_empty() {
            for b in &section.bullets {
                out.push_str(&format!("- {}\n", b));
            }
            out.push('\n');
        }
    }

    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push('\n');
    out
}

pub fn render_text(doc: &GeneratedDocument) -> String {
    let mut out = String::new();
    let title = doc.title.trim();
    out.push_str(title);
    out.push('\n');
    out.push_str(&"=".repeat(title.chars().count().max(3)));
    out.push_str("\n\n");

    if let Some(summary) = &doc.summary {
        out.push_str(summary);
        out.push_str("\n\n");
    }

    for section in &doc.sections {
        if !section.heading.is_empty() {
            out.push_str(&section.heading);
            out.push('\n');
            out.push_str(&"-".repeat(section.heading.chars().count()));
            out.push_str("\n\n");
        }
        for p in &section.paragraphs {
            out.push_str(p);
            out.push_str("\n\n");
        }
        if !section.bullets.is_empty() {
            for b in &section.bullets {
                out.push_str(&format!("  \u{2022} {}\n", b));
            }
            out.push('\n');
        }
    }

    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push('\n');
    out
}
