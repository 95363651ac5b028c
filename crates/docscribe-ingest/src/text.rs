//! Cleanup of raw extracted text before it is sent to the model.

use once_cell::sync::Lazy;
use regex::Regex;

/// A word broken across lines with a hyphen: "gener-\nation".
static HYPHEN_BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L})-\n[ \t]*(\p{Ll})").unwrap());

static INLINE_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{00A0}]{2,}").unwrap());

static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalize extracted text:
/// - unify line endings, turn form feeds into paragraph breaks
/// - drop control characters and trailing spaces
/// - rejoin words hyphenated across line breaks
/// - collapse runs of blank lines (and of inline spaces) to one
pub fn normalize(raw: &str) -> String {
    let unified = raw
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{000C}', "\n\n");

    let cleaned: String = unified
        .lines()
        .map(|line| {
            let line: String = line
                .chars()
                .filter(|c| !c.is_control() || *c == '\t')
                .collect();
            INLINE_SPACE_RE.replace_all(line.trim_end(), " ").into_owned()
        })
        .collect::<Vec<_>>()
        .join("\n");

    let dehyphenated = HYPHEN_BREAK_RE.replace_all(&cleaned, "$1$2");
    BLANK_RUN_RE
        .replace_all(&dehyphenated, "\n\n")
        .trim()
        .to_string()
}

/// Normalize each page and join them with a blank line, skipping empty pages.
pub fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .map(|p| normalize(p))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejoins_hyphenated_words() {
        assert_eq!(normalize("the gener-\nation gap"), "the generation gap");
        // Capitalised continuation is a real hyphenated compound or a list
        assert_eq!(normalize("Jean-\nPaul"), "Jean-\nPaul");
        assert_eq!(normalize("state-of-the-\n  art"), "state-of-theart");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(normalize("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(normalize("a\n  \n \t\n\nb"), "a\n\nb");
    }

    #[test]
    fn trims_trailing_space_and_inline_runs() {
        assert_eq!(normalize("  lead kept   \nnext\t\t word  "), "lead kept\nnext word");
    }

    #[test]
    fn form_feed_and_crlf() {
        assert_eq!(normalize("page one\r\n\u{000C}page two"), "page one\n\npage two");
        assert_eq!(normalize("a\rb"), "a\nb");
    }

    #[test]
    fn drops_control_chars() {
        assert_eq!(normalize("ab\u{0000}c\u{0007}d"), "abcd");
    }

    #[test]
    fn join_pages_skips_blank_pages() {
        let pages = vec!["First page.\n".to_string(), "   \n".to_string(), "Third.".to_string()];
        assert_eq!(join_pages(&pages), "First page.\n\nThird.");
    }
}
