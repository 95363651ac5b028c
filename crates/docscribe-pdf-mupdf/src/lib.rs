use std::path::Path;

use mupdf::{Document, TextPageFlags};

use docscribe_core::{BackendError, PdfBackend};

/// MuPDF-based implementation of [`PdfBackend`].
///
/// This crate isolates the mupdf dependency (AGPL-3.0) so that builds
/// without the `mupdf` feature of `docscribe-ingest` do not depend on it.
#[derive(Debug, Default)]
pub struct MupdfBackend;

impl MupdfBackend {
    pub fn new() -> Self {
        Self
    }
}

fn extraction(e: mupdf::Error) -> BackendError {
    BackendError::ExtractionError(e.to_string())
}

impl PdfBackend for MupdfBackend {
    fn name(&self) -> &str {
        "mupdf"
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;

        let document =
            Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))?;
        if document.needs_password().unwrap_or(false) {
            return Err(BackendError::Encrypted);
        }

        let mut pages = Vec::new();
        for page_result in document.pages().map_err(extraction)? {
            let page = page_result.map_err(extraction)?;
            let text_page = page
                .to_text_page(TextPageFlags::empty())
                .map_err(extraction)?;

            let mut page_text = String::new();
            for block in text_page.blocks() {
                for line in block.lines() {
                    let line_text: String = line
                        .chars()
                        .map(|c| c.char().unwrap_or('\u{FFFD}'))
                        .collect();
                    page_text.push_str(&line_text);
                    page_text.push('\n');
                }
                // Blank line between blocks keeps paragraph boundaries.
                page_text.push('\n');
            }
            pages.push(page_text);
        }

        Ok(pages)
    }
}
