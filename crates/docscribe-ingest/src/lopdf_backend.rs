use std::path::Path;

use docscribe_core::{BackendError, PdfBackend};
use lopdf::Document;

/// Pure-Rust [`PdfBackend`] built on `lopdf`.
///
/// Text comes straight from content-stream text operators, so reading
/// order and spacing are rougher than MuPDF's. Used when the `mupdf`
/// feature is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfBackend;

impl PdfBackend for LopdfBackend {
    fn name(&self) -> &str {
        "lopdf"
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, BackendError> {
        let doc = Document::load(path).map_err(|e| BackendError::OpenError(e.to_string()))?;
        if doc.is_encrypted() {
            return Err(BackendError::Encrypted);
        }

        let mut pages = Vec::new();
        for page_num in doc.get_pages().into_keys() {
            match doc.extract_text(&[page_num]) {
                Ok(text) => pages.push(text),
                Err(e) => {
                    // One unreadable page should not sink the whole document.
                    tracing::warn!(page = page_num, error = %e, "lopdf could not read page text");
                    pages.push(String::new());
                }
            }
        }
        Ok(pages)
    }
}
