use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("PDF is encrypted and cannot be read")]
    Encrypted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for PDF text extraction backends.
///
/// Implementors only pull raw per-page text out of the file; cleanup
/// (dehyphenation, whitespace) happens in `docscribe_ingest::text`.
pub trait PdfBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Extract the text of every page, in page order.
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, BackendError>;

    /// Extract the full text content of a PDF file, pages separated by a blank line.
    fn extract_text(&self, path: &Path) -> Result<String, BackendError> {
        Ok(self.extract_pages(path)?.join("\n\n"))
    }
}
