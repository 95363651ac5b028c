use std::path::Path;

use docscribe_core::{GeneratedDocument, OutputFormat};
use thiserror::Error;

pub mod docx;
pub mod pdf;
pub mod plain;

pub use docx::render_docx;
pub use pdf::render_pdf;
pub use plain::{render_markdown, render_text};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to write DOCX package: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to write PDF: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Render a document into the bytes of the requested format.
pub fn render(doc: &GeneratedDocument, format: OutputFormat) -> Result<Vec<u8>, RenderError> {
    let bytes = match format {
        OutputFormat::Docx => render_docx(doc)?,
        OutputFormat::Pdf => render_pdf(doc)?,
        OutputFormat::Markdown => render_markdown(doc).into_bytes(),
        OutputFormat::Text => render_text(doc).into_bytes(),
    };
    tracing::debug!(format = %format, bytes = bytes.len(), "rendered document");
    Ok(bytes)
}

/// Output filename for a document generated from `source`: the source
/// stem with the format's extension, e.g. `report.pdf` → `report.docx`.
pub fn output_filename(source: &str, format: OutputFormat) -> String {
    let stem = Path::new(source)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "document".to_string());
    // Keep the name safe for Content-Disposition and any filesystem.
    let stem: String = stem
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("{}.{}", stem, format.extension())
}
