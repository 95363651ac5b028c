use std::path::Path;

use thiserror::Error;

pub mod archive;
pub mod lopdf_backend;
pub mod text;

// Re-export domain types for convenience
pub use docscribe_core::{BackendError, ExtractedText, PdfBackend};
// Re-export archive API
pub use archive::{ArchiveExtraction, ArchiveMember, extract_archive, is_archive_path};
pub use lopdf_backend::LopdfBackend;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("PDF extraction error: {0}")]
    Pdf(#[from] BackendError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    UnsupportedType(String),
    #[error("{0} has a .pdf extension but doesn't appear to be a valid PDF")]
    NotAPdf(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("{0} is not valid UTF-8 text")]
    InvalidText(String),
}

/// The type of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    /// Plain text or Markdown.
    Text,
    Zip,
    TarGz,
}

impl FileType {
    pub fn is_archive(&self) -> bool {
        matches!(self, FileType::Zip | FileType::TarGz)
    }
}

fn has_text_extension(lower: &str) -> bool {
    lower.ends_with(".txt") || lower.ends_with(".md") || lower.ends_with(".markdown")
}

/// Detect file type from extension first, then magic bytes.
pub fn detect_file_type(filename: &str, data: &[u8]) -> Result<FileType, IngestError> {
    let lower = filename.to_lowercase();

    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        return Ok(FileType::TarGz);
    }
    if lower.ends_with(".zip") {
        return Ok(FileType::Zip);
    }
    if lower.ends_with(".pdf") {
        if !data.starts_with(b"%PDF-") {
            return Err(IngestError::NotAPdf(filename.to_string()));
        }
        return Ok(FileType::Pdf);
    }
    if has_text_extension(&lower) {
        return Ok(FileType::Text);
    }

    // Try detecting by magic bytes
    if data.starts_with(b"%PDF-") {
        return Ok(FileType::Pdf);
    }
    if data.starts_with(b"PK") {
        return Ok(FileType::Zip);
    }
    if data.starts_with(&[0x1f, 0x8b]) {
        return Ok(FileType::TarGz);
    }

    Err(IngestError::UnsupportedType(
        "Unsupported file type. Please upload a PDF, text, Markdown, ZIP, or tar.gz file."
            .to_string(),
    ))
}

/// The PDF backend compiled into this build.
#[cfg(feature = "mupdf")]
pub fn default_backend() -> Box<dyn PdfBackend> {
    Box::new(docscribe_pdf_mupdf::MupdfBackend::default())
}

/// The PDF backend compiled into this build.
#[cfg(not(feature = "mupdf"))]
pub fn default_backend() -> Box<dyn PdfBackend> {
    Box::new(LopdfBackend)
}

/// Extract normalized text from a PDF, text or Markdown file on disk.
///
/// Dispatches on extension, falling back to the file's magic bytes:
/// - `.txt` / `.md` / `.markdown` → read as UTF-8
/// - `.pdf` (or `%PDF-` content) → the [`default_backend`]
///
/// Archives are rejected here; expand them with [`extract_archive`] first.
pub fn extract_file(path: &Path) -> Result<ExtractedText, IngestError> {
    let filename = display_name(path);
    let data = std::fs::read(path).map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;

    match detect_file_type(&filename, &data)? {
        FileType::Text => extract_text_bytes(&filename, &data),
        FileType::Pdf => extract_pdf_with(path, &filename, default_backend().as_ref()),
        FileType::Zip | FileType::TarGz => Err(IngestError::UnsupportedType(format!(
            "{} is an archive; extract it before reading text",
            filename
        ))),
    }
}

/// Extract normalized text from a PDF with an explicit backend.
///
/// `filename` is the name reported to the user, which for uploads and
/// archive members differs from the scratch file on disk.
pub fn extract_pdf_with(
    path: &Path,
    filename: &str,
    backend: &dyn PdfBackend,
) -> Result<ExtractedText, IngestError> {
    let pages = backend.extract_pages(path)?;
    let text = text::join_pages(&pages);
    tracing::debug!(
        filename,
        backend = backend.name(),
        pages = pages.len(),
        chars = text.len(),
        "extracted PDF text"
    );
    Ok(ExtractedText::new(filename, text, pages.len()))
}

/// Decode a text or Markdown upload and normalize it.
pub fn extract_text_bytes(filename: &str, data: &[u8]) -> Result<ExtractedText, IngestError> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    let raw = std::str::from_utf8(data).map_err(|_| IngestError::InvalidText(filename.to_string()))?;
    Ok(ExtractedText::new(filename, text::normalize(raw), 1))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_extension_first() {
        assert_eq!(
            detect_file_type("paper.PDF", b"%PDF-1.7").unwrap(),
            FileType::Pdf
        );
        assert_eq!(detect_file_type("notes.md", b"# hi").unwrap(), FileType::Text);
        assert_eq!(detect_file_type("a.markdown", b"").unwrap(), FileType::Text);
        assert_eq!(detect_file_type("batch.tgz", b"").unwrap(), FileType::TarGz);
        // Extension wins even when the content looks like something else
        assert_eq!(detect_file_type("x.zip", b"%PDF-").unwrap(), FileType::Zip);
    }

    #[test]
    fn pdf_extension_requires_magic() {
        let err = detect_file_type("fake.pdf", b"<html>").unwrap_err();
        assert!(matches!(err, IngestError::NotAPdf(name) if name == "fake.pdf"));
    }

    #[test]
    fn falls_back_to_magic_bytes() {
        assert_eq!(detect_file_type("upload", b"%PDF-1.4").unwrap(), FileType::Pdf);
        assert_eq!(detect_file_type("upload", b"PK\x03\x04").unwrap(), FileType::Zip);
        assert_eq!(
            detect_file_type("upload", &[0x1f, 0x8b, 0x08]).unwrap(),
            FileType::TarGz
        );
        assert!(matches!(
            detect_file_type("photo.png", b"\x89PNG"),
            Err(IngestError::UnsupportedType(_))
        ));
    }

    #[test]
    fn archive_types() {
        assert!(FileType::Zip.is_archive());
        assert!(FileType::TarGz.is_archive());
        assert!(!FileType::Pdf.is_archive());
        assert!(!FileType::Text.is_archive());
    }

    #[test]
    fn text_bytes_strip_bom_and_normalize() {
        let got = extract_text_bytes("a.txt", b"\xEF\xBB\xBFLine one  \r\n\r\n\r\n\r\nLine two").unwrap();
        assert_eq!(got.text, "Line one\n\nLine two");
        assert_eq!(got.page_count, 1);
        assert_eq!(got.filename, "a.txt");
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let err = extract_text_bytes("bad.txt", &[0x66, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, IngestError::InvalidText(_)));
    }
}
