use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::IngestError;

/// A supported document extracted from an archive.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    /// Where the member was written.
    pub path: PathBuf,
    /// The member's original basename.
    pub filename: String,
}

/// Result of archive extraction, including any warnings (e.g. size limit reached).
#[derive(Debug, Default)]
pub struct ArchiveExtraction {
    pub members: Vec<ArchiveMember>,
    pub warnings: Vec<String>,
}

/// Returns true if the given path looks like a supported archive.
pub fn is_archive_path(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".zip") || name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

/// Returns true if an archive member with this name can be processed.
pub fn is_supported_member(name: &str) -> bool {
    let lower = name.to_lowercase();
    [".pdf", ".txt", ".md", ".markdown"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Skip directories' metadata, hidden files, macOS resource forks,
/// path traversal and unsupported types. Returns the basename to keep.
fn accepted_basename(path: &Path) -> Option<String> {
    if path.to_string_lossy().contains("__MACOSX") {
        return None;
    }
    if path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    }) {
        return None;
    }
    let basename = path.file_name()?.to_string_lossy().to_string();
    if basename.starts_with('.') || !is_supported_member(&basename) {
        return None;
    }
    Some(basename)
}

/// Accumulates extracted members under a shared size budget.
struct Collector<'a> {
    dir: &'a Path,
    max_size: u64,
    total_size: u64,
    out: ArchiveExtraction,
}

impl<'a> Collector<'a> {
    fn new(dir: &'a Path, max_size: u64) -> Self {
        Self {
            dir,
            max_size,
            total_size: 0,
            out: ArchiveExtraction::default(),
        }
    }

    /// Count `size` against the budget. Returns false once the limit is exceeded.
    fn admit(&mut self, size: u64) -> bool {
        if self.max_size == 0 {
            return true;
        }
        self.total_size += size;
        if self.total_size > self.max_size {
            self.out.warnings.push(format!(
                "Size limit ({}MB) reached after {} files, skipping remaining",
                self.max_size / 1024 / 1024,
                self.out.members.len()
            ));
            return false;
        }
        true
    }

    fn store(&mut self, index: usize, basename: String, buf: &[u8]) -> Result<(), IngestError> {
        if basename.to_lowercase().ends_with(".pdf") && !buf.starts_with(b"%PDF-") {
            self.out
                .warnings
                .push(format!("Skipping {}: not a valid PDF", basename));
            return Ok(());
        }

        // Flat, index-prefixed names keep same-named members in different folders apart.
        let out_path = self.dir.join(format!("{}_{}", index, basename));
        std::fs::write(&out_path, buf).map_err(|e| {
            IngestError::Archive(format!("Failed to write {}: {}", out_path.display(), e))
        })?;

        self.out.members.push(ArchiveMember {
            path: out_path,
            filename: basename,
        });
        Ok(())
    }

    fn finish(self) -> Result<ArchiveExtraction, IngestError> {
        if self.out.members.is_empty() {
            return Err(IngestError::Archive(
                "No PDF, text or Markdown files found in archive".to_string(),
            ));
        }
        Ok(self.out)
    }
}

/// Read an archive file from disk and extract its supported members into `dir`.
///
/// Supports ZIP and tar.gz archives, detected by extension and magic bytes.
/// `max_size` limits total extracted bytes (0 = unlimited). When the limit is
/// reached, extraction stops and a warning is included in the result.
pub fn extract_archive(
    archive_path: &Path,
    dir: &Path,
    max_size: u64,
) -> Result<ArchiveExtraction, IngestError> {
    let data = std::fs::read(archive_path).map_err(|source| IngestError::Io {
        path: archive_path.display().to_string(),
        source,
    })?;
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    extract_archive_bytes(&name, &data, dir, max_size)
}

/// Extract an archive already held in memory (e.g. an upload).
pub fn extract_archive_bytes(
    name: &str,
    data: &[u8],
    dir: &Path,
    max_size: u64,
) -> Result<ArchiveExtraction, IngestError> {
    let lower = name.to_lowercase();
    if lower.ends_with(".zip") || data.starts_with(b"PK") {
        extract_from_zip(data, dir, max_size)
    } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") || data.starts_with(&[0x1f, 0x8b])
    {
        extract_from_tar_gz(data, dir, max_size)
    } else {
        Err(IngestError::UnsupportedType(format!(
            "Unsupported archive format: {}",
            name
        )))
    }
}

/// Extract supported files from a ZIP archive.
pub fn extract_from_zip(
    data: &[u8],
    dir: &Path,
    max_size: u64,
) -> Result<ArchiveExtraction, IngestError> {
    let cursor = std::io::Cursor::new(data);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| IngestError::Archive(format!("Failed to open ZIP: {}", e)))?;
    let mut collector = Collector::new(dir, max_size);

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| IngestError::Archive(format!("Failed to read ZIP entry: {}", e)))?;
        if file.is_dir() {
            continue;
        }
        // enclosed_name() rejects absolute and `..` paths
        let Some(name) = file.enclosed_name() else {
            continue;
        };
        let Some(basename) = accepted_basename(&name) else {
            continue;
        };

        if !collector.admit(file.size()) {
            break;
        }

        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| {
            IngestError::Archive(format!("Failed to extract {}: {}", name.display(), e))
        })?;
        collector.store(i, basename, &buf)?;
    }

    collector.finish()
}

/// Extract supported files from a tar.gz archive.
pub fn extract_from_tar_gz(
    data: &[u8],
    dir: &Path,
    max_size: u64,
) -> Result<ArchiveExtraction, IngestError> {
    let mut archive = Archive::new(GzDecoder::new(data));
    let entries = archive
        .entries()
        .map_err(|e| IngestError::Archive(format!("Failed to read tar.gz: {}", e)))?;
    let mut collector = Collector::new(dir, max_size);

    for (i, entry) in entries.enumerate() {
        let mut entry =
            entry.map_err(|e| IngestError::Archive(format!("Failed to read tar entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| IngestError::Archive(format!("Failed to read entry path: {}", e)))?
            .to_path_buf();
        let Some(basename) = accepted_basename(&path) else {
            continue;
        };

        if !collector.admit(entry.size()) {
            break;
        }

        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(|e| {
            IngestError::Archive(format!("Failed to extract {}: {}", path.display(), e))
        })?;
        collector.store(i, basename, &buf)?;
    }

    collector.finish()
}
