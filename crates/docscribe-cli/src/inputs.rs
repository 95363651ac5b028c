//! Resolving command-line inputs into the documents to process.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use docscribe_ingest::archive::{extract_archive, is_archive_path};

/// A document to extract: where it lives and the name shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct InputDoc {
    pub path: PathBuf,
    pub filename: String,
}

fn has_glob_chars(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Expand paths and glob patterns, keeping argument order and dropping
/// duplicates. A pattern that matches nothing is an error, as is a plain
/// path that does not exist.
pub fn resolve_patterns(patterns: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for pattern in patterns {
        let matched: Vec<PathBuf> = if has_glob_chars(pattern) {
            let mut hits = Vec::new();
            for entry in glob::glob(pattern).with_context(|| format!("Invalid pattern: {}", pattern))? {
                match entry {
                    Ok(p) if p.is_file() => hits.push(p),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "skipping unreadable glob match"),
                }
            }
            if hits.is_empty() {
                anyhow::bail!("No files match {}", pattern);
            }
            hits
        } else {
            let p = PathBuf::from(pattern);
            if !p.is_file() {
                anyhow::bail!("File not found: {}", p.display());
            }
            vec![p]
        };

        for p in matched {
            if seen.insert(p.clone()) {
                paths.push(p);
            }
        }
    }
    Ok(paths)
}

/// Turn resolved paths into documents, extracting archives into `scratch`.
/// Returns the documents plus any archive warnings.
pub fn expand_archives(
    paths: &[PathBuf],
    scratch: &Path,
    max_archive_bytes: u64,
) -> anyhow::Result<(Vec<InputDoc>, Vec<String>)> {
    let mut docs = Vec::new();
    let mut warnings = Vec::new();

    for (i, path) in paths.iter().enumerate() {
        if is_archive_path(path) {
            // One subdirectory per archive so index-prefixed names never clash.
            let dir = scratch.join(format!("archive-{}", i));
            std::fs::create_dir_all(&dir)?;
            let result = extract_archive(path, &dir, max_archive_bytes)
                .with_context(|| format!("Failed to extract {}", path.display()))?;
            let archive_name = display_name(path);
            warnings.extend(
                result
                    .warnings
                    .into_iter()
                    .map(|w| format!("{}: {}", archive_name, w)),
            );
            docs.extend(result.members.into_iter().map(|m| InputDoc {
                path: m.path,
                filename: m.filename,
            }));
        } else {
            docs.push(InputDoc {
                path: path.clone(),
                filename: display_name(path),
            });
        }
    }
    Ok((docs, warnings))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Pick `dir/name`, adding `-2`, `-3`, ... before the extension when the
/// name was already used in this run.
pub fn unique_output_path(dir: &Path, name: &str, taken: &mut HashSet<PathBuf>) -> PathBuf {
    let candidate = dir.join(name);
    if taken.insert(candidate.clone()) {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s, Some(e)),
        _ => (name, None),
    };
    let mut n = 2;
    loop {
        let next = match ext {
            Some(ext) => format!("{}-{}.{}", stem, n, ext),
            None => format!("{}-{}", stem, n),
        };
        let candidate = dir.join(next);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_and_plain_paths() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.pdf", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pattern = dir.path().join("*.pdf").display().to_string();
        let plain = dir.path().join("notes.txt").display().to_string();

        let paths = resolve_patterns(&[pattern.clone(), plain, pattern]).unwrap();
        let names: Vec<_> = paths.iter().map(|p| display_name(p)).collect();
        // glob yields sorted matches; the repeated pattern adds nothing
        assert_eq!(names, vec!["a.pdf", "b.pdf", "notes.txt"]);
    }

    #[test]
    fn missing_inputs_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pdf").display().to_string();
        assert!(resolve_patterns(&[missing]).is_err());

        let no_match = dir.path().join("*.docx").display().to_string();
        let err = resolve_patterns(&[no_match]).unwrap_err();
        assert!(err.to_string().starts_with("No files match"));
    }

    #[test]
    fn unique_paths() {
        let dir = Path::new("out");
        let mut taken = HashSet::new();
        assert_eq!(unique_output_path(dir, "a.docx", &mut taken), dir.join("a.docx"));
        assert_eq!(unique_output_path(dir, "a.docx", &mut taken), dir.join("a-2.docx"));
        assert_eq!(unique_output_path(dir, "a.docx", &mut taken), dir.join("a-3.docx"));
        assert_eq!(unique_output_path(dir, "README", &mut taken), dir.join("README"));
        assert_eq!(unique_output_path(dir, "README", &mut taken), dir.join("README-2"));
    }

    #[test]
    fn plain_files_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        std::fs::write(&path, b"# hi").unwrap();

        let (docs, warnings) = expand_archives(&[path.clone()], dir.path(), 0).unwrap();
        assert_eq!(
            docs,
            vec![InputDoc {
                path,
                filename: "doc.md".into()
            }]
        );
        assert!(warnings.is_empty());
    }
}
