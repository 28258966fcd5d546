//! Reading generated files back out of a session directory.
//!
//! The set of files is fixed by naming convention: a list of suffixes on the
//! document stem inside the output directory, plus at most one log file the
//! compiler announced on its output. Nothing else in the session is read.

use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::files::Encoding;
use crate::mime::{encoding_for_mime, MimeLookup};
use crate::sandbox::contained_path;
use futures::future::try_join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Intermediate artifacts produced by every build.
pub const ARTIFACT_SUFFIXES: &[&str] = &[
    ".dimx",
    "-math-dvi.dim",
    "-math-pdf.dim",
    "-math-dvi.tex",
    "-math-pdf.tex",
    "-math-dvi.final.tex",
    "-math-pdf.final.tex",
    "-bib.bbl",
    "-bib.aux",
];

/// Final artifact and its rendered source, only for full builds.
pub const FULL_BUILD_SUFFIXES: &[&str] = &[".pdf", ".tex"];

static LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*log written at: *([\w\-/\\]+\.log) *\r?$")
        .expect("log line pattern is valid")
});

/// A generated file returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    /// Sandbox-relative path.
    pub path: String,
    pub mime: String,
    pub encoding: Encoding,
    /// Empty when the file was missing or unreadable.
    pub content: String,
}

/// `doc_name` without the extension of its last segment.
///
/// A leading dot does not start an extension: `.hidden` has none.
pub fn document_stem(doc_name: &str) -> &str {
    let name_start = doc_name.rfind(['/', '\\']).map_or(0, |i| i + 1);
    match doc_name[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &doc_name[..name_start + dot],
        _ => doc_name,
    }
}

/// Candidate output files for `doc_name`, relative to the session root.
pub fn candidate_names(out_dir: &str, doc_name: &str, pdf: bool) -> Vec<String> {
    let stem = document_stem(doc_name);
    let full: &[&str] = if pdf { FULL_BUILD_SUFFIXES } else { &[] };
    ARTIFACT_SUFFIXES
        .iter()
        .chain(full)
        .map(|suffix| format!("{}/{}{}", out_dir, stem, suffix))
        .collect()
}

/// Path of the last `log written at: <path>` line in `text`, if any.
pub fn find_last_log(text: &str) -> Option<&str> {
    LOG_LINE
        .captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Read back the generated files of a finished run.
///
/// `combined_output` is the compiler's stdout and stderr, scanned for a log
/// announcement. A missing or unreadable candidate yields no entry. A
/// candidate larger than `limits.file_size` fails the whole harvest.
pub async fn harvest(
    config: &BuildConfig,
    mime: &dyn MimeLookup,
    session_root: &Path,
    doc_name: &str,
    pdf: bool,
    combined_output: &str,
) -> Result<Vec<OutputFile>, BuildError> {
    let mut names = candidate_names(&config.out_dir, doc_name, pdf);
    if let Some(log) = find_last_log(combined_output) {
        match contained_path(session_root, log) {
            Ok(_) => {
                debug!(path = log, "add output");
                names.push(log.to_string());
            }
            Err(e) => debug!(path = log, error = %e, "ignoring announced log"),
        }
    }

    let canonical_root = tokio::fs::canonicalize(session_root)
        .await
        .map_err(|e| BuildError::io(session_root, e))?;
    let limit = config.limits.file_size;

    let files = try_join_all(names.into_iter().map(|name| {
        let mime_type = mime.lookup(&name);
        let canonical_root = canonical_root.as_path();
        async move { read_candidate(session_root, canonical_root, name, mime_type, limit).await }
    }))
    .await?;

    Ok(files
        .into_iter()
        .filter(|file| !file.content.is_empty())
        .collect())
}

async fn read_candidate(
    session_root: &Path,
    canonical_root: &Path,
    name: String,
    mime: String,
    limit: u64,
) -> Result<OutputFile, BuildError> {
    let path = contained_path(session_root, &name)?;
    let encoding = encoding_for_mime(&mime);
    let mut entry = OutputFile {
        path: name,
        mime,
        encoding,
        content: String::new(),
    };

    let Ok(canonical) = tokio::fs::canonicalize(&path).await else {
        return Ok(entry);
    };
    if !canonical.starts_with(canonical_root) {
        warn!(path = %path.display(), target = %canonical.display(), "output escapes session, skipping");
        return Ok(entry);
    }

    let metadata = match tokio::fs::metadata(&canonical).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => {
            debug!(path = %path.display(), "unable to read");
            return Ok(entry);
        }
    };
    if metadata.len() > limit {
        return Err(BuildError::FileTooLarge {
            path: entry.path,
            size: metadata.len(),
            limit,
        });
    }

    let mut bytes = Vec::with_capacity(metadata.len() as usize);
    let read = match tokio::fs::File::open(&canonical).await {
        Ok(file) => file.take(limit + 1).read_to_end(&mut bytes).await,
        Err(e) => Err(e),
    };
    if let Err(e) = read {
        debug!(path = %path.display(), error = %e, "unable to read");
        return Ok(entry);
    }
    if bytes.len() as u64 > limit {
        return Err(BuildError::FileTooLarge {
            path: entry.path,
            size: bytes.len() as u64,
            limit,
        });
    }

    debug!(path = %path.display(), mime = %entry.mime, %encoding, "reading");
    entry.content = encoding.encode(&bytes);
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::GuessMime;
    use tempfile::TempDir;

    #[test]
    fn test_document_stem() {
        assert_eq!(document_stem("doc.mdk"), "doc");
        assert_eq!(document_stem("chapters/intro.v2.mdk"), "chapters/intro.v2");
        assert_eq!(document_stem("dir.d/readme"), "dir.d/readme");
        assert_eq!(document_stem(".hidden"), ".hidden");
        assert_eq!(document_stem("noext"), "noext");
    }

    #[test]
    fn test_candidate_names() {
        let math = candidate_names("out", "doc.mdk", false);
        assert_eq!(math.len(), ARTIFACT_SUFFIXES.len());
        assert_eq!(math[0], "out/doc.dimx");
        assert!(math.contains(&"out/doc-math-dvi.dim".to_string()));
        assert!(!math.contains(&"out/doc.pdf".to_string()));

        let full = candidate_names("out", "doc.mdk", true);
        assert_eq!(full.len(), ARTIFACT_SUFFIXES.len() + 2);
        assert!(full.contains(&"out/doc.pdf".to_string()));
        assert!(full.contains(&"out/doc.tex".to_string()));
    }

    #[test]
    fn test_last_log_wins() {
        let text = "start\nlog written at: out/first.log\nworking\n  LOG WRITTEN AT: out/final.log  \ndone\n";
        assert_eq!(find_last_log(text), Some("out/final.log"));
    }

    #[test]
    fn test_log_line_must_stand_alone() {
        assert_eq!(find_last_log("see log written at: out/x.log\n"), None);
        assert_eq!(find_last_log("log written at: out/x.txt\n"), None);
        assert_eq!(find_last_log("log written at: ../x.log\n"), None);
        assert_eq!(find_last_log(""), None);
    }

    #[test]
    fn test_log_line_tolerates_crlf() {
        assert_eq!(
            find_last_log("log written at: out\\doc.log\r\n"),
            Some("out\\doc.log")
        );
    }

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[tokio::test]
    async fn test_missing_candidates_are_dropped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "out/doc-math-dvi.dim", b"\\dim{1}");
        let config = BuildConfig::default();

        let files = harvest(&config, &GuessMime, tmp.path(), "doc.mdk", false, "")
            .await
            .unwrap();

        assert_eq!(
            files,
            vec![OutputFile {
                path: "out/doc-math-dvi.dim".to_string(),
                mime: "text/plain".to_string(),
                encoding: Encoding::Utf8,
                content: "\\dim{1}".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_binary_artifact_is_base64() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "out/doc.pdf", b"%PDF\x00\xff");
        let config = BuildConfig::default();

        let files = harvest(&config, &GuessMime, tmp.path(), "doc.mdk", true, "")
            .await
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].mime, "application/pdf");
        assert_eq!(files[0].encoding, Encoding::Base64);
        assert_eq!(Encoding::Base64.decode(&files[0].content).unwrap(), b"%PDF\x00\xff");
    }

    #[tokio::test]
    async fn test_full_build_files_ignored_in_math_mode() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "out/doc.pdf", b"%PDF");
        let config = BuildConfig::default();

        let files = harvest(&config, &GuessMime, tmp.path(), "doc.mdk", false, "")
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_is_dropped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "out/doc.dimx", b"");
        let config = BuildConfig::default();

        let files = harvest(&config, &GuessMime, tmp.path(), "doc.mdk", false, "")
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_file_fails() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "out/doc-bib.bbl", &[b'x'; 65]);
        let mut config = BuildConfig::default();
        config.limits.file_size = 64;

        let result = harvest(&config, &GuessMime, tmp.path(), "doc.mdk", false, "").await;
        match result {
            Err(BuildError::FileTooLarge { path, size, limit }) => {
                assert_eq!(path, "out/doc-bib.bbl");
                assert_eq!(size, 65);
                assert_eq!(limit, 64);
            }
            other => panic!("expected FileTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_file_at_limit_is_read() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "out/doc-bib.bbl", &[b'x'; 64]);
        let mut config = BuildConfig::default();
        config.limits.file_size = 64;

        let files = harvest(&config, &GuessMime, tmp.path(), "doc.mdk", false, "")
            .await
            .unwrap();
        assert_eq!(files[0].content.len(), 64);
    }

    #[tokio::test]
    async fn test_announced_log_is_harvested() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "out/doc.log", b"all good");
        let config = BuildConfig::default();
        let output = "log written at: out/early.log\nlog written at: out/doc.log\n\n";

        let files = harvest(&config, &GuessMime, tmp.path(), "doc.mdk", false, output)
            .await
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "out/doc.log");
        assert_eq!(files[0].content, "all good");
    }

    #[tokio::test]
    async fn test_symlink_out_of_session_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("session");
        std::fs::create_dir_all(root.join("out")).unwrap();
        std::fs::write(tmp.path().join("secret.txt"), b"top secret").unwrap();
        std::os::unix::fs::symlink(
            tmp.path().join("secret.txt"),
            root.join("out/doc-bib.aux"),
        )
        .unwrap();
        let config = BuildConfig::default();

        let files = harvest(&config, &GuessMime, &root, "doc.mdk", false, "")
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_directory_candidate_is_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("out/doc.dimx")).unwrap();
        let config = BuildConfig::default();

        let files = harvest(&config, &GuessMime, tmp.path(), "doc.mdk", false, "")
            .await
            .unwrap();
        assert!(files.is_empty());
    }
}
