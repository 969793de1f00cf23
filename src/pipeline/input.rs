//! Input resolution: turn a path, URL or byte buffer into a local PDF file.
//!
//! pdfium opens documents from the file system, so every input kind ends up
//! as a path. Downloads and in-memory buffers are written to temp storage
//! owned by [`ResolvedInput`] and removed when it is dropped. The `%PDF`
//! magic is checked up front so a stray `.docx` fails with
//! [`GradesheetError::NotAPdf`] rather than a pdfium parse error.

use crate::error::GradesheetError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF on disk, plus whatever temp storage keeps it alive.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the body lives in a temp directory.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
    /// Input was a byte buffer written to a temp file.
    Buffered(NamedTempFile),
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
            ResolvedInput::Buffered(tmp) => tmp.path(),
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL to a local PDF file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, GradesheetError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(GradesheetError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.contains("://") {
        Err(GradesheetError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        resolve_local(input)
    }
}

/// Write `bytes` to a managed temp file after checking the PDF magic.
pub fn resolve_bytes(bytes: &[u8]) -> Result<ResolvedInput, GradesheetError> {
    let mut tmp = NamedTempFile::new()
        .map_err(|e| GradesheetError::Internal(format!("tempfile: {e}")))?;
    check_magic(bytes, tmp.path())?;
    tmp.write_all(bytes)
        .map_err(|e| GradesheetError::Internal(format!("tempfile write: {e}")))?;
    debug!("Buffered {} bytes to {}", bytes.len(), tmp.path().display());
    Ok(ResolvedInput::Buffered(tmp))
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, GradesheetError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(GradesheetError::FileNotFound { path });
    }

    let mut head = Vec::with_capacity(PDF_MAGIC.len());
    match std::fs::File::open(&path) {
        Ok(f) => {
            f.take(PDF_MAGIC.len() as u64)
                .read_to_end(&mut head)
                .map_err(|e| GradesheetError::Internal(format!("read {}: {e}", path.display())))?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(GradesheetError::PermissionDenied { path });
        }
        Err(_) => return Err(GradesheetError::FileNotFound { path }),
    }
    check_magic(&head, &path)?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

fn check_magic(bytes: &[u8], path: &Path) -> Result<(), GradesheetError> {
    if bytes.starts_with(PDF_MAGIC) {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    Err(GradesheetError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, GradesheetError> {
    info!("Downloading gradesheet from: {}", url);

    let failed = |reason: String| GradesheetError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            GradesheetError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let temp_dir = TempDir::new().map_err(|e| GradesheetError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    check_magic(&bytes, &file_path)?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| GradesheetError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to {}", bytes.len(), file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment if it looks like a file name, else `gradesheet.pdf`.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "gradesheet.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(filename_from_url("https://x.edu/files/7-A.pdf?dl=1"), "7-A.pdf");
        assert_eq!(filename_from_url("https://x.edu/download/"), "gradesheet.pdf");
        assert_eq!(filename_from_url("https://x.edu/export"), "gradesheet.pdf");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.err().unwrap();
        assert!(matches!(err, GradesheetError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn unsupported_scheme_is_invalid_input() {
        let err = resolve_input("ftp://x.edu/a.pdf", 5).await.err().unwrap();
        assert!(matches!(err, GradesheetError::InvalidInput { .. }));
        let err = resolve_input("   ", 5).await.err().unwrap();
        assert!(matches!(err, GradesheetError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn non_pdf_file_is_rejected() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"PK\x03\x04rest of a zip").unwrap();
        let err = resolve_input(tmp.path().to_str().unwrap(), 5).await.err().unwrap();
        match err {
            GradesheetError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn local_pdf_resolves_to_itself() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"%PDF-1.7\n").unwrap();
        let resolved = resolve_input(tmp.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.path(), tmp.path());
    }

    #[test]
    fn bytes_are_buffered_and_cleaned_up() {
        let resolved = resolve_bytes(b"%PDF-1.4 minimal").unwrap();
        let path = resolved.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 minimal");
        drop(resolved);
        assert!(!path.exists());
    }

    #[test]
    fn short_buffer_is_not_a_pdf() {
        assert!(matches!(
            resolve_bytes(b"%P"),
            Err(GradesheetError::NotAPdf { magic, .. }) if &magic == b"%P\0\0"
        ));
    }
}
