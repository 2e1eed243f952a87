//! Input validation and staging.
//!
//! ## Why copy the input into the working directory?
//!
//! Every stage derives its output names from its input's name. Staging the
//! document as `<work>/origin.pdf` gives the graph a source with a known
//! name, keeps the user's file untouched, and means nothing the tools write
//! can ever land next to the original. The magic bytes are checked first so
//! a wrong file fails fast with an input error instead of a tool crash.

use crate::error::OcrPdfError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the staged input inside the working directory.
pub const ORIGIN: &str = "origin.pdf";

/// Check that `path` exists, is readable and starts with `%PDF`.
pub fn validate_input(path: &Path) -> Result<(), OcrPdfError> {
    if !path.exists() {
        return Err(OcrPdfError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(OcrPdfError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(OcrPdfError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(OcrPdfError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }

    debug!("Validated input PDF: {}", path.display());
    Ok(())
}

/// Validate `input` and copy it to `<work_dir>/origin.pdf`.
pub async fn stage_input(input: &Path, work_dir: &Path) -> Result<PathBuf, OcrPdfError> {
    validate_input(input)?;
    let staged = work_dir.join(ORIGIN);
    tokio::fs::copy(input, &staged)
        .await
        .map_err(|e| OcrPdfError::io(&staged, e))?;
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file() {
        let err = validate_input(Path::new("/nonexistent/scan.pdf")).unwrap_err();
        assert!(matches!(err, OcrPdfError::FileNotFound { .. }));
    }

    #[test]
    fn not_a_pdf() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04zip").unwrap();
        let err = validate_input(f.path()).unwrap_err();
        match err {
            OcrPdfError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn truncated_file_is_not_a_pdf() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%P").unwrap();
        assert!(matches!(
            validate_input(f.path()),
            Err(OcrPdfError::NotAPdf { .. })
        ));
    }

    #[tokio::test]
    async fn staged_copy_lands_in_work_dir() {
        let work = tempfile::tempdir().unwrap();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.4\n%%EOF\n").unwrap();

        let staged = stage_input(f.path(), work.path()).await.unwrap();
        assert_eq!(staged, work.path().join(ORIGIN));
        assert_eq!(std::fs::read(&staged).unwrap(), b"%PDF-1.4\n%%EOF\n");
    }
}
