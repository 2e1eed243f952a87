//! External programs the pipeline drives.
//!
//! [`invoke`] runs any program uniformly; the per-tool modules only know how
//! to build each program's argument vector and where it leaves its output.

pub mod ghostscript;
pub mod invoke;
pub mod jhove;
pub mod logsink;
pub mod mutool;
pub mod pdfseparate;
pub mod tesseract;

use crate::error::OcrPdfError;
use std::path::Path;

pub use invoke::{invoke, ExitOutcome, FallbackFn, InvocationResult, ToolInvocation};
pub use logsink::ToolLog;

/// Fail with `MissingArtifact` unless a tool really left `path` behind.
///
/// Several tools exit zero without writing anything when their input is
/// degenerate.
pub(crate) fn ensure_produced(path: &Path) -> Result<(), OcrPdfError> {
    match std::fs::metadata(path) {
        Ok(m) if m.is_file() => Ok(()),
        _ => Err(OcrPdfError::MissingArtifact {
            path: path.to_path_buf(),
        }),
    }
}

/// `path` as a literal inside a printf-style output pattern.
///
/// Ghostscript's `-sOutputFile` and `pdfseparate`'s page pattern both expand
/// `%` sequences.
pub(crate) fn pattern_literal(path: &Path) -> String {
    path.display().to_string().replace('%', "%%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_signs_are_doubled() {
        assert_eq!(pattern_literal(Path::new("/tmp/100%/a.pdf")), "/tmp/100%%/a.pdf");
        assert_eq!(pattern_literal(Path::new("/tmp/plain")), "/tmp/plain");
    }
}
