//! Result types returned by a finished job.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Outcome of the text-recognition stage for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TextLayer {
    /// OCR finished; `words` positioned glyph runs were placed on the page.
    Recognized { words: usize },
    /// OCR timed out; an empty hOCR page was substituted and the page is
    /// image-only.
    Fallback,
}

impl TextLayer {
    pub fn is_fallback(&self) -> bool {
        matches!(self, TextLayer::Fallback)
    }
}

/// Per-page record in the job report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    /// Zero-based page index.
    pub index: usize,
    /// Raster device chosen for this page (`pngmono`, `pnggray`, `png16m`).
    pub raster_device: String,
    /// Resolution the page was rasterised and OCRed at.
    pub dpi: f64,
    pub text_layer: TextLayer,
}

/// Validator verdict on the assembled document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conformance {
    /// Well-formed and conformant to the PDF/A profile.
    Conformant,
    /// Well-formed, but not valid or not identified as PDF/A. Delivered with
    /// a logged caveat.
    Nonconformant,
    /// Not well-formed. Never delivered.
    Malformed,
}

impl Conformance {
    /// Whether the candidate document may be copied to the output path.
    pub fn delivers_output(self) -> bool {
        !matches!(self, Conformance::Malformed)
    }
}

impl fmt::Display for Conformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Conformance::Conformant => "well-formed and conformant PDF/A",
            Conformance::Nonconformant => "well-formed but not conformant PDF/A",
            Conformance::Malformed => "malformed",
        };
        f.write_str(s)
    }
}

/// Timing and counting statistics for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub total_pages: usize,
    /// Pages whose OCR timed out and were rendered image-only.
    pub fallback_pages: usize,
    /// Stage tasks that ran.
    pub tasks_run: usize,
    /// Stage tasks skipped because their outputs were already up to date.
    pub tasks_skipped: usize,
    pub total_duration_ms: u64,
    pub validation_duration_ms: u64,
}

/// Everything a finished job reports back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Where the output document was written.
    pub output: PathBuf,
    /// Pages in input order.
    pub pages: Vec<PageReport>,
    pub conformance: Conformance,
    pub stats: JobStats,
    /// Working directory, when it was kept for debugging.
    pub work_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_malformed_blocks_delivery() {
        assert!(Conformance::Conformant.delivers_output());
        assert!(Conformance::Nonconformant.delivers_output());
        assert!(!Conformance::Malformed.delivers_output());
    }

    #[test]
    fn text_layer_serialises_with_tag() {
        let json = serde_json::to_string(&TextLayer::Recognized { words: 3 }).unwrap();
        assert_eq!(json, r#"{"kind":"recognized","words":3}"#);
        let json = serde_json::to_string(&TextLayer::Fallback).unwrap();
        assert_eq!(json, r#"{"kind":"fallback"}"#);
    }
}
