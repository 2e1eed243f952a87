//! Page separation with poppler's `pdfseparate`.

use crate::config::ToolPaths;
use crate::error::OcrPdfError;
use crate::tools::{ensure_produced, invoke, pattern_literal, ToolInvocation, ToolLog};
use std::path::{Path, PathBuf};

pub const LABEL: &str = "pdfseparate";

/// File name of the single-page document for zero-based page `index`.
pub fn page_file_name(index: usize) -> String {
    format!("{:06}.page.pdf", index + 1)
}

fn page_pattern(dir: &Path) -> String {
    format!("{}/%06d.page.pdf", pattern_literal(dir))
}

/// Split `input` into one file per page inside `dir`.
///
/// `page_count` is known from the page metadata store; the returned paths
/// are in page order and every one of them is checked to exist.
pub async fn split(
    tools: &ToolPaths,
    log: &ToolLog,
    input: &Path,
    dir: &Path,
    page_count: usize,
) -> Result<Vec<PathBuf>, OcrPdfError> {
    // pdfseparate substitutes the 1-based page number into the pattern.
    let pattern = page_pattern(dir);
    let inv = ToolInvocation::new(LABEL, &tools.pdfseparate)
        .arg(input)
        .arg(&pattern);
    invoke(&inv, log, None).await?;

    let pages: Vec<PathBuf> = (0..page_count)
        .map(|i| dir.join(page_file_name(i)))
        .collect();
    for p in &pages {
        ensure_produced(p)?;
    }
    Ok(pages)
}
