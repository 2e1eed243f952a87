//! Document repair with `mutool clean`.

use crate::config::ToolPaths;
use crate::error::OcrPdfError;
use crate::tools::{ensure_produced, invoke, ToolInvocation, ToolLog};
use std::path::Path;

pub const LABEL: &str = "mutool";

/// Rewrite `input` to `output`, fixing xref tables and stream lengths.
pub async fn repair(
    tools: &ToolPaths,
    log: &ToolLog,
    input: &Path,
    output: &Path,
) -> Result<(), OcrPdfError> {
    let inv = ToolInvocation::new(LABEL, &tools.mutool)
        .arg("clean")
        .arg(input)
        .arg(output);
    invoke(&inv, log, None).await?;
    ensure_produced(output)
}
