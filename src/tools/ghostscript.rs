//! Ghostscript: page rasterisation and PDF/A composition.

use crate::config::{PdfALevel, ToolPaths};
use crate::error::OcrPdfError;
use crate::pagemeta::PageDescriptor;
use crate::tools::{ensure_produced, invoke, pattern_literal, ToolInvocation, ToolLog};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LABEL: &str = "ghostscript";

/// Output device used to rasterise one page.
///
/// Ordered from cheapest to richest; the chosen device is the cheapest one
/// that loses nothing from the page's images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RasterDevice {
    /// 1-bit black and white.
    Mono,
    /// 8-bit grayscale.
    Gray,
    /// 24-bit RGB.
    Color,
}

impl RasterDevice {
    /// Pick the device for `page` from its image composition.
    ///
    /// Mono only when every image is single-component 1-bit; gray when every
    /// image is single-component and none is colour. A page without any
    /// images has unknown content and is rendered in colour.
    pub fn for_page(page: &PageDescriptor) -> Self {
        use crate::pagemeta::ImageColor;

        if page.images.is_empty() {
            return RasterDevice::Color;
        }
        if page.images.iter().all(|im| im.components == 1) {
            if page.images.iter().all(|im| im.bits_per_component == 1) {
                return RasterDevice::Mono;
            }
            if page.images.iter().all(|im| im.color == ImageColor::Gray) {
                return RasterDevice::Gray;
            }
        }
        RasterDevice::Color
    }

    /// Ghostscript device name.
    pub fn as_str(self) -> &'static str {
        match self {
            RasterDevice::Mono => "pngmono",
            RasterDevice::Gray => "pnggray",
            RasterDevice::Color => "png16m",
        }
    }
}

impl fmt::Display for RasterDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rasterise the single-page document `input` to a PNG at `output`.
///
/// Ghostscript writes to a `.partial` sibling that is renamed on success, so
/// `output` never exists half-written.
pub async fn rasterize(
    tools: &ToolPaths,
    log: &ToolLog,
    input: &Path,
    output: &Path,
    device: RasterDevice,
    xres: f64,
    yres: f64,
) -> Result<(), OcrPdfError> {
    let partial = partial_path(output);
    let inv = ToolInvocation::new(LABEL, &tools.ghostscript)
        .args(["-dQUIET", "-dSAFER", "-dBATCH", "-dNOPAUSE"])
        .arg(format!("-sDEVICE={}", device.as_str()))
        .arg(format!("-r{:.0}x{:.0}", xres, yres))
        .arg(output_flag(&partial))
        .arg(input);
    invoke(&inv, log, None).await?;
    ensure_produced(&partial)?;
    tokio::fs::rename(&partial, output)
        .await
        .map_err(|e| OcrPdfError::io(output, e))?;
    debug!(device = %device, "Rasterised {}", output.display());
    Ok(())
}

/// Arguments of one PDF/A composition run.
#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    /// The pdfmark prefix declaring the output intent and document info.
    pub definition: &'a Path,
    /// Rendered pages, already in page order.
    pub pages: &'a [PathBuf],
    pub output: &'a Path,
    pub level: PdfALevel,
    pub icc_profile: &'a Path,
    pub threads: usize,
}

/// Merge the rendered pages into one PDF/A candidate document.
pub async fn merge_pdfa(
    tools: &ToolPaths,
    log: &ToolLog,
    req: &MergeRequest<'_>,
) -> Result<(), OcrPdfError> {
    let inv = ToolInvocation::new(LABEL, &tools.ghostscript)
        .args(["-dQUIET", "-dBATCH", "-dNOPAUSE"])
        .arg(format!("-dNumRenderingThreads={}", req.threads.max(1)))
        .arg("-sDEVICE=pdfwrite")
        .arg("-sColorConversionStrategy=/RGB")
        .arg("-sProcessColorModel=DeviceRGB")
        .arg(format!("-dPDFA={}", req.level.part()))
        .arg("-sPDFACompatibilityPolicy=2")
        .arg(format!("-sOutputICCProfile={}", req.icc_profile.display()))
        .arg(output_flag(req.output))
        .arg(req.definition)
        .args(req.pages);
    invoke(&inv, log, None).await?;
    ensure_produced(req.output)
}

fn output_flag(path: &Path) -> String {
    format!("-sOutputFile={}", pattern_literal(path))
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}
