//! # edgequake-ocrpdf
//!
//! Turn image-only (scanned) PDFs into searchable PDF/A.
//!
//! ## Why this crate?
//!
//! A scanned PDF is a stack of pictures: you cannot search it, select text
//! in it, or archive it under PDF/A rules. The tools that fix this already
//! exist (Ghostscript, Tesseract, poppler, mupdf, JHOVE), but chaining them
//! by hand is slow and fragile. This crate drives them as a page-parallel
//! task graph: every page is rasterised, recognised and re-rendered on its
//! own worker, an OCR timeout degrades only that page to image-only, and the
//! pages are merged back into one validated PDF/A document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Repair     mutool clean (fix xref / stream lengths)
//!  ├─ 2. Split      one single-page PDF per page (pdfseparate)
//!  ├─ 3. Rasterize  Ghostscript, device picked from the page's images
//!  ├─ 4. OCR        Tesseract → hOCR (timeout → image-only page)
//!  ├─ 5. Render     image + invisible text layer, one PDF per page (lopdf)
//!  ├─ 6. Merge      Ghostscript pdfwrite in PDF/A mode, pages in order
//!  └─ 7. Validate   JHOVE PDF-hul; malformed output is never delivered
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ocrpdf::{convert, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .languages(["eng", "deu"])
//!         .jobs(4)
//!         .build()?;
//!     let report = convert("scan.pdf", "scan.pdfa.pdf", &config).await?;
//!     eprintln!(
//!         "{} pages, {} image-only, {}",
//!         report.stats.total_pages, report.stats.fallback_pages, report.conformance
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocrpdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-ocrpdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pagemeta;
pub mod pipeline;
pub mod progress;
pub mod tools;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PdfALevel, PipelineConfig, PipelineConfigBuilder, ToolPaths};
pub use convert::{convert, convert_sync, inspect};
pub use error::{ExitCode, OcrPdfError, StateError};
pub use output::{Conformance, JobReport, JobStats, PageReport, TextLayer};
pub use pagemeta::{ImageColor, ImageRef, PageDescriptor, PageMetadataStore};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use tools::ghostscript::RasterDevice;
