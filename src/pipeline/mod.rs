//! The page-parallel OCR pipeline.
//!
//! The job is declared as a task graph ([`graph`]) and executed by a bounded
//! scheduler ([`scheduler`]); [`stages`] wires the concrete stages to the
//! external tools. Everything CPU-bound that happens inside the crate
//! (reading page geometry, parsing hOCR, writing the single-page PDFs) runs
//! on the blocking pool.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ repair ──▶ split ──▶ rasterize ──▶ ocr ──▶ render ──▶ merge ──▶ validate
//!           (mutool)  (poppler)  (gs png*)   (tesseract) (lopdf)  (gs pdfwrite) (jhove)
//! ```
//!
//! 1. [`input`]     : validate and stage the input document
//! 2. [`pageinfo`]  : page geometry and image composition, read with lopdf
//! 3. [`hocr`]      : word and line boxes from the recognition output
//! 4. [`render`]    : one searchable page: image plus invisible text layer
//! 5. [`assemble`]  : format declaration, merge, validation and delivery

pub mod assemble;
pub mod graph;
pub mod hocr;
pub mod input;
pub mod pageinfo;
pub mod render;
pub mod scheduler;
pub mod stages;
