//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the task graph runs.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ocrpdf::{PipelineConfig, PipelineProgressCallback, TextLayer};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FallbackCounter {
//!     fallbacks: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for FallbackCounter {
//!     fn on_page_text(&self, page: usize, layer: &TextLayer) {
//!         if matches!(layer, TextLayer::Fallback) {
//!             self.fallbacks.fetch_add(1, Ordering::SeqCst);
//!             eprintln!("page {} rendered image-only", page + 1);
//!         }
//!     }
//! }
//!
//! let counter = Arc::new(FallbackCounter { fallbacks: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{Conformance, TextLayer};
use std::sync::Arc;

/// Called by the pipeline as stages complete.
///
/// Methods may be called concurrently from different worker tasks; all have
/// no-op defaults so implementors override only what they need.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once the repaired document's page count is known.
    fn on_job_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a stage task finishes (or is skipped as up to date).
    ///
    /// `page` is the zero-based page index for per-page stages.
    fn on_task_complete(&self, stage: &str, page: Option<usize>) {
        let _ = (stage, page);
    }

    /// Called when a page's text layer is settled: recognised, or a
    /// fallback substituted after an OCR timeout.
    fn on_page_text(&self, page: usize, layer: &TextLayer) {
        let _ = (page, layer);
    }

    /// Called with the validator verdict before delivery is decided.
    fn on_validation(&self, conformance: Conformance) {
        let _ = conformance;
    }

    /// Called once after the output file has been written.
    fn on_job_complete(&self, total_pages: usize, fallback_pages: usize) {
        let _ = (total_pages, fallback_pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
