//! Job entry points.
//!
//! ## Why validate outside the task graph?
//!
//! The scheduler skips tasks whose outputs are already up to date. The
//! validator's verdict is not a file, so it runs after the graph completes,
//! on every job, against whatever candidate the merge stage left behind.

use crate::config::PipelineConfig;
use crate::error::OcrPdfError;
use crate::output::{JobReport, JobStats};
use crate::pagemeta::PageDescriptor;
use crate::pipeline::{assemble, input, pageinfo, scheduler, stages};
use crate::tools::{tesseract, ToolLog};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Turn the image-only PDF at `input` into a searchable PDF/A at `output`.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(JobReport)` once the output is written. A document that is
/// well-formed but not conformant PDF/A is still delivered; check
/// `report.conformance`.
///
/// # Errors
/// - Input missing, unreadable, or not a PDF
/// - Requested OCR languages not installed (when `check_languages` is set)
/// - Any stage failing, except OCR timeouts, which degrade the page to
///   image-only
/// - The validator reporting the output as malformed (nothing is written)
pub async fn convert(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<JobReport, OcrPdfError> {
    let total_start = Instant::now();
    let input_path = input_path.as_ref();
    let output_path = output_path.as_ref();
    info!("Starting OCR job: {} -> {}", input_path.display(), output_path.display());

    // ── Step 1: Check input and tools ────────────────────────────────────
    input::validate_input(input_path)?;
    if config.check_languages {
        tesseract::check_languages(config, &ToolLog::new()).await?;
    }

    // ── Step 2: Working directory ────────────────────────────────────────
    let work = WorkDir::create(config)?;
    let origin = input::stage_input(input_path, work.path()).await?;

    // ── Step 3: Run the task graph ───────────────────────────────────────
    let ctx = Arc::new(stages::JobContext::new(Arc::new(config.clone()), work.path()));
    let graph = stages::build_graph(&ctx, &origin)?;
    let graph_report = scheduler::run(&graph, config.jobs, config.progress_callback.clone()).await?;

    // ── Step 4: Validate and deliver ─────────────────────────────────────
    let delivery = assemble::validate_and_deliver(
        &config.tools,
        &ctx.log,
        &ctx.assembly,
        &ctx.merged_path(),
        output_path,
        config.progress_callback.as_ref(),
    )
    .await?;

    // ── Step 5: Report ───────────────────────────────────────────────────
    let pages = ctx.page_reports()?;
    let fallback_pages = pages.iter().filter(|p| p.text_layer.is_fallback()).count();
    if fallback_pages > 0 {
        warn!(
            "{} of {} pages were rendered image-only after OCR timeouts",
            fallback_pages,
            pages.len()
        );
    }
    let stats = JobStats {
        total_pages: pages.len(),
        fallback_pages,
        tasks_run: graph_report.tasks_run(),
        tasks_skipped: graph_report.tasks_skipped(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        validation_duration_ms: delivery.validation_time.as_millis() as u64,
    };
    if let Some(cb) = &config.progress_callback {
        cb.on_job_complete(stats.total_pages, stats.fallback_pages);
    }
    info!(
        "OCR job complete: {} pages, {} image-only, {}ms",
        stats.total_pages, stats.fallback_pages, stats.total_duration_ms
    );

    Ok(JobReport {
        output: output_path.to_path_buf(),
        pages,
        conformance: delivery.conformance,
        stats,
        work_dir: work.kept(),
    })
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<JobReport, OcrPdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| OcrPdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_path, output_path, config))
}

/// Read page geometry and image composition without running any tool.
///
/// Shows what the pipeline would decide per page (raster device, render
/// resolution) for a document that `lopdf` can parse as is.
pub async fn inspect(input_path: impl AsRef<Path>) -> Result<Vec<PageDescriptor>, OcrPdfError> {
    let input_path = input_path.as_ref();
    input::validate_input(input_path)?;
    Ok(pageinfo::extract_page_info(input_path).await?.pages)
}

/// The job's working directory.
///
/// A temporary directory is removed when the job ends, successful or not; a
/// kept one is detached up front so it also survives a failed job.
enum WorkDir {
    Temporary(TempDir),
    Kept(PathBuf),
}

impl WorkDir {
    fn create(config: &PipelineConfig) -> Result<Self, OcrPdfError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ocrpdf-");
        let dir = match &config.temp_dir {
            Some(parent) => builder
                .tempdir_in(parent)
                .map_err(|e| OcrPdfError::io(parent, e))?,
            None => builder
                .tempdir()
                .map_err(|e| OcrPdfError::io(std::env::temp_dir(), e))?,
        };
        if config.keep_temporary_files {
            let kept = dir.keep();
            info!("Keeping working directory: {}", kept.display());
            Ok(WorkDir::Kept(kept))
        } else {
            debug!("Working directory: {}", dir.path().display());
            Ok(WorkDir::Temporary(dir))
        }
    }

    fn path(&self) -> &Path {
        match self {
            WorkDir::Temporary(dir) => dir.path(),
            WorkDir::Kept(path) => path,
        }
    }

    fn kept(&self) -> Option<PathBuf> {
        match self {
            WorkDir::Temporary(_) => None,
            WorkDir::Kept(path) => Some(path.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pageinfo::fixtures;

    #[tokio::test]
    async fn missing_input_fails_before_any_tool_runs() {
        let config = PipelineConfig::builder().check_languages(false).build().unwrap();
        let err = convert("/nonexistent/scan.pdf", "/tmp/out.pdf", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrPdfError::FileNotFound { .. }));
        assert_eq!(err.exit_code(), crate::ExitCode::InputFile);
    }

    #[tokio::test]
    async fn missing_repair_tool_is_a_dependency_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan.pdf");
        std::fs::write(&input, fixtures::mono_scan(1, None)).unwrap();
        let mut tools = crate::ToolPaths::default();
        tools.mutool = dir.path().join("no-such-mutool");
        let config = PipelineConfig::builder()
            .check_languages(false)
            .temp_dir(dir.path())
            .tools(tools)
            .build()
            .unwrap();

        let err = convert(&input, dir.path().join("out.pdf"), &config)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), crate::ExitCode::MissingDependency);
        assert!(!dir.path().join("out.pdf").exists());
    }

    #[tokio::test]
    async fn inspect_reads_pages() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan.pdf");
        std::fs::write(&input, fixtures::mono_scan(2, None)).unwrap();

        let pages = inspect(&input).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].index, 1);
        assert_eq!(pages[0].xres_render, 300.0);
    }

    #[test]
    fn kept_work_dir_survives() {
        let parent = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder()
            .temp_dir(parent.path())
            .keep_temporary_files(true)
            .build()
            .unwrap();
        let work = WorkDir::create(&config).unwrap();
        let kept = work.kept().unwrap();
        drop(work);
        assert!(kept.is_dir());
        assert!(kept.starts_with(parent.path()));
    }
}
