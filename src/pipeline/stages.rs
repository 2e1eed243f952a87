//! The concrete OCR job graph.
//!
//! Every stage runner captures one shared [`JobContext`]. Runners touch the
//! page metadata store only through `get`, which copies the descriptor out
//! under the lock, so no lock is ever held across a tool invocation.
//!
//! Page metadata is extracted inside the split runner rather than in repair:
//! split stages are dynamically named and therefore never skipped as up to
//! date, which guarantees the store is populated before any per-page task is
//! created.

use crate::config::PipelineConfig;
use crate::error::{OcrPdfError, StateError};
use crate::output::{PageReport, TextLayer};
use crate::pagemeta::{PageDescriptor, PageMetadataStore};
use crate::pipeline::assemble::{self, Assembly};
use crate::pipeline::graph::{runner, Artifact, Naming, StageKind, StageSpec, StageTask, TaskGraph};
use crate::pipeline::render::{self, RenderRequest};
use crate::pipeline::{hocr, pageinfo};
use crate::tools::ghostscript::{self, RasterDevice};
use crate::tools::tesseract::{self, OcrOutcome, OcrRequest};
use crate::tools::{mutool, pdfseparate, ToolLog};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub const SOURCE: &str = "input";
pub const REPAIR: &str = "repair";
pub const SPLIT: &str = "split";
pub const RASTERIZE: &str = "rasterize";
pub const OCR: &str = "ocr";
pub const RENDER: &str = "render";
pub const PDFA_DEF: &str = "pdfa_def";
pub const MERGE: &str = "merge";

const REPAIRED: &str = "repaired.pdf";
const DEFINITION: &str = "pdfa_def.ps";
const MERGED: &str = "merged.pdf";

/// State shared by every task of one job.
pub struct JobContext {
    pub config: Arc<PipelineConfig>,
    pub store: PageMetadataStore,
    pub log: ToolLog,
    pub assembly: Assembly,
    work_dir: PathBuf,
    title: Mutex<Option<String>>,
    /// Pages whose OCR timed out.
    fallbacks: Mutex<BTreeSet<usize>>,
    layers: Mutex<BTreeMap<usize, TextLayer>>,
}

impl JobContext {
    pub fn new(config: Arc<PipelineConfig>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            store: PageMetadataStore::new(),
            log: ToolLog::new(),
            assembly: Assembly::new(),
            work_dir: work_dir.into(),
            title: Mutex::new(None),
            fallbacks: Mutex::new(BTreeSet::new()),
            layers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// The merged candidate document.
    pub fn merged_path(&self) -> PathBuf {
        self.work_dir.join(MERGED)
    }

    pub fn title(&self) -> Option<String> {
        lock(&self.title).clone()
    }

    fn record_layer(&self, page: usize, layer: TextLayer) {
        lock(&self.layers).insert(page, layer);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_page_text(page, &layer);
        }
    }

    /// One report per page, in page order.
    ///
    /// Pages whose render task was skipped as up to date have no recorded
    /// layer; it is read back from the kept hOCR.
    pub fn page_reports(&self) -> Result<Vec<PageReport>, OcrPdfError> {
        let total = self.store.len().unwrap_or(0);
        let layers = lock(&self.layers).clone();
        let mut reports = Vec::with_capacity(total);
        for index in 0..total {
            let page = self.store.get(index)?;
            let text_layer = match layers.get(&index) {
                Some(layer) => *layer,
                None => self.kept_layer(index)?,
            };
            reports.push(PageReport {
                index,
                raster_device: RasterDevice::for_page(&page).to_string(),
                dpi: page.render_dpi(),
                text_layer,
            });
        }
        Ok(reports)
    }

    fn kept_layer(&self, index: usize) -> Result<TextLayer, OcrPdfError> {
        let path = self.work_dir.join(format!("{:06}.hocr", index + 1));
        let xml = std::fs::read_to_string(&path).map_err(|e| OcrPdfError::io(&path, e))?;
        if tesseract::is_fallback_hocr(&xml) {
            return Ok(TextLayer::Fallback);
        }
        let page = hocr::parse_str(&xml).map_err(|detail| OcrPdfError::HocrParse {
            path: path.clone(),
            detail,
        })?;
        Ok(TextLayer::Recognized {
            words: page.text_runs().len(),
        })
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn task_page(task: &StageTask) -> Result<usize, OcrPdfError> {
    task.page.ok_or_else(|| {
        StateError::GraphDefinition(format!("stage '{}' ran without a page", task.stage)).into()
    })
}

/// Stage runner bound to the job context.
fn bind<F, Fut>(ctx: &Arc<JobContext>, f: F) -> crate::pipeline::graph::StageRunner
where
    F: Fn(Arc<JobContext>, StageTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Artifact>, OcrPdfError>> + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    runner(move |task| f(Arc::clone(&ctx), task))
}

/// Declare the job graph over the staged input document `origin`.
///
/// ```text
/// input ─▶ repair ─▶ split ─┬▶ rasterize ─▶ ocr ─┐
///                           │        └───────────┴▶ render ─┐
///                           └▶ pdfa_def ────────────────────┴▶ merge
/// ```
pub fn build_graph(ctx: &Arc<JobContext>, origin: &Path) -> Result<TaskGraph, StateError> {
    let work = ctx.work_dir.clone();
    let mut graph = TaskGraph::new();
    graph.add_source(SOURCE, vec![Artifact::new(origin, None)])?;

    graph.add_stage(
        StageSpec::new(REPAIR, StageKind::Transform, Naming::Fixed(work.join(REPAIRED)), bind(ctx, repair))
            .inputs([SOURCE]),
    )?;
    graph.add_stage(StageSpec::new(SPLIT, StageKind::Split, Naming::Dynamic, bind(ctx, split)).inputs([REPAIR]))?;
    graph.add_stage(
        StageSpec::new(
            RASTERIZE,
            StageKind::Transform,
            Naming::replace_suffix(".page.pdf", ".page.png"),
            bind(ctx, rasterize),
        )
        .inputs([SPLIT]),
    )?;
    graph.add_stage(
        StageSpec::new(OCR, StageKind::Transform, Naming::replace_suffix(".page.png", ".hocr"), bind(ctx, ocr))
            .inputs([RASTERIZE]),
    )?;
    graph.add_stage(
        StageSpec::new(
            RENDER,
            StageKind::Collate,
            Naming::page_prefixed(&work, ".rendered.pdf"),
            bind(ctx, render_stage),
        )
        .inputs([RASTERIZE, OCR]),
    )?;
    // Waits for split so the document title is known.
    graph.add_stage(
        StageSpec::new(PDFA_DEF, StageKind::Merge, Naming::Fixed(work.join(DEFINITION)), bind(ctx, pdfa_def))
            .inputs([SPLIT]),
    )?;
    graph.add_stage(
        StageSpec::new(MERGE, StageKind::Merge, Naming::Fixed(work.join(MERGED)), bind(ctx, merge))
            .inputs([PDFA_DEF, RENDER]),
    )?;
    Ok(graph)
}

async fn repair(ctx: Arc<JobContext>, task: StageTask) -> Result<Vec<Artifact>, OcrPdfError> {
    let input = &task.input(0)?.path;
    let output = task.output()?;
    info!("Repairing {}", input.display());
    mutool::repair(&ctx.config.tools, &ctx.log, input, output).await?;
    task.output_artifact()
}

async fn split(ctx: Arc<JobContext>, task: StageTask) -> Result<Vec<Artifact>, OcrPdfError> {
    let repaired = &task.input(0)?.path;
    let doc = pageinfo::extract_page_info(repaired).await?;
    reject_user_units(repaired, &doc.pages)?;
    let total = doc.pages.len();
    ctx.store.populate(doc.pages)?;
    *lock(&ctx.title) = doc.title;
    info!("Document has {} pages", total);
    if let Some(cb) = &ctx.config.progress_callback {
        cb.on_job_start(total);
    }

    let pages = pdfseparate::split(&ctx.config.tools, &ctx.log, repaired, &ctx.work_dir, total).await?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(index, path)| Artifact::page(path, index))
        .collect())
}

/// Ghostscript's PDF/A writer drops `/UserUnit`, so scaled pages would come
/// out at the wrong size.
fn reject_user_units(path: &Path, pages: &[PageDescriptor]) -> Result<(), OcrPdfError> {
    match pages.iter().find(|p| p.user_unit != 1.0) {
        Some(page) => Err(OcrPdfError::UnsupportedUserUnit {
            path: path.to_path_buf(),
            page: page.index + 1,
            user_unit: page.user_unit,
        }),
        None => Ok(()),
    }
}

async fn rasterize(ctx: Arc<JobContext>, task: StageTask) -> Result<Vec<Artifact>, OcrPdfError> {
    let page = task_page(&task)?;
    let desc = ctx.store.get(page)?;
    let device = RasterDevice::for_page(&desc);
    debug!(page, device = %device, xres = desc.xres_render, yres = desc.yres_render, "Rasterising page");
    ghostscript::rasterize(
        &ctx.config.tools,
        &ctx.log,
        &task.input(0)?.path,
        task.output()?,
        device,
        desc.xres_render,
        desc.yres_render,
    )
    .await?;
    task.output_artifact()
}

async fn ocr(ctx: Arc<JobContext>, task: StageTask) -> Result<Vec<Artifact>, OcrPdfError> {
    let page = task_page(&task)?;
    let desc = ctx.store.get(page)?;
    let languages = ctx.config.language_arg();
    let request = OcrRequest {
        image: &task.input(0)?.path,
        output: task.output()?,
        languages: &languages,
        configs: &ctx.config.tesseract_configs,
        timeout: ctx.config.ocr_timeout,
        page_pixels: (desc.width_pixels(), desc.height_pixels()),
    };
    if tesseract::recognize(&ctx.config.tools, &ctx.log, &request).await? == OcrOutcome::Fallback {
        lock(&ctx.fallbacks).insert(page);
    }
    task.output_artifact()
}

async fn render_stage(ctx: Arc<JobContext>, task: StageTask) -> Result<Vec<Artifact>, OcrPdfError> {
    let page = task_page(&task)?;
    let desc = ctx.store.get(page)?;
    let device = RasterDevice::for_page(&desc);
    let rendered = render::render_page(RenderRequest {
        image: task.input(0)?.path.clone(),
        hocr: task.input(1)?.path.clone(),
        output: task.output()?.to_path_buf(),
        page: desc,
        device,
        debug: ctx.config.debug_rendering,
    })
    .await?;

    let layer = if lock(&ctx.fallbacks).contains(&page) {
        TextLayer::Fallback
    } else {
        TextLayer::Recognized {
            words: rendered.words,
        }
    };
    debug!(page, words = rendered.words, fallback = layer.is_fallback(), "Rendered page");
    ctx.record_layer(page, layer);
    task.output_artifact()
}

async fn pdfa_def(ctx: Arc<JobContext>, task: StageTask) -> Result<Vec<Artifact>, OcrPdfError> {
    let title = ctx.title();
    assemble::write_pdfa_definition(task.output()?, &ctx.config.icc_profile, title.as_deref()).await?;
    task.output_artifact()
}

async fn merge(ctx: Arc<JobContext>, task: StageTask) -> Result<Vec<Artifact>, OcrPdfError> {
    let (definition, pages) = task
        .inputs
        .split_first()
        .ok_or_else(|| StateError::GraphDefinition("merge without a format definition".into()))?;
    let pages: Vec<PathBuf> = pages.iter().map(|a| a.path.clone()).collect();
    assemble::merge_pages(
        &ctx.config,
        &ctx.log,
        &ctx.assembly,
        &definition.path,
        &pages,
        task.output()?,
    )
    .await?;
    task.output_artifact()
}
