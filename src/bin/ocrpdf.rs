//! CLI binary for edgequake-ocrpdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig`, renders progress and maps errors to exit codes.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_ocrpdf::{
    convert, inspect, Conformance, ExitCode, OcrPdfError, PdfALevel, PipelineConfig,
    PipelineProgressCallback, ProgressCallback, RasterDevice, TextLayer, ToolPaths,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over pages, advanced as each page's
/// text layer settles. Pages finish out of order; every line names its page.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Repairing document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("OCR");
        self.bar.set_message("");
        self.bar.reset_eta();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_pages} pages…"))
        ));
    }

    fn on_task_complete(&self, stage: &str, page: Option<usize>) {
        match page {
            Some(p) => self.bar.set_message(dim(&format!("{stage} p{}", p + 1))),
            None => self.bar.set_message(dim(stage)),
        }
    }

    fn on_page_text(&self, page: usize, layer: &TextLayer) {
        let line = match layer {
            TextLayer::Recognized { words } => format!(
                "  {} Page {:>4}  {}",
                green("✓"),
                page + 1,
                dim(&format!("{words:>5} words"))
            ),
            TextLayer::Fallback => format!(
                "  {} Page {:>4}  {}",
                yellow("⚠"),
                page + 1,
                yellow("OCR timed out, image-only")
            ),
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_validation(&self, conformance: Conformance) {
        self.bar.set_prefix("Validating");
        let mark = match conformance {
            Conformance::Conformant => green("✔"),
            Conformance::Nonconformant => yellow("⚠"),
            Conformance::Malformed => red("✘"),
        };
        self.bar.println(format!("{mark} Output is {conformance}"));
    }

    fn on_job_complete(&self, total_pages: usize, fallback_pages: usize) {
        self.bar.finish_and_clear();
        if fallback_pages == 0 {
            eprintln!("{} {} pages made searchable", green("✔"), bold(&total_pages.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages made searchable  ({} image-only)",
                yellow("⚠"),
                bold(&(total_pages - fallback_pages).to_string()),
                total_pages,
                yellow(&fallback_pages.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Make a scanned document searchable
  ocrpdf scan.pdf scan.pdfa.pdf

  # German and English, 8 workers, PDF/A-1b
  ocrpdf -l deu+eng -j 8 --pdfa-level 1 scan.pdf out.pdf

  # Show what the pipeline would do per page
  ocrpdf --inspect-only scan.pdf

  # Visible text layer with word boxes, keep intermediate files
  ocrpdf --debug-rendering --keep-temporary-files scan.pdf debug.pdf

  # Machine-readable job report
  ocrpdf --json scan.pdf out.pdf > report.json

EXIT CODES:
  0   success
  1   bad arguments (including missing OCR languages)
  2   input file missing, not a PDF, or unreadable after repair
  3   an external program could not be started
  4   the validator reports the output as malformed; nothing written
  5   output or intermediate file not accessible
  15  any other error

REQUIRED PROGRAMS:
  mutool (mupdf-tools), pdfseparate (poppler-utils), gs (Ghostscript ≥ 9.x),
  tesseract (≥ 3.02, with traineddata for each language), java + JHOVE.
"#;

/// Turn image-only PDFs into searchable PDF/A.
#[derive(Parser, Debug)]
#[command(
    name = "ocrpdf",
    version,
    about = "Turn image-only PDFs into searchable PDF/A",
    long_about = "Repair, split, rasterise and OCR every page of a scanned PDF in parallel, \
place an invisible text layer over each page image, then merge the pages into one \
PDF/A document and validate it.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image-only PDF to process.
    input: PathBuf,

    /// Where to write the searchable PDF/A.
    #[arg(required_unless_present = "inspect_only")]
    output: Option<PathBuf>,

    /// OCR language(s), e.g. `eng`, `deu+eng`; repeatable.
    #[arg(short, long = "language", env = "OCRPDF_LANGUAGE", default_value = "eng")]
    languages: Vec<String>,

    /// Extra Tesseract config file names; repeatable.
    #[arg(long = "tesseract-config", env = "OCRPDF_TESSERACT_CONFIG")]
    tesseract_configs: Vec<String>,

    /// Maximum number of tasks running at once (default: CPU count).
    #[arg(short, long, env = "OCRPDF_JOBS")]
    jobs: Option<usize>,

    /// Per-page OCR timeout in seconds; slower pages are kept image-only.
    #[arg(long, env = "OCRPDF_OCR_TIMEOUT", default_value_t = 180,
          value_parser = clap::value_parser!(u64).range(1..))]
    ocr_timeout: u64,

    /// PDF/A part to produce (1 or 2).
    #[arg(long, env = "OCRPDF_PDFA_LEVEL", default_value_t = 2,
          value_parser = clap::value_parser!(u8).range(1..=2))]
    pdfa_level: u8,

    /// ICC profile used as the PDF/A output intent.
    #[arg(long, env = "OCRPDF_ICC_PROFILE", default_value = "srgb.icc")]
    icc_profile: PathBuf,

    /// Parent directory for the working directory.
    #[arg(long = "temp-folder", env = "OCRPDF_TEMP_FOLDER")]
    temp_folder: Option<PathBuf>,

    /// Keep intermediate files after the job.
    #[arg(short = 'k', long, env = "OCRPDF_KEEP_TEMPORARY_FILES")]
    keep_temporary_files: bool,

    /// Draw the text layer visibly with paragraph and word boxes.
    #[arg(long, env = "OCRPDF_DEBUG_RENDERING")]
    debug_rendering: bool,

    /// Skip the `tesseract --list-langs` check.
    #[arg(long)]
    skip_language_check: bool,

    /// Path to `mutool`.
    #[arg(long, env = "OCRPDF_MUTOOL", default_value = "mutool")]
    mutool: PathBuf,

    /// Path to `pdfseparate`.
    #[arg(long, env = "OCRPDF_PDFSEPARATE", default_value = "pdfseparate")]
    pdfseparate: PathBuf,

    /// Path to Ghostscript.
    #[arg(long, env = "OCRPDF_GS", default_value = "gs")]
    gs: PathBuf,

    /// Path to `tesseract`.
    #[arg(long, env = "OCRPDF_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Path to `java`.
    #[arg(long, env = "OCRPDF_JAVA", default_value = "java")]
    java: PathBuf,

    /// JHOVE application jar.
    #[arg(long, env = "OCRPDF_JHOVE_JAR")]
    jhove_jar: Option<PathBuf>,

    /// JHOVE configuration file.
    #[arg(long, env = "OCRPDF_JHOVE_CONFIG")]
    jhove_config: Option<PathBuf>,

    /// Print the job report (or page info with --inspect-only) as JSON.
    #[arg(long, env = "OCRPDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "OCRPDF_NO_PROGRESS")]
    no_progress: bool,

    /// Print per-page geometry and raster decisions only, no processing.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCRPDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCRPDF_QUIET")]
    quiet: bool,
}

fn main() -> std::process::ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                exit(ExitCode::BadArgs)
            } else {
                exit(ExitCode::Ok)
            };
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} Failed to start runtime: {e}", red("✘"));
            return exit(ExitCode::OtherError);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => exit(ExitCode::Ok),
        Err(e) => {
            eprintln!("{} {:#}", red("✘"), e);
            let code = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<OcrPdfError>())
                .map(OcrPdfError::exit_code)
                .unwrap_or(ExitCode::OtherError);
            exit(code)
        }
    }
}

fn exit(code: ExitCode) -> std::process::ExitCode {
    std::process::ExitCode::from(code as u8)
}

async fn run(cli: Cli) -> Result<()> {
    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let pages = inspect(&cli.input).await.context("Failed to inspect PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&pages).context("Failed to serialise page info")?
            );
        } else {
            println!("File:   {}", cli.input.display());
            println!("Pages:  {}", pages.len());
            for p in &pages {
                println!(
                    "  {:>4}  {:>7.1} x {:<7.1} pt  {:>2} images  {:>4.0} dpi  {}",
                    p.index + 1,
                    p.width_pt,
                    p.height_pt,
                    p.images.len(),
                    p.render_dpi(),
                    RasterDevice::for_page(p),
                );
            }
        }
        return Ok(());
    }

    let output = cli
        .output
        .clone()
        .context("An output path is required")?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run the job ──────────────────────────────────────────────────────
    let report = convert(&cli.input, &output, &config)
        .await
        .context("OCR job failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise job report")?
        );
    } else if !cli.quiet {
        eprintln!(
            "   {}  {}ms total  →  {}",
            dim(&report.conformance.to_string()),
            report.stats.total_duration_ms,
            bold(&report.output.display().to_string()),
        );
        if let Some(dir) = &report.work_dir {
            eprintln!("   {}", dim(&format!("intermediate files kept in {}", dir.display())));
        }
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let defaults = ToolPaths::default();
    let tools = ToolPaths {
        mutool: cli.mutool.clone(),
        pdfseparate: cli.pdfseparate.clone(),
        ghostscript: cli.gs.clone(),
        tesseract: cli.tesseract.clone(),
        java: cli.java.clone(),
        jhove_jar: cli.jhove_jar.clone().unwrap_or(defaults.jhove_jar),
        jhove_config: cli.jhove_config.clone().unwrap_or(defaults.jhove_config),
    };
    let level = if cli.pdfa_level == 1 {
        PdfALevel::PdfA1
    } else {
        PdfALevel::PdfA2
    };

    let mut builder = PipelineConfig::builder()
        .languages(&cli.languages)
        .tesseract_configs(cli.tesseract_configs.iter().cloned())
        .ocr_timeout_secs(cli.ocr_timeout)
        .keep_temporary_files(cli.keep_temporary_files)
        .debug_rendering(cli.debug_rendering)
        .pdfa_level(level)
        .icc_profile(&cli.icc_profile)
        .tools(tools)
        .check_languages(!cli.skip_language_check);

    if let Some(jobs) = cli.jobs {
        builder = builder.jobs(jobs);
    }
    if let Some(dir) = &cli.temp_folder {
        builder = builder.temp_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
